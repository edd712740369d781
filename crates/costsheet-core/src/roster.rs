//! Persisted per-project roster and its synchronization with a report.
//!
//! The roster is the single source of truth for user positions and rates.
//! After every run it is rebuilt from the report: users who reported time
//! keep their current values, and users the roster already knew but who were
//! idle this period are carried over unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ProjectKey, Rate, Report};

/// Position and hourly rate of one user
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    pub position: String,
    pub rate: Rate,
}

impl UserConfig {
    pub fn new(position: impl Into<String>, rate: Rate) -> Self {
        Self {
            position: position.into(),
            rate,
        }
    }
}

/// Roster entry for one project
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub key: ProjectKey,
    pub display_name: String,
    pub owner: String,
    pub manager: String,
    /// User display name -> configuration
    pub users: BTreeMap<String, UserConfig>,
}

impl ProjectConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn manager(mut self, manager: impl Into<String>) -> Self {
        self.manager = manager.into();
        self
    }

    pub fn user(mut self, name: impl Into<String>, config: UserConfig) -> Self {
        self.users.insert(name.into(), config);
        self
    }
}

/// How [`Roster::synchronize`] treats roster projects missing from the report
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPolicy {
    /// Append roster projects that did not appear in the report
    pub keep_inactive_projects: bool,
}

/// All project configurations, in document order
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    pub projects: Vec<ProjectConfig>,
}

impl Roster {
    pub fn new(projects: Vec<ProjectConfig>) -> Self {
        Self { projects }
    }

    pub fn get(&self, key: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|p| p.key == key)
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Merge the report into this roster, producing the roster to persist.
    ///
    /// For every report project the report users' position and rate win; roster
    /// users absent from the report keep their stored values. The result replaces
    /// the stored roster as a whole.
    pub fn synchronize(&self, report: &Report, policy: SyncPolicy) -> Roster {
        let mut projects: Vec<ProjectConfig> = report
            .projects
            .iter()
            .map(|project| {
                let mut users: BTreeMap<String, UserConfig> = project
                    .users
                    .iter()
                    .map(|u| (u.name.clone(), UserConfig::new(u.position.as_str(), u.rate)))
                    .collect();

                if let Some(existing) = self.get(&project.key) {
                    for (name, config) in &existing.users {
                        users
                            .entry(name.clone())
                            .or_insert_with(|| config.clone());
                    }
                }

                ProjectConfig {
                    key: project.key.clone(),
                    display_name: project.display_name.clone().unwrap_or_default(),
                    owner: project.owner.clone(),
                    manager: project.manager.clone(),
                    users,
                }
            })
            .collect();

        if policy.keep_inactive_projects {
            let inactive: Vec<ProjectConfig> = self
                .projects
                .iter()
                .filter(|p| report.get_project(&p.key).is_none())
                .cloned()
                .collect();
            projects.extend(inactive);
        }

        Roster { projects }
    }
}
