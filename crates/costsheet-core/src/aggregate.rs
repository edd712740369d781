//! Worklog aggregation
//!
//! Folds the flat list of raw entries fetched for each project into the
//! hierarchical [`Report`]: project -> user -> issue -> per-date effort.
//!
//! Duplicate (user, issue, date) rows are summed into a single effort, users
//! are resolved against the roster by display name, and the user list is
//! sorted case-insensitively by name. Users with equal names keep the order
//! in which their first entry was seen.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use crate::{Effort, Issue, Period, Project, ProjectKey, RawEntry, Report, Roster, User};

/// Raw entries fetched for one project
#[derive(Clone, Debug, Default)]
pub struct ProjectWorklog {
    pub key: ProjectKey,
    pub entries: Vec<RawEntry>,
}

impl ProjectWorklog {
    pub fn new(key: impl Into<String>, entries: Vec<RawEntry>) -> Self {
        Self {
            key: key.into(),
            entries,
        }
    }
}

/// Build the report for `period`, one project per worklog, in the given order
pub fn aggregate(period: Period, worklogs: Vec<ProjectWorklog>, roster: &Roster) -> Report {
    let projects = worklogs
        .iter()
        .map(|worklog| aggregate_project(&worklog.key, &worklog.entries, roster))
        .collect();

    Report { period, projects }
}

/// Build a single project block from its raw entries.
///
/// Project metadata comes verbatim from the roster entry for `key`; a project
/// without a roster entry gets no display name, owner or manager.
pub fn aggregate_project(key: &str, entries: &[RawEntry], roster: &Roster) -> Project {
    let config = roster.get(key);

    let mut users: Vec<User> = group_by_user(entries)
        .into_iter()
        .map(|bucket| {
            let user_config = config.and_then(|c| c.users.get(bucket.name));
            User {
                account_id: bucket.account_id.to_string(),
                name: bucket.name.to_string(),
                position: user_config.map(|u| u.position.clone()).unwrap_or_default(),
                rate: user_config.map_or(0, |u| u.rate),
                issues: bucket.into_issues(),
            }
        })
        .collect();

    // stable sort keeps first-seen order among equal names
    users.sort_by_cached_key(|u| u.name.to_lowercase());

    let mut project = Project::new(key);
    if let Some(config) = config {
        project = project
            .display_name(config.display_name.as_str())
            .owner(config.owner.as_str())
            .manager(config.manager.as_str());
    }
    project.users = users;
    project
}

struct UserBucket<'a> {
    account_id: &'a str,
    name: &'a str,
    issues: Vec<IssueBucket<'a>>,
    issue_index: HashMap<&'a str, usize>,
}

struct IssueBucket<'a> {
    key: &'a str,
    seconds_by_date: BTreeMap<NaiveDate, u64>,
}

impl<'a> UserBucket<'a> {
    fn add(&mut self, entry: &'a RawEntry) {
        let index = match self.issue_index.get(entry.issue_key.as_str()) {
            Some(&index) => index,
            None => {
                self.issues.push(IssueBucket {
                    key: &entry.issue_key,
                    seconds_by_date: BTreeMap::new(),
                });
                let index = self.issues.len() - 1;
                self.issue_index.insert(&entry.issue_key, index);
                index
            }
        };

        *self.issues[index]
            .seconds_by_date
            .entry(entry.date)
            .or_default() += entry.seconds_spent;
    }

    fn into_issues(self) -> Vec<Issue> {
        self.issues
            .into_iter()
            .map(|bucket| Issue {
                key: bucket.key.to_string(),
                efforts: bucket
                    .seconds_by_date
                    .into_iter()
                    .map(|(date, seconds)| Effort { date, seconds })
                    .collect(),
            })
            .collect()
    }
}

/// Group entries by account id, preserving first-seen order
fn group_by_user(entries: &[RawEntry]) -> Vec<UserBucket<'_>> {
    let mut buckets: Vec<UserBucket<'_>> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for entry in entries {
        let position = *index.entry(entry.account_id.as_str()).or_insert_with(|| {
            buckets.push(UserBucket {
                account_id: &entry.account_id,
                name: &entry.display_name,
                issues: Vec::new(),
                issue_index: HashMap::new(),
            });
            buckets.len() - 1
        });
        buckets[position].add(entry);
    }

    buckets
}
