//! Application configuration (`AppConfig.yaml`)

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use costsheet_core::pipeline::TokenProjects;
use costsheet_core::SyncPolicy;
use costsheet_xlsx::DEFAULT_CURRENCY_FORMAT;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AppConfig {
    pub files: FilesConfig,
    pub tempo: TempoConfig,
    #[serde(default)]
    pub roster: RosterConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FilesConfig {
    /// Roster workbook
    pub project_config: PathBuf,
    /// Report workbook the period sheet is written into
    pub report: PathBuf,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TempoConfig {
    pub url: String,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TokenConfig {
    #[serde(skip_serializing)]
    pub token: String,
    /// Comma separated project keys
    pub projects: String,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct RosterConfig {
    #[serde(default)]
    pub keep_inactive_projects: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ReportConfig {
    pub currency_format: Option<String>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Tokens with their project keys; tokens without projects are dropped
    pub fn token_projects(&self) -> Vec<TokenProjects> {
        self.tempo
            .tokens
            .iter()
            .map(|t| TokenProjects::new(t.token.as_str(), split_projects(&t.projects)))
            .filter(|t| !t.projects.is_empty())
            .collect()
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            keep_inactive_projects: self.roster.keep_inactive_projects,
        }
    }

    pub fn currency_format(&self) -> &str {
        self.report
            .currency_format
            .as_deref()
            .unwrap_or(DEFAULT_CURRENCY_FORMAT)
    }
}

/// `"ABC, DEF,,GHI "` -> `["ABC", "DEF", "GHI"]`
pub fn split_projects(projects: &str) -> Vec<String> {
    projects
        .split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(String::from)
        .collect()
}
