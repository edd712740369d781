//! # costsheet-core
//!
//! Core domain model and traits for the costsheet report engine.
//!
//! This crate provides:
//! - Domain types: `Report`, `Project`, `User`, `Issue`, `Effort`, `Period`
//! - The persisted roster: `Roster`, `ProjectConfig`, `UserConfig`
//! - Worklog aggregation (`aggregate`) and roster synchronization (`roster`)
//! - Collaborator traits: `WorklogSource`, `RosterStore`, `Renderer`
//! - The run orchestrator (`pipeline::ReportPipeline`)
//! - Error types
//!
//! ## Example
//!
//! ```rust
//! use chrono::NaiveDate;
//! use costsheet_core::aggregate::{aggregate, ProjectWorklog};
//! use costsheet_core::{Period, RawEntry, Roster};
//!
//! let period = Period::month(2024, 3).unwrap();
//! let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
//! let worklog = ProjectWorklog::new(
//!     "ABC",
//!     vec![RawEntry::new("u1", "Jane Doe", "ABC-1", day, 7200)],
//! );
//!
//! let report = aggregate(period, vec![worklog], &Roster::default());
//! assert_eq!(report.projects[0].users[0].total_seconds(), 7200);
//! ```

pub mod aggregate;
pub mod pipeline;
pub mod roster;

pub use roster::{ProjectConfig, Roster, SyncPolicy, UserConfig};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// ============================================================================
// Type Aliases
// ============================================================================

/// Issue-tracker project code, e.g. `ABC`
pub type ProjectKey = String;

/// Worklog service account identifier
pub type AccountId = String;

/// Hourly rate in whole currency units
pub type Rate = u32;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Convert seconds to hours rounded to two decimals (5400 -> 1.5, 3661 -> 1.02)
pub fn seconds_to_hours(seconds: u64) -> f64 {
    let hours = seconds as f64 / SECONDS_PER_HOUR;
    (hours * 100.0).round() / 100.0
}

// ============================================================================
// Period
// ============================================================================

/// Inclusive reporting date range.
///
/// A period always lies within one calendar month or spans two adjacent ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    from: NaiveDate,
    to: NaiveDate,
}

impl Period {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, InputError> {
        if from > to {
            return Err(InputError::InvertedPeriod { from, to });
        }
        if month_index(to) - month_index(from) > 1 {
            return Err(InputError::PeriodTooLong { from, to });
        }
        Ok(Self { from, to })
    }

    /// First to last day of the given calendar month
    pub fn month(year: i32, month: u32) -> Result<Self, InputError> {
        let from = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| InputError::Month(format!("{year}-{month:02}")))?;
        let (next_year, next_month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };
        let to = NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .and_then(|d| d.pred_opt())
            .ok_or_else(|| InputError::Month(format!("{year}-{month:02}")))?;
        Self::new(from, to)
    }

    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }

    pub fn is_single_month(&self) -> bool {
        month_index(self.from) == month_index(self.to)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }

    /// Every calendar day of the period, in order
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let to = self.to;
        self.from.iter_days().take_while(move |d| *d <= to)
    }

    pub fn num_days(&self) -> usize {
        (self.to - self.from).num_days() as usize + 1
    }
}

fn month_index(date: NaiveDate) -> i32 {
    date.year() * 12 + date.month0() as i32
}

// ============================================================================
// Worklog input
// ============================================================================

/// A single time entry as delivered by the worklog service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry {
    pub account_id: AccountId,
    pub display_name: String,
    pub issue_key: String,
    pub date: NaiveDate,
    pub seconds_spent: u64,
}

impl RawEntry {
    pub fn new(
        account_id: impl Into<String>,
        display_name: impl Into<String>,
        issue_key: impl Into<String>,
        date: NaiveDate,
        seconds_spent: u64,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            display_name: display_name.into(),
            issue_key: issue_key.into(),
            date,
            seconds_spent,
        }
    }
}

// ============================================================================
// Report
// ============================================================================

/// Aggregated report for one period
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub period: Period,
    pub projects: Vec<Project>,
}

impl Report {
    pub fn new(period: Period) -> Self {
        Self {
            period,
            projects: Vec::new(),
        }
    }

    pub fn date_from(&self) -> NaiveDate {
        self.period.from()
    }

    pub fn date_to(&self) -> NaiveDate {
        self.period.to()
    }

    pub fn get_project(&self, key: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.key == key)
    }
}

/// A project block of the report
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub key: ProjectKey,
    /// Human-readable name; the key is shown when absent
    pub display_name: Option<String>,
    pub owner: String,
    /// Empty manager disables color coding for the project
    pub manager: String,
    /// Sorted case-insensitively by display name
    pub users: Vec<User>,
}

impl Project {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            display_name: None,
            owner: String::new(),
            manager: String::new(),
            users: Vec::new(),
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.display_name = (!name.is_empty()).then_some(name);
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

    pub fn user(mut self, user: User) -> Self {
        self.users.push(user);
        self
    }

    /// Name shown in the report: display name, or the key when there is none
    pub fn title(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.key)
    }

    pub fn has_manager(&self) -> bool {
        !self.manager.is_empty()
    }

    pub fn get_user(&self, name: &str) -> Option<&User> {
        self.users.iter().find(|u| u.name == name)
    }
}

/// A user who logged time on a project during the period
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub account_id: AccountId,
    pub name: String,
    pub position: String,
    pub rate: Rate,
    pub issues: Vec<Issue>,
}

impl User {
    pub fn new(account_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            name: name.into(),
            position: String::new(),
            rate: 0,
            issues: Vec::new(),
        }
    }

    pub fn position(mut self, position: impl Into<String>) -> Self {
        self.position = position.into();
        self
    }

    pub fn rate(mut self, rate: Rate) -> Self {
        self.rate = rate;
        self
    }

    pub fn issue(mut self, issue: Issue) -> Self {
        self.issues.push(issue);
        self
    }

    /// Seconds per day summed across all issues
    pub fn seconds_by_date(&self) -> BTreeMap<NaiveDate, u64> {
        let mut by_date = BTreeMap::new();
        for effort in self.issues.iter().flat_map(|i| &i.efforts) {
            *by_date.entry(effort.date).or_default() += effort.seconds;
        }
        by_date
    }

    pub fn total_seconds(&self) -> u64 {
        self.issues
            .iter()
            .flat_map(|i| &i.efforts)
            .map(|e| e.seconds)
            .sum()
    }
}

/// An issue with its per-day efforts (at most one effort per date)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub key: String,
    pub efforts: Vec<Effort>,
}

impl Issue {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            efforts: Vec::new(),
        }
    }

    pub fn effort(mut self, date: NaiveDate, seconds: u64) -> Self {
        self.efforts.push(Effort { date, seconds });
        self
    }

    pub fn get_effort(&self, date: NaiveDate) -> Option<&Effort> {
        self.efforts.iter().find(|e| e.date == date)
    }
}

/// Time spent on one issue on one day
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effort {
    pub date: NaiveDate,
    pub seconds: u64,
}

impl Effort {
    pub fn hours(&self) -> f64 {
        seconds_to_hours(self.seconds)
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Source of raw worklog entries.
///
/// Implementations resolve pagination themselves and return the complete set
/// of entries for the project and period.
pub trait WorklogSource {
    fn fetch(
        &self,
        token: &str,
        project_key: &str,
        period: &Period,
    ) -> Result<Vec<RawEntry>, FetchError>;
}

/// Persisted roster storage
pub trait RosterStore {
    /// Load the roster; a missing store yields an empty roster
    fn load(&self) -> Result<Roster, RosterError>;

    /// Replace the persisted roster with `roster`
    fn save(&self, roster: &Roster) -> Result<(), RosterError>;
}

/// Output rendering
pub trait Renderer {
    type Output;

    /// Render a report to the output format
    fn render(&self, report: &Report) -> Result<Self::Output, RenderError>;
}

// ============================================================================
// Errors
// ============================================================================

/// Invalid user input (period arguments)
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Invalid period: {from} is after {to}")]
    InvertedPeriod { from: NaiveDate, to: NaiveDate },

    #[error("Invalid period: {from} to {to} spans more than two calendar months")]
    PeriodTooLong { from: NaiveDate, to: NaiveDate },

    #[error("Month is not recognized: {0}")]
    Month(String),

    #[error("Year is not recognized: {0}")]
    Year(String),

    #[error("Date is not recognized: {0}")]
    Date(String),
}

/// Worklog fetch failure
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Worklog service error for project {project}: {status}")]
    Status { project: ProjectKey, status: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Roster store failure
#[derive(Debug, Error)]
pub enum RosterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Roster document error: {0}")]
    Document(String),

    #[error("Parse error in sheet '{sheet}' row {row}: {message}")]
    Parse {
        sheet: String,
        row: u32,
        message: String,
    },
}

/// Rendering error
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Failure of a whole report run
#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("Data source error: {0}")]
    DataSource(#[from] FetchError),

    #[error("Roster error: {0}")]
    Roster(#[from] RosterError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),
}

// ============================================================================
// Tests
// ============================================================================
