//! # costsheet-tempo
//!
//! Tempo worklog service client.
//!
//! [`TempoClient`] implements [`WorklogSource`]: it pages through
//! `/core/3/worklogs` for one project and period and returns every entry as a
//! [`RawEntry`]. The HTTP call is the only impure part; URL building, page
//! decoding and the pagination loop are plain functions.
//!
//! ## Example
//!
//! ```rust,ignore
//! use costsheet_core::{Period, WorklogSource};
//! use costsheet_tempo::TempoClient;
//!
//! let client = TempoClient::new("https://api.tempo.io")?;
//! let entries = client.fetch(&token, "ABC", &Period::month(2024, 3)?)?;
//! ```

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::{debug, info};

use costsheet_core::{FetchError, Period, RawEntry, WorklogSource};

/// Page size requested from the service
pub const PAGE_LIMIT: u32 = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const USER_AGENT: &str = concat!("costsheet/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Wire format
// ============================================================================

/// One page of `/core/3/worklogs`
#[derive(Clone, Debug, Deserialize)]
pub struct WorklogPage {
    #[serde(default)]
    pub results: Vec<Worklog>,
    pub metadata: PageMetadata,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct PageMetadata {
    pub count: u32,
    #[serde(default)]
    pub offset: u32,
    pub limit: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worklog {
    pub author: Author,
    pub issue: IssueRef,
    pub start_date: NaiveDate,
    pub time_spent_seconds: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub account_id: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IssueRef {
    pub key: String,
}

impl From<Worklog> for RawEntry {
    fn from(w: Worklog) -> Self {
        Self::new(
            w.author.account_id,
            w.author.display_name,
            w.issue.key,
            w.start_date,
            w.time_spent_seconds,
        )
    }
}

// ============================================================================
// Pure seams
// ============================================================================

/// Worklog query URL for one page
pub fn worklogs_url(base_url: &str, project: &str, period: &Period, offset: u32, limit: u32) -> String {
    format!(
        "{}/core/3/worklogs?project={}&from={}&to={}&offset={}&limit={}",
        base_url.trim_end_matches('/'),
        project,
        period.from().format("%Y-%m-%d"),
        period.to().format("%Y-%m-%d"),
        offset,
        limit,
    )
}

/// Decode a response body
pub fn decode_page(body: &str) -> Result<WorklogPage, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::Parse(e.to_string()))
}

/// Collect all worklogs by calling `fetch_page(offset)` until a short page.
///
/// The next offset is the current offset plus the returned count; a page with
/// fewer results than its limit is the last one.
pub fn collect_pages<F>(mut fetch_page: F) -> Result<Vec<Worklog>, FetchError>
where
    F: FnMut(u32) -> Result<WorklogPage, FetchError>,
{
    let mut worklogs = Vec::new();
    let mut offset = 0;

    loop {
        let page = fetch_page(offset)?;
        let PageMetadata { count, limit, .. } = page.metadata;
        worklogs.extend(page.results);

        if count == 0 || count < limit {
            break;
        }
        offset += count;
    }

    Ok(worklogs)
}

// ============================================================================
// Client
// ============================================================================

/// Blocking Tempo API client
#[derive(Clone, Debug)]
pub struct TempoClient {
    base_url: String,
    http: Client,
}

impl TempoClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get_page(
        &self,
        token: &str,
        project: &str,
        period: &Period,
        offset: u32,
    ) -> Result<WorklogPage, FetchError> {
        let url = worklogs_url(&self.base_url, project, period, offset, PAGE_LIMIT);
        debug!(%url, "Requesting worklogs");

        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                project: project.to_string(),
                status: status.to_string(),
            });
        }

        let body = response
            .text()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let page = decode_page(&body)?;

        info!(project, offset, count = page.metadata.count, "Fetched worklogs page");
        Ok(page)
    }
}

impl WorklogSource for TempoClient {
    fn fetch(&self, token: &str, project_key: &str, period: &Period) -> Result<Vec<RawEntry>, FetchError> {
        let worklogs = collect_pages(|offset| self.get_page(token, project_key, period, offset))?;
        Ok(worklogs.into_iter().map(RawEntry::from).collect())
    }
}
