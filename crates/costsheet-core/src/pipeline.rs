//! Report run orchestration.
//!
//! One run is strictly sequential:
//!
//! ```text
//! roster load -> fetch (per token, per project) -> aggregate
//!             -> synchronize roster (in memory) -> render document -> persist roster
//! ```
//!
//! Any failure ends the run. Nothing is written until every fetch has
//! succeeded, and the roster is only persisted after the document was saved.

use tracing::{debug, info};

use crate::aggregate::{aggregate, ProjectWorklog};
use crate::{
    Period, ProjectKey, Renderer, Report, ReportError, Roster, RosterStore, SyncPolicy,
    WorklogSource,
};

/// Worklog service token and the projects it grants access to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenProjects {
    pub token: String,
    pub projects: Vec<ProjectKey>,
}

impl TokenProjects {
    pub fn new(token: impl Into<String>, projects: Vec<ProjectKey>) -> Self {
        Self {
            token: token.into(),
            projects,
        }
    }
}

/// Everything a successful run produced
#[derive(Debug)]
pub struct RunOutcome<T> {
    pub report: Report,
    pub roster: Roster,
    pub output: T,
}

/// Sequences roster load, fetch, aggregation, synchronization and rendering
pub struct ReportPipeline<S, R, W> {
    source: S,
    roster_store: R,
    renderer: W,
    tokens: Vec<TokenProjects>,
    sync_policy: SyncPolicy,
}

impl<S, R, W> ReportPipeline<S, R, W>
where
    S: WorklogSource,
    R: RosterStore,
    W: Renderer,
{
    pub fn new(source: S, roster_store: R, renderer: W, tokens: Vec<TokenProjects>) -> Self {
        Self {
            source,
            roster_store,
            renderer,
            tokens,
            sync_policy: SyncPolicy::default(),
        }
    }

    pub fn sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    pub fn run(&self, period: Period) -> Result<RunOutcome<W::Output>, ReportError> {
        let existing = self.roster_store.load()?;
        debug!(
            roster = %to_pretty_json(&existing),
            "Loaded roster with {} projects",
            existing.projects.len()
        );

        let worklogs = self.fetch_all(&period)?;
        let report = aggregate(period, worklogs, &existing);

        let roster = existing.synchronize(&report, self.sync_policy);

        let output = self.renderer.render(&report)?;

        self.roster_store.save(&roster)?;
        debug!(roster = %to_pretty_json(&roster), "Synchronized roster");

        Ok(RunOutcome {
            report,
            roster,
            output,
        })
    }

    fn fetch_all(&self, period: &Period) -> Result<Vec<ProjectWorklog>, ReportError> {
        info!(from = %period.from(), to = %period.to(), "Getting report started");

        let mut worklogs = Vec::new();
        for token in &self.tokens {
            for key in &token.projects {
                let entries = self.source.fetch(&token.token, key, period)?;
                info!(project = %key, records = entries.len(), "Fetched worklogs");
                worklogs.push(ProjectWorklog::new(key.as_str(), entries));
            }
        }

        info!(projects = worklogs.len(), "Getting report finished");
        Ok(worklogs)
    }
}

fn to_pretty_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FetchError, RawEntry, RenderError, RosterError, UserConfig, ProjectConfig};
    use chrono::NaiveDate;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeSource {
        entries: HashMap<String, Vec<RawEntry>>,
        failing: Option<String>,
        calls: RefCell<Vec<(String, String)>>,
    }

    impl WorklogSource for FakeSource {
        fn fetch(
            &self,
            token: &str,
            project_key: &str,
            _period: &Period,
        ) -> Result<Vec<RawEntry>, FetchError> {
            self.calls
                .borrow_mut()
                .push((token.to_string(), project_key.to_string()));
            if self.failing.as_deref() == Some(project_key) {
                return Err(FetchError::Status {
                    project: project_key.to_string(),
                    status: "500 Internal Server Error".into(),
                });
            }
            Ok(self.entries.get(project_key).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        initial: Roster,
        saved: RefCell<Option<Roster>>,
    }

    impl RosterStore for MemoryStore {
        fn load(&self) -> Result<Roster, RosterError> {
            Ok(self.initial.clone())
        }

        fn save(&self, roster: &Roster) -> Result<(), RosterError> {
            *self.saved.borrow_mut() = Some(roster.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingRenderer {
        rendered: RefCell<usize>,
        fail: bool,
    }

    impl Renderer for CountingRenderer {
        type Output = usize;

        fn render(&self, report: &Report) -> Result<usize, RenderError> {
            if self.fail {
                return Err(RenderError::Format("disk full".into()));
            }
            *self.rendered.borrow_mut() += 1;
            Ok(report.projects.len())
        }
    }

    fn march() -> Period {
        Period::month(2024, 3).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn run_fetches_every_project_of_every_token() {
        let source = FakeSource::default();
        let tokens = vec![
            TokenProjects::new("t1", vec!["ABC".into(), "DEF".into()]),
            TokenProjects::new("t2", vec!["XYZ".into()]),
        ];
        let pipeline = ReportPipeline::new(
            source,
            MemoryStore::default(),
            CountingRenderer::default(),
            tokens,
        );

        let outcome = pipeline.run(march()).unwrap();

        assert_eq!(outcome.output, 3);
        assert_eq!(
            *pipeline.source.calls.borrow(),
            vec![
                ("t1".to_string(), "ABC".to_string()),
                ("t1".to_string(), "DEF".to_string()),
                ("t2".to_string(), "XYZ".to_string()),
            ]
        );
    }

    #[test]
    fn run_persists_synchronized_roster() {
        let mut source = FakeSource::default();
        source.entries.insert(
            "ABC".into(),
            vec![RawEntry::new("u1", "Jane", "ABC-1", day(5), 7200)],
        );
        let store = MemoryStore {
            initial: Roster::new(vec![ProjectConfig::new("ABC")
                .manager("Alice")
                .user("Jane", UserConfig::new("Developer", 40))
                .user("Idle", UserConfig::new("QA", 30))]),
            ..MemoryStore::default()
        };
        let pipeline = ReportPipeline::new(
            source,
            store,
            CountingRenderer::default(),
            vec![TokenProjects::new("t1", vec!["ABC".into()])],
        );

        let outcome = pipeline.run(march()).unwrap();

        let jane = outcome.report.projects[0].get_user("Jane").unwrap();
        assert_eq!(jane.rate, 40);

        let saved = pipeline.roster_store.saved.borrow().clone().unwrap();
        assert_eq!(saved, outcome.roster);
        assert_eq!(saved.get("ABC").unwrap().users.len(), 2);
    }

    #[test]
    fn fetch_failure_aborts_before_any_write() {
        let source = FakeSource {
            failing: Some("DEF".into()),
            ..FakeSource::default()
        };
        let pipeline = ReportPipeline::new(
            source,
            MemoryStore::default(),
            CountingRenderer::default(),
            vec![TokenProjects::new("t1", vec!["ABC".into(), "DEF".into()])],
        );

        let result = pipeline.run(march());

        assert!(matches!(result, Err(ReportError::DataSource(_))));
        assert_eq!(*pipeline.renderer.rendered.borrow(), 0);
        assert!(pipeline.roster_store.saved.borrow().is_none());
    }

    #[test]
    fn render_failure_leaves_roster_untouched() {
        let renderer = CountingRenderer {
            fail: true,
            ..CountingRenderer::default()
        };
        let pipeline = ReportPipeline::new(
            FakeSource::default(),
            MemoryStore::default(),
            renderer,
            vec![TokenProjects::new("t1", vec!["ABC".into()])],
        );

        let result = pipeline.run(march());

        assert!(matches!(result, Err(ReportError::Render(_))));
        assert!(pipeline.roster_store.saved.borrow().is_none());
    }

    #[test]
    fn inactive_projects_follow_sync_policy() {
        let store = MemoryStore {
            initial: Roster::new(vec![ProjectConfig::new("OLD")]),
            ..MemoryStore::default()
        };
        let pipeline = ReportPipeline::new(
            FakeSource::default(),
            store,
            CountingRenderer::default(),
            vec![TokenProjects::new("t1", vec!["ABC".into()])],
        )
        .sync_policy(SyncPolicy {
            keep_inactive_projects: true,
        });

        let outcome = pipeline.run(march()).unwrap();

        assert!(outcome.roster.get("OLD").is_some());
    }
}
