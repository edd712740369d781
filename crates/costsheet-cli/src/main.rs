//! costsheet CLI - timesheet cost reports from Tempo worklogs

mod args;
mod config;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use costsheet_core::pipeline::ReportPipeline;
use costsheet_tempo::TempoClient;
use costsheet_xlsx::{ExcelRenderer, XlsxRosterStore};

use crate::args::Cli;
use crate::config::AppConfig;

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let period = cli
        .period(Local::now().date_naive())
        .context("Invalid report period")?;

    let config_path = cli.config_path();
    let config = AppConfig::load(&config_path)?;
    debug!(
        path = %config_path.display(),
        config = %serde_json::to_string_pretty(&config).unwrap_or_default(),
        "Loaded configuration"
    );

    let tokens = config.token_projects();
    if tokens.is_empty() {
        warn!("No projects configured, the report will be empty");
    }

    let source = TempoClient::new(config.tempo.url.as_str())
        .context("Failed to create worklog client")?;
    let roster_store = XlsxRosterStore::new(&config.files.project_config);
    let renderer =
        ExcelRenderer::new(&config.files.report).currency_format(config.currency_format());

    let pipeline = ReportPipeline::new(source, roster_store, renderer, tokens)
        .sync_policy(config.sync_policy());

    info!(from = %period.from(), to = %period.to(), "Report creating started");
    let outcome = pipeline.run(period).context("Report run failed")?;

    let summary = &outcome.output;
    if !summary.skipped.is_empty() {
        warn!(count = summary.skipped.len(), "Some hours had no date column and were skipped");
    }
    info!(
        sheet = %summary.sheet_name,
        projects = outcome.report.projects.len(),
        report = %config.files.report.display(),
        "Report creating finished"
    );

    Ok(())
}
