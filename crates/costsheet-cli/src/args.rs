//! Command-line arguments and period resolution

use std::path::PathBuf;

use chrono::{Datelike, Month, NaiveDate};
use clap::Parser;

use costsheet_core::{InputError, Period};

pub const DEFAULT_CONFIG: &str = "AppConfig.yaml";

#[derive(Debug, Parser)]
#[command(name = "costsheet")]
#[command(author, version, about = "Timesheet cost report generator", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Month as a number (3), short name (mar) or long name (march)
    #[arg(value_name = "MONTH", required_unless_present = "from")]
    pub month: Option<String>,

    /// Year, defaults to the current year
    #[arg(value_name = "YEAR")]
    pub year: Option<String>,

    /// Application config file
    #[arg(value_name = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Application config file (alternative to the positional CONFIG)
    #[arg(short = 'c', long = "config", value_name = "FILE", conflicts_with = "config")]
    pub config_file: Option<PathBuf>,

    /// First day of an explicit period
    #[arg(long, value_name = "YYYY-MM-DD", requires = "to", conflicts_with = "month")]
    pub from: Option<String>,

    /// Last day of an explicit period
    #[arg(long, value_name = "YYYY-MM-DD", requires = "from")]
    pub to: Option<String>,
}

impl Cli {
    /// Reporting period; `today` supplies the default year
    pub fn period(&self, today: NaiveDate) -> Result<Period, InputError> {
        if let (Some(from), Some(to)) = (&self.from, &self.to) {
            return Period::new(parse_date(from)?, parse_date(to)?);
        }

        let month = parse_month(self.month.as_deref().unwrap_or_default())?;
        let year = match &self.year {
            Some(year) => parse_year(year)?,
            None => today.year(),
        };
        Period::month(year, month)
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_file
            .clone()
            .or_else(|| self.config.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
    }
}

/// Month number 1..=12 from `3`, `mar` or `March`
pub fn parse_month(input: &str) -> Result<u32, InputError> {
    let input = input.trim();
    if let Ok(number) = input.parse::<u32>() {
        return if (1..=12).contains(&number) {
            Ok(number)
        } else {
            Err(InputError::Month(input.to_string()))
        };
    }

    input
        .parse::<Month>()
        .map(|m| m.number_from_month())
        .map_err(|_| InputError::Month(input.to_string()))
}

pub fn parse_year(input: &str) -> Result<i32, InputError> {
    match input.trim().parse::<i32>() {
        Ok(year) if (1..=9999).contains(&year) => Ok(year),
        _ => Err(InputError::Year(input.to_string())),
    }
}

pub fn parse_date(input: &str) -> Result<NaiveDate, InputError> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|_| InputError::Date(input.to_string()))
}
