use std::io::Write;

use anyhow::Result;
use clap::ValueEnum;
use encore_service::fetcher::{FallbackSource, FetchOutcome};
use prettytable::format::consts::FORMAT_CLEAN;
use prettytable::{Table, row};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Outputs every read, including the value, as JSON.
    Json,
    /// Outputs how each read was resolved as a table, without values.
    Compact,
}

/// How a single read was resolved.
#[derive(Debug, Serialize)]
pub struct Report<T> {
    pub resource: &'static str,
    pub key: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<FallbackSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub value: Option<T>,
}

impl<T> Report<T> {
    pub fn new(resource: &'static str, key: String, outcome: FetchOutcome<T>) -> Self {
        let (status, source, error, value) = match outcome {
            FetchOutcome::Cached(value) => ("cached", None, None, Some(value)),
            FetchOutcome::Fetched(value) => ("fetched", None, None, Some(value)),
            FetchOutcome::Fallback {
                value,
                source,
                error,
            } => ("fallback", Some(source), Some(error.to_string()), Some(value)),
            FetchOutcome::Failed(error) => ("failed", None, Some(error.to_string()), None),
        };

        Self {
            resource,
            key,
            status,
            source,
            error,
            value,
        }
    }
}

pub fn print_reports<T: Serialize>(reports: &[Report<T>], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(reports),
        OutputFormat::Compact => {
            let mut table = Table::new();
            table.set_format(*FORMAT_CLEAN);
            table.set_titles(row!["Resource", "Key", "Status", "Source", "Error"]);
            for report in reports {
                table.add_row(row![
                    report.resource,
                    report.key,
                    report.status,
                    report.source.map_or("", |source| source.as_str()),
                    report.error.as_deref().unwrap_or("")
                ]);
            }
            table.printstd();
            Ok(())
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}
