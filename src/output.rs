//! Output formatting for command results
//!
//! Status reports and operation outcomes can be printed as tables, as JSON, or
//! as pipe-separated values.

use crate::migrate::{MigrationOutcome, StatusReport};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tabled::settings::Style;
use tabled::Table;

/// Output format shared by all commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Pretty table with borders (default)
    #[default]
    Table,
    Markdown,
    /// Compact JSON on a single line
    Json,
    JsonPretty,
    /// One JSON object per line
    JsonLine,
    /// Pipe-separated values with header
    Psv,
}

impl OutputFormat {
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json | Self::JsonPretty | Self::JsonLine)
    }

    pub fn all_names() -> &'static [&'static str] {
        &["table", "markdown", "json", "json-pretty", "json-line", "psv"]
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Markdown => write!(f, "markdown"),
            Self::Json => write!(f, "json"),
            Self::JsonPretty => write!(f, "json-pretty"),
            Self::JsonLine => write!(f, "json-line"),
            Self::Psv => write!(f, "psv"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" | "pretty" => Ok(Self::Table),
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "json-pretty" | "jsonpretty" => Ok(Self::JsonPretty),
            "json-line" | "jsonl" | "jsonline" => Ok(Self::JsonLine),
            "psv" | "pipe" => Ok(Self::Psv),
            _ => Err(format!(
                "Unknown output format '{}'. Valid formats: {}",
                s,
                Self::all_names().join(", ")
            )),
        }
    }
}

fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String> {
    Ok(match pretty {
        true => serde_json::to_string_pretty(value)?,
        false => serde_json::to_string(value)?,
    })
}

/// Render a status report
pub fn render_status(report: &StatusReport, format: OutputFormat) -> Result<String> {
    let mut header = format!(
        "Schema state: {}\nLatest available: {}\nPending: {}",
        report.state,
        report
            .latest
            .map(|v| v.to_string())
            .unwrap_or_else(|| "none".to_string()),
        report.pending
    );
    if let Some(updated_at) = &report.updated_at {
        header.push_str(&format!("\nLast change: {}", updated_at));
    }

    match format {
        OutputFormat::Json => to_json(report, false),
        OutputFormat::JsonPretty => to_json(report, true),
        OutputFormat::JsonLine => {
            let mut lines = Vec::with_capacity(report.migrations.len());
            for m in &report.migrations {
                lines.push(to_json(m, false)?);
            }
            Ok(lines.join("\n"))
        }
        OutputFormat::Table | OutputFormat::Markdown if report.migrations.is_empty() => {
            Ok(format!("{}\n\nNo migrations found", header))
        }
        OutputFormat::Table => Ok(format!(
            "{}\n\n{}",
            header,
            Table::new(&report.migrations).with(Style::rounded())
        )),
        OutputFormat::Markdown => Ok(format!(
            "{}\n\n{}",
            header,
            Table::new(&report.migrations).with(Style::markdown())
        )),
        OutputFormat::Psv => {
            let mut lines = vec!["version|name|applied|reversible".to_string()];
            for m in &report.migrations {
                lines.push(format!(
                    "{}|{}|{}|{}",
                    m.version, m.name, m.applied, m.reversible
                ));
            }
            Ok(lines.join("\n"))
        }
    }
}

/// Render the outcome of an operation
pub fn render_outcome(outcome: &MigrationOutcome, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json | OutputFormat::JsonLine => to_json(outcome, false),
        OutputFormat::JsonPretty => to_json(outcome, true),
        OutputFormat::Psv => {
            let value = serde_json::to_value(outcome)?;
            let kind = value["outcome"].as_str().unwrap_or_default().to_string();
            Ok(format!("outcome|message\n{}|{}", kind, outcome))
        }
        OutputFormat::Table | OutputFormat::Markdown => Ok(outcome.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::{MigrationStatus, SchemaState};

    fn report() -> StatusReport {
        StatusReport {
            state: SchemaState::Dirty {
                version: 1,
                failed: Some(2),
            },
            latest: Some(2),
            pending: 1,
            updated_at: Some("2026-10-18T09:30:00+00:00".to_string()),
            migrations: vec![
                MigrationStatus {
                    version: 1,
                    name: "create_users".to_string(),
                    applied: true,
                    reversible: true,
                },
                MigrationStatus {
                    version: 2,
                    name: "add_email".to_string(),
                    applied: false,
                    reversible: false,
                },
            ],
        }
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("table".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert_eq!("md".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert_eq!(
            "json-pretty".parse::<OutputFormat>().unwrap(),
            OutputFormat::JsonPretty
        );
        assert_eq!("pipe".parse::<OutputFormat>().unwrap(), OutputFormat::Psv);
        assert!("yaml".parse::<OutputFormat>().is_err());
        assert!(OutputFormat::Json.is_json());
        assert!(!OutputFormat::Psv.is_json());
    }

    #[test]
    fn test_render_status() {
        let table = render_status(&report(), OutputFormat::Table).unwrap();
        assert!(table.contains("dirty at version 1 (migration 2 failed)"));
        assert!(table.contains("create_users"));
        assert!(table.contains("Last change: 2026-10-18T09:30:00+00:00"));

        let psv = render_status(&report(), OutputFormat::Psv).unwrap();
        assert_eq!(
            psv,
            "version|name|applied|reversible\n1|create_users|true|true\n2|add_email|false|false"
        );

        let json: serde_json::Value =
            serde_json::from_str(&render_status(&report(), OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["state"]["state"], "dirty");
        assert_eq!(json["state"]["failed"], 2);
        assert_eq!(json["migrations"][1]["name"], "add_email");

        let lines = render_status(&report(), OutputFormat::JsonLine).unwrap();
        assert_eq!(lines.lines().count(), 2);
        assert!(lines.starts_with(r#"{"version":1,"name":"create_users""#));
    }

    #[test]
    fn test_render_outcome() {
        let outcome = MigrationOutcome::NoChange { version: 4 };
        assert_eq!(
            render_outcome(&outcome, OutputFormat::Table).unwrap(),
            "no change, database is at version 4"
        );
        assert_eq!(
            render_outcome(&outcome, OutputFormat::Json).unwrap(),
            r#"{"outcome":"no_change","version":4}"#
        );
        assert_eq!(
            render_outcome(&outcome, OutputFormat::Psv).unwrap(),
            "outcome|message\nno_change|no change, database is at version 4"
        );
    }
}
