//! Subcommand implementations.

use std::process::ExitCode;

use comfy_table::{Cell, Table};
use serde_json::json;
use strata_core::{
    builtin, connect, Connection, MigrationError, MigrationExecutor, MigrationRegistry, MigrationReport,
    MigrationStatus,
};

use crate::config::{CliConfig, Command, ConfigError, OutputFormat};

/// Run the configured command.
pub fn run(config: CliConfig) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let registry = builtin::registry()?;

    match config.command {
        Command::List => {
            println!("{}", format_list(&registry, config.format)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => {
            let mut conn = open(&config)?;
            let executor = MigrationExecutor::with_config(registry, config.migration);
            let status = executor.status(conn.as_mut())?;
            println!("{}", format_status(&status, config.format)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Migrate { .. } => {
            let mut conn = open(&config)?;
            let executor = MigrationExecutor::with_config(registry, config.migration);
            match executor.execute(conn.as_mut()) {
                Ok(report) => {
                    println!("{}", format_report(&report, config.format)?);
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => {
                    eprintln!("{}", format_failure(&err, config.format)?);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

fn open(config: &CliConfig) -> Result<Box<dyn Connection>, Box<dyn std::error::Error>> {
    let url = config.url.as_deref().ok_or(ConfigError::MissingUrl)?;
    let dialect = config.dialect.ok_or(ConfigError::MissingUrl)?;
    tracing::info!(dialect = %dialect, ledger = %config.migration.ledger.table, "connecting");
    Ok(connect(url, dialect)?)
}

/// Format the registry listing.
pub fn format_list(
    registry: &MigrationRegistry,
    format: OutputFormat,
) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table.set_header(vec!["Id", "Description"]);
            for step in registry.steps() {
                table.add_row(vec![Cell::new(step.id()), Cell::new(step.description())]);
            }
            Ok(table.to_string())
        }
        OutputFormat::Json => {
            let steps: Vec<_> = registry
                .steps()
                .iter()
                .map(|s| json!({ "id": s.id(), "description": s.description() }))
                .collect();
            serde_json::to_string_pretty(&steps)
        }
    }
}

/// Format a status snapshot.
pub fn format_status(
    status: &MigrationStatus,
    format: OutputFormat,
) -> Result<String, serde_json::Error> {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(status);
    }

    let mut table = Table::new();
    table.set_header(vec!["Id", "Description", "State"]);
    for step in &status.steps {
        let state = if step.applied {
            "applied"
        } else if status.is_gap(step.id) {
            "missing"
        } else {
            "pending"
        };
        table.add_row(vec![
            Cell::new(step.id),
            Cell::new(&step.description),
            Cell::new(state),
        ]);
    }

    let mut output = table.to_string();
    if !status.ledger_exists {
        output.push_str("\nLedger not created yet");
    }
    for id in &status.gaps {
        output.push_str(&format!("\nWarning: migration {id} missing from ledger"));
    }
    for id in &status.unknown {
        output.push_str(&format!("\nWarning: ledger records unknown migration {id}"));
    }
    let pending = status.pending().count();
    output.push_str(&format!("\n{} pending migration(s)", pending));
    Ok(output)
}

/// Format the report of a successful run.
pub fn format_report(
    report: &MigrationReport,
    format: OutputFormat,
) -> Result<String, serde_json::Error> {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(report);
    }

    if report.dry_run {
        if report.planned.is_empty() {
            return Ok("Schema is up to date".to_string());
        }
        let planned: Vec<String> = report.planned.iter().map(|id| id.to_string()).collect();
        return Ok(format!("Pending migrations: {}", planned.join(", ")));
    }

    if report.applied.is_empty() {
        return Ok("Schema is up to date".to_string());
    }

    let mut table = Table::new();
    table.set_header(vec!["Id", "Description", "Outcome", "Duration (ms)"]);
    for step in &report.applied {
        table.add_row(vec![
            Cell::new(step.id),
            Cell::new(&step.description),
            Cell::new(step.outcome),
            Cell::new(step.duration.as_millis()),
        ]);
    }
    Ok(format!(
        "{}\n{} migration(s) run in {} ms",
        table,
        report.applied.len(),
        report.duration.as_millis()
    ))
}

/// Format a failed run for the operator.
pub fn format_failure(
    err: &MigrationError,
    format: OutputFormat,
) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Table => Ok(match err.failed_step() {
            Some(id) => format!("Error: migration {id} failed: {}", err.root_cause()),
            None => format!("Error: {err}"),
        }),
        OutputFormat::Json => serde_json::to_string_pretty(&json!({
            "error": err.kind(),
            "failed_step": err.failed_step(),
            "message": err.root_cause().to_string(),
        })),
    }
}
