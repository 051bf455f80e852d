//! Command-line configuration.

use clap::{Parser, Subcommand, ValueEnum};
use strata_core::dialect::UnknownDialect;
use strata_core::migration::history::{DEFAULT_LEDGER_COLUMN, DEFAULT_LEDGER_TABLE};
use strata_core::{Dialect, LedgerConfig, MigrationConfig};

/// Environment variable holding the database URL.
pub const DATABASE_URL_ENV: &str = "STRATA_DATABASE_URL";

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Strata schema migration tool
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version, about = "Forward-only schema migrations", long_about = None)]
pub struct Args {
    /// Database URL (sqlite:path, postgres://...).
    #[arg(short, long, env = DATABASE_URL_ENV, global = true)]
    pub url: Option<String>,

    /// SQL dialect. Inferred from the URL when omitted.
    #[arg(short, long, global = true)]
    pub dialect: Option<Dialect>,

    /// Ledger table name.
    #[arg(long, default_value = DEFAULT_LEDGER_TABLE, global = true)]
    pub ledger_table: String,

    /// Ledger identifier column.
    #[arg(long, default_value = DEFAULT_LEDGER_COLUMN, global = true)]
    pub ledger_column: String,

    /// Output format.
    #[arg(long, default_value = "table", value_enum, global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Apply every pending migration.
    Migrate {
        /// List pending migrations without executing them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Show which migrations are applied and which are pending.
    Status,
    /// List the known migrations. Needs no database.
    List,
}

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Database URL, absent for commands that need no database.
    pub url: Option<String>,
    /// Dialect, absent only when no URL and no override were given.
    pub dialect: Option<Dialect>,
    /// Executor configuration.
    pub migration: MigrationConfig,
    /// Output format.
    pub format: OutputFormat,
    /// Command to run.
    pub command: Command,
}

/// Errors resolving the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The command needs a database and none was given.
    #[error("no database url given (use --url or STRATA_DATABASE_URL)")]
    MissingUrl,

    /// The dialect cannot be inferred from the URL.
    #[error("{0}; pass --dialect")]
    UnknownDialect(#[from] UnknownDialect),
}

impl Args {
    /// Convert command-line arguments to the run configuration.
    pub fn into_config(self) -> Result<CliConfig, ConfigError> {
        let dialect = match (self.dialect, &self.url) {
            (Some(dialect), _) => Some(dialect),
            (None, Some(url)) => Some(Dialect::from_url(url)?),
            (None, None) => None,
        };

        if self.url.is_none() && self.command != Command::List {
            return Err(ConfigError::MissingUrl);
        }

        let dry_run = matches!(self.command, Command::Migrate { dry_run: true });
        let migration = MigrationConfig::default()
            .with_ledger(LedgerConfig::new(self.ledger_table).with_column(self.ledger_column))
            .with_dry_run(dry_run);

        Ok(CliConfig {
            url: self.url,
            dialect,
            migration,
            format: self.format,
            command: self.command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("strata").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_dialect_inferred_from_url() {
        let config = parse(&["--url", "postgres://localhost/strata", "status"])
            .into_config()
            .unwrap();
        assert_eq!(config.dialect, Some(Dialect::PostgreSql));
        assert_eq!(config.command, Command::Status);
        assert_eq!(config.migration.ledger, LedgerConfig::default());
        assert!(!config.migration.dry_run);
    }

    #[test]
    fn test_explicit_dialect_wins() {
        let config = parse(&["migrate", "--url", "strata.db", "--dialect", "sqlite", "--dry-run"])
            .into_config()
            .unwrap();
        assert_eq!(config.dialect, Some(Dialect::Sqlite));
        assert!(config.migration.dry_run);
    }

    #[test]
    fn test_ledger_options() {
        let config = parse(&[
            "--url",
            "sqlite:strata.db",
            "--ledger-table",
            "migration_log",
            "--ledger-column",
            "version",
            "--format",
            "json",
            "migrate",
        ])
        .into_config()
        .unwrap();
        assert_eq!(config.migration.ledger.table, "migration_log");
        assert_eq!(config.migration.ledger.column, "version");
        assert_eq!(config.format, OutputFormat::Json);
    }

    #[test]
    fn test_list_needs_no_url() {
        let config = parse(&["list"]).into_config().unwrap();
        assert_eq!(config.url, None);
        assert_eq!(config.dialect, None);
    }

    #[test]
    fn test_missing_url_and_unknown_dialect() {
        assert!(matches!(
            parse(&["status"]).into_config(),
            Err(ConfigError::MissingUrl)
        ));
        assert!(matches!(
            parse(&["--url", "ftp://example.com", "status"]).into_config(),
            Err(ConfigError::UnknownDialect(_))
        ));
    }
}
