#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use schemigrate::migrate::Operation;
use schemigrate::{MigrateConfig, OutputFormat};
use tracing::Level;

mod commands;

use commands::config::ConfigArgs;
use commands::migrate::RunArgs;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.schemigrate/schemigrate.toml is used
    #[clap(short, long, global = true)]
    config: Option<String>,

    /// Print debug information
    #[clap(long, global = true)]
    debug: bool,

    /// Output format: table (default), markdown, json, json-pretty, json-line, psv
    #[clap(short, long, global = true, default_value = "table")]
    format: OutputFormat,

    /// Migration directory or file:// URL, overrides `migrations` from the config file
    #[clap(short, long, global = true)]
    path: Option<String>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply every pending migration
    Up,

    /// Apply the next pending migration only
    StepUp,

    /// Reverse the most recently applied migration
    StepDown,

    /// Drop every table, view and trigger, then reset the version to 0
    Drop,

    /// Drop the schema_migrations tracking table, leaving the schema untouched
    DropTrackingTable,

    /// Mark the database clean at the given version without running any script
    Force {
        /// Version to record, 0 for "nothing applied"
        #[clap(name = "VERSION")]
        version: i64,
    },

    /// Show the schema state and the migrations known to the catalog
    Status,

    /// Run an operation by name (e.g. upgrade_migration, drop_smtable)
    Run(RunArgs),

    /// Show the resolved configuration
    Config(ConfigArgs),
}

fn init_logging(debug: bool) {
    let level = match debug {
        true => Level::DEBUG,
        false => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

enum Action {
    Migrate(Operation),
    Status,
    Config(ConfigArgs),
}

impl Commands {
    /// Resolve the command to an action; operation names are checked here,
    /// before the configuration file or the database is touched
    fn into_action(self) -> Result<Action> {
        let operation = match self {
            Commands::Status => return Ok(Action::Status),
            Commands::Config(args) => return Ok(Action::Config(args)),
            Commands::Up => Operation::Apply,
            Commands::StepUp => Operation::StepUp,
            Commands::StepDown => Operation::StepDown,
            Commands::Drop => Operation::Drop,
            Commands::DropTrackingTable => Operation::DropTrackingTable,
            Commands::Force { version } => Operation::Force(version),
            Commands::Run(RunArgs { operation }) => {
                Operation::from_name(&operation).map_err(|e| {
                    anyhow!("{}, valid operations: {}", e, Operation::all_names().join(", "))
                })?
            }
        };
        Ok(Action::Migrate(operation))
    }
}

fn run(cli: Cli) -> Result<()> {
    let action = cli.command.into_action()?;
    let config = MigrateConfig::new(&cli.config)?;
    let format = cli.format;

    let locator = || -> Result<String> {
        cli.path
            .clone()
            .or_else(|| config.migrations.clone())
            .ok_or_else(|| {
                anyhow!("no migration source, pass --path or set `migrations` in the config file")
            })
    };

    match action {
        // recovery path, works without any migration files
        Action::Migrate(Operation::DropTrackingTable) => {
            commands::migrate::drop_tracking_table(&config, format)
        }
        Action::Migrate(operation) => {
            commands::migrate::run(&config, &locator()?, operation, format)
        }
        Action::Status => commands::status::run(&config, &locator()?, format),
        Action::Config(args) => commands::config::run(&config, args, format),
    }
}

fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(e) = run(cli) {
        eprintln!("ERROR: {:#}", e);
        std::process::exit(1);
    }
}
