use anyhow::Result;
use clap::Args;
use schemigrate::database::{DatabaseConn, VersionStore};
use schemigrate::{MigrateConfig, OutputFormat};
use serde::Serialize;
use std::path::Path;

/// Arguments for the Config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Also read the version record from the database, if the file exists
    #[clap(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Serialize)]
struct ConfigInfo<'a> {
    config_file: String,
    #[serde(flatten)]
    config: &'a MigrateConfig,
    connection_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sqlite_path: Option<String>,
    database_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    version_record: Option<String>,
}

pub fn run(config: &MigrateConfig, args: ConfigArgs, output_format: OutputFormat) -> Result<()> {
    let ConfigArgs { verbose } = args;

    let sqlite_path = config.database.sqlite_path();
    let database_exists = sqlite_path
        .as_deref()
        .map(|p| Path::new(p).exists())
        .unwrap_or(false);

    // read-only peek, never creates the tracking table
    let version_record = match (&sqlite_path, verbose && database_exists) {
        (Some(path), true) => {
            let db = DatabaseConn::open_path(path)?;
            let store = VersionStore::new(&db.conn);
            match store.exists()? {
                true => Some(store.read()?.to_string()),
                false => Some("no tracking table".to_string()),
            }
        }
        _ => None,
    };

    let info = ConfigInfo {
        config_file: MigrateConfig::config_file_path(),
        config,
        connection_url: config.database.redacted_url(),
        sqlite_path,
        database_exists,
        version_record,
    };

    match output_format {
        OutputFormat::Json | OutputFormat::JsonLine => {
            println!("{}", serde_json::to_string(&info)?)
        }
        OutputFormat::JsonPretty => println!("{}", serde_json::to_string_pretty(&info)?),
        _ => print_config_table(&info),
    }
    Ok(())
}

fn print_config_table(info: &ConfigInfo) {
    println!("Schemigrate Configuration");
    println!("=========================\n");

    println!("Config file:        {}", info.config_file);
    println!("{}", info.config.summary());
    println!(
        "Database Status:    {}",
        match info.database_exists {
            true => "exists",
            false => "not created",
        }
    );
    if let Some(record) = &info.version_record {
        println!("Version Record:     {}", record);
    }

    eprintln!();
    eprintln!("Tips:");
    eprintln!("  Use --verbose (-v) to read the version record");
    eprintln!("  Use --format json for machine-readable output");
    eprintln!("  DB_ADDR and DB_PASS override the configured address and password");
}
