use anyhow::Result;
use clap::Args;
use schemigrate::migrate::Operation;
use schemigrate::output::render_outcome;
use schemigrate::{MigrateConfig, OutputFormat};

/// Arguments for the Run command
#[derive(Args)]
pub struct RunArgs {
    /// Operation name; empty applies all pending migrations.
    /// Also accepts upgrade_migration, downgrade_migration, drop, drop_smtable and force:<VERSION>
    #[clap(name = "OP", default_value = "")]
    pub operation: String,
}

pub fn run(
    config: &MigrateConfig,
    locator: &str,
    operation: Operation,
    output_format: OutputFormat,
) -> Result<()> {
    let outcome = config.dispatcher(locator)?.run(operation)?;
    println!("{}", render_outcome(&outcome, output_format)?);
    Ok(())
}

pub fn drop_tracking_table(config: &MigrateConfig, output_format: OutputFormat) -> Result<()> {
    let outcome = schemigrate::drop_tracking_table(config)?;
    println!("{}", render_outcome(&outcome, output_format)?);
    Ok(())
}
