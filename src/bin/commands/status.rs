use anyhow::Result;
use schemigrate::output::render_status;
use schemigrate::{MigrateConfig, OutputFormat};

pub fn run(config: &MigrateConfig, locator: &str, output_format: OutputFormat) -> Result<()> {
    let report = config.dispatcher(locator)?.status()?;
    println!("{}", render_status(&report, output_format)?);

    if report.state.is_dirty() && !output_format.is_json() {
        eprintln!();
        eprintln!("The last migration failed. Repair the schema by hand, then run");
        eprintln!("  schemigrate force <VERSION>");
        eprintln!("with the version the schema now corresponds to.");
    }
    Ok(())
}
