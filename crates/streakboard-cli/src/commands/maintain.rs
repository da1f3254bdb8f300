use streakboard_core::{Clock, HabitDb, MaintenanceJob};

use super::Context;

pub fn run(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let job = MaintenanceJob::new(HabitDb::open()?).with_max_retries(ctx.config.engine.max_retries);
    let report = job.run(ctx.clock().today())?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.failed.is_empty() {
        return Err(format!("{} habit(s) could not be reconciled", report.failed.len()).into());
    }
    Ok(())
}
