pub mod report;

use crate::analyzer::report::{ActivityAnalysis, SavedReport};
use crate::config::Config;
use crate::db::Database;
use anyhow::{Result, bail};
use chrono::NaiveDate;

pub fn generate_and_store_analysis(
    config: &Config,
    date: NaiveDate,
) -> Result<(ActivityAnalysis, SavedReport)> {
    let database = Database::open(&config.db_path)?;
    let rows = database.activity_rows()?;

    if rows.is_empty() {
        bail!("No activity rows stored yet. Run `HabitLens extract` first.");
    }

    let analysis = report::build_analysis(date, &rows);
    let saved = report::save_report_files(&analysis, &config.report_dir)?;

    Ok((analysis, saved))
}
