use rusqlite::params;

use crate::model::PeriodLevel;

/// Populate period_dim with the four period levels.
/// Called on DB open; existing rows are left alone.
pub fn ensure_period_dim(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO period_dim (period_level, name, description)
         VALUES (?1, ?2, ?3)",
    )?;
    for level in PeriodLevel::ALL {
        stmt.execute(params![level.as_i64(), level.name(), description(level)])?;
    }
    Ok(())
}

fn description(level: PeriodLevel) -> &'static str {
    match level {
        PeriodLevel::Daily => "One calendar day; date is the day itself",
        PeriodLevel::Monthly => "Calendar month; date is the first of the month",
        PeriodLevel::Quarterly => "Calendar quarter; date is the first day of the quarter",
        PeriodLevel::Yearly => "Calendar year; date is January 1",
    }
}
