//! `zr history`: recent runs from the history log.

use chrono::{DateTime, Utc};
use zr_core::{Error, HistoryLog, Result};

pub fn execute(limit: usize, json: bool) -> Result<i32> {
    let log = HistoryLog::open_default();
    let records = log.load_last(limit)?;

    if json {
        let rendered = serde_json::to_string_pretty(&records)
            .map_err(|e| Error::history(format!("serialize history: {e}")))?;
        println!("{rendered}");
        return Ok(0);
    }

    if records.is_empty() {
        println!("no recorded runs");
        return Ok(0);
    }

    for record in records {
        let when = DateTime::<Utc>::from_timestamp(record.timestamp, 0)
            .map_or_else(|| record.timestamp.to_string(), |ts| ts.to_rfc3339());
        println!(
            "{when}  {:<20} {:<4} {:>8} ms  {} task(s), {} retr{}",
            record.task_name,
            if record.success { "ok" } else { "fail" },
            record.duration_ms,
            record.task_count,
            record.retry_count,
            if record.retry_count == 1 { "y" } else { "ies" },
        );
    }

    Ok(0)
}
