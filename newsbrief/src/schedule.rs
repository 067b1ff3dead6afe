use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};

/// Parse `"HH:MM"` run times. Order and duplicates do not matter.
pub fn parse_times(times: &[String]) -> Result<Vec<NaiveTime>> {
    let mut parsed = times
        .iter()
        .map(|t| {
            NaiveTime::parse_from_str(t.trim(), "%H:%M")
                .with_context(|| format!("invalid scheduler time {:?}, expected HH:MM", t))
        })
        .collect::<Result<Vec<_>>>()?;
    parsed.sort();
    parsed.dedup();
    Ok(parsed)
}

/// The first configured UTC time strictly after `now`.
pub fn next_run_after(now: DateTime<Utc>, times: &[NaiveTime]) -> Option<DateTime<Utc>> {
    let today = now.date_naive();
    times
        .iter()
        .map(|t| {
            let candidate = Utc.from_utc_datetime(&today.and_time(*t));
            if candidate <= now {
                candidate + Duration::days(1)
            } else {
                candidate
            }
        })
        .min()
}
