//! Five-field cron expressions on top of the `cron` crate.
//!
//! The crate expects a leading seconds field and numbers Sunday as 1. Specs
//! here use the classic layout (`MIN HOUR DOM MON DOW`, Sunday = 0 or 7), so
//! parsing prepends `0` seconds and shifts numeric day-of-week values.
//!
//! When both day-of-month and day-of-week are restricted, classic cron fires
//! on a day matching either field while the crate requires both. Such specs
//! are split into one schedule per day field and the earlier occurrence wins.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::BTreeSet;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronError {
    #[error("expected 5 cron fields (MIN HOUR DOM MON DOW), found {found}")]
    FieldCount { found: usize },

    #[error("invalid day-of-week value '{0}'")]
    DayOfWeek(String),

    #[error("invalid cron expression '{spec}': {source}")]
    Parse {
        spec: String,
        #[source]
        source: cron::error::Error,
    },
}

/// A parsed five-field spec.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    /// One schedule, or one per day field when both are restricted.
    schedules: Vec<Schedule>,
}

impl CronSchedule {
    /// First occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&after).next())
            .min()
    }
}

/// Parse a five-field cron spec.
pub fn parse(spec: &str) -> Result<CronSchedule, CronError> {
    let fields: Vec<&str> = spec.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(CronError::FieldCount {
            found: fields.len(),
        });
    }

    let (minute, hour, dom, month) = (fields[0], fields[1], fields[2], fields[3]);
    let dow = translate_day_of_week(fields[4])?;

    let build = |dom: &str, dow: &str| {
        let expanded = format!("0 {minute} {hour} {dom} {month} {dow}");
        Schedule::from_str(&expanded).map_err(|source| CronError::Parse {
            spec: spec.to_string(),
            source,
        })
    };

    let schedules = if is_restricted(dom) && is_restricted(&dow) {
        vec![build(dom, "*")?, build("*", &dow)?]
    } else {
        vec![build(dom, &dow)?]
    };

    Ok(CronSchedule { schedules })
}

/// First occurrence strictly after `after`.
pub fn next_after(schedule: &CronSchedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.next_after(after)
}

fn is_restricted(field: &str) -> bool {
    field != "*" && field != "?"
}

/// Rewrite classic day-of-week numbering (0-7, Sunday twice) into 1-7.
fn translate_day_of_week(field: &str) -> Result<String, CronError> {
    let parts = field
        .split(',')
        .map(translate_dow_item)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join(","))
}

fn translate_dow_item(item: &str) -> Result<String, CronError> {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (item, None),
    };

    if base == "*" || base == "?" || !base.starts_with(|c: char| c.is_ascii_digit()) {
        return Ok(match step {
            Some(step) => format!("{base}/{step}"),
            None => base.to_string(),
        });
    }

    let Some((start, end)) = base.split_once('-') else {
        let day = dow_number(base, item)? % 7 + 1;
        return Ok(match step {
            Some(step) => format!("{day}/{step}"),
            None => day.to_string(),
        });
    };

    let start = dow_number(start, item)?;
    let end = dow_number(end, item)?;
    if start > end {
        return Err(CronError::DayOfWeek(item.to_string()));
    }

    Ok(match (start, end, step) {
        (0, 7, None) => "1-7".to_string(),
        // A range ending on the second Sunday wraps to the crate's day 1.
        (s, 7, None) => format!("{}-7,1", s + 1),
        (s, e, None) => format!("{}-{}", s % 7 + 1, e % 7 + 1),
        // Stepped ranges are expanded so the stepping follows classic numbering.
        (s, e, Some(step)) => {
            let step = match step.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(CronError::DayOfWeek(item.to_string())),
            };
            let days: BTreeSet<u32> = (s..=e).step_by(step).map(|d| d % 7 + 1).collect();
            days.iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",")
        }
    })
}

fn dow_number(value: &str, item: &str) -> Result<u32, CronError> {
    match value.parse::<u32>() {
        Ok(n) if n <= 7 => Ok(n),
        _ => Err(CronError::DayOfWeek(item.to_string())),
    }
}
