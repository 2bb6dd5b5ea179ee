//! Five-field cron expressions evaluated in UTC at minute resolution.
//!
//! Field order is `minute hour day-of-month month day-of-week`. When both
//! day fields are restricted a day matches if *either* matches; when one of
//! them starts with `*` both must match.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Search window for the next match. Feb 29 schedules can skip up to eight
/// years (2096 -> 2104).
const SEARCH_HORIZON_DAYS: i64 = 366 * 9;

const MONTH_NAMES: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

struct Field {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Numeric value of `names[0]`.
    name_base: u32,
}

const MINUTE: Field = Field {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    name_base: 0,
};
const HOUR: Field = Field {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    name_base: 0,
};
const DAY_OF_MONTH: Field = Field {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    name_base: 0,
};
const MONTH: Field = Field {
    name: "month",
    min: 1,
    max: 12,
    names: MONTH_NAMES,
    name_base: 1,
};
// 7 is accepted as an alias for Sunday and folded into bit 0.
const DAY_OF_WEEK: Field = Field {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: WEEKDAY_NAMES,
    name_base: 0,
};

/// A parsed cron expression. Serialises as its source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CronExpr {
    source: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_wildcard: bool,
    dow_wildcard: bool,
}

impl CronExpr {
    pub fn parse(expression: &str) -> Result<Self> {
        let source = expression.trim();
        let expanded = expand_nickname(source)?;
        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SchedulerError::InvalidConfig(format!(
                "cron expression '{source}' must have 5 fields (minute hour day month weekday), found {}",
                fields.len()
            )));
        }

        let mut days_of_week = parse_field(&DAY_OF_WEEK, fields[4])?;
        if days_of_week & (1u64 << 7) != 0 {
            days_of_week = (days_of_week & !(1u64 << 7)) | 1;
        }

        Ok(Self {
            source: source.to_string(),
            minutes: parse_field(&MINUTE, fields[0])?,
            hours: parse_field(&HOUR, fields[1])?,
            days_of_month: parse_field(&DAY_OF_MONTH, fields[2])?,
            months: parse_field(&MONTH, fields[3])?,
            days_of_week,
            dom_wildcard: fields[2].starts_with('*'),
            dow_wildcard: fields[4].starts_with('*'),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Earliest matching minute strictly after `after`, or `None` if the
    /// expression never matches (e.g. `0 0 30 2 *`).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.naive_utc().with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let limit = start + Duration::days(SEARCH_HORIZON_DAYS);

        let mut t = start;
        while t <= limit {
            if !has_bit(self.months, t.month()) {
                t = first_of_next_month(t.date())?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !has_bit(self.hours, t.hour()) {
                t = top_of_hour(t)? + Duration::hours(1);
                continue;
            }
            if !has_bit(self.minutes, t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(Utc.from_utc_datetime(&t));
        }
        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = has_bit(self.days_of_month, date.day());
        let dow = has_bit(self.days_of_week, date.weekday().num_days_from_sunday());
        if self.dom_wildcard || self.dow_wildcard {
            dom && dow
        } else {
            dom || dow
        }
    }
}

impl FromStr for CronExpr {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CronExpr {
    type Error = SchedulerError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<CronExpr> for String {
    fn from(expr: CronExpr) -> Self {
        expr.source
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn expand_nickname(source: &str) -> Result<&str> {
    if !source.starts_with('@') {
        return Ok(source);
    }
    match source.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => Ok("0 0 1 1 *"),
        "@monthly" => Ok("0 0 1 * *"),
        "@weekly" => Ok("0 0 * * 0"),
        "@daily" | "@midnight" => Ok("0 0 * * *"),
        "@hourly" => Ok("0 * * * *"),
        _ => Err(SchedulerError::InvalidConfig(format!(
            "unknown cron nickname '{source}'"
        ))),
    }
}

/// Parse one field into a bitmask where bit `n` means value `n` matches.
fn parse_field(field: &Field, text: &str) -> Result<u64> {
    let mut mask = 0u64;
    for part in text.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(parse_step(field, step)?)),
            None => (part, None),
        };

        let (lo, hi) = if range == "*" {
            (field.min, field.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(field, a)?, parse_value(field, b)?)
        } else {
            let v = parse_value(field, range)?;
            // `a/n` means "from a to the end of the field, every n".
            if step.is_some() {
                (v, field.max)
            } else {
                (v, v)
            }
        };

        if lo > hi {
            return Err(invalid(field, part, "range start is after range end"));
        }

        let step = step.unwrap_or(1);
        let mut v = lo;
        while v <= hi {
            mask |= 1u64 << v;
            match v.checked_add(step) {
                Some(next) => v = next,
                None => break,
            }
        }
    }
    Ok(mask)
}

fn parse_step(field: &Field, text: &str) -> Result<u32> {
    match text.parse::<u32>() {
        Ok(step) if (1..=field.max).contains(&step) => Ok(step),
        _ => Err(invalid(
            field,
            text,
            &format!("step must be between 1 and {}", field.max),
        )),
    }
}

fn parse_value(field: &Field, text: &str) -> Result<u32> {
    if let Ok(v) = text.parse::<u32>() {
        if (field.min..=field.max).contains(&v) {
            return Ok(v);
        }
        return Err(invalid(
            field,
            text,
            &format!("value must be between {} and {}", field.min, field.max),
        ));
    }
    field
        .names
        .iter()
        .position(|name| name.eq_ignore_ascii_case(text))
        .map(|idx| idx as u32 + field.name_base)
        .ok_or_else(|| invalid(field, text, "not a number or known name"))
}

fn invalid(field: &Field, text: &str, reason: &str) -> SchedulerError {
    SchedulerError::InvalidConfig(format!(
        "invalid cron {} field '{text}': {reason}",
        field.name
    ))
}

fn has_bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

fn top_of_hour(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.date().and_hms_opt(t.hour(), 0, 0)
}
