use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::cron::CronExpr;
use crate::error::{Result, SchedulerError};

/// Longest accepted interval: 100 years.
pub const MAX_INTERVAL_SECS: i64 = 100 * 366 * 24 * 3600;

/// Timestamps are stored as four-digit-year RFC 3339 text.
const MAX_YEAR: i32 = 9999;

const CRON_KEYS: &[&str] = &["expression"];
const DATE_KEYS: &[&str] = &["run_at", "run_date"];

/// Discriminator selecting a [`Trigger`] variant, as sent by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Interval,
    Cron,
    #[serde(rename = "date", alias = "fixed_date")]
    FixedDate,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Interval => "interval",
            ScheduleType::Cron => "cron",
            ScheduleType::FixedDate => "date",
        }
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interval" => Ok(ScheduleType::Interval),
            "cron" => Ok(ScheduleType::Cron),
            "date" | "fixed_date" => Ok(ScheduleType::FixedDate),
            other => Err(SchedulerError::Validation(format!(
                "unknown schedule_type '{other}' (expected interval, cron or date)"
            ))),
        }
    }
}

/// Defines when a job becomes due. Each variant is validated when built.
///
/// On the wire a trigger is the pair `schedule_type` + `schedule_config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TriggerRepr", into = "TriggerRepr")]
pub enum Trigger {
    /// Repeat every `seconds` (always ≥ 1).
    Interval { seconds: u64 },
    /// Five-field cron expression, evaluated in UTC.
    Cron { expression: CronExpr },
    /// Run once at the given instant.
    FixedDate { run_at: DateTime<Utc> },
}

impl Trigger {
    pub fn interval(seconds: i64) -> Result<Self> {
        if seconds < 1 {
            return Err(SchedulerError::InvalidConfig(format!(
                "interval must be at least 1 second, got {seconds}"
            )));
        }
        if seconds > MAX_INTERVAL_SECS {
            return Err(SchedulerError::InvalidConfig(format!(
                "interval must be at most {MAX_INTERVAL_SECS} seconds, got {seconds}"
            )));
        }
        Ok(Trigger::Interval {
            seconds: seconds as u64,
        })
    }

    pub fn cron(expression: &str) -> Result<Self> {
        Ok(Trigger::Cron {
            expression: CronExpr::parse(expression)?,
        })
    }

    /// A past `run_at` is accepted; such a trigger never yields a next run.
    pub fn fixed_date(run_at: DateTime<Utc>) -> Self {
        Trigger::FixedDate { run_at }
    }

    /// Build a trigger from a client-supplied `schedule_config` object.
    ///
    /// | Type       | Config                                                    |
    /// |------------|-----------------------------------------------------------|
    /// | `interval` | any of `weeks`, `days`, `hours`, `minutes`, `seconds`     |
    /// | `cron`     | `expression`                                              |
    /// | `date`     | `run_at` (or `run_date`), RFC 3339 or naive UTC datetime  |
    ///
    /// Fields that belong to another schedule type are ignored.
    pub fn from_config(schedule_type: ScheduleType, config: &Value) -> Result<Self> {
        let obj = config.as_object().ok_or_else(|| {
            SchedulerError::InvalidConfig(format!(
                "schedule_config for '{schedule_type}' must be an object"
            ))
        })?;
        check_keys(schedule_type, obj)?;
        match schedule_type {
            ScheduleType::Interval => interval_from_config(obj),
            ScheduleType::Cron => {
                let expression = obj
                    .get("expression")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        SchedulerError::InvalidConfig(
                            "cron schedule_config requires a string 'expression'".to_string(),
                        )
                    })?;
                Trigger::cron(expression)
            }
            ScheduleType::FixedDate => {
                let raw = obj
                    .get("run_at")
                    .or_else(|| obj.get("run_date"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        SchedulerError::InvalidConfig(
                            "date schedule_config requires a timestamp 'run_at'".to_string(),
                        )
                    })?;
                let run_at = parse_timestamp(raw)?;
                if run_at.year() > MAX_YEAR {
                    return Err(SchedulerError::InvalidConfig(format!(
                        "run_at '{raw}' is after year {MAX_YEAR}"
                    )));
                }
                Ok(Trigger::fixed_date(run_at))
            }
        }
    }

    pub fn schedule_type(&self) -> ScheduleType {
        match self {
            Trigger::Interval { .. } => ScheduleType::Interval,
            Trigger::Cron { .. } => ScheduleType::Cron,
            Trigger::FixedDate { .. } => ScheduleType::FixedDate,
        }
    }

    /// Canonical `schedule_config` for this trigger.
    pub fn config(&self) -> Value {
        match self {
            Trigger::Interval { seconds } => json!({ "seconds": seconds }),
            Trigger::Cron { expression } => json!({ "expression": expression.as_str() }),
            Trigger::FixedDate { run_at } => json!({ "run_at": run_at.to_rfc3339() }),
        }
    }

    /// Earliest occurrence strictly after `after`, or `None` when the trigger
    /// is exhausted. Occurrences past year 9999 count as exhausted.
    pub fn compute_next(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let next = match self {
            Trigger::Interval { seconds } => {
                let step = Duration::try_seconds(i64::try_from(*seconds).ok()?)?;
                after.checked_add_signed(step)
            }
            Trigger::Cron { expression } => expression.next_after(after),
            Trigger::FixedDate { run_at } => (*run_at > after).then_some(*run_at),
        };
        next.filter(|t| t.year() <= MAX_YEAR)
    }
}

/// Wire form of a [`Trigger`].
#[derive(Serialize, Deserialize)]
struct TriggerRepr {
    schedule_type: ScheduleType,
    schedule_config: Value,
}

impl TryFrom<TriggerRepr> for Trigger {
    type Error = SchedulerError;

    fn try_from(repr: TriggerRepr) -> Result<Self> {
        Trigger::from_config(repr.schedule_type, &repr.schedule_config)
    }
}

impl From<Trigger> for TriggerRepr {
    fn from(trigger: Trigger) -> Self {
        TriggerRepr {
            schedule_type: trigger.schedule_type(),
            schedule_config: trigger.config(),
        }
    }
}

const INTERVAL_UNITS: &[(&str, i64)] = &[
    ("weeks", 7 * 24 * 3600),
    ("days", 24 * 3600),
    ("hours", 3600),
    ("minutes", 60),
    ("seconds", 1),
];

fn interval_from_config(obj: &Map<String, Value>) -> Result<Trigger> {
    let mut total: i64 = 0;
    let mut seen = false;
    for (unit, factor) in INTERVAL_UNITS {
        let Some(value) = obj.get(*unit) else {
            continue;
        };
        seen = true;
        let n = integer_field(unit, value)?;
        if n < 0 {
            return Err(SchedulerError::InvalidConfig(format!(
                "interval '{unit}' must not be negative, got {n}"
            )));
        }
        total = n
            .checked_mul(*factor)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| SchedulerError::InvalidConfig("interval is too large".to_string()))?;
    }
    if !seen {
        return Err(SchedulerError::InvalidConfig(
            "interval schedule_config requires 'seconds' (or weeks/days/hours/minutes)"
                .to_string(),
        ));
    }
    Trigger::interval(total)
}

/// Form inputs often arrive as numeric strings (`"60"`); accept both.
fn integer_field(name: &str, value: &Value) -> Result<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        SchedulerError::InvalidConfig(format!("interval '{name}' must be an integer, got {value}"))
    })
}

/// Reject unknown fields. Clients that switch schedule type in a form keep
/// the previous type's fields around, so those are dropped with a debug log.
fn check_keys(schedule_type: ScheduleType, obj: &Map<String, Value>) -> Result<()> {
    for key in obj.keys().map(String::as_str) {
        let owner = if INTERVAL_UNITS.iter().any(|(unit, _)| *unit == key) {
            ScheduleType::Interval
        } else if CRON_KEYS.contains(&key) {
            ScheduleType::Cron
        } else if DATE_KEYS.contains(&key) {
            ScheduleType::FixedDate
        } else {
            return Err(SchedulerError::InvalidConfig(format!(
                "unexpected schedule_config field '{key}'"
            )));
        };
        if owner != schedule_type {
            debug!(%schedule_type, key, "ignoring schedule_config field of another schedule type");
        }
    }
    Ok(())
}

/// RFC 3339, or a naive `YYYY-MM-DDTHH:MM[:SS]` taken as UTC.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
    ]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| SchedulerError::InvalidConfig(format!("invalid run_at timestamp '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn interval_steps_by_fixed_amount() {
        let trigger = Trigger::interval(60).unwrap();
        let t0 = at("2026-03-10T10:00:00Z");
        let t1 = trigger.compute_next(t0).unwrap();
        let t2 = trigger.compute_next(t1).unwrap();
        assert_eq!(t1 - t0, Duration::seconds(60));
        assert_eq!(t2 - t1, Duration::seconds(60));
    }

    #[test]
    fn non_positive_interval_is_invalid() {
        for secs in [0, -5] {
            let err = Trigger::interval(secs).unwrap_err();
            assert_eq!(err.code(), "INVALID_CONFIG");
        }
        let err = Trigger::from_config(ScheduleType::Interval, &json!({"seconds": 0})).unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }

    #[test]
    fn interval_units_are_summed() {
        let trigger = Trigger::from_config(
            ScheduleType::Interval,
            &json!({"hours": 1, "minutes": "30", "seconds": 5}),
        )
        .unwrap();
        assert_eq!(trigger, Trigger::Interval { seconds: 5405 });
        assert_eq!(trigger.config(), json!({"seconds": 5405}));
    }

    #[test]
    fn interval_config_rejects_garbage() {
        for config in [
            json!({}),
            json!({"seconds": "soon"}),
            json!({"seconds": 1.5}),
            json!({"seconds": 10, "jitter": 3}),
            json!([60]),
        ] {
            assert!(
                Trigger::from_config(ScheduleType::Interval, &config).is_err(),
                "{config}"
            );
        }
    }

    #[test]
    fn oversized_intervals_are_invalid() {
        for config in [
            json!({"seconds": 10_000_000_000_000_000i64}),
            json!({"weeks": 600_000}),
            json!({"seconds": MAX_INTERVAL_SECS + 1}),
        ] {
            let err = Trigger::from_config(ScheduleType::Interval, &config).unwrap_err();
            assert_eq!(err.code(), "INVALID_CONFIG", "{config}");
        }
        let longest = Trigger::interval(MAX_INTERVAL_SECS).unwrap();
        assert!(longest.compute_next(at("2026-03-10T10:00:00Z")).is_some());
    }

    #[test]
    fn unrepresentable_next_run_is_exhausted() {
        let raw = Trigger::Interval { seconds: u64::MAX };
        assert_eq!(raw.compute_next(at("2026-03-10T10:00:00Z")), None);

        let late = at("9999-12-31T23:00:00Z");
        assert_eq!(Trigger::interval(7200).unwrap().compute_next(late), None);
        assert_eq!(Trigger::cron("0 0 * * *").unwrap().compute_next(late), None);
    }

    #[test]
    fn negative_interval_units_are_invalid() {
        let err = Trigger::from_config(
            ScheduleType::Interval,
            &json!({"hours": 1, "seconds": -3000}),
        )
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }

    #[test]
    fn fields_of_other_schedule_types_are_ignored() {
        let cron = Trigger::from_config(
            ScheduleType::Cron,
            &json!({"seconds": 60, "expression": "0 9 * * *"}),
        )
        .unwrap();
        assert_eq!(cron, Trigger::cron("0 9 * * *").unwrap());
        assert_eq!(cron.config(), json!({"expression": "0 9 * * *"}));

        let date = Trigger::from_config(
            ScheduleType::FixedDate,
            &json!({"seconds": 60, "run_date": "2026-06-01T12:30"}),
        )
        .unwrap();
        assert_eq!(date, Trigger::fixed_date(at("2026-06-01T12:30:00Z")));

        let interval = Trigger::from_config(
            ScheduleType::Interval,
            &json!({"seconds": 90, "expression": ""}),
        )
        .unwrap();
        assert_eq!(interval, Trigger::interval(90).unwrap());
    }

    #[test]
    fn fixed_date_fires_once() {
        let run_at = at("2026-06-01T12:00:00Z");
        let trigger = Trigger::fixed_date(run_at);
        assert_eq!(trigger.compute_next(at("2026-05-01T00:00:00Z")), Some(run_at));
        assert_eq!(trigger.compute_next(run_at), None);
        assert_eq!(trigger.compute_next(at("2026-07-01T00:00:00Z")), None);
    }

    #[test]
    fn fixed_date_accepts_form_formats() {
        let expected = at("2026-06-01T12:30:00Z");
        for raw in [
            "2026-06-01T12:30:00Z",
            "2026-06-01T14:30:00+02:00",
            "2026-06-01T12:30",
            "2026-06-01T12:30:00",
        ] {
            let trigger =
                Trigger::from_config(ScheduleType::FixedDate, &json!({ "run_at": raw })).unwrap();
            assert_eq!(trigger, Trigger::fixed_date(expected), "{raw}");
        }
        let legacy =
            Trigger::from_config(ScheduleType::FixedDate, &json!({"run_date": "2026-06-01T12:30"}))
                .unwrap();
        assert_eq!(legacy, Trigger::fixed_date(expected));
        assert!(Trigger::from_config(ScheduleType::FixedDate, &json!({"run_at": "tomorrow"})).is_err());
    }

    #[test]
    fn cron_config_requires_expression() {
        assert!(Trigger::from_config(ScheduleType::Cron, &json!({})).is_err());
        let err =
            Trigger::from_config(ScheduleType::Cron, &json!({"expression": "61 * * * *"})).unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
        let ok = Trigger::from_config(ScheduleType::Cron, &json!({"expression": "0 9 * * *"})).unwrap();
        assert_eq!(ok.schedule_type(), ScheduleType::Cron);
    }

    #[test]
    fn schedule_type_parsing() {
        assert_eq!("interval".parse::<ScheduleType>().unwrap(), ScheduleType::Interval);
        assert_eq!("CRON".parse::<ScheduleType>().unwrap(), ScheduleType::Cron);
        assert_eq!("date".parse::<ScheduleType>().unwrap(), ScheduleType::FixedDate);
        assert_eq!("fixed_date".parse::<ScheduleType>().unwrap(), ScheduleType::FixedDate);
        let err = "weekly".parse::<ScheduleType>().unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn trigger_wire_form() {
        let trigger = Trigger::cron("*/5 * * * *").unwrap();
        let value = serde_json::to_value(&trigger).unwrap();
        assert_eq!(
            value,
            json!({"schedule_type": "cron", "schedule_config": {"expression": "*/5 * * * *"}})
        );
        let back: Trigger = serde_json::from_value(value).unwrap();
        assert_eq!(back, trigger);
    }
}
