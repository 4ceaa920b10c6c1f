//! Cron expression parsing and next-fire computation.
//!
//! Expressions use the `cron` crate's six-field form (seconds first). The
//! classic five-field form is accepted too and runs at second zero.

use std::str::FromStr;

use chrono_tz::Tz;

use crate::error::CoreError;
use crate::types::Timestamp;

/// A parsed cron expression.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CoreError> {
        let trimmed = expression.trim();
        let normalized = if trimmed.split_whitespace().count() == 5 {
            format!("0 {trimmed}")
        } else {
            trimmed.to_string()
        };

        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| {
            CoreError::Validation(format!("Invalid cron expression '{expression}': {e}"))
        })?;

        Ok(Self {
            expression: trimmed.to_string(),
            schedule,
        })
    }

    /// The expression as supplied (trimmed).
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`, evaluated in `tz`.
    pub fn next_after(&self, after: Timestamp, tz: Tz) -> Option<Timestamp> {
        let local = after.with_timezone(&tz);
        self.schedule
            .after(&local)
            .next()
            .map(|t| t.with_timezone(&chrono::Utc))
    }
}

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz, CoreError> {
    name.parse::<Tz>()
        .map_err(|_| CoreError::Validation(format!("'{name}' is not a valid IANA timezone")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn five_field_expression_is_accepted() {
        let schedule = CronSchedule::parse("*/5 * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 10, 2, 30).unwrap();
        let next = schedule.next_after(from, chrono_tz::UTC).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 0).unwrap());
    }

    #[test]
    fn six_field_daily_expression() {
        let schedule = CronSchedule::parse("0 0 8 * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let next = schedule.next_after(from, chrono_tz::UTC).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap());
    }

    #[test]
    fn timezone_shifts_fire_time() {
        let schedule = CronSchedule::parse("0 0 8 * * *").unwrap();
        let tz = parse_timezone("Asia/Tokyo").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        // 08:00 in Tokyo is 23:00 UTC the previous day.
        let next = schedule.next_after(from, tz).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 23, 0, 0).unwrap());
    }

    #[test]
    fn invalid_expression_is_validation_error() {
        let err = CronSchedule::parse("every tuesday").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn invalid_timezone_is_rejected() {
        assert!(parse_timezone("Mars/Olympus").is_err());
    }
}
