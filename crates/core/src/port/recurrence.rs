// Recurrence Provider Port
// Calendar math (cron, human intervals, time zones) lives behind this trait

use crate::domain::Timestamp;
use crate::error::Result;

/// A parsed `repeat_interval`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntervalSpec {
    /// Cron expression (5 or 6 fields)
    Cron(String),
    /// Fixed duration in milliseconds
    Every(i64),
}

/// Recurrence provider interface
///
/// All instants are epoch milliseconds; `timezone` is an IANA name.
pub trait RecurrenceProvider: Send + Sync {
    /// Classify a repeat interval as cron or fixed duration
    ///
    /// # Errors
    /// `AppError::Schedule` when the text is neither
    fn parse_interval(&self, spec: &str) -> Result<IntervalSpec>;

    /// First cron occurrence strictly after `after`
    fn next_cron(&self, expr: &str, after: Timestamp, timezone: &str) -> Result<Timestamp>;

    /// First local occurrence of a time of day ("3:30pm", "15:30") strictly after `after`
    fn next_time_of_day(&self, time_of_day: &str, after: Timestamp, timezone: &str)
        -> Result<Timestamp>;

    /// Local midnight of the day containing `at`
    fn start_of_day(&self, at: Timestamp, timezone: &str) -> Result<Timestamp>;

    /// Local weekday of an instant (0 = Sunday)
    fn weekday(&self, at: Timestamp, timezone: &str) -> Result<u32>;

    /// Parse a weekday list ("sat,sun", "Saturday and Sunday").
    /// `None` when the text is not a weekday list.
    fn parse_weekdays(&self, spec: &str) -> Option<Vec<u32>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;

    const DAY_MS: i64 = 86_400_000;

    /// UTC-only provider understanding "N seconds|minutes|hours|days",
    /// cron "*/N * * * *" (every N minutes) and "HH:MM" times of day
    pub struct FixedRecurrence;

    impl FixedRecurrence {
        fn unit_ms(unit: &str) -> Option<i64> {
            match unit.trim_end_matches('s') {
                "second" => Some(1_000),
                "minute" => Some(60_000),
                "hour" => Some(3_600_000),
                "day" => Some(DAY_MS),
                _ => None,
            }
        }

        fn cron_step_minutes(expr: &str) -> Option<i64> {
            let fields: Vec<&str> = expr.split_whitespace().collect();
            if fields.len() != 5 || fields[1..].iter().any(|f| *f != "*") {
                return None;
            }
            fields[0].strip_prefix("*/")?.parse().ok()
        }
    }

    impl RecurrenceProvider for FixedRecurrence {
        fn parse_interval(&self, spec: &str) -> Result<IntervalSpec> {
            if Self::cron_step_minutes(spec).is_some() {
                return Ok(IntervalSpec::Cron(spec.to_string()));
            }
            let mut parts = spec.split_whitespace();
            let amount = parts.next().and_then(|n| n.parse::<i64>().ok());
            let unit = parts.next().and_then(Self::unit_ms);
            match (amount, unit) {
                (Some(n), Some(ms)) if n > 0 => Ok(IntervalSpec::Every(n * ms)),
                _ => Err(AppError::Schedule(format!("invalid interval: {}", spec))),
            }
        }

        fn next_cron(&self, expr: &str, after: Timestamp, _timezone: &str) -> Result<Timestamp> {
            let step = Self::cron_step_minutes(expr)
                .ok_or_else(|| AppError::Schedule(format!("invalid cron: {}", expr)))?
                * 60_000;
            Ok((after / step + 1) * step)
        }

        fn next_time_of_day(
            &self,
            time_of_day: &str,
            after: Timestamp,
            _timezone: &str,
        ) -> Result<Timestamp> {
            let (h, m) = time_of_day
                .split_once(':')
                .and_then(|(h, m)| Some((h.parse::<i64>().ok()?, m.parse::<i64>().ok()?)))
                .ok_or_else(|| AppError::Schedule(format!("invalid time: {}", time_of_day)))?;
            let offset = (h * 60 + m) * 60_000;
            let day_start = after.div_euclid(DAY_MS) * DAY_MS;
            let today = day_start + offset;
            Ok(if today > after { today } else { today + DAY_MS })
        }

        fn start_of_day(&self, at: Timestamp, _timezone: &str) -> Result<Timestamp> {
            Ok(at.div_euclid(DAY_MS) * DAY_MS)
        }

        fn weekday(&self, at: Timestamp, _timezone: &str) -> Result<u32> {
            // 1970-01-01 was a Thursday
            Ok((at.div_euclid(DAY_MS) + 4).rem_euclid(7) as u32)
        }

        fn parse_weekdays(&self, spec: &str) -> Option<Vec<u32>> {
            spec.split(',')
                .map(|day| match day.trim() {
                    "sun" => Some(0),
                    "mon" => Some(1),
                    "tue" => Some(2),
                    "wed" => Some(3),
                    "thu" => Some(4),
                    "fri" => Some(5),
                    "sat" => Some(6),
                    _ => None,
                })
                .collect()
        }
    }
}
