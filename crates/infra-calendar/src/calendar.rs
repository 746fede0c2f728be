// RecurrenceProvider backed by chrono + chrono-tz

use crate::cron::CronSchedule;
use crate::human_interval::parse_human_interval;
use crate::time_of_day::parse_time_of_day;
use crate::weekdays;
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use lockstep_core::domain::Timestamp;
use lockstep_core::error::{AppError, Result};
use lockstep_core::port::{IntervalSpec, RecurrenceProvider};
use tracing::debug;

/// Longest DST gap we step over when a wall-clock time does not exist
const MAX_GAP_HOURS: i64 = 3;

/// Earliest instant of a local wall-clock time; `None` inside a DST gap
pub(crate) fn resolve_local(tz: &Tz, naive: &NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(naive).earliest()
}

/// Like [`resolve_local`], but a time inside a DST gap moves past the gap
fn resolve_local_or_later(tz: &Tz, naive: &NaiveDateTime) -> Result<DateTime<Tz>> {
    (0..=MAX_GAP_HOURS)
        .find_map(|hours| resolve_local(tz, &(*naive + Duration::hours(hours))))
        .ok_or_else(|| AppError::Schedule(format!("no valid local time near {}", naive)))
}

fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| AppError::Schedule(format!("unknown timezone: {}", name)))
}

fn to_utc(at: Timestamp) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(at)
        .single()
        .ok_or_else(|| AppError::Schedule(format!("timestamp out of range: {}", at)))
}

/// Calendar math over the IANA time zone database
#[derive(Debug, Clone, Copy, Default)]
pub struct ChronoCalendar;

impl ChronoCalendar {
    pub fn new() -> Self {
        Self
    }
}

impl RecurrenceProvider for ChronoCalendar {
    fn parse_interval(&self, spec: &str) -> Result<IntervalSpec> {
        if CronSchedule::parse(spec).is_ok() {
            return Ok(IntervalSpec::Cron(spec.trim().to_string()));
        }
        parse_human_interval(spec)
            .map(IntervalSpec::Every)
            .ok_or_else(|| AppError::Schedule(format!("invalid repeat interval: {}", spec)))
    }

    fn next_cron(&self, expr: &str, after: Timestamp, timezone: &str) -> Result<Timestamp> {
        let schedule = CronSchedule::parse(expr)
            .map_err(|e| AppError::Schedule(format!("invalid cron '{}': {}", expr, e)))?;
        let tz = parse_timezone(timezone)?;
        let next = schedule
            .next_after(to_utc(after)?, &tz)
            .ok_or_else(|| AppError::Schedule(format!("cron '{}' never fires", expr)))?;

        debug!(cron = %expr, timezone = %timezone, next = %next, "Next cron occurrence");
        Ok(next.timestamp_millis())
    }

    fn next_time_of_day(
        &self,
        time_of_day: &str,
        after: Timestamp,
        timezone: &str,
    ) -> Result<Timestamp> {
        let time = parse_time_of_day(time_of_day)
            .ok_or_else(|| AppError::Schedule(format!("invalid time of day: {}", time_of_day)))?;
        let tz = parse_timezone(timezone)?;
        let local_date = to_utc(after)?.with_timezone(&tz).date_naive();

        // Today's slot, else tomorrow's; a DST gap may push one past the other
        let mut date = local_date;
        for _ in 0..3 {
            let candidate = resolve_local_or_later(&tz, &date.and_time(time))?;
            if candidate.timestamp_millis() > after {
                return Ok(candidate.timestamp_millis());
            }
            date = date
                .succ_opt()
                .ok_or_else(|| AppError::Schedule("date out of range".to_string()))?;
        }
        Err(AppError::Schedule(format!(
            "no occurrence of {} after {}",
            time_of_day, after
        )))
    }

    fn start_of_day(&self, at: Timestamp, timezone: &str) -> Result<Timestamp> {
        let tz = parse_timezone(timezone)?;
        let midnight = to_utc(at)?
            .with_timezone(&tz)
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AppError::Schedule("invalid local midnight".to_string()))?;
        Ok(resolve_local_or_later(&tz, &midnight)?.timestamp_millis())
    }

    fn weekday(&self, at: Timestamp, timezone: &str) -> Result<u32> {
        let tz = parse_timezone(timezone)?;
        Ok(to_utc(at)?.with_timezone(&tz).weekday().num_days_from_sunday())
    }

    fn parse_weekdays(&self, spec: &str) -> Option<Vec<u32>> {
        weekdays::parse_weekdays(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .timestamp_millis()
    }

    const NEW_YORK: &str = "America/New_York";

    #[test]
    fn test_parse_interval_classifies() {
        let calendar = ChronoCalendar::new();
        assert_eq!(
            calendar.parse_interval("*/5 * * * *").unwrap(),
            IntervalSpec::Cron("*/5 * * * *".to_string())
        );
        assert_eq!(
            calendar.parse_interval("3 minutes").unwrap(),
            IntervalSpec::Every(180_000)
        );
        assert!(matches!(
            calendar.parse_interval("every so often"),
            Err(AppError::Schedule(_))
        ));
    }

    #[test]
    fn test_next_cron_in_time_zone() {
        let calendar = ChronoCalendar::new();
        let next = calendar
            .next_cron("0 9 * * *", ms(2024, 7, 1, 0, 0), NEW_YORK)
            .unwrap();
        // Summer: New York is UTC-4
        assert_eq!(next, ms(2024, 7, 1, 13, 0));
    }

    #[test]
    fn test_unknown_timezone_is_schedule_error() {
        let calendar = ChronoCalendar::new();
        assert!(matches!(
            calendar.next_cron("0 9 * * *", 0, "Mars/Olympus"),
            Err(AppError::Schedule(_))
        ));
    }

    #[test]
    fn test_next_time_of_day() {
        let calendar = ChronoCalendar::new();
        let after = ms(2024, 1, 1, 12, 0);
        assert_eq!(
            calendar.next_time_of_day("3:30pm", after, "UTC").unwrap(),
            ms(2024, 1, 1, 15, 30)
        );
        assert_eq!(
            calendar.next_time_of_day("9:00", after, "UTC").unwrap(),
            ms(2024, 1, 2, 9, 0)
        );
        // 15:30 in New York (UTC-5 in winter)
        assert_eq!(
            calendar.next_time_of_day("15:30", after, NEW_YORK).unwrap(),
            ms(2024, 1, 1, 20, 30)
        );
    }

    #[test]
    fn test_time_of_day_inside_dst_gap_moves_forward() {
        let calendar = ChronoCalendar::new();
        // 2024-03-10 00:00 EST; 02:30 that night does not exist
        let after = ms(2024, 3, 10, 5, 0);
        assert_eq!(
            calendar.next_time_of_day("2:30am", after, NEW_YORK).unwrap(),
            ms(2024, 3, 10, 7, 30)
        );
    }

    #[test]
    fn test_start_of_day_and_weekday_are_local() {
        let calendar = ChronoCalendar::new();
        // 2024-01-01 03:00 UTC is still Sunday evening in New York
        let at = ms(2024, 1, 1, 3, 0);
        assert_eq!(calendar.weekday(at, "UTC").unwrap(), 1);
        assert_eq!(calendar.weekday(at, NEW_YORK).unwrap(), 0);
        assert_eq!(
            calendar.start_of_day(at, NEW_YORK).unwrap(),
            ms(2023, 12, 31, 5, 0)
        );
        assert_eq!(
            calendar.start_of_day(ms(2024, 1, 1, 0, 0), "Asia/Kolkata").unwrap(),
            ms(2023, 12, 31, 18, 30)
        );
    }

    #[test]
    fn test_parse_weekdays_delegates() {
        let calendar = ChronoCalendar::new();
        assert_eq!(calendar.parse_weekdays("sat,sun"), Some(vec![0, 6]));
        assert_eq!(calendar.parse_weekdays("2 days"), None);
    }
}
