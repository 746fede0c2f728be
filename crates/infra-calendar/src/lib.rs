// Lockstep Infrastructure - Calendar Adapter
// Implements: RecurrenceProvider (cron, human intervals, IANA time zones)

mod calendar;
mod cron;
mod human_interval;
mod time_of_day;
mod weekdays;

pub use calendar::ChronoCalendar;
pub use cron::CronSchedule;
pub use human_interval::parse_human_interval;
