// Next-run computation
//
// Pure function of the job's recurrence fields and a reference time. All
// calendar math goes through the RecurrenceProvider port.

use crate::application::worker::constants::MAX_SKIP_DAY_ATTEMPTS;
use crate::domain::{Job, Timestamp};
use crate::error::{AppError, Result};
use crate::port::{IntervalSpec, RecurrenceProvider};

const DAY_AND_HALF_MS: i64 = 36 * 60 * 60 * 1000;

/// The recurrence rule a job follows
enum Rule<'a> {
    Every(i64),
    Cron(String),
    TimeOfDay(&'a str),
}

struct Calendar<'a> {
    recurrence: &'a dyn RecurrenceProvider,
    timezone: &'a str,
}

impl Calendar<'_> {
    /// First occurrence strictly after `after`
    fn next_after(&self, rule: &Rule<'_>, after: Timestamp) -> Result<Timestamp> {
        match rule {
            Rule::Every(ms) => Ok(after + ms),
            Rule::Cron(expr) => self.recurrence.next_cron(expr, after, self.timezone),
            Rule::TimeOfDay(tod) => self.recurrence.next_time_of_day(tod, after, self.timezone),
        }
    }

    /// First occurrence at or after `at`
    fn first_from(&self, rule: &Rule<'_>, at: Timestamp) -> Result<Timestamp> {
        match rule {
            Rule::Every(_) => Ok(at),
            _ => self.next_after(rule, at - 1),
        }
    }

    fn next_midnight(&self, at: Timestamp) -> Result<Timestamp> {
        let today = self.recurrence.start_of_day(at, self.timezone)?;
        self.recurrence
            .start_of_day(today + DAY_AND_HALF_MS, self.timezone)
    }

    /// First occurrence of the rule on the day after `candidate`'s
    ///
    /// Intervals keep their phase: the candidate advances by whole steps.
    fn first_next_day(&self, rule: &Rule<'_>, candidate: Timestamp) -> Result<Timestamp> {
        let midnight = self.next_midnight(candidate)?;
        match rule {
            Rule::Every(ms) => {
                let step = (*ms).max(1);
                let steps = ((midnight - candidate + step - 1) / step).max(1);
                Ok(candidate + steps * step)
            }
            _ => self.first_from(rule, midnight),
        }
    }
}

/// Next eligible run of `job`, or `None` when it should not run again
///
/// `reference` is "now" for the caller; a job that already ran counts from
/// its `last_run_at`. Non-repeating jobs always yield `None`.
pub fn compute_next_run_at(
    job: &Job,
    reference: Timestamp,
    recurrence: &dyn RecurrenceProvider,
    default_timezone: &str,
) -> Result<Option<Timestamp>> {
    let rule = if let Some(time_of_day) = job.repeat_at.as_deref() {
        Rule::TimeOfDay(time_of_day)
    } else if let Some(interval) = job.repeat_interval.as_deref() {
        match recurrence.parse_interval(interval)? {
            IntervalSpec::Every(ms) => Rule::Every(ms),
            IntervalSpec::Cron(expr) => Rule::Cron(expr),
        }
    } else {
        return Ok(None);
    };

    let calendar = Calendar {
        recurrence,
        timezone: job.repeat_timezone.as_deref().unwrap_or(default_timezone),
    };
    let base = job.last_run_at.unwrap_or(reference);

    let mut candidate = match (&rule, job.last_run_at) {
        (Rule::Every(_), None) => base,
        _ => calendar.next_after(&rule, base)?,
    };

    // Never move backwards past the run already scheduled. An interval job
    // that never ran stays due at the reference; the guard applies from its
    // first run on.
    if let Some(previous) = job.next_run_at {
        let guarded = !matches!(rule, Rule::Every(_)) || job.last_run_at.is_some();
        if guarded && candidate <= previous {
            candidate = calendar.next_after(&rule, previous)?;
        }
    }

    if let Some(start_date) = job.start_date {
        if candidate < start_date {
            candidate = calendar.first_from(&rule, start_date)?;
        }
    }

    if let Some(skip_days) = job.skip_days.as_deref() {
        candidate = apply_skip_days(&calendar, &rule, job, skip_days, reference, candidate)?;
    }

    if let Some(end_date) = job.end_date {
        if candidate > end_date {
            return Ok(None);
        }
    }

    Ok(Some(candidate))
}

fn apply_skip_days(
    calendar: &Calendar<'_>,
    rule: &Rule<'_>,
    job: &Job,
    skip_days: &str,
    reference: Timestamp,
    mut candidate: Timestamp,
) -> Result<Timestamp> {
    if let Some(weekdays) = calendar.recurrence.parse_weekdays(skip_days) {
        for _ in 0..MAX_SKIP_DAY_ATTEMPTS {
            let weekday = calendar.recurrence.weekday(candidate, calendar.timezone)?;
            if !weekdays.contains(&weekday) {
                return Ok(candidate);
            }
            candidate = calendar.first_next_day(rule, candidate)?;
        }
        return Err(AppError::Schedule(format!(
            "skip_days '{}' excludes every candidate",
            skip_days
        )));
    }

    match calendar.recurrence.parse_interval(skip_days)? {
        IntervalSpec::Every(offset) => {
            if job.last_run_at.is_some() && reference >= candidate {
                candidate += offset;
            }
            Ok(candidate)
        }
        IntervalSpec::Cron(_) => Err(AppError::Schedule(format!(
            "skip_days must be a weekday list or interval: {}",
            skip_days
        ))),
    }
}
