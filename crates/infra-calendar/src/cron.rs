// Cron expressions
//
// 5 fields (`min hour dom mon dow`) or 6 fields (`sec min hour dom mon dow`).
// Each field accepts `*`, `a`, `a-b`, `*/n`, `a-b/n`, `a/n` and comma lists;
// months and weekdays also accept three-letter names. Weekday 7 is Sunday.
// When both day-of-month and day-of-week are restricted, a day matching
// either one matches.

use crate::calendar::resolve_local;
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;

/// Longest search window for the next occurrence
const MAX_SEARCH_DAYS: u32 = 366 * 5;

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    seconds: u64,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

struct FieldRange {
    min: u32,
    max: u32,
    /// Names for `min`, `min + 1`, ...
    names: &'static [&'static str],
    name_offset: u32,
}

impl FieldRange {
    const fn numeric(min: u32, max: u32) -> Self {
        Self {
            min,
            max,
            names: &[],
            name_offset: 0,
        }
    }

    fn value(&self, token: &str) -> Result<u32, String> {
        let lower = token.to_ascii_lowercase();
        if let Some(index) = self.names.iter().position(|name| *name == lower) {
            return Ok(index as u32 + self.name_offset);
        }
        let value: u32 = token
            .parse()
            .map_err(|_| format!("invalid value '{}'", token))?;
        if value < self.min || value > self.max {
            return Err(format!(
                "value {} out of range {}-{}",
                value, self.min, self.max
            ));
        }
        Ok(value)
    }

    /// Bit mask of the values a field selects
    fn parse(&self, field: &str) -> Result<u64, String> {
        let mut mask = 0u64;
        for part in field.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| format!("invalid step '{}'", step))?;
                    if step == 0 {
                        return Err("step must be positive".to_string());
                    }
                    (range, Some(step))
                }
                None => (part, None),
            };

            let (start, end) = if range == "*" {
                (self.min, self.max)
            } else if let Some((a, b)) = range.split_once('-') {
                (self.value(a)?, self.value(b)?)
            } else {
                let start = self.value(range)?;
                // "a/n" runs to the end of the range
                (start, if step.is_some() { self.max } else { start })
            };
            if start > end {
                return Err(format!("empty range '{}'", range));
            }

            let mut value = start;
            while value <= end {
                mask |= 1 << value;
                value += step.unwrap_or(1);
            }
        }
        Ok(mask)
    }
}

const SECONDS: FieldRange = FieldRange::numeric(0, 59);
const MINUTES: FieldRange = FieldRange::numeric(0, 59);
const HOURS: FieldRange = FieldRange::numeric(0, 23);
const DAYS_OF_MONTH: FieldRange = FieldRange::numeric(1, 31);
const MONTHS: FieldRange = FieldRange {
    min: 1,
    max: 12,
    names: MONTH_NAMES,
    name_offset: 1,
};
const DAYS_OF_WEEK: FieldRange = FieldRange {
    min: 0,
    max: 7,
    names: WEEKDAY_NAMES,
    name_offset: 0,
};

fn is_wildcard(field: &str) -> bool {
    field == "*" || field == "?"
}

fn set_bits(mask: u64, min: u32, max: u32) -> impl Iterator<Item = u32> {
    (min..=max).filter(move |bit| mask & (1 << bit) != 0)
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, String> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let fields: Vec<&str> = match fields.len() {
            5 => std::iter::once("0").chain(fields).collect(),
            6 => fields,
            n => return Err(format!("expected 5 or 6 fields, found {}", n)),
        };
        let field = |index: usize| fields[index].replace('?', "*");

        let mut days_of_week = DAYS_OF_WEEK.parse(&field(5))?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week | 1) & !(1 << 7);
        }

        Ok(Self {
            seconds: SECONDS.parse(&field(0))?,
            minutes: MINUTES.parse(&field(1))?,
            hours: HOURS.parse(&field(2))?,
            days_of_month: DAYS_OF_MONTH.parse(&field(3))?,
            months: MONTHS.parse(&field(4))?,
            days_of_week,
            dom_restricted: !is_wildcard(fields[3]),
            dow_restricted: !is_wildcard(fields[5]),
        })
    }

    fn matches_date(&self, date: NaiveDate) -> bool {
        if self.months & (1 << date.month()) == 0 {
            return false;
        }
        let dom = self.days_of_month & (1 << date.day()) != 0;
        let dow = self.days_of_week & (1 << date.weekday().num_days_from_sunday()) != 0;
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// First occurrence strictly after `after`, evaluated on the wall clock of `tz`
    ///
    /// Wall-clock times skipped by a DST transition never fire; repeated
    /// ones fire once, at their earlier instant.
    pub fn next_after(&self, after: DateTime<Utc>, tz: &Tz) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(tz);
        let first_day = local.date_naive();
        let mut date = first_day;

        for _ in 0..MAX_SEARCH_DAYS {
            if self.matches_date(date) {
                let today = date == first_day;
                for hour in set_bits(self.hours, 0, 23) {
                    if today && hour < local.hour() {
                        continue;
                    }
                    for minute in set_bits(self.minutes, 0, 59) {
                        if today && hour == local.hour() && minute < local.minute() {
                            continue;
                        }
                        for second in set_bits(self.seconds, 0, 59) {
                            let Some(naive) = date.and_hms_opt(hour, minute, second) else {
                                continue;
                            };
                            let Some(candidate) = resolve_local(tz, &naive) else {
                                continue;
                            };
                            let candidate = candidate.with_timezone(&Utc);
                            if candidate > after {
                                return Some(candidate);
                            }
                        }
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }
}
