// Human-readable intervals: "3 minutes", "1.5 hours", "one day and 2 hours"

const SECOND: f64 = 1_000.0;
const MINUTE: f64 = 60.0 * SECOND;
const HOUR: f64 = 60.0 * MINUTE;
const DAY: f64 = 24.0 * HOUR;
const WEEK: f64 = 7.0 * DAY;
const MONTH: f64 = 30.0 * DAY;
const YEAR: f64 = 365.0 * DAY;

fn unit_ms(unit: &str) -> Option<f64> {
    let ms = match unit {
        "ms" | "millisecond" | "milliseconds" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => SECOND,
        "m" | "min" | "mins" | "minute" | "minutes" => MINUTE,
        "h" | "hr" | "hrs" | "hour" | "hours" => HOUR,
        "d" | "day" | "days" => DAY,
        "w" | "week" | "weeks" => WEEK,
        "month" | "months" => MONTH,
        "y" | "year" | "years" => YEAR,
        _ => return None,
    };
    Some(ms)
}

fn number(word: &str) -> Option<f64> {
    let value = match word {
        "a" | "an" | "one" => 1.0,
        "two" => 2.0,
        "three" => 3.0,
        "four" => 4.0,
        "five" => 5.0,
        "six" => 6.0,
        "seven" => 7.0,
        "eight" => 8.0,
        "nine" => 9.0,
        "ten" => 10.0,
        "eleven" => 11.0,
        "twelve" => 12.0,
        other => return other.parse().ok().filter(|n: &f64| n.is_finite() && *n >= 0.0),
    };
    Some(value)
}

/// Interval length in milliseconds
///
/// A bare number is taken as milliseconds. `None` when the text is not an
/// interval or sums to zero.
pub fn parse_human_interval(text: &str) -> Option<i64> {
    let normalized = text.trim().to_ascii_lowercase().replace(',', " ");
    let tokens: Vec<&str> = normalized
        .split_whitespace()
        .filter(|token| *token != "and")
        .collect();

    if let [only] = tokens.as_slice() {
        if let Ok(ms) = only.parse::<i64>() {
            return (ms > 0).then_some(ms);
        }
    }

    let mut total = 0.0;
    let mut index = 0;
    while index < tokens.len() {
        // "3minutes" style: split digits from the unit
        let token = tokens[index];
        let split = token
            .find(|c: char| c.is_ascii_alphabetic())
            .filter(|at| *at > 0);
        let (amount, unit) = match split {
            Some(at) if number(&token[..at]).is_some() => (number(&token[..at])?, &token[at..]),
            _ => {
                let amount = number(token)?;
                index += 1;
                (amount, *tokens.get(index)?)
            }
        };
        total += amount * unit_ms(unit)?;
        index += 1;
    }

    let total = total.round();
    (total >= 1.0 && total < i64::MAX as f64).then_some(total as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_units() {
        assert_eq!(parse_human_interval("3 minutes"), Some(180_000));
        assert_eq!(parse_human_interval("1 hour"), Some(3_600_000));
        assert_eq!(parse_human_interval("2 days"), Some(172_800_000));
        assert_eq!(parse_human_interval("1 week"), Some(604_800_000));
    }

    #[test]
    fn test_words_fractions_and_compounds() {
        assert_eq!(parse_human_interval("one minute"), Some(60_000));
        assert_eq!(parse_human_interval("a day"), Some(86_400_000));
        assert_eq!(parse_human_interval("1.5 hours"), Some(5_400_000));
        assert_eq!(
            parse_human_interval("1 day and 2 hours"),
            Some(86_400_000 + 7_200_000)
        );
        assert_eq!(parse_human_interval("10s"), Some(10_000));
        assert_eq!(parse_human_interval("2 Hours, 30 Minutes"), Some(9_000_000));
    }

    #[test]
    fn test_bare_number_is_milliseconds() {
        assert_eq!(parse_human_interval("500"), Some(500));
    }

    #[test]
    fn test_rejects_non_intervals() {
        assert_eq!(parse_human_interval(""), None);
        assert_eq!(parse_human_interval("0 minutes"), None);
        assert_eq!(parse_human_interval("minutes"), None);
        assert_eq!(parse_human_interval("3 fortnights"), None);
        assert_eq!(parse_human_interval("*/5 * * * *"), None);
        assert_eq!(parse_human_interval("sat,sun"), None);
    }
}
