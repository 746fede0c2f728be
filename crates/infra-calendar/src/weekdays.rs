// Weekday lists: "sat,sun", "Saturday and Sunday", "mondays"

const NAMES: &[(&str, &str)] = &[
    ("sun", "sunday"),
    ("mon", "monday"),
    ("tue", "tuesday"),
    ("wed", "wednesday"),
    ("thu", "thursday"),
    ("fri", "friday"),
    ("sat", "saturday"),
];

fn weekday(token: &str) -> Option<u32> {
    let token = token.strip_suffix('s').filter(|t| t.ends_with("day")).unwrap_or(token);
    NAMES
        .iter()
        .position(|(short, long)| token == *short || token == *long)
        .map(|index| index as u32)
}

/// Weekday numbers (0 = Sunday), sorted and deduplicated
pub fn parse_weekdays(text: &str) -> Option<Vec<u32>> {
    let normalized = text.trim().to_ascii_lowercase().replace(',', " ");
    let mut days = normalized
        .split_whitespace()
        .filter(|token| *token != "and")
        .map(weekday)
        .collect::<Option<Vec<u32>>>()?;
    if days.is_empty() {
        return None;
    }
    days.sort_unstable();
    days.dedup();
    Some(days)
}
