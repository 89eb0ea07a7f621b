use chrono::NaiveDate;

/// Format a dollar amount as US currency: `$1,234.56`, `-$1,234.56`
pub fn format_currency(amount: f64) -> String {
    if !amount.is_finite() {
        return "$0.00".to_string();
    }

    let cents = (amount.abs() * 100.0).round() as u64;
    let dollars = (cents / 100).to_string();
    let remainder = cents % 100;

    // Insert thousands separators
    let mut grouped = String::with_capacity(dollars.len() + dollars.len() / 3);
    for (i, c) in dollars.chars().enumerate() {
        if i > 0 && (dollars.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, remainder)
}

/// Format a ratio as a whole-number percentage: 0.247 -> "25%"
pub fn format_percent(ratio: f64) -> String {
    format!("{:.0}%", ratio * 100.0)
}

/// Parse an ISO date (`YYYY-MM-DD`) or an RFC 3339 timestamp
pub fn parse_date(date: &str) -> Option<NaiveDate> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(date) {
        return Some(dt.date_naive());
    }
    let prefix = date.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Format a date string to a more readable format: `Jan 5, 2026`.
/// Unparseable input is returned unchanged.
pub fn format_date(date: &str) -> String {
    match parse_date(date) {
        Some(d) => d.format("%b %-d, %Y").to_string(),
        None => date.to_string(),
    }
}

/// Whole days from `today` until `date` (negative when past)
pub fn days_until(date: &str, today: NaiveDate) -> Option<i64> {
    parse_date(date).map(|d| (d - today).num_days())
}

/// Describe a deadline relative to today: "today", "tomorrow", "in 12 days",
/// "3 days ago". Unparseable input is returned unchanged.
pub fn format_deadline(date: &str, today: NaiveDate) -> String {
    match days_until(date, today) {
        Some(0) => "today".to_string(),
        Some(1) => "tomorrow".to_string(),
        Some(-1) => "1 day ago".to_string(),
        Some(days) if days > 1 => format!("in {} days", days),
        Some(days) => format!("{} days ago", -days),
        None => date.to_string(),
    }
}

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}
