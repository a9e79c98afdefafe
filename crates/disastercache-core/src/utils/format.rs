use std::cmp::Ordering;

use chrono::{DateTime, Local, Utc};

/// Parse an ISO-8601 / RFC 3339 timestamp into UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Order two timestamp strings chronologically.
/// Unparseable values sort before parseable ones and fall back to string order
/// among themselves.
pub fn cmp_timestamps(a: &str, b: &str) -> Ordering {
    match (parse_timestamp(a), parse_timestamp(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Format a UTC timestamp in local time: "Mar 05, 2025 - 11:50 AM"
pub fn format_timestamp(timestamp: &str) -> String {
    match parse_timestamp(timestamp) {
        Some(dt) => dt
            .with_timezone(&Local)
            .format("%b %d, %Y - %I:%M %p")
            .to_string(),
        None => timestamp.to_string(),
    }
}

/// Human-readable age for a number of elapsed minutes
pub fn age_display(minutes: i64) -> String {
    if minutes < 1 {
        // Negative covers clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        if minutes % 60 >= 30 {
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        if (minutes % 1440) / 60 >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
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
