use chrono::{DateTime, Utc};

/// Truncate to at most `max` characters, marking the cut with an ellipsis.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{}...", head)
    }
}

/// Render a past millisecond timestamp as a coarse "N units ago" string
/// relative to the supplied clock.
pub fn time_ago(timestamp_ms: i64, now: DateTime<Utc>) -> String {
    let seconds = ((now.timestamp_millis() - timestamp_ms) / 1000).max(0);
    if seconds < 60 {
        return format!("{} seconds ago", seconds);
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{} minutes ago", minutes);
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{} hours ago", hours);
    }
    format!("{} days ago", hours / 24)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn short_text_passes_through() {
        assert_eq!(truncate("hold", 100), "hold");
    }

    #[test]
    fn long_text_is_cut_with_ellipsis() {
        let text = "a".repeat(120);
        let cut = truncate(&text, 100);
        assert_eq!(cut.len(), 103);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn time_ago_picks_the_largest_unit() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let ms = |offset_secs: i64| now.timestamp_millis() - offset_secs * 1000;

        assert_eq!(time_ago(ms(30), now), "30 seconds ago");
        assert_eq!(time_ago(ms(5 * 60), now), "5 minutes ago");
        assert_eq!(time_ago(ms(3 * 3600), now), "3 hours ago");
        assert_eq!(time_ago(ms(2 * 86400), now), "2 days ago");
    }

    #[test]
    fn future_timestamps_clamp_to_zero() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let future = now.timestamp_millis() + 60_000;
        assert_eq!(time_ago(future, now), "0 seconds ago");
    }
}
