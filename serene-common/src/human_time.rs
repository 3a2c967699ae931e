//! Human-readable clock formatting for player displays

/// Format a position or duration as `M:SS`.
///
/// Fractional seconds are floored. Negative and non-finite input renders as
/// `0:00`, matching what a player shows before a buffer is loaded.
///
/// # Examples
///
/// ```
/// use serene_common::human_time::format_clock;
///
/// assert_eq!(format_clock(0.0), "0:00");
/// assert_eq!(format_clock(9.99), "0:09");
/// assert_eq!(format_clock(75.0), "1:15");
/// assert_eq!(format_clock(3600.0), "60:00");
/// assert_eq!(format_clock(f64::NAN), "0:00");
/// ```
pub fn format_clock(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }

    let whole = seconds.floor() as u64;
    let minutes = whole / 60;
    let secs = whole % 60;
    format!("{}:{:02}", minutes, secs)
}

/// Format a `position / duration` progress pair, e.g. `1:05 / 10:00`.
pub fn format_progress(position_seconds: f64, duration_seconds: f64) -> String {
    format!(
        "{} / {}",
        format_clock(position_seconds),
        format_clock(duration_seconds)
    )
}
