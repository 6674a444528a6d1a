//! Wall-clock helpers: "HH:MM" text <-> minutes since local midnight.

/// Parses `"HH:MM"` into minutes since midnight.
///
/// Returns `None` for blank input or when either part is not an integer.
/// Ranges are not checked: `"25:00"` parses to `1500`. Values that do not
/// fit in an `i32` minute count are rejected.
pub fn parse_time(text: &str) -> Option<i32> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let (hours, minutes) = text.split_once(':')?;
    let hours = hours.trim().parse::<i32>().ok()?;
    let minutes = minutes.trim().parse::<i32>().ok()?;
    hours.checked_mul(60)?.checked_add(minutes)
}

pub fn format_time(minutes: Option<u32>) -> String {
    match minutes {
        Some(minutes) => format!("{:02}:{:02}", minutes / 60, minutes % 60),
        None => String::new(),
    }
}

/// Formats a minute count as hours with one decimal, e.g. `90 -> "1.5h"`.
pub fn format_hours(minutes: i64) -> String {
    format!("{}h", format_tenths(round_ratio_tenths(minutes, 60)))
}

/// `numerator / denominator` in tenths, rounded half away from zero.
pub fn round_ratio_tenths(numerator: i64, denominator: i64) -> i64 {
    if denominator == 0 {
        return 0;
    }

    let scaled = numerator.abs() * 10 * 2 + denominator.abs();
    let tenths = scaled / (denominator.abs() * 2);
    if (numerator < 0) != (denominator < 0) {
        -tenths
    } else {
        tenths
    }
}

pub fn format_tenths(tenths: i64) -> String {
    let sign = if tenths < 0 { "-" } else { "" };
    let tenths = tenths.abs();
    format!("{sign}{}.{}", tenths / 10, tenths % 10)
}
