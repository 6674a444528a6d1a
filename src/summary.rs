use chrono::NaiveDate;

use crate::aggregate::ChartData;
use crate::clock::{format_hours, format_tenths, round_ratio_tenths};
use crate::domain::date_id;

pub const EMPTY_SUMMARY: &str = "No activities to summarize.";
const BREAK_SUGGESTION: &str = "Suggestion: Add small breaks every 60–90 minutes for better productivity.";
const POMODORO_TIP: &str =
    "\n\nAI Tip: Try the Pomodoro technique (25/5) and schedule tasks based on focus energy.";

/// Highlight text for the visible categories of a day.
pub fn summarize(date: NaiveDate, data: &ChartData) -> String {
    let total = data.total();
    let top = data
        .labels
        .iter()
        .zip(&data.values)
        .fold(None::<(&String, u64)>, |best, (label, &value)| match best {
            Some((_, best_value)) if best_value >= value => best,
            _ => Some((label, value)),
        });

    let Some((top_label, top_value)) = top.filter(|_| total > 0) else {
        return EMPTY_SUMMARY.to_string();
    };

    let pct = round_ratio_tenths(top_value as i64 * 100, total as i64);
    format!(
        "On {date}, you logged {total} minutes ({hours}).\nTop category: {top_label} — {top_value} min ({pct}%).\n{BREAK_SUGGESTION}",
        date = date_id(date),
        hours = format_hours(total as i64),
        pct = format_tenths(pct),
    )
}

/// Appends the focus tip. Not deduplicated.
pub fn improve(text: &str) -> String {
    format!("{text}{POMODORO_TIP}")
}
