//! Per-category totals and the colors derived from them.

use std::fmt;

use plotters::style::{Color, HSLColor};

use crate::domain::Activity;

const CHART_SATURATION: u8 = 70;
const CHART_LIGHTNESS: u8 = 55;
const TIMELINE_LIGHTNESS: u8 = 50;
const BAR_SHADE: i16 = -10;

/// A color in `hsl(h, s%, l%)` terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsl {
    pub hue: u16,
    pub saturation: u8,
    pub lightness: u8,
}

impl Hsl {
    pub fn new(hue: u16, saturation: u8, lightness: u8) -> Self {
        Self {
            hue: hue % 360,
            saturation: saturation.min(100),
            lightness: lightness.min(100),
        }
    }

    /// Adjusts lightness by `percent`, clamped to `[0, 100]`.
    pub fn shade(self, percent: i16) -> Self {
        let lightness = (i16::from(self.lightness) + percent).clamp(0, 100);
        Self {
            lightness: lightness as u8,
            ..self
        }
    }

    pub fn rgb(&self) -> (u8, u8, u8) {
        HSLColor(
            f64::from(self.hue) / 360.0,
            f64::from(self.saturation) / 100.0,
            f64::from(self.lightness) / 100.0,
        )
        .to_backend_color()
        .rgb
    }
}

impl fmt::Display for Hsl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hsl({},{}%,{}%)", self.hue, self.saturation, self.lightness)
    }
}

/// Chart palette: hue steps of 60 degrees by label position.
pub fn index_hue(index: usize) -> u16 {
    ((index * 60) % 360) as u16
}

/// Stable hue for a category name, used on the timeline.
pub fn category_hue(name: &str) -> u16 {
    name.encode_utf16()
        .fold(0u32, |hue, unit| (hue * 31 + u32::from(unit)) % 360) as u16
}

pub fn chart_color(index: usize) -> Hsl {
    Hsl::new(index_hue(index), CHART_SATURATION, CHART_LIGHTNESS)
}

pub fn category_color(name: &str) -> Hsl {
    Hsl::new(category_hue(name), CHART_SATURATION, TIMELINE_LIGHTNESS)
}

/// Which categories take part in aggregation, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    entries: Vec<(String, bool)>,
}

impl FilterState {
    /// Every observed category, visible.
    pub fn from_activities(activities: &[Activity]) -> Self {
        let mut filters = Self::default();
        for activity in activities {
            if filters.position(&activity.category).is_none() {
                filters.entries.push((activity.category.clone(), true));
            }
        }
        filters
    }

    fn position(&self, category: &str) -> Option<usize> {
        self.entries.iter().position(|(name, _)| name == category)
    }

    /// Unknown categories count as hidden.
    pub fn is_visible(&self, category: &str) -> bool {
        self.position(category)
            .map(|index| self.entries[index].1)
            .unwrap_or(false)
    }

    /// Returns the new visibility, or `None` for an unknown category.
    pub fn toggle(&mut self, category: &str) -> Option<bool> {
        let index = self.position(category)?;
        let entry = &mut self.entries[index];
        entry.1 = !entry.1;
        Some(entry.1)
    }

    pub fn set_visible(&mut self, category: &str, visible: bool) -> bool {
        match self.position(category) {
            Some(index) => {
                self.entries[index].1 = visible;
                true
            }
            None => false,
        }
    }

    pub fn entries(&self) -> &[(String, bool)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Input shared by both chart kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub values: Vec<u64>,
    pub colors: Vec<Hsl>,
}

impl ChartData {
    pub fn total(&self) -> u64 {
        self.values.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn bar_colors(&self) -> Vec<Hsl> {
        self.colors.iter().map(|color| color.shade(BAR_SHADE)).collect()
    }
}

/// Sums minutes per visible category, labels in first-seen order.
pub fn aggregate(activities: &[Activity], filters: &FilterState) -> ChartData {
    let mut labels: Vec<String> = Vec::new();
    let mut values: Vec<u64> = Vec::new();

    for activity in activities {
        if !filters.is_visible(&activity.category) {
            continue;
        }
        match labels.iter().position(|label| *label == activity.category) {
            Some(index) => values[index] += u64::from(activity.minutes),
            None => {
                labels.push(activity.category.clone());
                values.push(u64::from(activity.minutes));
            }
        }
    }

    let colors = (0..labels.len()).map(chart_color).collect();
    ChartData {
        labels,
        values,
        colors,
    }
}

#[cfg(test)]
mod tests {
    use super::{FilterState, Hsl, aggregate, category_hue, chart_color, index_hue};
    use crate::domain::{Activity, Schedule};

    fn activity(id: &str, category: &str, minutes: u32) -> Activity {
        Activity {
            id: id.to_string(),
            title: id.to_string(),
            category: category.to_string(),
            minutes,
            schedule: Schedule::Unscheduled,
        }
    }

    fn sample() -> Vec<Activity> {
        vec![
            activity("a", "Work", 120),
            activity("b", "Health", 60),
            activity("c", "Work", 30),
            activity("d", "Rest", 15),
        ]
    }

    #[test]
    fn sums_per_category_in_first_seen_order() {
        let activities = sample();
        let filters = FilterState::from_activities(&activities);
        let data = aggregate(&activities, &filters);
        assert_eq!(data.labels, vec!["Work", "Health", "Rest"]);
        assert_eq!(data.values, vec![150, 60, 15]);
        assert_eq!(data.total(), 225);
        assert_eq!(data.colors, vec![chart_color(0), chart_color(1), chart_color(2)]);
    }

    #[test]
    fn hidden_categories_are_excluded() {
        let activities = sample();
        let mut filters = FilterState::from_activities(&activities);
        assert_eq!(filters.toggle("Work"), Some(false));

        let data = aggregate(&activities, &filters);
        assert_eq!(data.labels, vec!["Health", "Rest"]);
        assert_eq!(data.values, vec![60, 15]);
        // Colors follow label position, not category.
        assert_eq!(data.colors[0].hue, 0);

        assert_eq!(filters.toggle("Work"), Some(true));
        assert_eq!(aggregate(&activities, &filters).total(), 225);
    }

    #[test]
    fn work_shown_rest_hidden() {
        let activities = vec![activity("a", "Work", 60), activity("b", "Rest", 30)];
        let mut filters = FilterState::from_activities(&activities);
        assert!(filters.set_visible("Rest", false));

        let data = aggregate(&activities, &filters);
        assert_eq!(data.labels, vec!["Work"]);
        assert_eq!(data.values, vec![60]);
    }

    #[test]
    fn all_hidden_yields_empty_data() {
        let activities = sample();
        let mut filters = FilterState::from_activities(&activities);
        for category in ["Work", "Health", "Rest"] {
            assert!(filters.set_visible(category, false));
        }
        assert!(aggregate(&activities, &filters).is_empty());
    }

    #[test]
    fn filter_state_tracks_observed_categories_only() {
        let mut filters = FilterState::from_activities(&sample());
        assert_eq!(filters.len(), 3);
        assert!(filters.is_visible("Rest"));
        assert!(!filters.is_visible("Travel"));
        assert_eq!(filters.toggle("Travel"), None);
        assert!(!filters.set_visible("Travel", true));
        assert!(FilterState::from_activities(&[]).is_empty());
    }

    #[test]
    fn palette_hues() {
        assert_eq!(index_hue(0), 0);
        assert_eq!(index_hue(1), 60);
        assert_eq!(index_hue(5), 300);
        assert_eq!(index_hue(6), 0);

        assert_eq!(category_hue(""), 0);
        assert_eq!(category_hue("A"), 65);
        assert_eq!(category_hue("Work"), category_hue("Work"));
        assert!(category_hue("Work") < 360);
    }

    #[test]
    fn shading_clamps_lightness() {
        let color = Hsl::new(120, 70, 55);
        assert_eq!(color.shade(-10), Hsl::new(120, 70, 45));
        assert_eq!(Hsl::new(0, 70, 5).shade(-10).lightness, 0);
        assert_eq!(Hsl::new(0, 70, 95).shade(10).lightness, 100);
        assert_eq!(color.to_string(), "hsl(120,70%,55%)");
    }

    #[test]
    fn converts_to_rgb() {
        assert_eq!(Hsl::new(0, 100, 50).rgb(), (255, 0, 0));
        assert_eq!(Hsl::new(0, 0, 100).rgb(), (255, 255, 255));
        assert_eq!(Hsl::new(0, 0, 0).rgb(), (0, 0, 0));
    }
}
