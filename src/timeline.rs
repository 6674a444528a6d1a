//! Places a day's activities on a 24-hour axis, in percent of the axis width.

use crate::aggregate::{Hsl, category_color};
use crate::domain::{Activity, MINUTES_PER_DAY, Schedule};

const MIN_WIDTH_PCT: f64 = 2.0;
const UNSCHEDULED_WIDTH_PCT: f64 = 8.0;
const UNSCHEDULED_STEP_PCT: u32 = 10;
const UNSCHEDULED_WRAP_PCT: u32 = 90;

/// Vertical anchoring of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Positioned by start time on the main track.
    Track,
    /// Stacked along the bottom edge; has no time position.
    Bottom,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub activity_id: String,
    pub title: String,
    pub color: Hsl,
    pub left_pct: f64,
    pub width_pct: f64,
    pub lane: Lane,
    /// Start time for scheduled slots; these can be re-timed.
    pub start_min: Option<u32>,
}

impl Slot {
    pub fn is_movable(&self) -> bool {
        self.lane == Lane::Track
    }
}

/// Scheduled slots in start order, then unscheduled slots in list order.
/// Overlapping scheduled activities overlap on the axis.
pub fn layout(activities: &[Activity]) -> Vec<Slot> {
    let day = f64::from(MINUTES_PER_DAY);

    let mut scheduled = activities
        .iter()
        .filter_map(|activity| match activity.schedule {
            Schedule::Scheduled { start_min } => Some((start_min, activity)),
            Schedule::Unscheduled => None,
        })
        .collect::<Vec<_>>();
    scheduled.sort_by_key(|(start_min, _)| *start_min);

    let mut slots = scheduled
        .into_iter()
        .map(|(start_min, activity)| Slot {
            activity_id: activity.id.clone(),
            title: activity.title.clone(),
            color: category_color(&activity.category),
            left_pct: f64::from(start_min) / day * 100.0,
            width_pct: (f64::from(activity.minutes) / day * 100.0).max(MIN_WIDTH_PCT),
            lane: Lane::Track,
            start_min: Some(start_min),
        })
        .collect::<Vec<_>>();

    let mut offset = 0u32;
    for activity in activities
        .iter()
        .filter(|activity| activity.schedule == Schedule::Unscheduled)
    {
        slots.push(Slot {
            activity_id: activity.id.clone(),
            title: activity.title.clone(),
            color: category_color(&activity.category),
            left_pct: f64::from(offset % UNSCHEDULED_WRAP_PCT),
            width_pct: UNSCHEDULED_WIDTH_PCT,
            lane: Lane::Bottom,
            start_min: None,
        });
        offset += UNSCHEDULED_STEP_PCT;
    }

    slots
}
