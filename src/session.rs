use chrono::NaiveDate;

use crate::aggregate::{ChartData, FilterState};
use crate::auth::Identity;
use crate::day_store::LoadedDay;
use crate::domain::DayKey;
use crate::error::{TrackerError, TrackerResult};
use crate::timeline::Slot;

/// Views derived from the loaded day by an explicit "analyse".
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub chart: ChartData,
    pub slots: Vec<Slot>,
    pub summary: String,
}

/// Everything the app holds in memory between user actions.
#[derive(Debug, Clone, Default)]
pub struct Session {
    identity: Option<Identity>,
    date: Option<NaiveDate>,
    day: Option<LoadedDay>,
    filters: FilterState,
    editing: Option<String>,
    analysis: Option<Analysis>,
}

impl Session {
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn day(&self) -> Option<&LoadedDay> {
        self.day.as_ref()
    }

    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    pub fn filters_mut(&mut self) -> &mut FilterState {
        &mut self.filters
    }

    pub fn editing(&self) -> Option<&str> {
        self.editing.as_deref()
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        self.analysis.as_ref()
    }

    pub fn analysis_mut(&mut self) -> Option<&mut Analysis> {
        self.analysis.as_mut()
    }

    /// Key of the selected day; requires a user and a date.
    pub fn day_key(&self) -> TrackerResult<DayKey> {
        let identity = self
            .identity
            .as_ref()
            .ok_or_else(|| TrackerError::validation("Login required"))?;
        let date = self
            .date
            .ok_or_else(|| TrackerError::validation("Select a date first"))?;
        Ok(DayKey::new(identity.uid.clone(), date))
    }

    /// New identity; day state starts over. A previously chosen date is kept.
    pub fn signed_in(&mut self, identity: Identity, today: NaiveDate) {
        let date = self.date.unwrap_or(today);
        *self = Session {
            identity: Some(identity),
            date: Some(date),
            ..Session::default()
        };
    }

    pub fn signed_out(&mut self) {
        *self = Session {
            date: self.date,
            ..Session::default()
        };
    }

    /// Switching days drops everything derived from the previous one.
    pub fn select_date(&mut self, date: NaiveDate) {
        self.date = Some(date);
        self.day = None;
        self.filters = FilterState::default();
        self.editing = None;
        self.analysis = None;
    }

    /// Installs a freshly loaded day; filters are rebuilt with every category visible.
    pub fn apply_day(&mut self, day: LoadedDay) {
        self.filters = FilterState::from_activities(&day.activities);
        if self
            .editing
            .as_deref()
            .is_some_and(|id| day.activity(id).is_none())
        {
            self.editing = None;
        }
        self.day = Some(day);
    }

    pub fn begin_edit(&mut self, id: &str) -> bool {
        let exists = self
            .day
            .as_ref()
            .is_some_and(|day| day.activity(id).is_some());
        if exists {
            self.editing = Some(id.to_string());
        }
        exists
    }

    pub fn cancel_edit(&mut self) {
        self.editing = None;
    }

    pub fn set_analysis(&mut self, analysis: Analysis) {
        self.analysis = Some(analysis);
    }

    pub fn clear_analysis(&mut self) {
        self.analysis = None;
    }
}
