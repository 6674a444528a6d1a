//! Application service: turns user actions into store mutations, reloads and
//! derived views, keeping the session consistent with the auth state.

use std::sync::mpsc::Receiver;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::aggregate::aggregate;
use crate::auth::{AuthProvider, AuthState, Identity};
use crate::chart::{ChartKind, ChartRenderer};
use crate::day_store::DayStore;
use crate::domain::{ActivityForm, date_id, parse_start};
use crate::error::{TrackerError, TrackerResult};
use crate::session::{Analysis, Session};
use crate::storage::DocumentStore;
use crate::summary::{improve, summarize};
use crate::timeline::layout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    Added(String),
    Updated(String),
}

/// A rendered chart ready to be written out.
#[derive(Debug, Clone)]
pub struct ChartExport {
    pub file_name: String,
    pub png: Vec<u8>,
}

pub struct Tracker<S, A, R> {
    days: DayStore<S>,
    auth: A,
    charts: R,
    auth_events: Receiver<AuthState>,
    session: Session,
    today: NaiveDate,
}

impl<S, A, R> Tracker<S, A, R>
where
    S: DocumentStore,
    A: AuthProvider,
    R: ChartRenderer,
{
    /// Subscribes to `auth` and applies its current state.
    pub fn new(days: DayStore<S>, mut auth: A, charts: R, today: NaiveDate) -> TrackerResult<Self> {
        let auth_events = auth.subscribe();
        let mut tracker = Self {
            days,
            auth,
            charts,
            auth_events,
            session: Session::default(),
            today,
        };
        tracker.sync_auth()?;
        Ok(tracker)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.session.identity()
    }

    pub fn sign_in(&mut self, email: &str, password: &str) -> TrackerResult<Identity> {
        let identity = self.auth.sign_in(email, password)?;
        self.sync_auth()?;
        Ok(identity)
    }

    pub fn sign_up(&mut self, email: &str, password: &str) -> TrackerResult<Identity> {
        let identity = self.auth.sign_up(email, password)?;
        self.sync_auth()?;
        Ok(identity)
    }

    pub fn sign_out(&mut self) -> TrackerResult<()> {
        self.auth.sign_out()?;
        self.sync_auth()?;
        Ok(())
    }

    /// Applies pending auth notifications. Every transition starts the
    /// session over; a sign-in then loads the selected day.
    pub fn sync_auth(&mut self) -> TrackerResult<bool> {
        let mut changed = false;
        while let Ok(state) = self.auth_events.try_recv() {
            changed = true;
            self.charts.release();
            match state {
                AuthState::SignedIn(identity) => {
                    debug!(uid = %identity.uid, "session started");
                    self.session.signed_in(identity, self.today);
                }
                AuthState::SignedOut => {
                    debug!("session cleared");
                    self.session.signed_out();
                }
            }
        }

        if changed && self.session.identity().is_some() {
            self.reload()?;
        }
        Ok(changed)
    }

    pub fn select_date(&mut self, date: NaiveDate) -> TrackerResult<()> {
        self.charts.release();
        self.session.select_date(date);
        if self.session.identity().is_some() {
            self.reload()?;
        }
        Ok(())
    }

    /// Replaces the in-memory day with the stored one. An existing analysis
    /// is derived again from the fresh data.
    pub fn reload(&mut self) -> TrackerResult<()> {
        let key = self.session.day_key()?;
        let day = self.days.load(&key)?;
        debug!(
            user = %key.user_id,
            date = %key.date_id(),
            activities = day.activities.len(),
            total = day.total_minutes,
            "day loaded"
        );
        self.session.apply_day(day);
        if self.session.analysis().is_some() {
            self.derive_analysis()?;
        }
        Ok(())
    }

    /// Starts editing an activity of the loaded day; returns the prefilled form.
    pub fn begin_edit(&mut self, id: &str) -> Option<ActivityForm> {
        if !self.session.begin_edit(id) {
            return None;
        }
        self.session
            .day()
            .and_then(|day| day.activity(id))
            .map(ActivityForm::from_activity)
    }

    pub fn cancel_edit(&mut self) {
        self.session.cancel_edit();
    }

    /// Adds a new activity, or updates the one being edited.
    pub fn submit(&mut self, form: &ActivityForm) -> TrackerResult<Submitted> {
        let key = self.session.day_key()?;
        let fields = form.validate()?;

        let submitted = match self.session.editing().map(str::to_string) {
            Some(id) => {
                self.days.update_activity(&key, &id, &fields)?;
                self.session.cancel_edit();
                Submitted::Updated(id)
            }
            None => Submitted::Added(self.days.add_activity(&key, &fields)?),
        };

        self.reload()?;
        Ok(submitted)
    }

    /// Deletes an activity; a missing one is not an error.
    pub fn delete(&mut self, id: &str) -> TrackerResult<bool> {
        let key = self.session.day_key()?;
        let deleted = self.days.delete_activity(&key, id)?;
        if self.session.editing() == Some(id) {
            self.session.cancel_edit();
        }
        self.reload()?;
        Ok(deleted)
    }

    /// Re-times an activity from "HH:MM" input. Blank input changes nothing.
    pub fn move_start(&mut self, id: &str, input: &str) -> TrackerResult<bool> {
        let key = self.session.day_key()?;
        let Some(start_min) = parse_start(input)? else {
            return Ok(false);
        };
        self.days.update_start(&key, id, Some(start_min))?;
        self.reload()?;
        Ok(true)
    }

    /// Rewrites the stored day total from the stored activities.
    pub fn reconcile(&mut self) -> TrackerResult<i64> {
        let key = self.session.day_key()?;
        let total = self.days.recompute_total(&key)?;
        self.reload()?;
        Ok(total)
    }

    pub fn recorded_days(&self) -> TrackerResult<Vec<(NaiveDate, i64)>> {
        let identity = self
            .session
            .identity()
            .ok_or_else(|| TrackerError::validation("Login required"))?;
        Ok(self.days.recorded_days(&identity.uid)?)
    }

    pub fn analyse(&mut self) -> TrackerResult<&Analysis> {
        if self.session.day().is_none() {
            self.reload()?;
        }
        let empty = self
            .session
            .day()
            .is_none_or(|day| day.activities.is_empty());
        if empty {
            return Err(TrackerError::validation("No activities for this date."));
        }

        self.derive_analysis()?;
        self.session
            .analysis()
            .ok_or_else(|| TrackerError::validation("No activities for this date."))
    }

    /// Flips a category filter; an existing analysis follows the new filters.
    pub fn toggle_filter(&mut self, category: &str) -> TrackerResult<Option<bool>> {
        let visible = self.session.filters_mut().toggle(category);
        if visible.is_some() && self.session.analysis().is_some() {
            self.derive_analysis()?;
        }
        Ok(visible)
    }

    pub fn set_filter(&mut self, category: &str, visible: bool) -> TrackerResult<bool> {
        let known = self.session.filters_mut().set_visible(category, visible);
        if known && self.session.analysis().is_some() {
            self.derive_analysis()?;
        }
        Ok(known)
    }

    pub fn improve_summary(&mut self) -> TrackerResult<&str> {
        let analysis = self
            .session
            .analysis_mut()
            .ok_or_else(|| TrackerError::validation("Analyse first."))?;
        analysis.summary = improve(&analysis.summary);
        Ok(&analysis.summary)
    }

    pub fn export(&self, kind: ChartKind) -> TrackerResult<ChartExport> {
        let png = self.charts.export_png(kind)?;
        let date = self
            .session
            .date()
            .map(date_id)
            .unwrap_or_default();
        let file_name = match kind {
            ChartKind::Doughnut => format!("analytics-{date}.png"),
            ChartKind::Bar => format!("analytics-{date}-bar.png"),
        };
        info!(file = %file_name, bytes = png.len(), "chart exported");
        Ok(ChartExport { file_name, png })
    }

    fn derive_analysis(&mut self) -> TrackerResult<()> {
        let Some(day) = self.session.day() else {
            return Ok(());
        };
        if day.activities.is_empty() {
            self.charts.release();
            self.session.clear_analysis();
            return Ok(());
        }

        let chart = aggregate(&day.activities, self.session.filters());
        let slots = layout(&day.activities);
        let summary = summarize(day.key.date, &chart);
        self.charts.render(&chart)?;
        self.session.set_analysis(Analysis {
            chart,
            slots,
            summary,
        });
        Ok(())
    }
}
