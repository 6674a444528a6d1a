//! Day aggregate reconciliation.
//!
//! Each user day keeps a cached `totalMinutes` next to its activities. Every
//! mutation reads the cached total, computes the new one, checks it against
//! the daily capacity and then issues two writes: the activity change and the
//! new total. The writes are not atomic; if the second one fails the cache
//! stays stale until `recompute_total` (or a later mutation) rewrites it.
//! Sequences for the same day are serialized through a per-day lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDate;
use serde_json::json;
use tracing::{info, warn};

use crate::domain::{Activity, ActivityFields, DayKey, MINUTES_PER_DAY, parse_date_id};
use crate::error::{TrackerError, TrackerResult};
use crate::repository::ActivityRepository;
use crate::storage::{Document, DocumentStore, StorageError, day_path, days_path};

const TOTAL_FIELD: &str = "totalMinutes";

/// A day as read back from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDay {
    pub key: DayKey,
    pub total_minutes: i64,
    pub activities: Vec<Activity>,
}

impl LoadedDay {
    pub fn remaining_minutes(&self) -> i64 {
        (i64::from(MINUTES_PER_DAY) - self.total_minutes).max(0)
    }

    pub fn activity(&self, id: &str) -> Option<&Activity> {
        self.activities.iter().find(|activity| activity.id == id)
    }
}

pub struct DayStore<S> {
    store: S,
    day_locks: Mutex<HashMap<DayKey, Arc<Mutex<()>>>>,
}

impl<S: DocumentStore> DayStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            day_locks: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    fn activities(&self) -> ActivityRepository<'_, S> {
        ActivityRepository::new(&self.store)
    }

    /// Cached total for the day; a missing day document reads as 0.
    pub fn total(&self, day: &DayKey) -> Result<i64, StorageError> {
        let total = self
            .store
            .get(&day_path(day))?
            .and_then(|document| document.get(TOTAL_FIELD).and_then(|value| value.as_i64()))
            .unwrap_or(0);
        Ok(total)
    }

    /// Full reload of a day: cached total plus ordered activities.
    pub fn load(&self, day: &DayKey) -> Result<LoadedDay, StorageError> {
        let total_minutes = self.total(day)?;
        let activities = self.activities().list(day)?;
        Ok(LoadedDay {
            key: day.clone(),
            total_minutes,
            activities,
        })
    }

    pub fn add_activity(&self, day: &DayKey, fields: &ActivityFields) -> TrackerResult<String> {
        let lock = self.day_lock(day);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.total(day)?;
        let new_total = current + i64::from(fields.minutes);
        check_capacity(day, new_total)?;

        let id = self.activities().create(day, fields)?;
        self.write_total(day, new_total)?;
        info!(
            user = %day.user_id,
            date = %day.date_id(),
            activity = %id,
            minutes = fields.minutes,
            total = new_total,
            "activity added"
        );
        Ok(id)
    }

    pub fn update_activity(&self, day: &DayKey, id: &str, fields: &ActivityFields) -> TrackerResult<()> {
        let lock = self.day_lock(day);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.total(day)?;
        let old_minutes = self
            .activities()
            .get(day, id)?
            .map(|activity| activity.minutes)
            .unwrap_or(0);
        let new_total = current - i64::from(old_minutes) + i64::from(fields.minutes);
        check_capacity(day, new_total)?;

        self.activities().replace(day, id, fields)?;
        self.write_total(day, new_total)?;
        info!(
            user = %day.user_id,
            date = %day.date_id(),
            activity = %id,
            old_minutes,
            minutes = fields.minutes,
            total = new_total,
            "activity updated"
        );
        Ok(())
    }

    /// Returns `false` when there was nothing to delete.
    pub fn delete_activity(&self, day: &DayKey, id: &str) -> TrackerResult<bool> {
        let lock = self.day_lock(day);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(activity) = self.activities().get(day, id)? else {
            info!(user = %day.user_id, date = %day.date_id(), activity = %id, "delete of missing activity ignored");
            return Ok(false);
        };

        self.activities().delete(day, id)?;
        let current = self.total(day)?;
        let new_total = (current - i64::from(activity.minutes)).max(0);
        self.write_total(day, new_total)?;
        info!(
            user = %day.user_id,
            date = %day.date_id(),
            activity = %id,
            minutes = activity.minutes,
            total = new_total,
            "activity deleted"
        );
        Ok(true)
    }

    /// Moves an activity in time. Duration and the day total are untouched.
    pub fn update_start(&self, day: &DayKey, id: &str, start_min: Option<u32>) -> TrackerResult<()> {
        let lock = self.day_lock(day);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.activities().update_start(day, id, start_min)?;
        info!(
            user = %day.user_id,
            date = %day.date_id(),
            activity = %id,
            start_min = ?start_min,
            "activity start moved"
        );
        Ok(())
    }

    /// Rewrites the cached total as the sum of the stored activities.
    pub fn recompute_total(&self, day: &DayKey) -> TrackerResult<i64> {
        let lock = self.day_lock(day);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let cached = self.total(day)?;
        let sum = self
            .activities()
            .list(day)?
            .iter()
            .map(|activity| i64::from(activity.minutes))
            .sum::<i64>();
        check_capacity(day, sum)?;

        if sum != cached {
            warn!(
                user = %day.user_id,
                date = %day.date_id(),
                cached,
                actual = sum,
                "cached day total was stale"
            );
        }
        self.write_total(day, sum)?;
        Ok(sum)
    }

    /// Dates that have a non-zero cached total, oldest first.
    pub fn recorded_days(&self, user_id: &str) -> Result<Vec<(NaiveDate, i64)>, StorageError> {
        let mut days = self
            .store
            .query_ordered(&days_path(user_id), TOTAL_FIELD)?
            .into_iter()
            .filter_map(|(id, document)| {
                let date = parse_date_id(&id)?;
                let total = document.get(TOTAL_FIELD).and_then(|value| value.as_i64())?;
                (total > 0).then_some((date, total))
            })
            .collect::<Vec<_>>();
        days.sort_by_key(|(date, _)| *date);
        Ok(days)
    }

    fn write_total(&self, day: &DayKey, total: i64) -> Result<(), StorageError> {
        let mut fields = Document::new();
        fields.insert(TOTAL_FIELD.to_string(), json!(total));
        self.store.set_merge(&day_path(day), fields)
    }

    /// Entries nobody else holds are dropped, so the map only keeps days
    /// with a mutation in flight.
    fn day_lock(&self, day: &DayKey) -> Arc<Mutex<()>> {
        let mut locks = self.day_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(day.clone()).or_default())
    }
}

fn check_capacity(day: &DayKey, new_total: i64) -> TrackerResult<()> {
    if new_total > i64::from(MINUTES_PER_DAY) {
        warn!(
            user = %day.user_id,
            date = %day.date_id(),
            attempted = new_total,
            "day capacity exceeded"
        );
        return Err(TrackerError::CapacityExceeded {
            attempted: new_total,
            limit: MINUTES_PER_DAY,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::NaiveDate;
    use serde_json::json;

    use super::DayStore;
    use crate::domain::{ActivityFields, DayKey, Schedule};
    use crate::error::TrackerError;
    use crate::storage::{Document, DocumentStore, MemoryStore, StorageError, day_path};

    fn day() -> DayKey {
        DayKey::new("u1", NaiveDate::from_ymd_opt(2026, 5, 4).expect("valid date"))
    }

    fn fields(title: &str, category: &str, minutes: u32, start: Option<u32>) -> ActivityFields {
        ActivityFields::new(title, category, minutes, start)
    }

    fn assert_consistent(days: &DayStore<impl DocumentStore>, day: &DayKey) {
        let loaded = days.load(day).expect("load should succeed");
        let sum = loaded
            .activities
            .iter()
            .map(|activity| i64::from(activity.minutes))
            .sum::<i64>();
        assert_eq!(loaded.total_minutes, sum);
        assert!((0..=1440).contains(&loaded.total_minutes));
    }

    /// Memory store whose day-total writes can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_merges: AtomicBool,
    }

    impl DocumentStore for FlakyStore {
        fn get(&self, path: &str) -> Result<Option<Document>, StorageError> {
            self.inner.get(path)
        }

        fn set_merge(&self, path: &str, fields: Document) -> Result<(), StorageError> {
            if self.fail_merges.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("network down".to_string()));
            }
            self.inner.set_merge(path, fields)
        }

        fn add(&self, collection: &str, fields: Document) -> Result<String, StorageError> {
            self.inner.add(collection, fields)
        }

        fn update(&self, path: &str, fields: Document) -> Result<(), StorageError> {
            self.inner.update(path, fields)
        }

        fn delete(&self, path: &str) -> Result<(), StorageError> {
            self.inner.delete(path)
        }

        fn query_ordered(
            &self,
            collection: &str,
            order_by: &str,
        ) -> Result<Vec<(String, Document)>, StorageError> {
            self.inner.query_ordered(collection, order_by)
        }
    }

    #[test]
    fn add_update_delete_keeps_total_in_step() {
        let days = DayStore::new(MemoryStore::new());
        let day = day();
        assert_eq!(days.total(&day).expect("total"), 0);

        let id = days
            .add_activity(&day, &fields("Gym", "Health", 60, Some(420)))
            .expect("add should succeed");
        assert_eq!(days.total(&day).expect("total"), 60);
        assert_consistent(&days, &day);

        days.update_activity(&day, &id, &fields("Gym", "Health", 90, Some(420)))
            .expect("update should succeed");
        assert_eq!(days.total(&day).expect("total"), 90);
        assert_consistent(&days, &day);

        assert!(days.delete_activity(&day, &id).expect("delete should succeed"));
        assert_eq!(days.total(&day).expect("total"), 0);
        assert_consistent(&days, &day);
    }

    #[test]
    fn mixed_sequence_stays_consistent() {
        let days = DayStore::new(MemoryStore::new());
        let day = day();

        let work = days
            .add_activity(&day, &fields("Deep work", "Work", 240, Some(540)))
            .expect("add should succeed");
        let read = days
            .add_activity(&day, &fields("Read", "Rest", 30, None))
            .expect("add should succeed");
        days.add_activity(&day, &fields("Walk", "Health", 45, Some(1080)))
            .expect("add should succeed");
        assert_consistent(&days, &day);

        days.update_activity(&day, &work, &fields("Deep work", "Work", 180, Some(540)))
            .expect("update should succeed");
        assert_consistent(&days, &day);
        days.delete_activity(&day, &read).expect("delete should succeed");
        assert_consistent(&days, &day);
        assert_eq!(days.total(&day).expect("total"), 225);
    }

    #[test]
    fn add_over_capacity_writes_nothing() {
        let days = DayStore::new(MemoryStore::new());
        let day = day();
        days.add_activity(&day, &fields("Sleep", "Rest", 1400, None))
            .expect("add should succeed");

        let err = days
            .add_activity(&day, &fields("Gym", "Health", 41, None))
            .expect_err("add should exceed capacity");
        assert!(matches!(
            err,
            TrackerError::CapacityExceeded {
                attempted: 1441,
                limit: 1440
            }
        ));

        let loaded = days.load(&day).expect("load should succeed");
        assert_eq!(loaded.activities.len(), 1);
        assert_eq!(loaded.total_minutes, 1400);
    }

    #[test]
    fn filling_the_day_exactly_is_allowed() {
        let days = DayStore::new(MemoryStore::new());
        let day = day();
        days.add_activity(&day, &fields("Sleep", "Rest", 1400, None))
            .expect("add should succeed");
        days.add_activity(&day, &fields("Tea", "Rest", 40, None))
            .expect("exactly 1440 fits");
        let loaded = days.load(&day).expect("load should succeed");
        assert_eq!(loaded.total_minutes, 1440);
        assert_eq!(loaded.remaining_minutes(), 0);
    }

    #[test]
    fn update_over_capacity_leaves_activity_and_total_untouched() {
        let days = DayStore::new(MemoryStore::new());
        let day = day();
        days.add_activity(&day, &fields("Sleep", "Rest", 1000, None))
            .expect("add should succeed");
        let id = days
            .add_activity(&day, &fields("Work", "Work", 300, None))
            .expect("add should succeed");

        let err = days
            .update_activity(&day, &id, &fields("Work", "Work", 441, None))
            .expect_err("update should exceed capacity");
        assert!(err.is_capacity_exceeded());

        let loaded = days.load(&day).expect("load should succeed");
        assert_eq!(loaded.total_minutes, 1300);
        assert_eq!(loaded.activity(&id).expect("activity").minutes, 300);
    }

    #[test]
    fn delete_of_missing_activity_is_a_silent_no_op() {
        let days = DayStore::new(MemoryStore::new());
        let day = day();
        days.add_activity(&day, &fields("Gym", "Health", 60, None))
            .expect("add should succeed");

        let deleted = days
            .delete_activity(&day, "does-not-exist")
            .expect("delete should not fail");
        assert!(!deleted);
        assert_eq!(days.total(&day).expect("total"), 60);
    }

    #[test]
    fn delete_never_drives_total_below_zero() {
        let days = DayStore::new(MemoryStore::new());
        let day = day();
        let id = days
            .add_activity(&day, &fields("Gym", "Health", 60, None))
            .expect("add should succeed");

        let mut corrupt = Document::new();
        corrupt.insert("totalMinutes".to_string(), json!(20));
        days.store()
            .set_merge(&day_path(&day), corrupt)
            .expect("merge should succeed");

        days.delete_activity(&day, &id).expect("delete should succeed");
        assert_eq!(days.total(&day).expect("total"), 0);
    }

    #[test]
    fn start_only_update_ignores_capacity_and_total() {
        let days = DayStore::new(MemoryStore::new());
        let day = day();
        let id = days
            .add_activity(&day, &fields("Sleep", "Rest", 1440, Some(0)))
            .expect("add should succeed");

        days.update_start(&day, &id, Some(60)).expect("move should succeed");
        let loaded = days.load(&day).expect("load should succeed");
        assert_eq!(loaded.total_minutes, 1440);
        let activity = loaded.activity(&id).expect("activity");
        assert_eq!(activity.schedule, Schedule::Scheduled { start_min: 60 });
        assert_eq!(activity.minutes, 1440);
    }

    #[test]
    fn updating_a_vanished_activity_fails_without_touching_total() {
        let days = DayStore::new(MemoryStore::new());
        let day = day();
        days.add_activity(&day, &fields("Gym", "Health", 60, None))
            .expect("add should succeed");

        let err = days
            .update_activity(&day, "gone", &fields("Gym", "Health", 30, None))
            .expect_err("update of missing activity should fail");
        assert!(matches!(err, TrackerError::Storage(StorageError::NotFound(_))));
        assert_eq!(days.total(&day).expect("total"), 60);
    }

    #[test]
    fn failed_total_write_leaves_stale_cache_until_recompute() {
        let days = DayStore::new(FlakyStore::default());
        let day = day();
        days.add_activity(&day, &fields("Gym", "Health", 60, None))
            .expect("add should succeed");

        days.store().fail_merges.store(true, Ordering::SeqCst);
        let err = days
            .add_activity(&day, &fields("Read", "Rest", 30, None))
            .expect_err("total write should fail");
        assert!(matches!(err, TrackerError::Storage(StorageError::Unavailable(_))));

        let loaded = days.load(&day).expect("load should succeed");
        assert_eq!(loaded.activities.len(), 2);
        assert_eq!(loaded.total_minutes, 60);

        days.store().fail_merges.store(false, Ordering::SeqCst);
        assert_eq!(days.recompute_total(&day).expect("recompute should succeed"), 90);
        assert_consistent(&days, &day);
    }

    #[test]
    fn recompute_refuses_to_cache_an_overfull_day() {
        let days = DayStore::new(MemoryStore::new());
        let day = day();
        days.add_activity(&day, &fields("Sleep", "Rest", 1000, None))
            .expect("add should succeed");
        days.add_activity(&day, &fields("Work", "Work", 400, None))
            .expect("add should succeed");

        let mut corrupt = Document::new();
        corrupt.insert("totalMinutes".to_string(), json!(0));
        days.store()
            .set_merge(&day_path(&day), corrupt)
            .expect("merge should succeed");
        days.add_activity(&day, &fields("Gym", "Health", 100, None))
            .expect("stale cache lets this through");

        let err = days.recompute_total(&day).expect_err("sum is 1500");
        assert!(err.is_capacity_exceeded());
        assert_eq!(days.total(&day).expect("total"), 100);
    }

    #[test]
    fn lists_recorded_days() {
        let days = DayStore::new(MemoryStore::new());
        let first = day();
        let second = DayKey::new("u1", NaiveDate::from_ymd_opt(2026, 5, 2).expect("valid date"));
        let other_user = DayKey::new("u2", first.date);

        days.add_activity(&first, &fields("Gym", "Health", 60, None))
            .expect("add should succeed");
        let id = days
            .add_activity(&second, &fields("Read", "Rest", 30, None))
            .expect("add should succeed");
        days.add_activity(&other_user, &fields("Run", "Health", 10, None))
            .expect("add should succeed");

        let recorded = days.recorded_days("u1").expect("query should succeed");
        assert_eq!(recorded, vec![(second.date, 30), (first.date, 60)]);

        days.delete_activity(&second, &id).expect("delete should succeed");
        let recorded = days.recorded_days("u1").expect("query should succeed");
        assert_eq!(recorded, vec![(first.date, 60)]);
    }

    #[test]
    fn day_locks_are_released_after_use() {
        let days = DayStore::new(MemoryStore::new());
        for day_of_month in 1..=20 {
            let key = DayKey::new("u1", NaiveDate::from_ymd_opt(2026, 5, day_of_month).expect("valid date"));
            days.add_activity(&key, &fields("Read", "Rest", 10, None))
                .expect("add should succeed");
        }
        assert!(days.day_locks.lock().expect("lock map").len() <= 1);

        let held = days.day_lock(&day());
        let other = DayKey::new("u2", day().date);
        days.add_activity(&other, &fields("Run", "Health", 10, None))
            .expect("add should succeed");
        let locks = days.day_locks.lock().expect("lock map");
        assert!(locks.contains_key(&day()), "a held lock must survive pruning");
        drop(locks);
        drop(held);
    }
}
