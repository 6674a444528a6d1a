use serde_json::{Value, json};

use crate::domain::{Activity, ActivityDocument, ActivityFields, DayKey};
use crate::storage::{
    Document, DocumentStore, SERVER_TIMESTAMP, StorageError, activities_path, activity_path,
};

const ORDER_FIELD: &str = "startMin";

/// Keyed access to the activities of one day. Totals are not touched here;
/// see `DayStore` for the reconciled mutations.
pub struct ActivityRepository<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: DocumentStore + ?Sized> ActivityRepository<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// All activities of the day, scheduled ones by start time, unscheduled last.
    pub fn list(&self, day: &DayKey) -> Result<Vec<Activity>, StorageError> {
        let collection = activities_path(day);
        self.store
            .query_ordered(&collection, ORDER_FIELD)?
            .into_iter()
            .map(|(id, document)| decode(&format!("{collection}/{id}"), id, document))
            .collect()
    }

    pub fn get(&self, day: &DayKey, id: &str) -> Result<Option<Activity>, StorageError> {
        let path = activity_path(day, id);
        match self.store.get(&path)? {
            Some(document) => decode(&path, id.to_string(), document).map(Some),
            None => Ok(None),
        }
    }

    pub fn create(&self, day: &DayKey, fields: &ActivityFields) -> Result<String, StorageError> {
        let mut document = field_document(fields);
        document.insert("createdAt".to_string(), json!(SERVER_TIMESTAMP));
        self.store.add(&activities_path(day), document)
    }

    /// Replaces every editable field of an existing activity.
    pub fn replace(&self, day: &DayKey, id: &str, fields: &ActivityFields) -> Result<(), StorageError> {
        self.store.update(&activity_path(day, id), field_document(fields))
    }

    pub fn update_start(&self, day: &DayKey, id: &str, start_min: Option<u32>) -> Result<(), StorageError> {
        let mut document = Document::new();
        document.insert(ORDER_FIELD.to_string(), start_value(start_min));
        document.insert("updatedAt".to_string(), json!(SERVER_TIMESTAMP));
        self.store.update(&activity_path(day, id), document)
    }

    pub fn delete(&self, day: &DayKey, id: &str) -> Result<(), StorageError> {
        self.store.delete(&activity_path(day, id))
    }
}

fn field_document(fields: &ActivityFields) -> Document {
    let mut document = Document::new();
    document.insert("title".to_string(), json!(fields.title));
    document.insert("category".to_string(), json!(fields.category));
    document.insert("minutes".to_string(), json!(fields.minutes));
    document.insert(ORDER_FIELD.to_string(), start_value(fields.schedule.start_min()));
    document.insert("updatedAt".to_string(), json!(SERVER_TIMESTAMP));
    document
}

fn start_value(start_min: Option<u32>) -> Value {
    start_min.map(Value::from).unwrap_or(Value::Null)
}

fn decode(path: &str, id: String, document: Document) -> Result<Activity, StorageError> {
    let document: ActivityDocument =
        serde_json::from_value(Value::Object(document)).map_err(|source| StorageError::Decode {
            path: path.to_string(),
            source,
        })?;
    Ok(Activity::from_document(id, document))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::ActivityRepository;
    use crate::domain::{ActivityFields, DayKey, Schedule};
    use crate::storage::{DocumentStore, MemoryStore, StorageError, activity_path};

    fn day() -> DayKey {
        DayKey::new("u1", NaiveDate::from_ymd_opt(2026, 2, 14).expect("valid date"))
    }

    #[test]
    fn lists_by_start_time_with_unscheduled_last() {
        let store = MemoryStore::new();
        let repository = ActivityRepository::new(&store);
        let day = day();

        repository
            .create(&day, &ActivityFields::new("Read", "Rest", 30, None))
            .expect("create should succeed");
        repository
            .create(&day, &ActivityFields::new("Lunch", "Food", 45, Some(720)))
            .expect("create should succeed");
        repository
            .create(&day, &ActivityFields::new("Gym", "Health", 60, Some(420)))
            .expect("create should succeed");

        let titles = repository
            .list(&day)
            .expect("list should succeed")
            .into_iter()
            .map(|activity| activity.title)
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["Gym", "Lunch", "Read"]);
    }

    #[test]
    fn replace_and_start_update_keep_identity() {
        let store = MemoryStore::new();
        let repository = ActivityRepository::new(&store);
        let day = day();

        let id = repository
            .create(&day, &ActivityFields::new("Gym", "Health", 60, Some(420)))
            .expect("create should succeed");
        repository
            .replace(&day, &id, &ActivityFields::new("Swim", "Sport", 40, None))
            .expect("replace should succeed");
        let replaced = repository
            .get(&day, &id)
            .expect("get should succeed")
            .expect("activity should exist");
        assert_eq!(replaced.title, "Swim");
        assert_eq!(replaced.category, "Sport");
        assert_eq!(replaced.minutes, 40);
        assert_eq!(replaced.schedule, Schedule::Unscheduled);

        repository
            .update_start(&day, &id, Some(600))
            .expect("start update should succeed");
        let moved = repository
            .get(&day, &id)
            .expect("get should succeed")
            .expect("activity should exist");
        assert_eq!(moved.schedule, Schedule::Scheduled { start_min: 600 });
        assert_eq!(moved.minutes, 40);

        let stored = store
            .get(&activity_path(&day, &id))
            .expect("get should succeed")
            .expect("document should exist");
        assert!(stored.contains_key("createdAt"));
        assert!(stored.contains_key("updatedAt"));
    }

    #[test]
    fn missing_activity_reads_as_none_and_cannot_be_replaced() {
        let store = MemoryStore::new();
        let repository = ActivityRepository::new(&store);
        let day = day();

        assert!(repository.get(&day, "nope").expect("get should succeed").is_none());
        let err = repository
            .replace(&day, "nope", &ActivityFields::new("x", "y", 1, None))
            .expect_err("replace of missing activity should fail");
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn corrupt_document_is_a_decode_error() {
        let store = MemoryStore::new();
        let day = day();
        let mut document = crate::storage::Document::new();
        document.insert("title".to_string(), json!(42));
        store
            .set_merge(&activity_path(&day, "bad"), document)
            .expect("merge should succeed");

        let err = ActivityRepository::new(&store)
            .list(&day)
            .expect_err("corrupt activity should not decode");
        assert!(matches!(err, StorageError::Decode { .. }));
    }
}
