use chrono::NaiveDate;
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use serde::{Deserialize, Serialize};

use crate::clock::parse_time;
use crate::error::{TrackerError, TrackerResult};

pub const MINUTES_PER_DAY: u32 = 1440;
pub const DEFAULT_CATEGORY: &str = "Other";
pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

const DOCUMENT_ID_LEN: usize = 20;

/// When an activity happens within its day, if known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Scheduled { start_min: u32 },
    Unscheduled,
}

impl Schedule {
    pub fn from_start(start_min: Option<u32>) -> Self {
        match start_min {
            Some(start_min) => Schedule::Scheduled { start_min },
            None => Schedule::Unscheduled,
        }
    }

    pub fn start_min(&self) -> Option<u32> {
        match self {
            Schedule::Scheduled { start_min } => Some(*start_min),
            Schedule::Unscheduled => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub id: String,
    pub title: String,
    pub category: String,
    pub minutes: u32,
    pub schedule: Schedule,
}

impl Activity {
    pub fn from_document(id: impl Into<String>, document: ActivityDocument) -> Self {
        let category = if document.category.trim().is_empty() {
            DEFAULT_CATEGORY.to_string()
        } else {
            document.category
        };

        Self {
            id: id.into(),
            title: document.title,
            category,
            minutes: document.minutes,
            schedule: Schedule::from_start(document.start_min),
        }
    }

    pub fn start_min(&self) -> Option<u32> {
        self.schedule.start_min()
    }
}

/// Stored shape of an activity document. Timestamps are write-only metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDocument {
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub minutes: u32,
    #[serde(default)]
    pub start_min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Validated user-editable fields of an activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityFields {
    pub title: String,
    pub category: String,
    pub minutes: u32,
    pub schedule: Schedule,
}

impl ActivityFields {
    pub fn new(
        title: impl Into<String>,
        category: impl Into<String>,
        minutes: u32,
        start_min: Option<u32>,
    ) -> Self {
        Self {
            title: title.into(),
            category: category.into(),
            minutes,
            schedule: Schedule::from_start(start_min),
        }
    }
}

/// Raw form input, exactly as typed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityForm {
    pub title: String,
    pub category: String,
    pub minutes: String,
    pub start: String,
}

impl ActivityForm {
    pub fn from_activity(activity: &Activity) -> Self {
        Self {
            title: activity.title.clone(),
            category: activity.category.clone(),
            minutes: activity.minutes.to_string(),
            start: crate::clock::format_time(activity.start_min()),
        }
    }

    pub fn validate(&self) -> TrackerResult<ActivityFields> {
        let title = self.title.trim();
        let minutes = self.minutes.trim().parse::<u32>().ok();
        let minutes = match minutes {
            Some(minutes) if !title.is_empty() && minutes > 0 => minutes,
            _ => return Err(TrackerError::validation("Enter title and valid minutes")),
        };

        let category = match self.category.trim() {
            "" => DEFAULT_CATEGORY,
            category => category,
        };
        let start_min = parse_start(&self.start)?;

        Ok(ActivityFields::new(title, category, minutes, start_min))
    }
}

/// Parses optional "HH:MM" input; blank means unscheduled.
pub fn parse_start(input: &str) -> TrackerResult<Option<u32>> {
    if input.trim().is_empty() {
        return Ok(None);
    }

    match parse_time(input) {
        Some(minutes) if (0..MINUTES_PER_DAY as i32).contains(&minutes) => Ok(Some(minutes as u32)),
        Some(_) => Err(TrackerError::validation(format!(
            "start time out of range: {}",
            input.trim()
        ))),
        None => Err(TrackerError::validation(format!(
            "invalid start time '{}', expected HH:MM",
            input.trim()
        ))),
    }
}

/// Identity of one user's day aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DayKey {
    pub user_id: String,
    pub date: NaiveDate,
}

impl DayKey {
    pub fn new(user_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            date,
        }
    }

    pub fn date_id(&self) -> String {
        date_id(self.date)
    }
}

pub fn date_id(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

pub fn parse_date_id(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_KEY_FORMAT).ok()
}

pub fn generate_id() -> String {
    generate_id_with_len(DOCUMENT_ID_LEN)
}

pub fn generate_id_with_len(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
