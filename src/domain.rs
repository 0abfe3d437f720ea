use std::fmt::Debug;

use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Serialize};

use crate::models::{
    Consumption, Habit, HabitEntry, HabitFilter, HabitPatch, MediaFilter, MediaItem, MediaPatch,
    NewHabit, NewMedia,
};

pub trait Entity: Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static {
    fn id(&self) -> &str;
}

pub trait DatedRecord:
    Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    fn id(&self) -> &str;

    fn date(&self) -> NaiveDate;

    // A missing flag counts as done.
    fn is_done(&self) -> bool;

    /// Stand-in shown between an optimistic toggle and the server's answer.
    fn placeholder(entity_id: &str, date: NaiveDate) -> Self;
}

pub trait Domain: Send + Sync + 'static {
    type Entity: Entity;
    type Record: DatedRecord;
    type NewEntity: Serialize + Send + Sync;
    type Patch: Serialize + Send + Sync;
    type Filter: Serialize + Default + Send + Sync;

    /// Collection segment, e.g. `habits` in `/habits/:id`.
    const COLLECTION: &'static str;
    /// Record segment, e.g. `entries` in `/habits/:id/entries`.
    const RECORDS: &'static str;
}

pub fn placeholder_id(date: NaiveDate) -> String {
    format!("temp-{date}")
}

pub fn is_placeholder_id(id: &str) -> bool {
    id.starts_with("temp-")
}

pub struct Habits;

impl Domain for Habits {
    type Entity = Habit;
    type Record = HabitEntry;
    type NewEntity = NewHabit;
    type Patch = HabitPatch;
    type Filter = HabitFilter;

    const COLLECTION: &'static str = "habits";
    const RECORDS: &'static str = "entries";
}

pub struct Media;

impl Domain for Media {
    type Entity = MediaItem;
    type Record = Consumption;
    type NewEntity = NewMedia;
    type Patch = MediaPatch;
    type Filter = MediaFilter;

    const COLLECTION: &'static str = "media";
    const RECORDS: &'static str = "consumptions";
}

impl Entity for Habit {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for MediaItem {
    fn id(&self) -> &str {
        &self.id
    }
}

impl DatedRecord for HabitEntry {
    fn id(&self) -> &str {
        &self.id
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn is_done(&self) -> bool {
        self.done.unwrap_or(true)
    }

    fn placeholder(entity_id: &str, date: NaiveDate) -> Self {
        HabitEntry {
            id: placeholder_id(date),
            habit_id: entity_id.to_string(),
            date,
            done: Some(true),
            notes: None,
        }
    }
}

impl DatedRecord for Consumption {
    fn id(&self) -> &str {
        &self.id
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn is_done(&self) -> bool {
        self.consumed.unwrap_or(true)
    }

    fn placeholder(entity_id: &str, date: NaiveDate) -> Self {
        Consumption {
            id: placeholder_id(date),
            media_id: entity_id.to_string(),
            date,
            consumed: Some(true),
            notes: None,
        }
    }
}
