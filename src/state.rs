use crate::errors::AppError;
use crate::models::{
    Consumption, Habit, HabitEntry, HabitFilter, HabitPatch, MediaFilter, MediaItem, MediaPatch,
    NewHabit, NewMedia, RangeQuery, RecordUpsert, Toggled, is_valid_rating,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::Mutex;

/// Everything the backend stores, persisted as one JSON document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BackendData {
    #[serde(default)]
    pub next_id: u64,
    #[serde(default)]
    pub habits: Vec<Habit>,
    #[serde(default)]
    pub entries: Vec<HabitEntry>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    #[serde(default)]
    pub consumptions: Vec<Consumption>,
}

#[derive(Clone)]
pub struct AppState {
    pub data_path: PathBuf,
    pub data: Arc<Mutex<BackendData>>,
}

impl AppState {
    pub fn new(data_path: PathBuf, data: BackendData) -> Self {
        Self {
            data_path,
            data: Arc::new(Mutex::new(data)),
        }
    }
}

fn required_title(title: &str) -> Result<String, AppError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("title is required"));
    }
    Ok(title.to_string())
}

fn matches_search(title: &str, search: Option<&str>) -> bool {
    search
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .is_none_or(|term| title.to_lowercase().contains(&term.to_lowercase()))
}

fn sorted_by_date<T>(items: impl Iterator<Item = T>, date: impl Fn(&T) -> NaiveDate) -> Vec<T> {
    let mut items: Vec<T> = items.collect();
    items.sort_by_key(|item| date(item));
    items
}

impl BackendData {
    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{}", self.next_id)
    }

    // ------- habits -------

    pub fn list_habits(&self, filter: &HabitFilter) -> Vec<Habit> {
        let mut habits: Vec<Habit> = self
            .habits
            .iter()
            .filter(|habit| matches_search(&habit.title, filter.search.as_deref()))
            .cloned()
            .collect();
        habits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        habits
    }

    pub fn create_habit(&mut self, payload: NewHabit) -> Result<Habit, AppError> {
        let habit = Habit {
            id: self.allocate_id("habit"),
            title: required_title(&payload.title)?,
            description: payload.description,
            category: payload.category,
            color: payload.color,
            target_frequency: payload.target_frequency,
            created_at: Utc::now(),
        };
        self.habits.push(habit.clone());
        Ok(habit)
    }

    pub fn update_habit(&mut self, id: &str, patch: HabitPatch) -> Result<Habit, AppError> {
        let title = patch.title.as_deref().map(required_title).transpose()?;
        let habit = self
            .habits
            .iter_mut()
            .find(|habit| habit.id == id)
            .ok_or_else(|| AppError::not_found("habit not found"))?;

        if let Some(title) = title {
            habit.title = title;
        }
        if patch.description.is_some() {
            habit.description = patch.description;
        }
        if patch.category.is_some() {
            habit.category = patch.category;
        }
        if patch.color.is_some() {
            habit.color = patch.color;
        }
        if let Some(frequency) = patch.target_frequency {
            habit.target_frequency = frequency;
        }
        Ok(habit.clone())
    }

    pub fn delete_habit(&mut self, id: &str) -> Result<(), AppError> {
        let before = self.habits.len();
        self.habits.retain(|habit| habit.id != id);
        if self.habits.len() == before {
            return Err(AppError::not_found("habit not found"));
        }
        self.entries.retain(|entry| entry.habit_id != id);
        Ok(())
    }

    fn require_habit(&self, id: &str) -> Result<(), AppError> {
        if self.habits.iter().any(|habit| habit.id == id) {
            Ok(())
        } else {
            Err(AppError::not_found("habit not found"))
        }
    }

    pub fn list_entries(&self, habit_id: &str, range: &RangeQuery) -> Result<Vec<HabitEntry>, AppError> {
        self.require_habit(habit_id)?;
        Ok(sorted_by_date(
            self.entries
                .iter()
                .filter(|entry| entry.habit_id == habit_id && range.contains(entry.date))
                .cloned(),
            |entry| entry.date,
        ))
    }

    pub fn toggle_entry(&mut self, habit_id: &str, date: NaiveDate) -> Result<Toggled, AppError> {
        self.require_habit(habit_id)?;
        let before = self.entries.len();
        self.entries
            .retain(|entry| !(entry.habit_id == habit_id && entry.date == date));
        if self.entries.len() < before {
            return Ok(Toggled::Off);
        }

        let id = self.allocate_id("entry");
        self.entries.push(HabitEntry {
            id,
            habit_id: habit_id.to_string(),
            date,
            done: Some(true),
            notes: None,
        });
        Ok(Toggled::On)
    }

    pub fn upsert_entry(&mut self, habit_id: &str, payload: RecordUpsert) -> Result<HabitEntry, AppError> {
        self.require_habit(habit_id)?;
        let done = payload.done.unwrap_or(true);
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.habit_id == habit_id && entry.date == payload.date)
        {
            entry.done = Some(done);
            entry.notes = payload.notes;
            return Ok(entry.clone());
        }

        let entry = HabitEntry {
            id: self.allocate_id("entry"),
            habit_id: habit_id.to_string(),
            date: payload.date,
            done: Some(done),
            notes: payload.notes,
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    pub fn delete_entry(&mut self, entry_id: &str) -> Result<(), AppError> {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != entry_id);
        if self.entries.len() == before {
            return Err(AppError::not_found("entry not found"));
        }
        Ok(())
    }

    // ------- media -------

    pub fn list_media(&self, filter: &MediaFilter) -> Vec<MediaItem> {
        let mut items: Vec<MediaItem> = self
            .media
            .iter()
            .filter(|item| filter.media_type.is_none_or(|kind| item.media_type == kind))
            .filter(|item| filter.status.is_none_or(|status| item.status == status))
            .filter(|item| matches_search(&item.title, filter.search.as_deref()))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
    }

    pub fn create_media(&mut self, payload: NewMedia) -> Result<MediaItem, AppError> {
        let title = required_title(&payload.title)?;
        let status = payload
            .status
            .unwrap_or_else(|| payload.media_type.in_progress_status());
        if !payload.media_type.allows(status) {
            return Err(AppError::bad_request(format!(
                "status {status:?} is not valid for {:?}",
                payload.media_type
            )));
        }
        validate_rating(payload.rating)?;

        let item = MediaItem {
            id: self.allocate_id("media"),
            title,
            media_type: payload.media_type,
            category: payload.category,
            status,
            rating: payload.rating,
            notes: payload.notes,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.media.push(item.clone());
        Ok(item)
    }

    pub fn update_media(&mut self, id: &str, patch: MediaPatch) -> Result<MediaItem, AppError> {
        let title = patch.title.as_deref().map(required_title).transpose()?;
        validate_rating(patch.rating)?;
        let item = self
            .media
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| AppError::not_found("media not found"))?;

        let media_type = patch.media_type.unwrap_or(item.media_type);
        let status = match patch.status {
            Some(status) if !media_type.allows(status) => {
                return Err(AppError::bad_request(format!(
                    "status {status:?} is not valid for {media_type:?}"
                )));
            }
            Some(status) => status,
            // Changing the type keeps a finished status but moves in-progress ones along.
            None if media_type.allows(item.status) => item.status,
            None => media_type.in_progress_status(),
        };

        if let Some(title) = title {
            item.title = title;
        }
        item.media_type = media_type;
        item.status = status;
        if patch.category.is_some() {
            item.category = patch.category;
        }
        if patch.rating.is_some() {
            item.rating = patch.rating;
        }
        if patch.notes.is_some() {
            item.notes = patch.notes;
        }
        item.updated_at = Some(Utc::now());
        Ok(item.clone())
    }

    pub fn delete_media(&mut self, id: &str) -> Result<(), AppError> {
        let before = self.media.len();
        self.media.retain(|item| item.id != id);
        if self.media.len() == before {
            return Err(AppError::not_found("media not found"));
        }
        self.consumptions.retain(|consumption| consumption.media_id != id);
        Ok(())
    }

    fn require_media(&self, id: &str) -> Result<(), AppError> {
        if self.media.iter().any(|item| item.id == id) {
            Ok(())
        } else {
            Err(AppError::not_found("media not found"))
        }
    }

    pub fn list_consumptions(&self, media_id: &str, range: &RangeQuery) -> Result<Vec<Consumption>, AppError> {
        self.require_media(media_id)?;
        Ok(sorted_by_date(
            self.consumptions
                .iter()
                .filter(|consumption| consumption.media_id == media_id && range.contains(consumption.date))
                .cloned(),
            |consumption| consumption.date,
        ))
    }

    pub fn toggle_consumption(&mut self, media_id: &str, date: NaiveDate) -> Result<Toggled, AppError> {
        self.require_media(media_id)?;
        let before = self.consumptions.len();
        self.consumptions
            .retain(|consumption| !(consumption.media_id == media_id && consumption.date == date));
        if self.consumptions.len() < before {
            return Ok(Toggled::Off);
        }

        let id = self.allocate_id("consumption");
        self.consumptions.push(Consumption {
            id,
            media_id: media_id.to_string(),
            date,
            consumed: Some(true),
            notes: None,
        });
        Ok(Toggled::On)
    }

    pub fn upsert_consumption(&mut self, media_id: &str, payload: RecordUpsert) -> Result<Consumption, AppError> {
        self.require_media(media_id)?;
        let consumed = payload.done.unwrap_or(true);
        if let Some(consumption) = self
            .consumptions
            .iter_mut()
            .find(|consumption| consumption.media_id == media_id && consumption.date == payload.date)
        {
            consumption.consumed = Some(consumed);
            consumption.notes = payload.notes;
            return Ok(consumption.clone());
        }

        let consumption = Consumption {
            id: self.allocate_id("consumption"),
            media_id: media_id.to_string(),
            date: payload.date,
            consumed: Some(consumed),
            notes: payload.notes,
        };
        self.consumptions.push(consumption.clone());
        Ok(consumption)
    }

    pub fn delete_consumption(&mut self, consumption_id: &str) -> Result<(), AppError> {
        let before = self.consumptions.len();
        self.consumptions.retain(|consumption| consumption.id != consumption_id);
        if self.consumptions.len() == before {
            return Err(AppError::not_found("consumption not found"));
        }
        Ok(())
    }
}

fn validate_rating(rating: Option<u8>) -> Result<(), AppError> {
    match rating {
        Some(rating) if !is_valid_rating(rating) => {
            Err(AppError::bad_request("rating must be between 0 and 5"))
        }
        _ => Ok(()),
    }
}
