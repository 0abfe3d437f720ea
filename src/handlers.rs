use crate::errors::AppError;
use crate::models::{
    Consumption, Habit, HabitEntry, HabitFilter, HabitPatch, MediaFilter, MediaItem, MediaPatch,
    NewHabit, NewMedia, RangeQuery, RecordUpsert, ToggleRequest, ToggleResponse,
};
use crate::state::{AppState, BackendData};
use crate::storage::persist_data;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::info;

/// Runs `op` on a copy of the data and keeps the copy only once it is on disk.
async fn mutate<T>(
    state: &AppState,
    op: impl FnOnce(&mut BackendData) -> Result<T, AppError>,
) -> Result<T, AppError> {
    let mut data = state.data.lock().await;
    let mut draft = data.clone();
    let value = op(&mut draft)?;
    persist_data(&state.data_path, &draft).await?;
    *data = draft;
    Ok(value)
}

// ------- habits -------

pub async fn list_habits(
    State(state): State<AppState>,
    Query(filter): Query<HabitFilter>,
) -> Json<Vec<Habit>> {
    let data = state.data.lock().await;
    Json(data.list_habits(&filter))
}

pub async fn create_habit(
    State(state): State<AppState>,
    Json(payload): Json<NewHabit>,
) -> Result<(StatusCode, Json<Habit>), AppError> {
    let habit = mutate(&state, |data| data.create_habit(payload)).await?;
    info!(id = %habit.id, title = %habit.title, "habit created");
    Ok((StatusCode::CREATED, Json(habit)))
}

pub async fn update_habit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<HabitPatch>,
) -> Result<Json<Habit>, AppError> {
    let habit = mutate(&state, |data| data.update_habit(&id, patch)).await?;
    Ok(Json(habit))
}

pub async fn delete_habit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    mutate(&state, |data| data.delete_habit(&id)).await?;
    info!(%id, "habit deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_entries(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<HabitEntry>>, AppError> {
    let data = state.data.lock().await;
    Ok(Json(data.list_entries(&id, &range)?))
}

pub async fn toggle_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ToggleRequest>,
) -> Result<Json<ToggleResponse>, AppError> {
    let toggled = mutate(&state, |data| data.toggle_entry(&id, payload.date)).await?;
    info!(%id, date = %payload.date, ?toggled, "habit entry toggled");
    Ok(Json(ToggleResponse {
        date: payload.date,
        toggled,
    }))
}

pub async fn upsert_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<RecordUpsert>,
) -> Result<Json<HabitEntry>, AppError> {
    let entry = mutate(&state, |data| data.upsert_entry(&id, payload)).await?;
    Ok(Json(entry))
}

pub async fn delete_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
) -> Result<StatusCode, AppError> {
    mutate(&state, |data| data.delete_entry(&entry_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ------- media -------

pub async fn list_media(
    State(state): State<AppState>,
    Query(filter): Query<MediaFilter>,
) -> Json<Vec<MediaItem>> {
    let data = state.data.lock().await;
    Json(data.list_media(&filter))
}

pub async fn create_media(
    State(state): State<AppState>,
    Json(payload): Json<NewMedia>,
) -> Result<(StatusCode, Json<MediaItem>), AppError> {
    let item = mutate(&state, |data| data.create_media(payload)).await?;
    info!(id = %item.id, title = %item.title, "media created");
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn update_media(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<MediaPatch>,
) -> Result<Json<MediaItem>, AppError> {
    let item = mutate(&state, |data| data.update_media(&id, patch)).await?;
    Ok(Json(item))
}

pub async fn delete_media(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    mutate(&state, |data| data.delete_media(&id)).await?;
    info!(%id, "media deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_consumptions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<Consumption>>, AppError> {
    let data = state.data.lock().await;
    Ok(Json(data.list_consumptions(&id, &range)?))
}

pub async fn toggle_consumption(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ToggleRequest>,
) -> Result<Json<ToggleResponse>, AppError> {
    let toggled = mutate(&state, |data| data.toggle_consumption(&id, payload.date)).await?;
    info!(%id, date = %payload.date, ?toggled, "consumption toggled");
    Ok(Json(ToggleResponse {
        date: payload.date,
        toggled,
    }))
}

pub async fn upsert_consumption(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<RecordUpsert>,
) -> Result<Json<Consumption>, AppError> {
    let consumption = mutate(&state, |data| data.upsert_consumption(&id, payload)).await?;
    Ok(Json(consumption))
}

pub async fn delete_consumption(
    State(state): State<AppState>,
    Path(consumption_id): Path<String>,
) -> Result<StatusCode, AppError> {
    mutate(&state, |data| data.delete_consumption(&consumption_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "daily_tracker_handlers_{}_{name}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn new_habit(title: &str) -> NewHabit {
        NewHabit {
            title: title.into(),
            ..NewHabit::default()
        }
    }

    #[tokio::test]
    async fn failed_write_keeps_previous_data() {
        let dir = scratch_dir("blocked");
        // A regular file where the data directory should be.
        let blocker = dir.join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let state = AppState::new(blocker.join("state.json"), BackendData::default());

        let err = create_habit(State(state.clone()), Json(new_habit("Read")))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);

        let data = state.data.lock().await;
        assert!(data.habits.is_empty());
        assert_eq!(data.next_id, 0);
        drop(data);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn successful_write_updates_memory_and_disk() {
        let dir = scratch_dir("ok");
        let path = dir.join("state.json");
        let state = AppState::new(path.clone(), BackendData::default());

        let (status, Json(habit)) = create_habit(State(state.clone()), Json(new_habit("Read")))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(state.data.lock().await.habits, vec![habit.clone()]);

        let on_disk = crate::storage::load_data(&path).await;
        assert_eq!(on_disk.habits, vec![habit]);
        let _ = std::fs::remove_dir_all(dir);
    }
}
