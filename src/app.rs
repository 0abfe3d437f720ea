use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{delete, get, patch, post},
    Router,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/habits", get(handlers::list_habits).post(handlers::create_habit))
        .route(
            "/habits/:id",
            patch(handlers::update_habit).delete(handlers::delete_habit),
        )
        .route(
            "/habits/:id/entries",
            get(handlers::list_entries).post(handlers::upsert_entry),
        )
        .route("/habits/:id/entries/toggle", post(handlers::toggle_entry))
        .route("/habits/entries/:entry_id", delete(handlers::delete_entry))
        .route("/media", get(handlers::list_media).post(handlers::create_media))
        .route(
            "/media/:id",
            patch(handlers::update_media).delete(handlers::delete_media),
        )
        .route(
            "/media/:id/consumptions",
            get(handlers::list_consumptions).post(handlers::upsert_consumption),
        )
        .route(
            "/media/:id/consumptions/toggle",
            post(handlers::toggle_consumption),
        )
        .route(
            "/media/consumptions/:consumption_id",
            delete(handlers::delete_consumption),
        )
        .with_state(state)
}
