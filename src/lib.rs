pub mod app;
pub mod client;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod state;
pub mod stats;
pub mod storage;
pub mod store;
pub mod toggle;

pub use app::router;
pub use client::{ApiClient, HttpRemote, Remote};
pub use config::{ClientConfig, ServerConfig};
pub use errors::{ApiError, AppError};
pub use state::{AppState, BackendData};
pub use storage::{load_data, persist_data};
pub use store::{EntityStore, HabitStore, MediaStore};
