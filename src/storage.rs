use crate::errors::AppError;
use crate::state::BackendData;
use std::path::Path;
use tokio::fs;
use tracing::{error, info};

/// Loads the data file. A missing or unreadable file starts the backend empty.
pub async fn load_data(path: &Path) -> BackendData {
    match fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(data) => data,
            Err(err) => {
                error!("failed to parse data file: {err}");
                BackendData::default()
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no data file yet, starting empty");
            BackendData::default()
        }
        Err(err) => {
            error!("failed to read data file: {err}");
            BackendData::default()
        }
    }
}

pub async fn persist_data(path: &Path, data: &BackendData) -> Result<(), AppError> {
    let payload = serde_json::to_vec_pretty(data).map_err(AppError::internal)?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, payload).await?;
    Ok(())
}
