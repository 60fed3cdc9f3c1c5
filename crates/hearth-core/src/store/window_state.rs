use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{StoreError, StoreResult, write_json_atomically};

/// Persisted window geometry, restored at next startup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    pub width: u32,
    pub height: u32,
    pub is_maximized: bool,
}

impl Default for WindowState {
    fn default() -> Self {
        Self {
            x: None,
            y: None,
            width: 1400,
            height: 900,
            is_maximized: false,
        }
    }
}

#[async_trait]
pub trait WindowStateRepository: Send + Sync {
    /// Load the persisted geometry, falling back to the default when absent
    /// or unreadable.
    async fn load(&self) -> WindowState;

    /// Persist the geometry wholesale.
    async fn save(&self, state: WindowState) -> StoreResult<()>;
}

pub struct JsonWindowStateRepository {
    file_path: PathBuf,
}

impl JsonWindowStateRepository {
    /// Repository at the platform data directory.
    pub fn new() -> StoreResult<Self> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| StoreError::Path("cannot determine data directory".into()))?;
        Ok(Self {
            file_path: data_dir.join("hearth").join("window-state.json"),
        })
    }

    /// Repository with a custom path (for testing).
    pub fn with_path(file_path: PathBuf) -> Self {
        Self { file_path }
    }
}

#[async_trait]
impl WindowStateRepository for JsonWindowStateRepository {
    async fn load(&self) -> WindowState {
        match tokio::fs::read_to_string(&self.file_path).await {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(state) => state,
                Err(err) => {
                    warn!(
                        path = %self.file_path.display(),
                        error = %err,
                        "window state unreadable, using defaults"
                    );
                    WindowState::default()
                }
            },
            Err(_) => WindowState::default(),
        }
    }

    async fn save(&self, state: WindowState) -> StoreResult<()> {
        write_json_atomically(&self.file_path, &state).await
    }
}

/// In-memory window state, useful for testing and development.
#[derive(Default)]
pub struct InMemoryWindowStateRepository {
    state: Mutex<Option<WindowState>>,
}

impl InMemoryWindowStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WindowStateRepository for InMemoryWindowStateRepository {
    async fn load(&self) -> WindowState {
        self.state.lock().clone().unwrap_or_default()
    }

    async fn save(&self, state: WindowState) -> StoreResult<()> {
        *self.state.lock() = Some(state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_yields_default_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonWindowStateRepository::with_path(dir.path().join("window-state.json"));

        let state = repo.load().await;

        assert_eq!(state, WindowState::default());
        assert_eq!(state.width, 1400);
        assert_eq!(state.height, 900);
        assert!(!state.is_maximized);
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonWindowStateRepository::with_path(dir.path().join("window-state.json"));

        let saved = WindowState {
            x: Some(40),
            y: Some(20),
            width: 1600,
            height: 1000,
            is_maximized: true,
        };
        repo.save(saved.clone()).await.unwrap();

        assert_eq!(repo.load().await, saved);
    }

    #[tokio::test]
    async fn test_corrupt_file_yields_default_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("window-state.json");
        tokio::fs::write(&path, b"{{{").await.unwrap();
        let repo = JsonWindowStateRepository::with_path(path);

        assert_eq!(repo.load().await, WindowState::default());
    }
}
