use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::{StoreError, StoreResult, write_json_atomically};

/// One saved prompt-library entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptRecord {
    pub id: String,
    pub name: String,
    pub content: String,
}

impl PromptRecord {
    /// A new record with a generated id.
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            content: content.into(),
        }
    }
}

/// The three built-in entries offered until the user saves their own.
pub fn default_prompts() -> Vec<PromptRecord> {
    vec![
        PromptRecord {
            id: "default".to_string(),
            name: "Default System Prompt".to_string(),
            content: "You are a helpful assistant.".to_string(),
        },
        PromptRecord {
            id: "code".to_string(),
            name: "Code Assistant".to_string(),
            content: "You are an expert programmer. Help with coding tasks, debugging, and best practices.".to_string(),
        },
        PromptRecord {
            id: "creative".to_string(),
            name: "Creative Writer".to_string(),
            content: "You are a creative writing assistant. Help with stories, poems, and creative content.".to_string(),
        },
    ]
}

#[async_trait]
pub trait PromptsRepository: Send + Sync {
    /// Load the full prompt library. When nothing usable is persisted, the
    /// defaults are saved and returned.
    async fn load_all(&self) -> StoreResult<Vec<PromptRecord>>;

    /// Replace the persisted library wholesale.
    async fn save_all(&self, prompts: Vec<PromptRecord>) -> StoreResult<()>;
}

pub struct JsonPromptsRepository {
    file_path: PathBuf,
}

impl JsonPromptsRepository {
    /// Repository at the platform data directory.
    pub fn new() -> StoreResult<Self> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| StoreError::Path("cannot determine data directory".into()))?;
        Ok(Self {
            file_path: data_dir.join("hearth").join("prompts.json"),
        })
    }

    /// Repository with a custom path (for testing).
    pub fn with_path(file_path: PathBuf) -> Self {
        Self { file_path }
    }
}

#[async_trait]
impl PromptsRepository for JsonPromptsRepository {
    async fn load_all(&self) -> StoreResult<Vec<PromptRecord>> {
        let parsed = match tokio::fs::read_to_string(&self.file_path).await {
            Ok(contents) => serde_json::from_str::<Vec<PromptRecord>>(&contents)
                .map_err(StoreError::Serialization),
            Err(err) => Err(StoreError::Io(err)),
        };

        match parsed {
            Ok(prompts) => Ok(prompts),
            Err(err) => {
                // Missing or unreadable library: fall back to the built-ins
                // and persist them so the next load is clean.
                warn!(
                    path = %self.file_path.display(),
                    error = %err,
                    "prompt library unavailable, writing defaults"
                );
                let defaults = default_prompts();
                self.save_all(defaults.clone()).await?;
                Ok(defaults)
            }
        }
    }

    async fn save_all(&self, prompts: Vec<PromptRecord>) -> StoreResult<()> {
        write_json_atomically(&self.file_path, &prompts).await
    }
}

/// In-memory prompt library, useful for testing and development.
#[derive(Default)]
pub struct InMemoryPromptsRepository {
    prompts: Mutex<Option<Vec<PromptRecord>>>,
}

impl InMemoryPromptsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PromptsRepository for InMemoryPromptsRepository {
    async fn load_all(&self) -> StoreResult<Vec<PromptRecord>> {
        let mut stored = self.prompts.lock();
        Ok(stored.get_or_insert_with(default_prompts).clone())
    }

    async fn save_all(&self, prompts: Vec<PromptRecord>) -> StoreResult<()> {
        *self.prompts.lock() = Some(prompts);
        Ok(())
    }
}
