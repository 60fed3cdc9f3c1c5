//! Persisted application records: the prompt library and window geometry.
//! Each store is a small repository trait with a JSON-file implementation
//! (whole-file replacement, atomic temp + rename) and an in-memory twin for
//! tests.

pub mod prompts;
pub mod window_state;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("path error: {0}")]
    Path(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub(crate) async fn write_json_atomically<T: serde::Serialize>(
    path: &std::path::Path,
    value: &T,
) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_string_pretty(value)?;

    // Write atomically using temp file + rename
    let temp_path = path.with_extension("json.tmp");
    tokio::fs::write(&temp_path, json).await?;
    tokio::fs::rename(&temp_path, path).await?;

    Ok(())
}
