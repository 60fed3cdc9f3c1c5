//! Model catalog: the local models directory, the remote registry, and the
//! download path between them.

pub mod downloader;
pub mod model_name;
pub mod registry;

use std::path::Path;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::state::{LocalModel, RemoteModel, RemoteModelFile};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry returned status: {0}")]
    UnexpectedStatus(reqwest::StatusCode),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("downloaded file failed checksum verification: {path}")]
    ChecksumMismatch { path: String },
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Scan `dir` for `.gguf` model files, creating the directory on first use.
/// Results are sorted by filename for a stable catalog order.
pub async fn scan_models_dir(dir: &Path) -> CatalogResult<Vec<LocalModel>> {
    tokio::fs::create_dir_all(dir).await?;

    let mut models = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_gguf = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gguf"));
        if !is_gguf {
            continue;
        }

        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().into_owned();
        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        models.push(LocalModel {
            id: filename.clone(),
            name: model_name::readable_name(&filename),
            path: path.to_string_lossy().into_owned(),
            size: metadata.len(),
            last_modified,
        });
    }

    models.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(models)
}

/// The built-in recommendation offered before the user has any model: a
/// compact instruct model small enough for most machines.
pub fn recommended_model() -> RemoteModel {
    RemoteModel {
        id: "HuggingFaceTB/SmolLM2-1.7B-Instruct-GGUF".to_string(),
        name: "SmolLM2 1.7B Instruct".to_string(),
        author: "HuggingFaceTB".to_string(),
        downloads: 9243,
        likes: 42,
        size: None,
        tags: vec![
            "chat".to_string(),
            "instruct".to_string(),
            "small".to_string(),
        ],
        description: Some(
            "State-of-the-art compact LLM for on-device applications".to_string(),
        ),
        url: "https://huggingface.co/HuggingFaceTB/SmolLM2-1.7B-Instruct-GGUF".to_string(),
        files: vec![RemoteModelFile {
            filename: "smollm2-1.7b-instruct-q4_k_m.gguf".to_string(),
            size: 1_060_000_000,
            download_url: "https://huggingface.co/HuggingFaceTB/SmolLM2-1.7B-Instruct-GGUF/resolve/main/smollm2-1.7b-instruct-q4_k_m.gguf".to_string(),
            checksum: None,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_lists_only_gguf_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("tiny-1b-q4_0.gguf"), b"weights")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"not a model")
            .await
            .unwrap();

        let models = scan_models_dir(dir.path()).await.unwrap();

        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "tiny-1b-q4_0.gguf");
        assert_eq!(models[0].size, 7);
        assert_eq!(models[0].name, "Tiny 1B (Q4_0)");
    }

    #[tokio::test]
    async fn test_scan_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("models");

        let models = scan_models_dir(&nested).await.unwrap();

        assert!(models.is_empty());
        assert!(nested.is_dir());
    }

    #[test]
    fn test_recommended_model_has_a_downloadable_file() {
        let model = recommended_model();
        assert!(!model.files.is_empty());
        assert!(model.files[0].filename.ends_with(".gguf"));
    }
}
