//! Client for the remote model registry (a Hugging-Face-shaped HTTP index).
//!
//! The registry exposes a model search endpoint and a per-model file tree;
//! only GGUF files are offered for download, preferring the quantizations
//! that load comfortably on typical machines.

use serde::Deserialize;
use tracing::warn;

use super::{CatalogError, CatalogResult};
use crate::state::{RemoteModel, RemoteModelFile};

pub const DEFAULT_REGISTRY_URL: &str = "https://huggingface.co";

/// How many models a search or featured listing returns.
const MODEL_LIMIT: usize = 10;
/// How many files are offered per model.
const FILES_PER_MODEL: usize = 3;

#[derive(Clone)]
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct IndexModel {
    id: String,
    #[serde(default)]
    downloads: u64,
    #[serde(default)]
    likes: u64,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    lfs: Option<LfsPointer>,
}

#[derive(Debug, Deserialize)]
struct LfsPointer {
    oid: String,
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Search the registry for GGUF models matching `query`, most-downloaded
    /// first. Models whose file listing fails are returned without files.
    pub async fn search_models(&self, query: &str) -> CatalogResult<Vec<RemoteModel>> {
        let limit = MODEL_LIMIT.to_string();
        let models = self
            .fetch_index(&[
                ("search", query),
                ("filter", "gguf"),
                ("sort", "downloads"),
                ("limit", limit.as_str()),
            ])
            .await?;
        self.resolve_models(models).await
    }

    /// The most-downloaded GGUF models, for the default catalog view. Models
    /// without any downloadable file are dropped.
    pub async fn featured_models(&self) -> CatalogResult<Vec<RemoteModel>> {
        let limit = MODEL_LIMIT.to_string();
        let models = self
            .fetch_index(&[
                ("filter", "gguf"),
                ("sort", "downloads"),
                ("limit", limit.as_str()),
            ])
            .await?;

        let mut resolved = self.resolve_models(models).await?;
        resolved.retain(|model| !model.files.is_empty());
        for model in &mut resolved {
            if model.description.is_none() {
                model.description =
                    Some(format!("Popular model with {} downloads", model.downloads));
            }
        }
        Ok(resolved)
    }

    /// List the downloadable GGUF files of one model, best quantization
    /// first.
    pub async fn model_files(&self, model_id: &str) -> CatalogResult<Vec<RemoteModelFile>> {
        let url = format!("{}/api/models/{}/tree/main", self.base(), model_id);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(CatalogError::UnexpectedStatus(response.status()));
        }
        let entries: Vec<TreeEntry> = response.json().await?;

        let mut gguf: Vec<TreeEntry> = entries
            .into_iter()
            .filter(|entry| entry.kind == "file" && entry.path.ends_with(".gguf"))
            .collect();
        gguf.sort_by_key(|entry| quant_priority(&entry.path));

        Ok(gguf
            .into_iter()
            .take(FILES_PER_MODEL)
            .map(|entry| RemoteModelFile {
                download_url: format!(
                    "{}/{}/resolve/main/{}",
                    self.base(),
                    model_id,
                    entry.path
                ),
                checksum: entry.lfs.map(|lfs| {
                    lfs.oid
                        .strip_prefix("sha256:")
                        .unwrap_or(&lfs.oid)
                        .to_string()
                }),
                filename: entry.path,
                size: entry.size,
            })
            .collect())
    }

    async fn fetch_index(&self, query: &[(&str, &str)]) -> CatalogResult<Vec<IndexModel>> {
        let url = format!("{}/api/models", self.base());
        let response = self.client.get(&url).query(query).send().await?;
        if !response.status().is_success() {
            return Err(CatalogError::UnexpectedStatus(response.status()));
        }
        Ok(response.json().await?)
    }

    async fn resolve_models(&self, models: Vec<IndexModel>) -> CatalogResult<Vec<RemoteModel>> {
        let mut resolved = Vec::with_capacity(models.len());
        for model in models {
            let files = match self.model_files(&model.id).await {
                Ok(files) => files,
                Err(err) => {
                    warn!(model = %model.id, error = %err, "failed to list model files");
                    Vec::new()
                }
            };
            let author = model
                .id
                .split('/')
                .next()
                .filter(|author| !author.is_empty())
                .unwrap_or("unknown")
                .to_string();
            resolved.push(RemoteModel {
                url: format!("{}/{}", self.base(), model.id),
                name: model.id.clone(),
                id: model.id,
                author,
                downloads: model.downloads,
                likes: model.likes,
                size: None,
                tags: model.tags,
                description: model.description,
                files,
            });
        }
        Ok(resolved)
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_URL)
    }
}

/// Smaller quantizations first, for broad hardware compatibility.
fn quant_priority(filename: &str) -> u8 {
    let lower = filename.to_ascii_lowercase();
    if lower.contains("q4_k_m") {
        1
    } else if lower.contains("q4_0") {
        2
    } else if lower.contains("q5_k_m") {
        3
    } else if lower.contains("q8_0") {
        4
    } else {
        5
    }
}
