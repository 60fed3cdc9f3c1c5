//! The shared state model mirrored between the backend and its frontends.
//!
//! [`LlmState`] is the single root aggregate: the backend is its only writer,
//! and every mutation publishes a complete replacement snapshot through a
//! [`StateContainer`]. Frontends hold a read-only replica that is replaced
//! wholesale on every push.

mod container;

pub use container::{StateContainer, Subscription};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Root state aggregate, owned by the backend and mirrored by frontends.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    pub engine: EngineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_model_file_path: Option<String>,
    pub available_models: AvailableModels,
    pub model_download: ModelDownload,
    pub model: ModelStatus,
    pub context: SectionStatus,
    pub context_sequence: SectionStatus,
    pub chat_session: ChatSessionStatus,
}

/// Inference engine handle status.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Model load status, including fractional load progress while loading.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_progress: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Loaded/error status for the context and context-sequence stages.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionStatus {
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Status and transcript of the active chat session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSessionStatus {
    pub loaded: bool,
    pub generating_result: bool,
    pub transcript: Vec<ChatItem>,
    pub draft_prompt: DraftPrompt,
}

/// The user's in-progress input text and its inline completion suggestion.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftPrompt {
    pub prompt: String,
    pub completion: String,
}

/// Local catalog, remote catalog, and search results.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableModels {
    pub local: Vec<LocalModel>,
    pub remote: Vec<RemoteModel>,
    pub loading: bool,
    pub search_query: String,
    pub search_results: Vec<RemoteModel>,
}

/// Progress of an in-flight model download.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDownload {
    pub downloading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One transcript entry: a user message or a model response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChatItem {
    User { message: String },
    Model { blocks: Vec<Block> },
}

/// One display unit of a model response. Adjacent blocks of the same kind
/// are pre-merged by the squashing reducer, so a block list never contains
/// two consecutive text blocks nor two consecutive open segments of the
/// same kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Block {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Segment {
        segment_type: SegmentKind,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        start_time: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        end_time: Option<DateTime<Utc>>,
    },
}

/// Kind of a typed response segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SegmentKind {
    Thought,
    Comment,
}

/// A model file found in the local models directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalModel {
    pub id: String,
    pub name: String,
    pub path: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// A model listed by the remote registry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteModel {
    pub id: String,
    pub name: String,
    pub author: String,
    pub downloads: u64,
    pub likes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub url: String,
    pub files: Vec<RemoteModelFile>,
}

/// A downloadable file belonging to a remote model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteModelFile {
    pub filename: String,
    pub size: u64,
    pub download_url: String,
    /// SHA-256 of the file contents, when the registry publishes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}
