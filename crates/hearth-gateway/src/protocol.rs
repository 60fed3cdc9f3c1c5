//! Wire protocol of the gateway channel: one JSON object per message.
//!
//! Calls travel as `request` messages and come back as `response` or
//! `error`, correlated by `id`. State snapshots travel one way as
//! fire-and-forget `push` messages. Parameters are positional, JSON-encoded
//! arrays.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireMessage {
    Request {
        id: u64,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Response {
        id: u64,
        #[serde(default)]
        result: Value,
    },
    Error {
        id: u64,
        message: String,
    },
    Push {
        method: String,
        #[serde(default)]
        params: Value,
    },
}

/// Wire method names of the backend function table and the frontend push
/// table.
pub mod methods {
    pub const SELECT_MODEL_FILE_AND_LOAD: &str = "selectModelFileAndLoad";
    pub const GET_STATE: &str = "getState";
    pub const SET_DRAFT_PROMPT: &str = "setDraftPrompt";
    pub const PROMPT: &str = "prompt";
    pub const STOP_ACTIVE_PROMPT: &str = "stopActivePrompt";
    pub const RESET_CHAT_HISTORY: &str = "resetChatHistory";
    pub const SCAN_LOCAL_MODELS: &str = "scanLocalModels";
    pub const LOAD_DEFAULT_MODELS: &str = "loadDefaultModels";
    pub const GET_RECOMMENDED_MODEL: &str = "getRecommendedModel";
    pub const SEARCH_REMOTE_MODELS: &str = "searchRemoteModels";
    pub const DOWNLOAD_AND_LOAD_MODEL: &str = "downloadAndLoadModel";
    pub const LOAD_MODEL_FROM_LOCAL: &str = "loadModelFromLocal";
    pub const UNLOAD_MODEL: &str = "unloadModel";
    pub const DELETE_MODEL: &str = "deleteModel";
    pub const DELETE_MULTIPLE_MODELS: &str = "deleteMultipleModels";
    pub const LOAD_PROMPTS: &str = "loadPrompts";
    pub const SAVE_PROMPTS: &str = "savePrompts";
    pub const GET_WINDOW_STATE: &str = "getWindowState";
    pub const SAVE_WINDOW_STATE: &str = "saveWindowState";

    /// Frontend-exposed push callback carrying a full state snapshot.
    pub const UPDATE_STATE: &str = "updateState";
}
