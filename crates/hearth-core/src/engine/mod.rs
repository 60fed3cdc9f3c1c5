//! Narrow interface to the token-generation engine.
//!
//! The resource chain mirrors the engine's own ownership model: a backend
//! yields an engine handle, the engine loads models, a model allocates a
//! context, a context carves out sequences, and a sequence hosts one chat
//! session at a time. The lifecycle controller owns every handle exclusively
//! and is the only caller of `dispose`.

pub mod dev;

use std::path::Path;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Notify;

use crate::state::SegmentKind;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine failure: {0}")]
    Failed(String),

    /// Generation was cancelled before any output had been produced.
    /// Cancellation after the first chunk is ordinary early termination and
    /// does not surface as an error.
    #[error("generation aborted before any output")]
    Aborted,
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Cooperative cancellation signal, observed at chunk boundaries.
///
/// Cancelling twice, or cancelling a token nobody is watching, is a no-op.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the token is cancelled.
    pub async fn cancelled(&self) {
        let mut notified = pin!(self.inner.notify.notified());
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// One token-level piece of model output, as delivered to the chunk callback.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseChunk {
    Text {
        text: String,
    },
    Segment {
        segment_type: SegmentKind,
        text: String,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    },
}

/// Committed conversation history as the chat session reports it.
#[derive(Clone, Debug, PartialEq)]
pub enum HistoryEntry {
    System { text: String },
    User { text: String },
    Model { response: Vec<ResponseChunk> },
}

/// Callback receiving fractional model-load progress in `[0, 1]`.
pub type LoadProgress = Arc<dyn Fn(f32) + Send + Sync>;

/// Callback receiving each generated chunk as it is produced.
pub type ChunkSink<'a> = &'a mut (dyn FnMut(ResponseChunk) + Send);

/// Entry point: acquires an engine handle.
#[async_trait]
pub trait EngineBackend: Send + Sync {
    async fn load(&self) -> EngineResult<Arc<dyn EngineHandle>>;
}

#[async_trait]
pub trait EngineHandle: Send + Sync {
    /// Load the model file at `path`, streaming fractional progress into
    /// `on_progress`.
    async fn load_model(
        &self,
        path: &Path,
        on_progress: LoadProgress,
    ) -> EngineResult<Arc<dyn ModelHandle>>;

    async fn dispose(&self) -> EngineResult<()>;
}

#[async_trait]
pub trait ModelHandle: Send + Sync {
    async fn create_context(&self) -> EngineResult<Arc<dyn ContextHandle>>;

    async fn dispose(&self) -> EngineResult<()>;
}

#[async_trait]
pub trait ContextHandle: Send + Sync {
    /// Obtain a generation sequence from this context. Sequences are not
    /// disposed independently; disposing the context cascades.
    fn sequence(&self) -> EngineResult<Arc<dyn SequenceHandle>>;

    async fn dispose(&self) -> EngineResult<()>;
}

pub trait SequenceHandle: Send + Sync {
    /// Create a chat session bound to this sequence. The session does not
    /// own the sequence; disposing the session leaves the sequence intact.
    fn chat_session(&self) -> EngineResult<Arc<dyn ChatHandle>>;

    fn dispose(&self) -> EngineResult<()>;
}

#[async_trait]
pub trait ChatHandle: Send + Sync {
    /// Run one generation turn. Every produced chunk is handed to `on_chunk`
    /// in order; `cancel` is observed at chunk boundaries. Returns
    /// [`EngineError::Aborted`] only when cancellation landed before the
    /// first chunk.
    async fn prompt(
        &self,
        message: &str,
        cancel: CancelToken,
        on_chunk: ChunkSink<'_>,
    ) -> EngineResult<()>;

    /// Feed `prefix` through the session without generating, to warm up
    /// evaluation state.
    async fn preload(&self, prefix: &str) -> EngineResult<()>;

    /// The session's committed history, including any partial response kept
    /// after a mid-generation cancellation.
    fn history(&self) -> Vec<HistoryEntry>;

    /// The prompt-completion engine bound to this session.
    fn completion_engine(&self) -> Arc<dyn CompletionEngine>;

    fn dispose(&self) -> EngineResult<()>;
}

/// Inline draft-prompt completion: a pure `prefix -> suffix` lookup with
/// internal caching.
pub trait CompletionEngine: Send + Sync {
    fn complete(&self, prefix: &str) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_idempotent() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_resolves_immediately_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        token.cancelled().await;
    }
}
