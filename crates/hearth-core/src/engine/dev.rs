//! Deterministic in-process engine backend, useful for testing and
//! development. Responses are either scripted ahead of time or a default
//! echo turn; no model weights are involved, but the full resource chain and
//! cancellation behavior of a real backend are exercised.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    CancelToken, ChatHandle, ChunkSink, CompletionEngine, ContextHandle, EngineBackend,
    EngineError, EngineHandle, EngineResult, HistoryEntry, LoadProgress, ModelHandle,
    ResponseChunk, SequenceHandle,
};

struct DevShared {
    script: Mutex<VecDeque<Vec<ResponseChunk>>>,
    completion_phrases: Mutex<Vec<String>>,
    chunk_delay: Duration,
}

/// Scripted engine backend. Each `prompt` pops the next scripted turn; with
/// no script queued it echoes the prompt back as two text chunks.
#[derive(Clone)]
pub struct DevEngineBackend {
    shared: Arc<DevShared>,
}

impl DevEngineBackend {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(DevShared {
                script: Mutex::new(VecDeque::new()),
                completion_phrases: Mutex::new(Vec::new()),
                chunk_delay: Duration::ZERO,
            }),
        }
    }

    /// Delay inserted before every chunk, so tests can cancel mid-turn at a
    /// deterministic point.
    pub fn with_chunk_delay(self, delay: Duration) -> Self {
        let shared = Arc::new(DevShared {
            script: Mutex::new(std::mem::take(&mut *self.shared.script.lock())),
            completion_phrases: Mutex::new(self.shared.completion_phrases.lock().clone()),
            chunk_delay: delay,
        });
        Self { shared }
    }

    /// Canned phrases the completion engine suggests continuations from.
    pub fn with_completion_phrases(self, phrases: Vec<String>) -> Self {
        *self.shared.completion_phrases.lock() = phrases;
        self
    }

    /// Queue the chunks for the next generation turn. Callable after the
    /// backend has been handed to a controller; turns pop in FIFO order.
    pub fn push_turn(&self, chunks: Vec<ResponseChunk>) {
        self.shared.script.lock().push_back(chunks);
    }
}

impl Default for DevEngineBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineBackend for DevEngineBackend {
    async fn load(&self) -> EngineResult<Arc<dyn EngineHandle>> {
        Ok(Arc::new(DevEngineHandle {
            shared: self.shared.clone(),
            disposed: AtomicBool::new(false),
        }))
    }
}

struct DevEngineHandle {
    shared: Arc<DevShared>,
    disposed: AtomicBool,
}

#[async_trait]
impl EngineHandle for DevEngineHandle {
    async fn load_model(
        &self,
        path: &Path,
        on_progress: LoadProgress,
    ) -> EngineResult<Arc<dyn ModelHandle>> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(EngineError::Failed("engine handle disposed".to_string()));
        }

        let is_gguf = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gguf"));
        if !is_gguf {
            return Err(EngineError::Failed(format!(
                "not a GGUF model file: {}",
                path.display()
            )));
        }

        for step in [0.25, 0.5, 0.75, 1.0] {
            on_progress(step);
            tokio::task::yield_now().await;
        }

        Ok(Arc::new(DevModelHandle {
            shared: self.shared.clone(),
            disposed: AtomicBool::new(false),
        }))
    }

    async fn dispose(&self) -> EngineResult<()> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct DevModelHandle {
    shared: Arc<DevShared>,
    disposed: AtomicBool,
}

#[async_trait]
impl ModelHandle for DevModelHandle {
    async fn create_context(&self) -> EngineResult<Arc<dyn ContextHandle>> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(EngineError::Failed("model handle disposed".to_string()));
        }
        Ok(Arc::new(DevContextHandle {
            shared: self.shared.clone(),
            disposed: AtomicBool::new(false),
        }))
    }

    async fn dispose(&self) -> EngineResult<()> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct DevContextHandle {
    shared: Arc<DevShared>,
    disposed: AtomicBool,
}

#[async_trait]
impl ContextHandle for DevContextHandle {
    fn sequence(&self) -> EngineResult<Arc<dyn SequenceHandle>> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(EngineError::Failed("context handle disposed".to_string()));
        }
        Ok(Arc::new(DevSequenceHandle {
            shared: self.shared.clone(),
            disposed: AtomicBool::new(false),
        }))
    }

    async fn dispose(&self) -> EngineResult<()> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct DevSequenceHandle {
    shared: Arc<DevShared>,
    disposed: AtomicBool,
}

impl SequenceHandle for DevSequenceHandle {
    fn chat_session(&self) -> EngineResult<Arc<dyn ChatHandle>> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(EngineError::Failed("sequence handle disposed".to_string()));
        }
        let phrases = self.shared.completion_phrases.lock().clone();
        Ok(Arc::new(DevChatHandle {
            shared: self.shared.clone(),
            history: Mutex::new(Vec::new()),
            completion: Arc::new(DevCompletionEngine::new(phrases)),
            disposed: AtomicBool::new(false),
        }))
    }

    fn dispose(&self) -> EngineResult<()> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct DevChatHandle {
    shared: Arc<DevShared>,
    history: Mutex<Vec<HistoryEntry>>,
    completion: Arc<DevCompletionEngine>,
    disposed: AtomicBool,
}

impl DevChatHandle {
    async fn chunk_gap(&self, cancel: &CancelToken) {
        if self.shared.chunk_delay.is_zero() {
            // Still a suspension point, so a stop can land between chunks.
            tokio::task::yield_now().await;
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.shared.chunk_delay) => {}
            _ = cancel.cancelled() => {}
        }
    }
}

#[async_trait]
impl ChatHandle for DevChatHandle {
    async fn prompt(
        &self,
        message: &str,
        cancel: CancelToken,
        on_chunk: ChunkSink<'_>,
    ) -> EngineResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(EngineError::Failed("chat session disposed".to_string()));
        }

        let turn = self.shared.script.lock().pop_front().unwrap_or_else(|| {
            vec![
                ResponseChunk::Text {
                    text: "echo: ".to_string(),
                },
                ResponseChunk::Text {
                    text: message.to_string(),
                },
            ]
        });

        self.history.lock().push(HistoryEntry::User {
            text: message.to_string(),
        });

        let mut produced = Vec::new();
        for chunk in turn {
            self.chunk_gap(&cancel).await;
            if cancel.is_cancelled() {
                break;
            }
            produced.push(chunk.clone());
            on_chunk(chunk);
        }

        if produced.is_empty() && cancel.is_cancelled() {
            return Err(EngineError::Aborted);
        }

        if !produced.is_empty() {
            self.history
                .lock()
                .push(HistoryEntry::Model { response: produced });
        }
        Ok(())
    }

    async fn preload(&self, _prefix: &str) -> EngineResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(EngineError::Failed("chat session disposed".to_string()));
        }
        Ok(())
    }

    fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().clone()
    }

    fn completion_engine(&self) -> Arc<dyn CompletionEngine> {
        self.completion.clone()
    }

    fn dispose(&self) -> EngineResult<()> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Completion over canned phrases: the suggested suffix is the remainder of
/// the first phrase the prefix starts. Results are cached per prefix.
struct DevCompletionEngine {
    phrases: Vec<String>,
    cache: Mutex<HashMap<String, Option<String>>>,
}

impl DevCompletionEngine {
    fn new(phrases: Vec<String>) -> Self {
        Self {
            phrases,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl CompletionEngine for DevCompletionEngine {
    fn complete(&self, prefix: &str) -> Option<String> {
        if prefix.is_empty() {
            return None;
        }
        if let Some(cached) = self.cache.lock().get(prefix) {
            return cached.clone();
        }
        let suffix = self
            .phrases
            .iter()
            .filter_map(|phrase| phrase.strip_prefix(prefix))
            .find(|suffix| !suffix.is_empty())
            .map(|suffix| suffix.to_string());
        self.cache
            .lock()
            .insert(prefix.to_string(), suffix.clone());
        suffix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn dev_chat(backend: &DevEngineBackend) -> Arc<dyn ChatHandle> {
        let engine = backend.load().await.unwrap();
        let model = engine
            .load_model(Path::new("m.gguf"), Arc::new(|_| {}))
            .await
            .unwrap();
        let context = model.create_context().await.unwrap();
        let sequence = context.sequence().unwrap();
        sequence.chat_session().unwrap()
    }

    #[tokio::test]
    async fn test_default_turn_echoes_the_prompt() {
        let backend = DevEngineBackend::new();
        let chat = dev_chat(&backend).await;

        let mut chunks = Vec::new();
        chat.prompt("hi", CancelToken::new(), &mut |chunk| chunks.push(chunk))
            .await
            .unwrap();

        assert_eq!(
            chunks,
            vec![
                ResponseChunk::Text {
                    text: "echo: ".to_string()
                },
                ResponseChunk::Text {
                    text: "hi".to_string()
                },
            ]
        );
        assert_eq!(chat.history().len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_turns_pop_in_order() {
        let backend = DevEngineBackend::new();
        backend.push_turn(vec![ResponseChunk::Text {
            text: "first".to_string(),
        }]);
        backend.push_turn(vec![ResponseChunk::Text {
            text: "second".to_string(),
        }]);
        let chat = dev_chat(&backend).await;

        let mut first = Vec::new();
        chat.prompt("a", CancelToken::new(), &mut |c| first.push(c))
            .await
            .unwrap();
        let mut second = Vec::new();
        chat.prompt("b", CancelToken::new(), &mut |c| second.push(c))
            .await
            .unwrap();

        assert_eq!(
            first,
            vec![ResponseChunk::Text {
                text: "first".to_string()
            }]
        );
        assert_eq!(
            second,
            vec![ResponseChunk::Text {
                text: "second".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_cancel_before_first_chunk_aborts() {
        let backend = DevEngineBackend::new();
        let chat = dev_chat(&backend).await;

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = chat.prompt("hi", cancel, &mut |_| {}).await;

        assert!(matches!(result, Err(EngineError::Aborted)));
        // The user message is committed even for an aborted turn.
        assert_eq!(
            chat.history(),
            vec![HistoryEntry::User {
                text: "hi".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_rejects_non_gguf_model_files() {
        let backend = DevEngineBackend::new();
        let engine = backend.load().await.unwrap();
        let result = engine
            .load_model(Path::new("weights.bin"), Arc::new(|_| {}))
            .await;
        assert!(matches!(result, Err(EngineError::Failed(_))));
    }

    #[test]
    fn test_completion_suggests_phrase_remainder() {
        let engine = DevCompletionEngine::new(vec!["Hello world".to_string()]);
        assert_eq!(engine.complete("Hel"), Some("lo world".to_string()));
        assert_eq!(engine.complete("Hel"), Some("lo world".to_string()));
        assert_eq!(engine.complete("xyz"), None);
        assert_eq!(engine.complete(""), None);
    }
}
