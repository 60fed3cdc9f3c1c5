//! The resource lifecycle manager and chat session engine.
//!
//! [`LlmController`] owns the sequential resource chain
//! engine → model → context → context-sequence → chat session. Every
//! operation serializes with itself through a named mutex keyed by resource
//! kind, publishes its loaded/error/progress status into the shared
//! [`StateContainer`], and tears dependents down before replacing a stage.

mod keyed_mutex;

pub use keyed_mutex::KeyedMutex;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::catalog::downloader::ModelDownloader;
use crate::catalog::registry::RegistryClient;
use crate::catalog::{self, downloader, model_name};
use crate::chat::{simplified_history, squash};
use crate::engine::{
    CancelToken, ChatHandle, CompletionEngine, ContextHandle, EngineBackend, EngineError,
    EngineHandle, LoadProgress, ModelHandle, ResponseChunk, SequenceHandle,
};
use crate::error::LlmError;
use crate::state::{
    Block, ChatItem, ChatSessionStatus, DraftPrompt, EngineStatus, LlmState, ModelDownload,
    ModelStatus, RemoteModel, SectionStatus, StateContainer,
};

/// Keys of the per-resource named mutexes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Engine,
    Model,
    Context,
    ContextSequence,
    ChatSession,
}

/// Handles owned by the controller, plus the in-flight generation state.
#[derive(Default)]
struct Resources {
    engine: Option<Arc<dyn EngineHandle>>,
    model: Option<Arc<dyn ModelHandle>>,
    context: Option<Arc<dyn ContextHandle>>,
    sequence: Option<Arc<dyn SequenceHandle>>,
    chat: Option<Arc<dyn ChatHandle>>,
    completion: Option<Arc<dyn CompletionEngine>>,
    cancel: Option<CancelToken>,
    in_progress: Vec<Block>,
}

pub struct LlmController {
    backend: Arc<dyn EngineBackend>,
    state: Arc<StateContainer<LlmState>>,
    locks: KeyedMutex<ResourceKind>,
    res: Mutex<Resources>,
    registry: RegistryClient,
    downloader: ModelDownloader,
    models_dir: PathBuf,
}

impl LlmController {
    pub fn new(backend: Arc<dyn EngineBackend>, models_dir: PathBuf) -> Self {
        Self {
            backend,
            state: Arc::new(StateContainer::new(LlmState::default())),
            locks: KeyedMutex::new(),
            res: Mutex::new(Resources::default()),
            registry: RegistryClient::default(),
            downloader: ModelDownloader::new(),
            models_dir,
        }
    }

    pub fn with_registry(mut self, registry: RegistryClient) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_app_version(self, version: impl Into<String>) -> Self {
        self.state
            .update(|s| s.app_version = Some(version.into()));
        self
    }

    /// The shared state container. The controller is its only writer.
    pub fn state(&self) -> Arc<StateContainer<LlmState>> {
        self.state.clone()
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    // ---- resource lifecycle ------------------------------------------------

    /// Acquire the inference engine handle, disposing any existing one first.
    /// A load failure lands in `state.engine.error`; it is not an `Err`.
    pub async fn load_engine(&self) -> Result<(), LlmError> {
        let _guard = self.locks.lock(ResourceKind::Engine).await;

        let existing = self.res.lock().engine.take();
        if let Some(engine) = existing {
            if let Err(err) = engine.dispose().await {
                warn!(error = %err, "failed to dispose engine handle");
            }
        }

        self.state
            .update(|s| s.engine = EngineStatus::default());

        match self.backend.load().await {
            Ok(handle) => {
                self.res.lock().engine = Some(handle);
                self.state.update(|s| {
                    s.engine = EngineStatus {
                        loaded: true,
                        error: None,
                    }
                });
                info!("inference engine loaded");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "failed to load inference engine");
                self.state.update(|s| {
                    s.engine = EngineStatus {
                        loaded: false,
                        error: Some(err.to_string()),
                    }
                });
                Ok(())
            }
        }
    }

    /// Load the model file at `path`, streaming fractional progress into the
    /// shared state. Requires a loaded engine. Any previously loaded model
    /// (and its dependents) is disposed first.
    pub async fn load_model(&self, path: impl AsRef<Path>) -> Result<(), LlmError> {
        let path = path.as_ref().to_path_buf();
        let _guard = self.locks.lock(ResourceKind::Model).await;

        let engine = self
            .res
            .lock()
            .engine
            .clone()
            .ok_or(LlmError::NotLoaded { resource: "engine" })?;

        self.dispose_model_chain().await;

        self.state.update(|s| {
            s.model = ModelStatus {
                loaded: false,
                load_progress: Some(0.0),
                name: None,
                error: None,
            }
        });

        let progress_state = self.state.clone();
        let on_progress: LoadProgress = Arc::new(move |load_progress: f32| {
            progress_state.update(|s| s.model.load_progress = Some(load_progress));
        });

        match engine.load_model(&path, on_progress).await {
            Ok(model) => {
                self.res.lock().model = Some(model);
                self.state.update(|s| {
                    s.model = ModelStatus {
                        loaded: true,
                        load_progress: Some(1.0),
                        name: Some(model_name::display_name(&path)),
                        error: None,
                    }
                });
                info!(path = %path.display(), "model loaded");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, path = %path.display(), "failed to load model");
                self.state.update(|s| {
                    s.model = ModelStatus {
                        loaded: false,
                        load_progress: None,
                        name: None,
                        error: Some(err.to_string()),
                    }
                });
                Ok(())
            }
        }
    }

    /// Create a fresh context from the loaded model, disposing any existing
    /// context first. Requires a loaded model.
    pub async fn create_context(&self) -> Result<(), LlmError> {
        let _guard = self.locks.lock(ResourceKind::Context).await;

        let model = self
            .res
            .lock()
            .model
            .clone()
            .ok_or(LlmError::NotLoaded { resource: "model" })?;

        let existing = self.res.lock().context.take();
        if let Some(context) = existing {
            if let Err(err) = context.dispose().await {
                warn!(error = %err, "failed to dispose context");
            }
        }

        self.state
            .update(|s| s.context = SectionStatus::default());

        match model.create_context().await {
            Ok(context) => {
                self.res.lock().context = Some(context);
                self.state.update(|s| {
                    s.context = SectionStatus {
                        loaded: true,
                        error: None,
                    }
                });
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "failed to create context");
                self.state.update(|s| {
                    s.context = SectionStatus {
                        loaded: false,
                        error: Some(err.to_string()),
                    }
                });
                Ok(())
            }
        }
    }

    /// Obtain a generation sequence from the context. Requires a loaded
    /// context. Sequences are not disposed independently; context disposal
    /// cascades.
    pub async fn create_context_sequence(&self) -> Result<(), LlmError> {
        let _guard = self.locks.lock(ResourceKind::ContextSequence).await;

        let context = self.res.lock().context.clone().ok_or(LlmError::NotLoaded {
            resource: "context",
        })?;

        self.state
            .update(|s| s.context_sequence = SectionStatus::default());

        match context.sequence() {
            Ok(sequence) => {
                self.res.lock().sequence = Some(sequence);
                self.state.update(|s| {
                    s.context_sequence = SectionStatus {
                        loaded: true,
                        error: None,
                    }
                });
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "failed to get context sequence");
                self.state.update(|s| {
                    s.context_sequence = SectionStatus {
                        loaded: false,
                        error: Some(err.to_string()),
                    }
                });
                Ok(())
            }
        }
    }

    /// Full cascade teardown: stop any in-flight generation, dispose chat
    /// session, sequence, context, and model (each best-effort), then reset
    /// all four state sections and the selected file path. Idempotent.
    pub async fn unload_model(&self) -> Result<(), LlmError> {
        let _guard = self.locks.lock(ResourceKind::Model).await;

        self.stop_active_prompt();

        {
            // The chat-session teardown queues behind any in-flight prompt.
            let _chat_guard = self.locks.lock(ResourceKind::ChatSession).await;
            let (chat, completion) = {
                let mut res = self.res.lock();
                (res.chat.take(), res.completion.take())
            };
            drop(completion);
            if let Some(chat) = chat {
                if let Err(err) = chat.dispose() {
                    warn!(error = %err, "failed to dispose chat session");
                }
            }
        }

        let (sequence, context, model) = {
            let mut res = self.res.lock();
            (res.sequence.take(), res.context.take(), res.model.take())
        };
        if let Some(sequence) = sequence {
            if let Err(err) = sequence.dispose() {
                warn!(error = %err, "failed to dispose context sequence");
            }
        }
        if let Some(context) = context {
            if let Err(err) = context.dispose().await {
                warn!(error = %err, "failed to dispose context");
            }
        }
        if let Some(model) = model {
            if let Err(err) = model.dispose().await {
                warn!(error = %err, "failed to dispose model");
            }
        }

        self.state.update(|s| {
            s.selected_model_file_path = None;
            s.model = ModelStatus {
                loaded: false,
                load_progress: Some(0.0),
                name: None,
                error: None,
            };
            s.context = SectionStatus::default();
            s.context_sequence = SectionStatus::default();
            s.chat_session = ChatSessionStatus::default();
        });
        Ok(())
    }

    async fn dispose_model_chain(&self) {
        let (chat, completion, sequence, context, model) = {
            let mut res = self.res.lock();
            (
                res.chat.take(),
                res.completion.take(),
                res.sequence.take(),
                res.context.take(),
                res.model.take(),
            )
        };
        drop(completion);
        if let Some(chat) = chat {
            if let Err(err) = chat.dispose() {
                warn!(error = %err, "failed to dispose chat session");
            }
        }
        if let Some(sequence) = sequence {
            if let Err(err) = sequence.dispose() {
                warn!(error = %err, "failed to dispose context sequence");
            }
        }
        if let Some(context) = context {
            if let Err(err) = context.dispose().await {
                warn!(error = %err, "failed to dispose context");
            }
        }
        if let Some(model) = model {
            if let Err(err) = model.dispose().await {
                warn!(error = %err, "failed to dispose model");
            }
        }
    }

    // ---- chat session ------------------------------------------------------

    /// Create a chat session bound to the loaded context sequence, replacing
    /// any prior session. The pending draft prompt text survives; its
    /// completion suggestion is recomputed. Publishes `loaded: true` only
    /// once setup has succeeded.
    pub async fn create_chat_session(&self) -> Result<(), LlmError> {
        let _guard = self.locks.lock(ResourceKind::ChatSession).await;

        let sequence = self.res.lock().sequence.clone().ok_or(LlmError::NotLoaded {
            resource: "context sequence",
        })?;

        self.dispose_chat_session();

        self.state.update(|s| {
            let draft = s.chat_session.draft_prompt.clone();
            s.chat_session = ChatSessionStatus {
                loaded: false,
                generating_result: false,
                transcript: Vec::new(),
                draft_prompt: draft,
            };
        });

        match self.install_fresh_session(&sequence, false) {
            Ok(()) => {
                // Priming the completion engine with a zero-length preload is
                // best-effort.
                let chat = self.res.lock().chat.clone();
                if let Some(chat) = chat {
                    if let Err(err) = chat.preload("").await {
                        debug!(error = %err, "prompt preload failed");
                    }
                }
                self.state.update(|s| s.chat_session.loaded = true);
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "failed to create chat session");
                self.state.update(|s| {
                    let draft = s.chat_session.draft_prompt.clone();
                    s.chat_session = ChatSessionStatus {
                        loaded: false,
                        generating_result: false,
                        transcript: Vec::new(),
                        draft_prompt: draft,
                    };
                });
                Ok(())
            }
        }
    }

    /// Run one generation turn. The user message is appended to the
    /// displayed transcript optimistically; each generated chunk is squashed
    /// into the in-progress response and republished, and the committed
    /// transcript is recomputed from the session's history once the turn
    /// ends. Cancellation before the first chunk is swallowed; any other
    /// generation error propagates.
    pub async fn prompt(&self, message: impl Into<String>) -> Result<(), LlmError> {
        let message = message.into();
        let _guard = self.locks.lock(ResourceKind::ChatSession).await;

        let chat = self.res.lock().chat.clone().ok_or(LlmError::NotLoaded {
            resource: "chat session",
        })?;

        // Install the cancellation token before generating_result goes true,
        // so any observer of the flag can stop the turn.
        let cancel = CancelToken::new();
        {
            let mut res = self.res.lock();
            res.cancel = Some(cancel.clone());
            res.in_progress.clear();
        }

        self.state.update(|s| {
            s.chat_session.generating_result = true;
            s.chat_session.draft_prompt = DraftPrompt::default();
        });

        self.publish_transcript(&chat, Some(&message));

        let result = {
            let mut on_chunk = |chunk: ResponseChunk| {
                {
                    let mut res = self.res.lock();
                    res.in_progress = squash(&res.in_progress, Block::from(&chunk));
                }
                self.publish_transcript(&chat, Some(&message));
            };
            chat.prompt(&message, cancel.clone(), &mut on_chunk).await
        };

        {
            let mut res = self.res.lock();
            res.cancel = None;
            res.in_progress.clear();
        }
        self.finish_generation(&chat);

        match result {
            Ok(()) => Ok(()),
            // Cancellation that landed before any output started.
            Err(EngineError::Aborted) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Signal the active generation's cancellation token, if any. Non-blocking;
    /// a no-op when nothing is generating.
    pub fn stop_active_prompt(&self) {
        if let Some(cancel) = self.res.lock().cancel.clone() {
            cancel.cancel();
        }
    }

    /// Replace the session with a fresh one bound to the same sequence,
    /// clearing the transcript while preserving the draft prompt text. A
    /// no-op when no sequence is loaded. Stops any in-flight generation
    /// first. `mark_as_loaded` forces the `loaded` flag true; pass `false`
    /// when a surrounding load sequence will set it later.
    pub async fn reset_chat_history(&self, mark_as_loaded: bool) -> Result<(), LlmError> {
        self.stop_active_prompt();
        let _guard = self.locks.lock(ResourceKind::ChatSession).await;

        let Some(sequence) = self.res.lock().sequence.clone() else {
            return Ok(());
        };

        self.dispose_chat_session();
        self.install_fresh_session(&sequence, mark_as_loaded)?;
        Ok(())
    }

    /// Store the raw draft text and synchronously recompute its inline
    /// completion suggestion. A no-op when no completion engine is active.
    pub fn set_draft_prompt(&self, prompt: impl Into<String>) {
        let prompt = prompt.into();
        let Some(completion) = self.res.lock().completion.clone() else {
            return;
        };
        let suffix = completion.complete(&prompt).unwrap_or_default();
        self.state.update(|s| {
            s.chat_session.draft_prompt = DraftPrompt {
                prompt,
                completion: suffix,
            }
        });
    }

    fn dispose_chat_session(&self) {
        let (chat, completion) = {
            let mut res = self.res.lock();
            (res.chat.take(), res.completion.take())
        };
        drop(completion);
        if let Some(chat) = chat {
            if let Err(err) = chat.dispose() {
                warn!(error = %err, "failed to dispose chat session");
            }
        }
    }

    fn install_fresh_session(
        &self,
        sequence: &Arc<dyn SequenceHandle>,
        mark_as_loaded: bool,
    ) -> Result<(), EngineError> {
        let chat = sequence.chat_session()?;
        let completion = chat.completion_engine();

        let draft_prompt = self.state.get().chat_session.draft_prompt.prompt.clone();
        let suffix = completion.complete(&draft_prompt).unwrap_or_default();

        {
            let mut res = self.res.lock();
            res.chat = Some(chat);
            res.completion = Some(completion);
        }

        self.state.update(|s| {
            let loaded = if mark_as_loaded {
                true
            } else {
                s.chat_session.loaded
            };
            let prompt = s.chat_session.draft_prompt.prompt.clone();
            s.chat_session = ChatSessionStatus {
                loaded,
                generating_result: false,
                transcript: Vec::new(),
                draft_prompt: DraftPrompt {
                    prompt,
                    completion: suffix,
                },
            };
        });
        Ok(())
    }

    /// Publish the displayed transcript: committed history, plus the
    /// optimistic user message and in-progress response while generating.
    fn publish_transcript(&self, chat: &Arc<dyn ChatHandle>, current_prompt: Option<&str>) {
        let mut transcript = simplified_history(&chat.history());
        if let Some(prompt) = current_prompt {
            transcript.push(ChatItem::User {
                message: prompt.to_string(),
            });
            let in_progress = self.res.lock().in_progress.clone();
            if !in_progress.is_empty() {
                transcript.push(ChatItem::Model {
                    blocks: in_progress,
                });
            }
        }
        self.state
            .update(|s| s.chat_session.transcript = transcript);
    }

    /// Recompute the committed transcript from the session's authoritative
    /// history and refresh the draft completion once a turn ends.
    fn finish_generation(&self, chat: &Arc<dyn ChatHandle>) {
        let completion = self.res.lock().completion.clone();
        let transcript = simplified_history(&chat.history());
        self.state.update(|s| {
            s.chat_session.generating_result = false;
            s.chat_session.transcript = transcript;
            s.chat_session.draft_prompt.completion = completion
                .as_ref()
                .and_then(|c| c.complete(&s.chat_session.draft_prompt.prompt))
                .unwrap_or_default();
        });
    }

    // ---- model selection & catalog -----------------------------------------

    /// Select `path` and run the full load cascade: engine (if needed),
    /// model, context, sequence, chat session.
    pub async fn load_model_cascade(&self, path: PathBuf) -> Result<(), LlmError> {
        self.state.update(|s| {
            s.selected_model_file_path = Some(path.to_string_lossy().into_owned());
            let prompt = s.chat_session.draft_prompt.prompt.clone();
            s.chat_session = ChatSessionStatus {
                loaded: false,
                generating_result: false,
                transcript: Vec::new(),
                draft_prompt: DraftPrompt {
                    prompt,
                    completion: String::new(),
                },
            };
        });

        if !self.state.get().engine.loaded {
            self.load_engine().await?;
        }
        self.load_model(&path).await?;
        self.create_context().await?;
        self.create_context_sequence().await?;
        self.create_chat_session().await?;
        Ok(())
    }

    /// Load a model that already sits in the models directory.
    pub async fn load_model_from_local(&self, filename: &str) -> Result<(), LlmError> {
        let path = self.models_dir.join(filename);
        self.load_model_cascade(path).await
    }

    /// Refresh the local model catalog. Scan failures are logged, not
    /// surfaced.
    pub async fn scan_local_models(&self) {
        match catalog::scan_models_dir(&self.models_dir).await {
            Ok(local) => {
                self.state.update(|s| s.available_models.local = local);
            }
            Err(err) => {
                error!(
                    error = %err,
                    dir = %self.models_dir.display(),
                    "failed to scan local models"
                );
            }
        }
    }

    /// Populate the default catalog view: local models plus the registry's
    /// featured listing. A registry failure leaves an empty remote list.
    pub async fn load_default_models(&self) {
        self.state.update(|s| s.available_models.loading = true);

        self.scan_local_models().await;

        match self.registry.featured_models().await {
            Ok(remote) => {
                self.state.update(|s| {
                    s.available_models.remote = remote;
                    s.available_models.loading = false;
                });
            }
            Err(err) => {
                error!(error = %err, "failed to load featured models");
                self.state.update(|s| {
                    s.available_models.remote = Vec::new();
                    s.available_models.loading = false;
                });
            }
        }
    }

    /// Search the remote registry. An empty query clears the results without
    /// a network round trip; a failed search clears them too.
    pub async fn search_remote_models(&self, query: &str) {
        if query.trim().is_empty() {
            self.state.update(|s| {
                s.available_models.search_query = query.to_string();
                s.available_models.search_results = Vec::new();
            });
            return;
        }

        self.state.update(|s| {
            s.available_models.loading = true;
            s.available_models.search_query = query.to_string();
        });

        match self.registry.search_models(query).await {
            Ok(results) => {
                self.state.update(|s| {
                    s.available_models.loading = false;
                    s.available_models.search_results = results;
                });
            }
            Err(err) => {
                error!(error = %err, query, "remote model search failed");
                self.state.update(|s| {
                    s.available_models.loading = false;
                    s.available_models.search_results = Vec::new();
                });
            }
        }
    }

    /// The built-in recommendation for first-run setups.
    pub fn recommended_model(&self) -> RemoteModel {
        catalog::recommended_model()
    }

    /// Download the selected file of `model` (skipping the download when it
    /// already exists locally), then run the load cascade. Download failures
    /// land in `state.model_download.error` and leave any loaded model
    /// untouched.
    pub async fn download_and_load_model(
        &self,
        model: &RemoteModel,
        file_index: usize,
    ) -> Result<(), LlmError> {
        let Some(file) = model.files.get(file_index) else {
            error!(model = %model.id, file_index, "no downloadable file at index");
            return Ok(());
        };

        let local_path = self.models_dir.join(&file.filename);
        if tokio::fs::try_exists(&local_path).await.unwrap_or(false) {
            info!(path = %local_path.display(), "model already present locally, loading");
            return self.load_model_from_local(&file.filename).await;
        }

        self.state.update(|s| {
            s.model_download = ModelDownload {
                downloading: true,
                progress: Some(0.0),
                speed: None,
                name: Some(file.filename.clone()),
                error: None,
            }
        });

        let progress_state = self.state.clone();
        let download = self
            .downloader
            .download(&file.download_url, &local_path, move |progress| {
                progress_state.update(|s| {
                    s.model_download.progress = Some(progress.fraction);
                    s.model_download.speed = Some(progress.speed);
                });
            })
            .await;

        if let Err(err) = download {
            error!(error = %err, url = %file.download_url, "model download failed");
            self.state.update(|s| {
                s.model_download = ModelDownload {
                    downloading: false,
                    error: Some(err.to_string()),
                    ..ModelDownload::default()
                }
            });
            return Ok(());
        }

        if let Some(expected) = &file.checksum {
            match downloader::verify_checksum(&local_path, expected).await {
                Ok(true) => {}
                Ok(false) => {
                    error!(path = %local_path.display(), "downloaded model failed checksum verification");
                    let _ = tokio::fs::remove_file(&local_path).await;
                    self.state.update(|s| {
                        s.model_download = ModelDownload {
                            downloading: false,
                            error: Some(format!(
                                "downloaded file failed checksum verification: {}",
                                file.filename
                            )),
                            ..ModelDownload::default()
                        }
                    });
                    return Ok(());
                }
                Err(err) => {
                    warn!(error = %err, path = %local_path.display(), "could not verify download checksum");
                }
            }
        }

        self.state
            .update(|s| s.model_download = ModelDownload::default());

        self.load_model_from_local(&file.filename).await?;
        self.scan_local_models().await;
        Ok(())
    }

    /// Delete a model file from the models directory, unloading it first if
    /// it is the currently loaded model.
    pub async fn delete_model(&self, filename: &str) -> Result<(), LlmError> {
        self.delete_model_file(filename).await?;
        self.scan_local_models().await;
        Ok(())
    }

    /// Delete several model files, then rescan once.
    pub async fn delete_multiple_models(&self, filenames: &[String]) -> Result<(), LlmError> {
        for filename in filenames {
            self.delete_model_file(filename).await?;
        }
        self.scan_local_models().await;
        Ok(())
    }

    async fn delete_model_file(&self, filename: &str) -> Result<(), LlmError> {
        let path = self.models_dir.join(filename);
        let selected = self.state.get().selected_model_file_path.clone();
        if selected.as_deref() == Some(path.to_string_lossy().as_ref()) {
            self.unload_model().await?;
        }

        if let Err(err) = tokio::fs::remove_file(&path).await {
            warn!(error = %err, path = %path.display(), "failed to delete model file");
        } else {
            info!(path = %path.display(), "model file deleted");
        }
        Ok(())
    }
}
