//! Frontend side of the gateway channel: typed async calls into the backend
//! function table, and a state mirror kept consistent purely by replacing it
//! wholesale with every pushed snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use hearth_core::state::{LlmState, RemoteModel, StateContainer};
use hearth_core::store::prompts::PromptRecord;
use hearth_core::store::window_state::WindowState;

use crate::error::GatewayError;
use crate::protocol::{WireMessage, methods};
use crate::transport::{GatewayEndpoint, MessageSink, MessageStream, tcp_endpoint};

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<Result<Value, GatewayError>>>>;

pub struct GatewayClient {
    sink: Arc<dyn MessageSink>,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    mirror: Arc<StateContainer<LlmState>>,
    router: tokio::task::JoinHandle<()>,
}

impl GatewayClient {
    /// Attach to an established endpoint. A router task starts immediately:
    /// responses resolve pending calls, `updateState` pushes replace the
    /// mirror.
    pub fn connect(endpoint: GatewayEndpoint) -> Self {
        let GatewayEndpoint { sink, mut stream } = endpoint;
        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let mirror = Arc::new(StateContainer::new(LlmState::default()));

        let router_pending = pending.clone();
        let router_mirror = mirror.clone();
        let router = tokio::spawn(async move {
            loop {
                match stream.recv().await {
                    Ok(Some(WireMessage::Response { id, result })) => {
                        if let Some(reply) = router_pending.lock().remove(&id) {
                            let _ = reply.send(Ok(result));
                        }
                    }
                    Ok(Some(WireMessage::Error { id, message })) => {
                        if let Some(reply) = router_pending.lock().remove(&id) {
                            let _ = reply.send(Err(GatewayError::Remote(message)));
                        }
                    }
                    Ok(Some(WireMessage::Push { method, params })) => {
                        if method == methods::UPDATE_STATE {
                            match serde_json::from_value::<LlmState>(params) {
                                Ok(snapshot) => router_mirror.set(snapshot),
                                Err(err) => {
                                    warn!(error = %err, "discarding malformed state push")
                                }
                            }
                        } else {
                            debug!(method = %method, "ignoring unknown push");
                        }
                    }
                    Ok(Some(WireMessage::Request { .. })) => {
                        debug!("ignoring request on client channel");
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(error = %err, "client transport failed");
                        break;
                    }
                }
            }
            // Fail any calls still in flight.
            for (_, reply) in router_pending.lock().drain() {
                let _ = reply.send(Err(GatewayError::ChannelClosed));
            }
        });

        Self {
            sink,
            pending,
            next_id: AtomicU64::new(0),
            mirror,
            router,
        }
    }

    /// Connect over TCP. An unreachable backend is fatal, not retried.
    pub async fn connect_tcp(addr: &str) -> Result<Self, GatewayError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|err| GatewayError::TransportUnavailable(err.to_string()))?;
        Ok(Self::connect(tcp_endpoint(stream)))
    }

    /// The local replica of the backend state, replaced wholesale on every
    /// push. Subscribe to it to re-render reactively.
    pub fn state(&self) -> Arc<StateContainer<LlmState>> {
        self.mirror.clone()
    }

    /// Invoke a backend function by name and await its result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().insert(id, reply_tx);

        let request = WireMessage::Request {
            id,
            method: method.to_string(),
            params,
        };
        if let Err(err) = self.sink.send(request).await {
            self.pending.lock().remove(&id);
            return Err(err);
        }

        reply_rx.await.map_err(|_| GatewayError::ChannelClosed)?
    }

    // ---- typed wrappers over the backend function table --------------------

    pub async fn get_state(&self) -> Result<LlmState, GatewayError> {
        let value = self.call(methods::GET_STATE, json!([])).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn select_model_file_and_load(&self) -> Result<(), GatewayError> {
        self.call(methods::SELECT_MODEL_FILE_AND_LOAD, json!([]))
            .await?;
        Ok(())
    }

    pub async fn set_draft_prompt(&self, text: &str) -> Result<(), GatewayError> {
        self.call(methods::SET_DRAFT_PROMPT, json!([text])).await?;
        Ok(())
    }

    pub async fn prompt(&self, message: &str) -> Result<(), GatewayError> {
        self.call(methods::PROMPT, json!([message])).await?;
        Ok(())
    }

    pub async fn stop_active_prompt(&self) -> Result<(), GatewayError> {
        self.call(methods::STOP_ACTIVE_PROMPT, json!([])).await?;
        Ok(())
    }

    pub async fn reset_chat_history(&self) -> Result<(), GatewayError> {
        self.call(methods::RESET_CHAT_HISTORY, json!([])).await?;
        Ok(())
    }

    pub async fn scan_local_models(&self) -> Result<(), GatewayError> {
        self.call(methods::SCAN_LOCAL_MODELS, json!([])).await?;
        Ok(())
    }

    pub async fn load_default_models(&self) -> Result<(), GatewayError> {
        self.call(methods::LOAD_DEFAULT_MODELS, json!([])).await?;
        Ok(())
    }

    pub async fn get_recommended_model(&self) -> Result<RemoteModel, GatewayError> {
        let value = self.call(methods::GET_RECOMMENDED_MODEL, json!([])).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn search_remote_models(&self, query: &str) -> Result<(), GatewayError> {
        self.call(methods::SEARCH_REMOTE_MODELS, json!([query]))
            .await?;
        Ok(())
    }

    pub async fn download_and_load_model(
        &self,
        model: &RemoteModel,
        file_index: usize,
    ) -> Result<(), GatewayError> {
        self.call(methods::DOWNLOAD_AND_LOAD_MODEL, json!([model, file_index]))
            .await?;
        Ok(())
    }

    pub async fn load_model_from_local(&self, filename: &str) -> Result<(), GatewayError> {
        self.call(methods::LOAD_MODEL_FROM_LOCAL, json!([filename]))
            .await?;
        Ok(())
    }

    pub async fn unload_model(&self) -> Result<(), GatewayError> {
        self.call(methods::UNLOAD_MODEL, json!([])).await?;
        Ok(())
    }

    pub async fn delete_model(&self, filename: &str) -> Result<(), GatewayError> {
        self.call(methods::DELETE_MODEL, json!([filename])).await?;
        Ok(())
    }

    pub async fn delete_multiple_models(&self, filenames: &[String]) -> Result<(), GatewayError> {
        self.call(methods::DELETE_MULTIPLE_MODELS, json!([filenames]))
            .await?;
        Ok(())
    }

    pub async fn load_prompts(&self) -> Result<Vec<PromptRecord>, GatewayError> {
        let value = self.call(methods::LOAD_PROMPTS, json!([])).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn save_prompts(&self, prompts: &[PromptRecord]) -> Result<(), GatewayError> {
        self.call(methods::SAVE_PROMPTS, json!([prompts])).await?;
        Ok(())
    }

    pub async fn get_window_state(&self) -> Result<WindowState, GatewayError> {
        let value = self.call(methods::GET_WINDOW_STATE, json!([])).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn save_window_state(&self, state: &WindowState) -> Result<(), GatewayError> {
        self.call(methods::SAVE_WINDOW_STATE, json!([state])).await?;
        Ok(())
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        self.router.abort();
    }
}
