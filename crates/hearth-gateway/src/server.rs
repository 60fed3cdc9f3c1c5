//! Backend side of the gateway channel: a fixed table of named functions
//! dispatched onto the lifecycle controller, plus fire-and-forget state
//! pushes. Every state-container change sends the complete current snapshot
//! to the frontend, once at channel establishment and on every change for
//! the lifetime of the connection.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use hearth_core::LlmController;
use hearth_core::state::{LlmState, RemoteModel};
use hearth_core::store::prompts::{PromptRecord, PromptsRepository};
use hearth_core::store::window_state::{WindowState, WindowStateRepository};

use crate::error::GatewayError;
use crate::picker::ModelFilePicker;
use crate::protocol::{WireMessage, methods};
use crate::transport::{GatewayEndpoint, MessageSink, MessageStream};

pub struct GatewayServer {
    controller: Arc<LlmController>,
    picker: Arc<dyn ModelFilePicker>,
    prompts: Arc<dyn PromptsRepository>,
    window_state: Arc<dyn WindowStateRepository>,
}

impl GatewayServer {
    pub fn new(
        controller: Arc<LlmController>,
        picker: Arc<dyn ModelFilePicker>,
        prompts: Arc<dyn PromptsRepository>,
        window_state: Arc<dyn WindowStateRepository>,
    ) -> Arc<Self> {
        Arc::new(Self {
            controller,
            picker,
            prompts,
            window_state,
        })
    }

    /// Serve one connection until the peer goes away. Requests are handled
    /// on their own tasks, so a `stopActivePrompt` can land while a `prompt`
    /// is still in flight; per-resource ordering is enforced by the
    /// controller's named mutexes, not by the channel.
    pub async fn serve(self: Arc<Self>, endpoint: GatewayEndpoint) -> Result<(), GatewayError> {
        let GatewayEndpoint { sink, mut stream } = endpoint;

        // State pushes are queued from the synchronous change listener and
        // drained onto the transport by a pump task.
        let state = self.controller.state();
        let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Arc<LlmState>>();

        let listener_state = state.clone();
        let listener_tx = push_tx.clone();
        let subscription = state.subscribe(move || {
            let _ = listener_tx.send(listener_state.get());
        });

        // Initial snapshot at channel establishment.
        let _ = push_tx.send(state.get());

        let pump_sink = sink.clone();
        let pump = tokio::spawn(async move {
            while let Some(snapshot) = push_rx.recv().await {
                let params = match serde_json::to_value(&*snapshot) {
                    Ok(params) => params,
                    Err(err) => {
                        warn!(error = %err, "failed to serialize state snapshot");
                        continue;
                    }
                };
                let push = WireMessage::Push {
                    method: methods::UPDATE_STATE.to_string(),
                    params,
                };
                if pump_sink.send(push).await.is_err() {
                    break;
                }
            }
        });

        let result = loop {
            match stream.recv().await {
                Ok(Some(WireMessage::Request { id, method, params })) => {
                    let server = self.clone();
                    let reply_sink = sink.clone();
                    tokio::spawn(async move {
                        let reply = match server.dispatch(&method, params).await {
                            Ok(result) => WireMessage::Response { id, result },
                            Err(err) => {
                                warn!(method = %method, error = %err, "rpc call failed");
                                WireMessage::Error {
                                    id,
                                    message: err.to_string(),
                                }
                            }
                        };
                        if let Err(err) = reply_sink.send(reply).await {
                            warn!(error = %err, "failed to send rpc reply");
                        }
                    });
                }
                Ok(Some(other)) => {
                    debug!(message = ?other, "ignoring unexpected message on server channel");
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        subscription.unsubscribe();
        pump.abort();
        result
    }

    async fn dispatch(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        match method {
            methods::GET_STATE => to_result(&*self.controller.state().get()),

            methods::SELECT_MODEL_FILE_AND_LOAD => {
                if let Some(path) = self.picker.pick_model_file().await {
                    self.controller
                        .load_model_cascade(path)
                        .await
                        .map_err(backend_error)?;
                }
                Ok(Value::Null)
            }

            methods::SET_DRAFT_PROMPT => {
                let text: String = param(method, &params, 0)?;
                self.controller.set_draft_prompt(text);
                Ok(Value::Null)
            }

            methods::PROMPT => {
                let message: String = param(method, &params, 0)?;
                self.controller
                    .prompt(message)
                    .await
                    .map_err(backend_error)?;
                Ok(Value::Null)
            }

            methods::STOP_ACTIVE_PROMPT => {
                self.controller.stop_active_prompt();
                Ok(Value::Null)
            }

            methods::RESET_CHAT_HISTORY => {
                let mark_as_loaded: Option<bool> = param(method, &params, 0)?;
                self.controller
                    .reset_chat_history(mark_as_loaded.unwrap_or(true))
                    .await
                    .map_err(backend_error)?;
                Ok(Value::Null)
            }

            methods::SCAN_LOCAL_MODELS => {
                self.controller.scan_local_models().await;
                Ok(Value::Null)
            }

            methods::LOAD_DEFAULT_MODELS => {
                self.controller.load_default_models().await;
                Ok(Value::Null)
            }

            methods::GET_RECOMMENDED_MODEL => to_result(&self.controller.recommended_model()),

            methods::SEARCH_REMOTE_MODELS => {
                let query: String = param(method, &params, 0)?;
                self.controller.search_remote_models(&query).await;
                Ok(Value::Null)
            }

            methods::DOWNLOAD_AND_LOAD_MODEL => {
                let model: RemoteModel = param(method, &params, 0)?;
                let file_index: Option<usize> = param(method, &params, 1)?;
                self.controller
                    .download_and_load_model(&model, file_index.unwrap_or(0))
                    .await
                    .map_err(backend_error)?;
                Ok(Value::Null)
            }

            methods::LOAD_MODEL_FROM_LOCAL => {
                let filename: String = param(method, &params, 0)?;
                self.controller
                    .load_model_from_local(&filename)
                    .await
                    .map_err(backend_error)?;
                Ok(Value::Null)
            }

            methods::UNLOAD_MODEL => {
                self.controller.unload_model().await.map_err(backend_error)?;
                Ok(Value::Null)
            }

            methods::DELETE_MODEL => {
                let filename: String = param(method, &params, 0)?;
                self.controller
                    .delete_model(&filename)
                    .await
                    .map_err(backend_error)?;
                Ok(Value::Null)
            }

            methods::DELETE_MULTIPLE_MODELS => {
                let filenames: Vec<String> = param(method, &params, 0)?;
                self.controller
                    .delete_multiple_models(&filenames)
                    .await
                    .map_err(backend_error)?;
                Ok(Value::Null)
            }

            methods::LOAD_PROMPTS => {
                let prompts = self
                    .prompts
                    .load_all()
                    .await
                    .map_err(|err| GatewayError::Backend(err.to_string()))?;
                to_result(&prompts)
            }

            methods::SAVE_PROMPTS => {
                let prompts: Vec<PromptRecord> = param(method, &params, 0)?;
                self.prompts
                    .save_all(prompts)
                    .await
                    .map_err(|err| GatewayError::Backend(err.to_string()))?;
                Ok(Value::Null)
            }

            methods::GET_WINDOW_STATE => to_result(&self.window_state.load().await),

            methods::SAVE_WINDOW_STATE => {
                let state: WindowState = param(method, &params, 0)?;
                self.window_state
                    .save(state)
                    .await
                    .map_err(|err| GatewayError::Backend(err.to_string()))?;
                Ok(Value::Null)
            }

            unknown => Err(GatewayError::UnknownMethod(unknown.to_string())),
        }
    }
}

fn backend_error(err: hearth_core::LlmError) -> GatewayError {
    GatewayError::Backend(err.to_string())
}

fn to_result<T: serde::Serialize>(value: &T) -> Result<Value, GatewayError> {
    Ok(serde_json::to_value(value)?)
}

/// Extract the positional parameter at `index`. Missing positions
/// deserialize from `null`, so `Option<T>` parameters default cleanly.
fn param<T: DeserializeOwned>(
    method: &str,
    params: &Value,
    index: usize,
) -> Result<T, GatewayError> {
    let value = params.get(index).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|err| GatewayError::InvalidParams {
        method: method.to_string(),
        message: err.to_string(),
    })
}
