//! Backend core of the Hearth desktop chat client: the shared state model,
//! the resource lifecycle controller, the chat session engine, the response
//! squashing reducer, the inference-engine abstraction, the model catalog,
//! and persisted application records.

pub mod catalog;
pub mod chat;
pub mod controller;
pub mod engine;
pub mod error;
pub mod state;
pub mod store;

pub use controller::LlmController;
pub use error::LlmError;
pub use state::{LlmState, StateContainer};
