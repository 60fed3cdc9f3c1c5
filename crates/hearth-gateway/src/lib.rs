//! The cross-process RPC layer of Hearth: a bidirectional procedure-call
//! channel over an asynchronous message transport. The backend exposes a
//! fixed table of named functions; the frontend exposes a push-style
//! `updateState` callback that receives complete state snapshots.

pub mod client;
pub mod error;
pub mod picker;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::GatewayClient;
pub use error::GatewayError;
pub use server::GatewayServer;
pub use transport::{GatewayEndpoint, duplex_pair, tcp_endpoint};
