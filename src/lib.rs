//! Live voice-channel roster
//!
//! Keeps an accurate picture of "who is in my channel, who is talking, who
//! is muted" by talking to a locally running voice-chat client over its
//! line-oriented ClientQuery TCP interface.
//!
//! # Features
//! - Record escaping and parsing for the ClientQuery wire format
//! - Request/response correlation on a socket shared with pushed notifications
//! - Channel state store with owned snapshots
//! - Nickname resolution with a cache and query fallbacks
//! - Automatic reconnection with capped exponential backoff
//!
//! # Architecture
//! A single [`Reconciler`] task owns the connection:
//! - `QueryClient` serializes commands and sets notifications aside
//! - a `Session` folds notifications into the `ChannelState`
//! - every change is reported to the presentation layer as a
//!   [`ChannelEvent`] over an `mpsc` channel
//!
//! # Example
//! ```ignore
//! use voice_roster::{engine, ConnectConfig, EngineConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let target = ConnectConfig { api_key: "XXXX-XXXX".into(), ..Default::default() };
//!     let (handle, mut events) = engine::spawn(EngineConfig::default(), target);
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     handle.stop().await;
//! }
//! ```

pub mod backoff;
pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod message;
pub mod nickname;
pub mod notify;
pub mod query;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use channel::{ChannelSnapshot, ChannelState};
pub use client::{ClientEntry, ClientUpdate};
pub use config::{ConnectConfig, EngineConfig};
pub use engine::{EngineHandle, Phase, Reconciler};
pub use error::{ClientQueryError, Result};
pub use message::{ChannelEvent, MessageKind};
pub use query::QueryClient;
pub use types::{ChannelId, ClientId};
