//! Persistent event channel over WebSocket.
//!
//! # Architecture
//!
//! - [`ChannelManager`]: process-wide owner of the channel. Hands out a single live
//!   [`Connection`], fans inbound events out to listeners, and tears everything down on
//!   [`ChannelManager::disconnect`]
//! - [`Connection`]: one socket plus its background task, with heartbeat and bounded
//!   reconnection
//! - [`MessageParser`]: turns raw frames into typed messages; [`EventParser`] is the
//!   implementation for [`ChannelEvent`]
//!
//! # Example
//!
//! ```ignore
//! let channel = ChannelManager::new("wss://chat.example.com/ws", Config::default(), store);
//! let connection = channel.get_connection()?;
//! channel.subscribe(EventKind::UserStatus, |event| println!("{event:?}"));
//! connection.wait_connected().await?;
//! channel.emit("typing", &serde_json::json!({ "chatId": "c1" }))?;
//! ```

pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod traits;

pub use channel::{ChannelManager, EventConnection, ListenerId, ListenerRegistry};
pub use config::{Config, ReconnectConfig};
pub use connection::{Connection, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use events::{ChannelEvent, EventKind, EventParser};
pub use traits::*;
