//! Core traits for the WebSocket infrastructure.

use serde::de::DeserializeOwned;

/// Message parser trait for converting raw frames to messages.
///
/// Returning an empty vec drops the frame (unknown event kinds, server chatter). Returning an
/// error logs the frame and drops it; the connection stays up either way.
///
/// # Example
///
/// ```ignore
/// pub struct SimpleParser;
///
/// impl MessageParser<MyMessage> for SimpleParser {
///     fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<MyMessage>> {
///         let msg: MyMessage = serde_json::from_slice(bytes)?;
///         Ok(vec![msg])
///     }
/// }
/// ```
pub trait MessageParser<M: DeserializeOwned>: Send + Sync + 'static {
    /// Parse incoming bytes into messages.
    fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<M>>;
}
