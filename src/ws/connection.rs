#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt::Debug;
use std::marker::PhantomData;
use std::time::Instant;

use async_stream::try_stream;
use backoff::backoff::Backoff as _;
use futures::{SinkExt as _, Stream, StreamExt as _};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, sleep, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use super::config::Config;
use super::error::WsError;
use super::traits::MessageParser;
use crate::auth::Credential;
use crate::error::Kind;
use crate::{Result, error::Error};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Broadcast channel capacity for incoming messages.
const BROADCAST_CAPACITY: usize = 1024;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, and not trying to be
    Disconnected,
    /// Handshake in flight. `attempt` counts consecutive failures before this one.
    Connecting {
        /// Failed attempts since the last successful connect
        attempt: u32,
    },
    /// Successfully connected
    Connected {
        /// When the connection was established
        since: Instant,
    },
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Handle to one persistent channel connection and its background task.
///
/// The background task owns the socket. It reconnects with exponential backoff after drops
/// and gives up after [`ReconnectConfig::max_attempts`] consecutive failed handshakes, at which
/// point the handle reports [`Connection::is_closed`]. Cloning the handle is cheap; all clones
/// drive the same socket.
///
/// # Type Parameters
///
/// - `M`: Message type produced by the parser
/// - `P`: Parser type that implements [`MessageParser<M>`]
///
/// [`ReconnectConfig::max_attempts`]: super::config::ReconnectConfig::max_attempts
#[derive(Clone)]
pub struct Connection<M, P>
where
    M: DeserializeOwned + Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    sender_tx: mpsc::UnboundedSender<String>,
    broadcast_tx: broadcast::Sender<M>,
    /// Cancelled on [`Connection::close`] or once the task gives up reconnecting
    cancel: CancellationToken,
    _phantom: PhantomData<P>,
}

impl<M, P> Debug for Connection<M, P>
where
    M: DeserializeOwned + Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<M, P> Connection<M, P>
where
    M: DeserializeOwned + Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    /// Start connecting to `endpoint` in a background task.
    ///
    /// When `credential` is present it is attached to every handshake as a bearer
    /// `Authorization` header. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid WebSocket URL or the credential cannot
    /// be encoded as a header value.
    pub fn new(
        endpoint: &str,
        config: Config,
        parser: P,
        credential: Option<&Credential>,
    ) -> Result<Self> {
        let authorization = credential
            .map(|credential| HeaderValue::from_str(&credential.bearer()))
            .transpose()
            .map_err(|_e| Error::validation("credential is not a valid header value"))?
            .map(|mut value| {
                value.set_sensitive(true);
                value
            });
        // Fail fast on a malformed endpoint instead of burning reconnect attempts on it
        handshake_request(endpoint, authorization.as_ref())?;

        let (sender_tx, sender_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting { attempt: 0 });
        let cancel = CancellationToken::new();

        let task = ConnectionTask {
            endpoint: endpoint.to_owned(),
            authorization,
            config,
            parser,
            broadcast_tx: broadcast_tx.clone(),
            state_tx: state_tx.clone(),
            cancel: cancel.clone(),
        };

        tokio::spawn(async move {
            task.run(sender_rx).await;
        });

        Ok(Self {
            state_tx,
            state_rx,
            sender_tx,
            broadcast_tx,
            cancel,
            _phantom: PhantomData,
        })
    }

    /// Serialize `message` as JSON and queue it as a text frame.
    ///
    /// Frames queued while a reconnect is in progress are sent once the socket is back.
    pub fn send<R: Serialize>(&self, message: &R) -> Result<()> {
        if self.is_closed() {
            return Err(WsError::ConnectionClosed.into());
        }
        let json = serde_json::to_string(message)?;
        self.sender_tx
            .send(json)
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Whether the background task has stopped, either through [`Connection::close`] or
    /// because reconnect attempts ran out.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the connection is closed for good.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    /// Close the socket and stop reconnecting. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
        _ = self.state_tx.send(ConnectionState::Disconnected);
    }

    /// Wait until the socket is connected.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::ConnectionClosed`] if the connection closes before connecting.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut state_rx = self.state_tx.subscribe();
        loop {
            if state_rx.borrow_and_update().is_connected() {
                return Ok(());
            }
            if self.is_closed() {
                return Err(WsError::ConnectionClosed.into());
            }
            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return Err(WsError::ConnectionClosed.into());
                    }
                }
                () = self.cancel.cancelled() => {}
            }
        }
    }

    /// Subscribe to incoming messages.
    ///
    /// Each call returns a new independent receiver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<M> {
        self.broadcast_tx.subscribe()
    }

    /// Stream of incoming messages that ends when the connection closes.
    ///
    /// A consumer that falls behind gets a final [`WsError::Lagged`] error.
    pub fn events(&self) -> impl Stream<Item = Result<M>> + use<M, P> {
        let mut rx = self.subscribe();
        let cancel = self.cancel.clone();

        try_stream! {
            loop {
                let received = tokio::select! {
                    received = rx.recv() => received,
                    () = cancel.cancelled() => break,
                };
                match received {
                    Ok(message) => yield message,
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Event stream lagged, missed {count} messages");
                        Err(WsError::Lagged { count })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}

/// State owned by the background task.
struct ConnectionTask<M, P> {
    endpoint: String,
    authorization: Option<HeaderValue>,
    config: Config,
    parser: P,
    broadcast_tx: broadcast::Sender<M>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl<M, P> ConnectionTask<M, P>
where
    M: DeserializeOwned + Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    /// Connect, serve, and reconnect until cancelled or out of attempts.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(endpoint = %self.endpoint))
    )]
    async fn run(self, mut sender_rx: mpsc::UnboundedReceiver<String>) {
        let mut attempt = 0_u32;
        let mut backoff: backoff::ExponentialBackoff = self.config.reconnect.clone().into();

        loop {
            _ = self.state_tx.send(ConnectionState::Connecting { attempt });

            let handshake = tokio::select! {
                () = self.cancel.cancelled() => break,
                handshake = self.handshake() => handshake,
            };

            match handshake {
                Ok(ws_stream) => {
                    attempt = 0;
                    backoff.reset();
                    _ = self.state_tx.send(ConnectionState::Connected {
                        since: Instant::now(),
                    });
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Channel connected");

                    let result = self.serve(ws_stream, &mut sender_rx).await;
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    _ = self.state_tx.send(ConnectionState::Disconnected);
                    if let Err(e) = result {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(error = %e, "Channel dropped, reconnecting");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                    }
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    _ = self.state_tx.send(ConnectionState::Disconnected);
                    #[cfg(feature = "tracing")]
                    tracing::warn!(attempt, error = %e, "Unable to connect");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                }
            }

            if let Some(max) = self.config.reconnect.max_attempts
                && attempt >= max
            {
                #[cfg(feature = "tracing")]
                tracing::warn!(attempt, "Giving up on channel after {max} failed attempts");
                break;
            }

            let Some(duration) = backoff.next_backoff() else {
                break;
            };
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = sleep(duration) => {}
            }
        }

        _ = self.state_tx.send(ConnectionState::Disconnected);
        self.cancel.cancel();
    }

    async fn handshake(&self) -> Result<WsStream> {
        let request = handshake_request(&self.endpoint, self.authorization.as_ref())?;
        match timeout(self.config.handshake_timeout, connect_async(request)).await {
            Ok(Ok((ws_stream, _response))) => Ok(ws_stream),
            Ok(Err(e)) => Err(Error::with_source(Kind::WebSocket, WsError::Connection(e))),
            Err(_elapsed) => Err(WsError::HandshakeTimeout.into()),
        }
    }

    /// Pump one live socket until it drops, the heartbeat fails, or the task is cancelled.
    ///
    /// Returns `Ok` on a deliberate shutdown.
    async fn serve(
        &self,
        ws_stream: WsStream,
        sender_rx: &mut mpsc::UnboundedReceiver<String>,
    ) -> Result<()> {
        let (mut write, mut read) = ws_stream.split();

        // Channel to notify heartbeat loop when PONG is received
        let (pong_tx, pong_rx) = watch::channel(Instant::now());
        let (ping_tx, mut ping_rx) = mpsc::unbounded_channel();
        let heartbeat_cancel = self.cancel.child_token();

        let heartbeat_handle = tokio::spawn(heartbeat_loop(
            ping_tx,
            self.config.clone(),
            pong_rx,
            heartbeat_cancel.clone(),
        ));

        let result = loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    _ = write.send(Message::Close(None)).await;
                    break Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(%text, "Received channel frame");

                            match self.parser.parse(text.as_bytes()) {
                                Ok(messages) => {
                                    for message in messages {
                                        _ = self.broadcast_tx.send(message);
                                    }
                                }
                                Err(e) => {
                                    #[cfg(feature = "tracing")]
                                    tracing::warn!(%text, error = %e, "Failed to parse channel frame");
                                    #[cfg(not(feature = "tracing"))]
                                    let _ = (&text, &e);
                                }
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            _ = pong_tx.send(Instant::now());
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            break Err(WsError::ConnectionClosed.into());
                        }
                        Some(Err(e)) => {
                            break Err(Error::with_source(Kind::WebSocket, WsError::Connection(e)));
                        }
                        Some(Ok(_)) => {
                            // Binary frames and PINGs (answered by tungstenite) are ignored
                        }
                    }
                }

                outgoing = sender_rx.recv() => {
                    let Some(text) = outgoing else {
                        // Every handle is gone, nobody can observe this socket anymore
                        self.cancel.cancel();
                        _ = write.send(Message::Close(None)).await;
                        break Ok(());
                    };
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        break Err(Error::with_source(Kind::WebSocket, WsError::Connection(e)));
                    }
                }

                ping = ping_rx.recv() => {
                    match ping {
                        Some(()) => {
                            if let Err(e) = write.send(Message::Ping(Default::default())).await {
                                break Err(Error::with_source(Kind::WebSocket, WsError::Connection(e)));
                            }
                        }
                        // Heartbeat gave up on the peer
                        None => break Err(WsError::ConnectionClosed.into()),
                    }
                }
            }
        };

        heartbeat_cancel.cancel();
        heartbeat_handle.abort();

        result
    }
}

/// Sends PING requests on an interval and stops when a PONG does not arrive in time.
///
/// Dropping `ping_tx` on exit tells the socket loop the peer is unresponsive.
async fn heartbeat_loop(
    ping_tx: mpsc::UnboundedSender<()>,
    config: Config,
    mut pong_rx: watch::Receiver<Instant>,
    cancel: CancellationToken,
) {
    let mut ping_interval = interval(config.heartbeat_interval);
    // The first tick completes immediately
    ping_interval.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ping_interval.tick() => {}
        }

        // Mark the current PONG as seen so changed() waits for a fresh one
        drop(pong_rx.borrow_and_update());

        let ping_sent = Instant::now();
        if ping_tx.send(()).is_err() {
            break;
        }

        match timeout(config.heartbeat_timeout, pong_rx.changed()).await {
            Ok(Ok(())) => {
                let last_pong = *pong_rx.borrow_and_update();
                if last_pong < ping_sent {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("PONG older than last PING, connection may be stale");
                    break;
                }
            }
            Ok(Err(_)) => break,
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Heartbeat timeout: no PONG received within {:?}",
                    config.heartbeat_timeout
                );
                break;
            }
        }
    }
}

fn handshake_request(endpoint: &str, authorization: Option<&HeaderValue>) -> Result<Request> {
    let mut request = endpoint.into_client_request()?;
    if let Some(value) = authorization {
        request.headers_mut().insert(AUTHORIZATION, value.clone());
    }
    Ok(request)
}
