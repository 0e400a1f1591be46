#![expect(
    clippy::module_name_repetitions,
    reason = "ChannelManager is the public name used across the crate"
)]

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;

use super::config::Config;
use super::connection::{Connection, ConnectionState};
use super::error::WsError;
use super::events::{ChannelEvent, EventKind, EventParser, OutboundEvent};
use crate::Result;
use crate::storage::CredentialStore;

/// Connection carrying [`ChannelEvent`]s.
pub type EventConnection = Connection<ChannelEvent, EventParser>;

type Callback = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// Handle returned by [`ChannelManager::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Callbacks keyed by event kind, delivered in registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<EventKind, Vec<(ListenerId, Callback)>>>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<_, _> = listeners.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("ListenerRegistry")
            .field("listeners", &counts)
            .finish_non_exhaustive()
    }
}

impl ListenerRegistry {
    pub fn add(&self, kind: EventKind, callback: Callback) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, callback));
        id
    }

    pub fn remove(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = listeners.get_mut(&kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(&kind);
        }
        removed
    }

    pub fn clear(&self) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of listeners registered for `kind`.
    #[must_use]
    pub fn len(&self, kind: EventKind) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Whether listener `id` is still registered for `kind`.
    #[must_use]
    pub fn contains(&self, kind: EventKind, id: ListenerId) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .is_some_and(|entries| entries.iter().any(|(existing, _)| *existing == id))
    }

    /// Call every listener for the event's kind.
    ///
    /// Callbacks run without the lock held, so they may (un)subscribe. A listener removed while
    /// delivery is in progress is skipped.
    pub fn deliver(&self, event: &ChannelEvent) {
        let kind = event.kind();
        let snapshot = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        for (id, callback) in snapshot {
            if self.contains(kind, id) {
                callback(event);
            }
        }
    }
}

struct ChannelInner {
    endpoint: String,
    config: Config,
    store: Arc<CredentialStore>,
    /// Live connection, if any. Guarded so creation is single-flight.
    connection: Mutex<Option<EventConnection>>,
    listeners: Arc<ListenerRegistry>,
}

/// Owns the process-wide event channel.
///
/// At most one live connection exists per manager: [`ChannelManager::get_connection`] hands out
/// the current one while it is connected, connecting, or reconnecting, and only starts a new
/// one after the previous one closed. Inbound events are fanned out to listeners registered
/// with [`ChannelManager::subscribe`].
///
/// ```ignore
/// let channel = ChannelManager::new("wss://chat.example.com/ws", Config::default(), store);
/// channel.get_connection()?;
/// let id = channel.subscribe(EventKind::NewMessage, |event| println!("{event:?}"));
/// ```
#[derive(Clone)]
pub struct ChannelManager {
    inner: Arc<ChannelInner>,
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .field("listeners", &self.inner.listeners)
            .finish_non_exhaustive()
    }
}

impl ChannelManager {
    #[must_use]
    pub fn new(endpoint: &str, config: Config, store: Arc<CredentialStore>) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                endpoint: endpoint.to_owned(),
                config,
                store,
                connection: Mutex::new(None),
                listeners: Arc::default(),
            }),
        }
    }

    /// Return the live connection, starting one if none exists.
    ///
    /// The stored credential is read only when a new connection is started. Must be called
    /// from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid WebSocket URL.
    pub fn get_connection(&self) -> Result<EventConnection> {
        let mut slot = self
            .inner
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(connection) = slot.as_ref()
            && !connection.is_closed()
        {
            return Ok(connection.clone());
        }

        let credential = self.inner.store.credential();
        let connection = EventConnection::new(
            &self.inner.endpoint,
            self.inner.config.clone(),
            EventParser,
            credential.as_ref(),
        )?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            endpoint = %self.inner.endpoint,
            authenticated = credential.is_some(),
            "Starting channel connection"
        );

        spawn_dispatch(&connection, Arc::clone(&self.inner.listeners));
        *slot = Some(connection.clone());
        Ok(connection)
    }

    /// Close the connection, stop reconnecting and drop every listener. Idempotent.
    pub fn disconnect(&self) {
        let connection = self
            .inner
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(connection) = connection {
            connection.close();
            #[cfg(feature = "tracing")]
            tracing::debug!(endpoint = %self.inner.endpoint, "Channel disconnected");
        }
        self.inner.listeners.clear();
    }

    /// Register `callback` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(kind, Arc::new(callback))
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, kind: EventKind, id: ListenerId) -> bool {
        self.inner.listeners.remove(kind, id)
    }

    #[must_use]
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.inner.listeners
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.live()
            .map_or(ConnectionState::Disconnected, |connection| connection.state())
    }

    /// State changes of the live connection, if there is one.
    #[must_use]
    pub fn state_receiver(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.live().map(|connection| connection.state_receiver())
    }

    /// Send `{"event": event, "data": data}` on the live connection.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::NotConnected`] if there is no live connection.
    pub fn emit<T: Serialize + ?Sized>(&self, event: &str, data: &T) -> Result<()> {
        let connection = self.live().ok_or(WsError::NotConnected)?;
        connection.send(&OutboundEvent { event, data })
    }

    fn live(&self) -> Option<EventConnection> {
        self.inner
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|connection| !connection.is_closed())
            .cloned()
    }
}

/// Forward parsed events from `connection` to the registry until it closes.
fn spawn_dispatch(connection: &EventConnection, listeners: Arc<ListenerRegistry>) {
    let mut rx = connection.subscribe();
    let connection = connection.clone();

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                received = rx.recv() => received,
                () = connection.closed() => break,
            };
            match received {
                Ok(event) => listeners.deliver(&event),
                Err(RecvError::Lagged(count)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Listener dispatch lagged, missed {count} events");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &count;
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
