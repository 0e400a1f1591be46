//! Key/value storage for the bearer credential and small client-side settings.
//!
//! [`CredentialStore`] sits in front of a durable [`Backend`] and mirrors every write into
//! memory. When the backend is unusable from the start (read-only disk, sandboxed profile,
//! ...) the store runs memory-only for its whole lifetime. When the backend starts failing
//! later, reads keep working from the mirror. No operation ever returns an error.
//!
//! # Example
//!
//! ```rust,no_run
//! use courier_client_sdk::storage::{CredentialStore, FileBackend};
//!
//! let store = CredentialStore::new(FileBackend::new("/var/lib/app/store.json"));
//! store.set("theme", "dark");
//! assert_eq!(store.get("theme").as_deref(), Some("dark"));
//! ```

pub mod error;
pub mod file;

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use secrecy::ExposeSecret as _;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use error::StorageError;
pub use file::FileBackend;

use crate::auth::Credential;

/// Key under which the bearer credential is stored.
pub const CREDENTIAL_KEY: &str = "auth_token";

/// Sentinel written and deleted once at construction to decide availability.
const PROBE_KEY: &str = "__storage_probe__";

/// A durable key/value backend. Implementations may fail on any call.
pub trait Backend: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn clear(&self) -> Result<(), StorageError>;
}

/// Where values are currently persisted.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StorageType {
    /// The durable backend passed its probe and is written on every `set`
    Durable,
    /// Values only live in process memory
    Memory,
}

/// Fail-soft key/value store with an in-memory mirror.
pub struct CredentialStore {
    /// `None` when the construction probe failed.
    backend: Option<Box<dyn Backend>>,
    memory: DashMap<String, Slot>,
    /// Set once a durable `clear` fails. Every durable entry is stale from then on.
    detached: AtomicBool,
}

/// Mirror entry for one key. `value: None` records a removal.
#[derive(Debug, Clone)]
struct Slot {
    value: Option<String>,
    /// The durable copy does not hold `value`, so reads must not consult it.
    dirty: bool,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("storage_type", &self.storage_type())
            .field("keys", &self.memory.len())
            .field("detached", &self.detached.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::memory_only()
    }
}

impl CredentialStore {
    /// Create a store backed by `backend`, probing it once.
    pub fn new<B: Backend>(backend: B) -> Self {
        let available = match probe(&backend) {
            Ok(()) => true,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Durable storage unavailable, falling back to memory");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                false
            }
        };

        Self {
            backend: available.then(|| Box::new(backend) as Box<dyn Backend>),
            memory: DashMap::new(),
            detached: AtomicBool::new(false),
        }
    }

    /// Create a store that never touches durable storage.
    #[must_use]
    pub fn memory_only() -> Self {
        Self {
            backend: None,
            memory: DashMap::new(),
            detached: AtomicBool::new(false),
        }
    }

    /// Whether the durable backend passed its construction probe.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    #[must_use]
    pub fn storage_type(&self) -> StorageType {
        if self.is_available() {
            StorageType::Durable
        } else {
            StorageType::Memory
        }
    }

    /// Read `key`.
    ///
    /// The durable value is preferred while it is in sync with this session. A key whose last
    /// write or removal failed to reach the backend is answered from memory only, so a
    /// degraded backend never resurrects a value this session replaced or removed.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(slot) = self.memory.get(key)
            && slot.dirty
        {
            return slot.value.clone();
        }

        if let Some(backend) = self.durable() {
            match backend.get(key) {
                Ok(Some(value)) => {
                    self.memory.insert(key.to_owned(), Slot::synced(Some(value.clone())));
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(key, error = %e, "Durable read failed, using memory");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                }
            }
        }

        self.memory.get(key).and_then(|slot| slot.value.clone())
    }

    pub fn set(&self, key: &str, value: &str) {
        let written = self.durable().is_some_and(|backend| {
            backend
                .set(key, value)
                .inspect_err(|e| {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(key, error = %e, "Durable write failed, value kept in memory");
                    #[cfg(not(feature = "tracing"))]
                    let _: &StorageError = e;
                })
                .is_ok()
        });

        self.memory.insert(
            key.to_owned(),
            Slot {
                value: Some(value.to_owned()),
                dirty: !written,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        let removed = self.durable().is_some_and(|backend| {
            backend
                .remove(key)
                .inspect_err(|e| {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(key, error = %e, "Durable remove failed, key hidden in memory");
                    #[cfg(not(feature = "tracing"))]
                    let _: &StorageError = e;
                })
                .is_ok()
        });

        if removed || self.durable().is_none() {
            self.memory.remove(key);
        } else {
            self.memory.insert(key.to_owned(), Slot::removed());
        }
    }

    pub fn clear(&self) {
        self.memory.clear();

        if let Some(backend) = self.durable()
            && let Err(e) = backend.clear()
        {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, "Durable clear failed, no longer reading durable storage");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;

            self.detached.store(true, Ordering::SeqCst);
        }
    }

    /// The backend, unless it was never available or fell out of sync with a `clear`.
    fn durable(&self) -> Option<&dyn Backend> {
        if self.detached.load(Ordering::SeqCst) {
            return None;
        }
        self.backend.as_deref()
    }

    /// Read and decode a JSON value. Missing or undecodable entries yield `None`.
    #[must_use]
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        serde_json::from_str(&raw)
            .inspect_err(|e| {
                #[cfg(feature = "tracing")]
                tracing::warn!(key, error = %e, "Stored value is not valid JSON for its type");
                #[cfg(not(feature = "tracing"))]
                let _: &serde_json::Error = e;
            })
            .ok()
    }

    /// Encode and store a JSON value. Values that cannot be encoded are logged and skipped.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(key, error = %e, "Unable to encode value for storage");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    /// The current bearer credential, if one was stored by the login flow.
    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        self.get(CREDENTIAL_KEY)
            .filter(|token| !token.is_empty())
            .map(Credential::new)
    }

    pub fn set_credential(&self, credential: &Credential) {
        self.set(CREDENTIAL_KEY, credential.token().expose_secret());
    }

    pub fn clear_credential(&self) {
        self.remove(CREDENTIAL_KEY);
    }
}

impl Slot {
    const fn synced(value: Option<String>) -> Self {
        Self {
            value,
            dirty: false,
        }
    }

    const fn removed() -> Self {
        Self {
            value: None,
            dirty: true,
        }
    }
}

fn probe<B: Backend>(backend: &B) -> Result<(), StorageError> {
    backend.set(PROBE_KEY, PROBE_KEY)?;
    backend.remove(PROBE_KEY)
}
