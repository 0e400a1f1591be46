//! Bearer credential and the process-wide authentication-failure signal.

use std::fmt;

/// Secret string types that redact values in debug output for security.
pub use secrecy::{ExposeSecret, SecretString};
use tokio::sync::broadcast;

/// Broadcast capacity for auth-error notifications. Receivers only care that at least one
/// failure happened since they last looked, so a small buffer is enough.
const SIGNAL_CAPACITY: usize = 16;

/// Opaque bearer token used by both the request client and the event channel.
///
/// The token is held as a [`SecretString`] so it never shows up in `Debug` output or logs.
#[derive(Clone)]
pub struct Credential {
    token: SecretString,
}

impl Credential {
    #[must_use]
    pub fn new<T: Into<String>>(token: T) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }

    /// Returns the raw token.
    #[must_use]
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// The value of an `Authorization` header carrying this credential.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self::new(token)
    }
}

/// Emitted once per request chain that ends in a terminal 401.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthError;

/// Fire-and-forget broadcast of authentication failures.
///
/// Any number of listeners (typically a redirect-to-login handler) may subscribe. Emitting
/// with no listeners is not an error.
#[derive(Debug, Clone)]
pub struct AuthSignal {
    tx: broadcast::Sender<AuthError>,
}

impl Default for AuthSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSignal {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to future auth-error notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AuthError> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            listeners = self.tx.receiver_count(),
            "Broadcasting auth-error signal"
        );

        _ = self.tx.send(AuthError);
    }
}
