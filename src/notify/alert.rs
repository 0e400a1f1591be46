use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

/// Identity of an alert.
///
/// A [`AlertId::Stable`] alert replaces an unexpired alert with the same key instead of being
/// shown next to it. [`AlertId::Ephemeral`] alerts never collide.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AlertId {
    Ephemeral(Uuid),
    Stable(String),
}

impl AlertId {
    #[must_use]
    pub fn ephemeral() -> Self {
        Self::Ephemeral(Uuid::new_v4())
    }

    #[must_use]
    pub fn stable<S: Into<String>>(key: S) -> Self {
        Self::Stable(key.into())
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ephemeral(id) => write!(f, "{id}"),
            Self::Stable(key) => f.write_str(key),
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum AlertKind {
    Info,
    Success,
    Warning,
    Error,
    /// In-progress work; usually shown until replaced
    Loading,
}

/// A user-facing alert.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub id: AlertId,
    pub kind: AlertKind,
    pub title: String,
    pub body: String,
    /// How long to show the alert. `None` keeps it until replaced.
    pub duration: Option<Duration>,
}

impl Alert {
    #[must_use]
    pub fn new<T: Into<String>, B: Into<String>>(
        id: AlertId,
        kind: AlertKind,
        title: T,
        body: B,
        duration: Option<Duration>,
    ) -> Self {
        Self {
            id,
            kind,
            title: title.into(),
            body: body.into(),
            duration,
        }
    }
}

/// Where alerts are rendered.
pub trait AlertSink: Send + Sync + 'static {
    /// Show `alert`, replacing an unexpired alert with the same [`AlertId::Stable`] key.
    fn show(&self, alert: Alert);
}

#[derive(Debug)]
struct Entry {
    alert: Alert,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory [`AlertSink`] holding the alerts currently on screen.
#[derive(Debug, Default)]
pub struct AlertBoard {
    entries: Mutex<Vec<Entry>>,
}

impl AlertBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unexpired alerts in the order they were first shown.
    #[must_use]
    pub fn active(&self) -> Vec<Alert> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut entries);
        entries.iter().map(|entry| entry.alert.clone()).collect()
    }

    /// The unexpired alert with identity `id`, if any.
    #[must_use]
    pub fn get(&self, id: &AlertId) -> Option<Alert> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut entries);
        entries
            .iter()
            .find(|entry| &entry.alert.id == id)
            .map(|entry| entry.alert.clone())
    }

    pub fn dismiss(&self, id: &AlertId) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|entry| &entry.alert.id != id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.active().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertSink for AlertBoard {
    fn show(&self, alert: Alert) {
        let now = Instant::now();
        let expires_at = alert.duration.map(|duration| now + duration);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut entries);

        let existing = match &alert.id {
            AlertId::Stable(_) => entries.iter_mut().find(|entry| entry.alert.id == alert.id),
            AlertId::Ephemeral(_) => None,
        };
        match existing {
            Some(entry) => {
                entry.alert = alert;
                entry.expires_at = expires_at;
            }
            None => entries.push(Entry { alert, expires_at }),
        }
    }
}

fn prune(entries: &mut Vec<Entry>) {
    let now = Instant::now();
    entries.retain(|entry| !entry.is_expired(now));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(kind: AlertKind, body: &str, duration: Option<Duration>) -> Alert {
        Alert::new(
            AlertId::stable("upload-u2-a.png"),
            kind,
            "Uploading a.png",
            body,
            duration,
        )
    }

    #[test]
    fn stable_alerts_replace_in_place() {
        let board = AlertBoard::new();
        board.show(Alert::new(AlertId::ephemeral(), AlertKind::Info, "first", "", None));
        board.show(upload(AlertKind::Loading, "40%", None));
        board.show(upload(AlertKind::Success, "done", Some(Duration::from_secs(3))));

        let active = board.active();
        assert_eq!(active.len(), 2);
        assert_eq!(active[1].kind, AlertKind::Success);
        assert_eq!(active[1].body, "done");
    }

    #[test]
    fn ephemeral_alerts_accumulate() {
        let board = AlertBoard::new();
        for _ in 0..3 {
            board.show(Alert::new(AlertId::ephemeral(), AlertKind::Info, "hi", "", None));
        }

        assert_eq!(board.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_alerts_are_pruned() {
        let board = AlertBoard::new();
        board.show(Alert::new(
            AlertId::ephemeral(),
            AlertKind::Warning,
            "short",
            "",
            Some(Duration::from_secs(3)),
        ));
        board.show(upload(AlertKind::Loading, "10%", None));

        tokio::time::advance(Duration::from_secs(4)).await;

        let active = board.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].kind, AlertKind::Loading);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_stable_alert_is_shown_fresh() {
        let board = AlertBoard::new();
        board.show(upload(AlertKind::Success, "done", Some(Duration::from_secs(3))));
        tokio::time::advance(Duration::from_secs(5)).await;

        board.show(upload(AlertKind::Loading, "5%", None));

        let alert = board.get(&AlertId::stable("upload-u2-a.png")).unwrap();
        assert_eq!(alert.kind, AlertKind::Loading);
        assert_eq!(board.len(), 1);
    }

    #[test]
    fn dismiss_removes_alert() {
        let board = AlertBoard::new();
        board.show(upload(AlertKind::Loading, "10%", None));
        board.dismiss(&AlertId::stable("upload-u2-a.png"));

        assert!(board.is_empty());
    }
}
