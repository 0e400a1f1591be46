use std::error::Error as StdError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::alert::{Alert, AlertId, AlertKind, AlertSink};
use super::settings::NotificationSettings;
use crate::storage::CredentialStore;
use crate::ws::events::{
    ChannelEvent, ChatBlock, FileUploadProgress, MessageDeleted, MessageEdited, NewMessage,
    Presence, ReactionAdded, UserStatus,
};
use crate::ws::{ChannelManager, EventKind, ListenerId};

/// Error type returned by the platform seams.
pub type BoxError = Box<dyn StdError + Send + Sync>;

const MESSAGE_DURATION: Duration = Duration::from_secs(4);
const SHORT_DURATION: Duration = Duration::from_secs(3);
const BLOCK_DURATION: Duration = Duration::from_secs(5);
/// A loading alert that sees no progress for this long is dropped. Each update restarts it.
const STALLED_UPLOAD: Duration = Duration::from_secs(120);
const PREVIEW_CHARS: usize = 100;

/// Plays the incoming-message sound.
pub trait SoundPlayer: Send + Sync + 'static {
    fn play(&self) -> Result<(), BoxError>;
}

/// Desktop notification permission as reported by the platform.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Permission {
    /// The user has not been asked yet
    Undecided,
    Granted,
    Denied,
}

/// OS-level notifications.
pub trait DesktopNotifier: Send + Sync + 'static {
    fn permission(&self) -> Permission;

    /// Ask the user for permission. The answer shows up in later [`Self::permission`] calls.
    fn request_permission(&self);

    fn notify(&self, title: &str, body: &str) -> Result<(), BoxError>;
}

/// Turns channel events into alerts and, for new messages, sound and desktop notifications.
///
/// Events the current user caused are not surfaced. Side effects are gated by the
/// [`NotificationSettings`] read from the store on every event, and their failures are logged
/// and dropped.
pub struct Dispatcher {
    sink: Arc<dyn AlertSink>,
    store: Arc<CredentialStore>,
    sound: Option<Arc<dyn SoundPlayer>>,
    desktop: Option<Arc<dyn DesktopNotifier>>,
    permission_requested: AtomicBool,
    attachment: Mutex<Option<Attachment>>,
}

struct Attachment {
    channel: ChannelManager,
    listeners: Vec<(EventKind, ListenerId)>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("sound", &self.sound.is_some())
            .field("desktop", &self.desktop.is_some())
            .field("attached", &self.is_attached())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new(sink: Arc<dyn AlertSink>, store: Arc<CredentialStore>) -> Self {
        Self {
            sink,
            store,
            sound: None,
            desktop: None,
            permission_requested: AtomicBool::new(false),
            attachment: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_sound(mut self, sound: Arc<dyn SoundPlayer>) -> Self {
        self.sound = Some(sound);
        self
    }

    #[must_use]
    pub fn with_desktop(mut self, desktop: Arc<dyn DesktopNotifier>) -> Self {
        self.desktop = Some(desktop);
        self
    }

    /// Register the handler set on `channel` for `current_user_id`.
    ///
    /// Attaching again first detaches from the previous channel. Desktop permission is
    /// requested here, at most once per dispatcher, and only while undecided.
    pub fn attach(&self, channel: &ChannelManager, current_user_id: &str) {
        self.detach();

        if let Some(desktop) = &self.desktop
            && desktop.permission() == Permission::Undecided
            && !self.permission_requested.swap(true, Ordering::SeqCst)
        {
            desktop.request_permission();
        }

        let rules = Arc::new(Rules {
            sink: Arc::clone(&self.sink),
            store: Arc::clone(&self.store),
            sound: self.sound.clone(),
            desktop: self.desktop.clone(),
            current_user_id: current_user_id.to_owned(),
        });

        let listeners = EventKind::ALL
            .into_iter()
            .map(|kind| {
                let rules = Arc::clone(&rules);
                (kind, channel.subscribe(kind, move |event| rules.handle(event)))
            })
            .collect();

        #[cfg(feature = "tracing")]
        tracing::debug!(user = current_user_id, "Notification dispatcher attached");

        *self
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Attachment {
            channel: channel.clone(),
            listeners,
        });
    }

    /// Remove every handler registered by [`Dispatcher::attach`]. Idempotent.
    pub fn detach(&self) {
        let attachment = self
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Attachment { channel, listeners }) = attachment {
            for (kind, id) in listeners {
                channel.unsubscribe(kind, id);
            }
        }
    }

    /// Whether handlers from the last [`Dispatcher::attach`] are still registered.
    ///
    /// Turns `false` after [`Dispatcher::detach`], and also after
    /// [`ChannelManager::disconnect`] cleared the channel's listeners.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|Attachment { channel, listeners }| {
                listeners
                    .iter()
                    .any(|&(kind, id)| channel.listeners().contains(kind, id))
            })
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Per-attachment event handling.
struct Rules {
    sink: Arc<dyn AlertSink>,
    store: Arc<CredentialStore>,
    sound: Option<Arc<dyn SoundPlayer>>,
    desktop: Option<Arc<dyn DesktopNotifier>>,
    current_user_id: String,
}

impl Rules {
    fn handle(&self, event: &ChannelEvent) {
        match event {
            ChannelEvent::NewMessage(message) => self.on_new_message(message),
            ChannelEvent::ReactionAdded(reaction) => self.on_reaction(reaction),
            ChannelEvent::FileUploadProgress(upload) => self.on_upload(upload),
            ChannelEvent::MessageEdited(edit) => self.on_edit(edit),
            ChannelEvent::MessageDeleted(deletion) => self.on_delete(deletion),
            ChannelEvent::ChatBlocked(block) => self.on_block(block, false),
            ChannelEvent::ChatBlockedByOther(block) => self.on_block(block, true),
            ChannelEvent::UserStatus(status) => self.on_status(status),
        }
    }

    fn is_self(&self, user_id: &str) -> bool {
        user_id == self.current_user_id
    }

    fn on_new_message(&self, message: &NewMessage) {
        if self.is_self(&message.sender_id) {
            return;
        }

        let title = message
            .sender_name
            .clone()
            .unwrap_or_else(|| "New message".to_owned());
        let body = message
            .content
            .as_deref()
            .filter(|content| !content.trim().is_empty())
            .map_or_else(|| "Sent an attachment".to_owned(), preview);

        self.sink.show(Alert::new(
            AlertId::ephemeral(),
            AlertKind::Info,
            title.clone(),
            body.clone(),
            Some(MESSAGE_DURATION),
        ));
        self.side_effects(&title, &body);
    }

    fn on_reaction(&self, reaction: &ReactionAdded) {
        if self.is_self(&reaction.user_id) {
            return;
        }

        let who = reaction.user_name.as_deref().unwrap_or("Someone");
        self.sink.show(Alert::new(
            AlertId::ephemeral(),
            AlertKind::Info,
            "New reaction",
            format!("{who} reacted {} to your message", reaction.emoji),
            Some(SHORT_DURATION),
        ));
    }

    fn on_upload(&self, upload: &FileUploadProgress) {
        if self.is_self(&upload.user_id) {
            return;
        }

        // Keyed by user and file name only, concurrent uploads of the same name share an alert
        let id = AlertId::stable(format!("upload-{}-{}", upload.user_id, upload.file_name));
        let who = upload.user_name.as_deref().unwrap_or("Someone");
        let alert = if upload.is_complete() {
            Alert::new(
                id,
                AlertKind::Success,
                "Upload complete",
                format!("{who} uploaded {}", upload.file_name),
                Some(SHORT_DURATION),
            )
        } else {
            Alert::new(
                id,
                AlertKind::Loading,
                format!("Uploading {}", upload.file_name),
                format!("{who}: {:.0}%", upload.progress),
                Some(STALLED_UPLOAD),
            )
        };
        self.sink.show(alert);
    }

    fn on_edit(&self, edit: &MessageEdited) {
        let body = edit
            .content
            .as_deref()
            .map_or_else(|| "A message was edited".to_owned(), preview);
        self.sink.show(Alert::new(
            AlertId::ephemeral(),
            AlertKind::Info,
            "Message edited",
            body,
            Some(SHORT_DURATION),
        ));
    }

    fn on_delete(&self, _deletion: &MessageDeleted) {
        self.sink.show(Alert::new(
            AlertId::ephemeral(),
            AlertKind::Warning,
            "Message deleted",
            "A message was deleted",
            Some(SHORT_DURATION),
        ));
    }

    fn on_block(&self, block: &ChatBlock, by_other: bool) {
        let who = block.blocker_name.as_deref().unwrap_or("A participant");
        let alert = if by_other {
            Alert::new(
                AlertId::ephemeral(),
                AlertKind::Error,
                "You have been blocked",
                format!("{who} blocked you in this chat"),
                Some(BLOCK_DURATION),
            )
        } else {
            Alert::new(
                AlertId::ephemeral(),
                AlertKind::Warning,
                "Chat blocked",
                format!("{who} blocked this chat"),
                Some(BLOCK_DURATION),
            )
        };
        self.sink.show(alert);
    }

    fn on_status(&self, status: &UserStatus) {
        if self.is_self(&status.user_id) {
            return;
        }
        // Presence changes are too frequent to alert on
        if status.status == Presence::Online {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::trace!(user = %status.user_id, status = %status.status, "Presence change");
    }

    fn side_effects(&self, title: &str, body: &str) {
        let settings = NotificationSettings::load(&self.store);

        if settings.sound_enabled
            && let Some(sound) = &self.sound
            && let Err(e) = sound.play()
        {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %e, "Unable to play notification sound");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }

        if settings.desktop_enabled
            && let Some(desktop) = &self.desktop
            && desktop.permission() == Permission::Granted
            && let Err(e) = desktop.notify(title, body)
        {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %e, "Unable to show desktop notification");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }
}

fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        return content.to_owned();
    }
    let mut truncated: String = content.chars().take(PREVIEW_CHARS).collect();
    truncated.push('…');
    truncated
}
