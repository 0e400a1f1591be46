//! Channel events to user-facing alerts.
//!
//! [`Dispatcher`] subscribes to a [`ChannelManager`](crate::ws::ChannelManager) and renders
//! alerts through an [`AlertSink`]. New messages additionally play a sound and raise a desktop
//! notification, each gated by the stored [`NotificationSettings`].
//!
//! | Event                   | Self-suppressed | Alert                                   |
//! |-------------------------|-----------------|-----------------------------------------|
//! | `new_message`           | yes             | info, plus sound and desktop            |
//! | `reaction_added`        | yes             | info                                    |
//! | `file_upload_progress`  | yes             | loading then success, 120 s idle expiry |
//! | `message_edited`        | no              | info                                    |
//! | `message_deleted`       | no              | warning                                 |
//! | `chat_blocked`          | no              | warning                                 |
//! | `chat_blocked_by_other` | no              | error                                   |
//! | `user_status`           | yes             | none                                    |

pub mod alert;
pub mod dispatcher;
pub mod settings;

pub use alert::{Alert, AlertBoard, AlertId, AlertKind, AlertSink};
pub use dispatcher::{BoxError, DesktopNotifier, Dispatcher, Permission, SoundPlayer};
pub use settings::{NotificationSettings, SETTINGS_KEY};
