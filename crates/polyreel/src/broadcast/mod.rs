//! Broadcasting of pipeline events to external listeners.
//!
//! Delivery mechanics (chat, email, websockets) live outside this crate; they
//! subscribe to a [`StageEventBroadcaster`] or implement [`NotificationSink`].

pub mod stage_events;

pub use stage_events::{NoopNotifier, NotificationSink, StageEventBroadcaster, StageNotification};
