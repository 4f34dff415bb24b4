//! Stage-completion notifications.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::pipeline::catalog::ProjectStatus;

/// A stage completion that passed the notification gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageNotification {
    pub project_id: String,
    /// The status whose work just completed.
    pub completed: ProjectStatus,
    /// The status the project moved to.
    pub status: ProjectStatus,
    /// Active languages at the time of the transition.
    #[serde(default)]
    pub languages: Vec<String>,
    /// Completed only because no language was active.
    #[serde(default)]
    pub vacuous: bool,
    pub timestamp: DateTime<Utc>,
}

impl StageNotification {
    pub fn new(
        project_id: &str,
        completed: ProjectStatus,
        status: ProjectStatus,
        languages: &[String],
        vacuous: bool,
    ) -> Self {
        Self {
            project_id: project_id.to_string(),
            completed,
            status,
            languages: languages.to_vec(),
            vacuous,
            timestamp: Utc::now(),
        }
    }
}

/// Receives notifications after the transition that produced them has committed.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: StageNotification);
}

/// Discards every notification.
pub struct NoopNotifier;

impl NotificationSink for NoopNotifier {
    fn notify(&self, _notification: StageNotification) {}
}

/// Fans notifications out to any number of subscribers.
#[derive(Clone)]
pub struct StageEventBroadcaster {
    sender: Arc<broadcast::Sender<StageNotification>>,
}

impl StageEventBroadcaster {
    /// Creates a broadcaster with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, notification: StageNotification) {
        // No active receivers is fine
        let _ = self.sender.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StageNotification> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for StageEventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

impl NotificationSink for StageEventBroadcaster {
    fn notify(&self, notification: StageNotification) {
        tracing::debug!(
            project_id = %notification.project_id,
            status = %notification.status,
            "broadcasting stage notification"
        );
        self.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_subscribers() {
        let broadcaster = StageEventBroadcaster::new(4);
        assert_eq!(broadcaster.receiver_count(), 0);
        broadcaster.send(StageNotification::new(
            "p1",
            ProjectStatus::ProcessAudio,
            ProjectStatus::ProcessAudioValidate,
            &[],
            false,
        ));
    }

    #[test]
    fn test_subscribers_receive_notifications() {
        let broadcaster = StageEventBroadcaster::default();
        let mut rx = broadcaster.subscribe();
        let languages = vec!["en".to_string(), "es".to_string()];

        broadcaster.notify(StageNotification::new(
            "p1",
            ProjectStatus::ProcessVideoMain,
            ProjectStatus::Done,
            &languages,
            false,
        ));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.project_id, "p1");
        assert_eq!(received.completed, ProjectStatus::ProcessVideoMain);
        assert_eq!(received.status, ProjectStatus::Done);
        assert_eq!(received.languages, languages);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_notification_json_shape() {
        let n = StageNotification::new(
            "p1",
            ProjectStatus::ProcessCaptionsVideo,
            ProjectStatus::ProcessImagesGeneration,
            &["en".to_string()],
            true,
        );
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["projectId"], "p1");
        assert_eq!(value["completed"], "process_captions_video");
        assert_eq!(value["vacuous"], true);
    }
}
