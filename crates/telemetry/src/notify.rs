//! Notification channel boundary. Concrete delivery (SMTP, webhook POST,
//! Slack) belongs to an external collaborator; this side records the
//! notification and emits a structured log so operators can trace dispatch.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use guard_core::types::{NotificationChannel, Severity};
use guard_core::GuardResult;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub channel: NotificationChannel,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

pub struct Notifier {
    sent: DashMap<Uuid, Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self { sent: DashMap::new() }
    }

    pub async fn send(
        &self,
        channel: NotificationChannel,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> GuardResult<Notification> {
        let notification = Notification {
            id: Uuid::new_v4(),
            channel,
            severity,
            title: title.into(),
            message: message.into(),
            created_at: Utc::now(),
        };
        info!(
            notification_id = %notification.id,
            channel = ?channel,
            severity = ?severity,
            title = %notification.title,
            "Notification dispatched"
        );
        self.sent.insert(notification.id, notification.clone());
        Ok(notification)
    }

    pub fn recent(&self, limit: usize) -> Vec<Notification> {
        let mut sent: Vec<_> = self.sent.iter().map(|e| e.value().clone()).collect();
        sent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sent.truncate(limit);
        sent
    }

    pub fn count(&self) -> usize {
        self.sent.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_records() {
        let notifier = Notifier::new();
        notifier
            .send(
                NotificationChannel::Webhook,
                Severity::Critical,
                "Rollback executed",
                "checkout-v2 forced to 0%",
            )
            .await
            .unwrap();
        assert_eq!(notifier.count(), 1);
        assert_eq!(notifier.recent(5)[0].title, "Rollback executed");
    }
}
