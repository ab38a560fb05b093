use std::sync::Arc;

use tracing::info;

use crate::api::{ApiError, GroupBackend, NotificationFilter};
use crate::models::Notification;
use crate::notify::Notifier;

/// In-app notifications (invitations, new shared expenses).
pub struct NotificationService {
    backend: Arc<dyn GroupBackend>,
    notifier: Arc<dyn Notifier>,
}

impl NotificationService {
    pub fn new(backend: Arc<dyn GroupBackend>, notifier: Arc<dyn Notifier>) -> Self {
        Self { backend, notifier }
    }

    /// The user's notifications, newest first.
    pub async fn list(&self, user_id: &str) -> Result<Vec<Notification>, ApiError> {
        let mut notifications = self.backend.notifications(user_id).await?;
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<usize, ApiError> {
        Ok(self
            .backend
            .notifications(user_id)
            .await?
            .iter()
            .filter(|n| !n.read)
            .count())
    }

    pub async fn mark_read(&self, id: &str) -> Result<(), ApiError> {
        self.backend
            .mark_notifications_read(NotificationFilter::One(id.to_string()))
            .await
            .map_err(|e| self.surface("update notification", e))
    }

    pub async fn mark_all_read(&self, user_id: &str) -> Result<(), ApiError> {
        self.backend
            .mark_notifications_read(NotificationFilter::AllFor(user_id.to_string()))
            .await
            .map_err(|e| self.surface("update notifications", e))?;
        info!(user_id = user_id, "All notifications marked read");
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.backend
            .delete_notification(id)
            .await
            .map_err(|e| self.surface("delete notification", e))
    }

    fn surface(&self, action: &str, e: ApiError) -> ApiError {
        self.notifier.error(&format!("Failed to {}: {}", action, e));
        e
    }
}
