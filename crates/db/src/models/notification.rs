//! Notification entity models and DTOs.

use finpulse_core::channels::DeliveryChannel;
use finpulse_core::notification::{NotificationStatus, NotificationType};
use finpulse_core::types::{DbId, Timestamp};
use serde::Serialize;

/// A row from the `notifications` table.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: DbId,
    pub user_id: DbId,
    pub notification_type: NotificationType,
    pub channel: DeliveryChannel,
    pub recipient: String,
    pub subject: String,
    pub template_data: serde_json::Value,
    pub status: NotificationStatus,
    pub sent_at: Option<Timestamp>,
    pub failed_at: Option<Timestamp>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(skip_serializing)]
    pub deleted_at: Option<Timestamp>,
}

/// DTO for creating a notification. New rows always start `pending`.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: DbId,
    pub notification_type: NotificationType,
    pub channel: DeliveryChannel,
    pub recipient: String,
    pub subject: String,
    pub template_data: serde_json::Value,
}
