//! Notification analytics models.

use finpulse_core::analytics::Lifecycle;
use finpulse_core::channels::DeliveryChannel;
use finpulse_core::notification::NotificationType;
use finpulse_core::types::{DbId, Timestamp};
use serde::Serialize;

/// A row from the `notification_analytics` table, one per dispatched
/// notification.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationAnalytics {
    pub id: DbId,
    pub notification_id: DbId,
    pub user_id: DbId,
    pub notification_type: NotificationType,
    pub channel: DeliveryChannel,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
    pub open_count: i32,
    pub click_count: i32,
    pub failure_reason: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for starting to track a notification.
#[derive(Debug, Clone)]
pub struct NewAnalytics {
    pub notification_id: DbId,
    pub user_id: DbId,
    pub notification_type: NotificationType,
    pub channel: DeliveryChannel,
}

/// Per-type counts of rows that reached each stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub total: i64,
    pub sent: i64,
    pub delivered: i64,
    pub read: i64,
    pub clicked: i64,
    pub failed: i64,
    pub opens: i64,
    pub clicks: i64,
}

impl StageCounts {
    /// Add another set of counts into this one.
    pub fn accumulate(&mut self, other: &StageCounts) {
        self.total += other.total;
        self.sent += other.sent;
        self.delivered += other.delivered;
        self.read += other.read;
        self.clicked += other.clicked;
        self.failed += other.failed;
        self.opens += other.opens;
        self.clicks += other.clicks;
    }

    /// Count one analytics row.
    pub fn record(&mut self, row: &NotificationAnalytics) {
        self.total += 1;
        self.sent += i64::from(row.lifecycle.sent_at.is_some());
        self.delivered += i64::from(row.lifecycle.delivered_at.is_some());
        self.read += i64::from(row.lifecycle.read_at.is_some());
        self.clicked += i64::from(row.lifecycle.clicked_at.is_some());
        self.failed += i64::from(row.lifecycle.failed_at.is_some());
        self.opens += i64::from(row.open_count);
        self.clicks += i64::from(row.click_count);
    }
}

/// [`StageCounts`] for one notification type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeStageCounts {
    pub notification_type: NotificationType,
    #[serde(flatten)]
    pub counts: StageCounts,
}

/// Counter bumped alongside a lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Opens,
    Clicks,
}
