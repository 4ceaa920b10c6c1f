//! Delivery analytics: lifecycle tracking and aggregate reporting.
//!
//! The lifecycle rules live in [`finpulse_core::analytics::Lifecycle`]; the
//! store applies them per row, so the tracker only stamps times and shapes
//! the aggregates.

use std::sync::Arc;

use finpulse_core::analytics::DeliveryStage;
use finpulse_core::clock::Clock;
use finpulse_core::error::CoreError;
use finpulse_core::notification::NotificationType;
use finpulse_core::types::{DateRange, DbId};
use finpulse_db::models::analytics::{Counter, NewAnalytics, NotificationAnalytics, StageCounts};
use finpulse_db::models::notification::Notification;
use finpulse_db::AnalyticsStore;
use serde::Serialize;

use crate::error::NotifyError;

/// Default page size for [`AnalyticsTracker::get_failed_notifications`].
pub const DEFAULT_FAILED_LIMIT: i64 = 100;

// ---------------------------------------------------------------------------
// Report shapes
// ---------------------------------------------------------------------------

/// Stage reach as a fraction of all tracked notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DeliveryRates {
    pub delivery_rate: f64,
    pub read_rate: f64,
    pub click_rate: f64,
    pub failure_rate: f64,
}

impl DeliveryRates {
    /// All rates are `0.0` when nothing was tracked.
    pub fn from_counts(counts: &StageCounts) -> Self {
        Self {
            delivery_rate: rate(counts.delivered, counts.total),
            read_rate: rate(counts.read, counts.total),
            click_rate: rate(counts.clicked, counts.total),
            failure_rate: rate(counts.failed, counts.total),
        }
    }
}

fn rate(count: i64, total: i64) -> f64 {
    if total <= 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeAnalytics {
    pub notification_type: NotificationType,
    #[serde(flatten)]
    pub counts: StageCounts,
    #[serde(flatten)]
    pub rates: DeliveryRates,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverviewStats {
    #[serde(flatten)]
    pub counts: StageCounts,
    #[serde(flatten)]
    pub rates: DeliveryRates,
}

// ---------------------------------------------------------------------------
// AnalyticsTracker
// ---------------------------------------------------------------------------

pub struct AnalyticsTracker {
    store: Arc<dyn AnalyticsStore>,
    clock: Arc<dyn Clock>,
}

impl AnalyticsTracker {
    pub fn new(store: Arc<dyn AnalyticsStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Start tracking a notification in the `queued` stage.
    pub async fn track_notification(
        &self,
        notification: &Notification,
    ) -> Result<NotificationAnalytics, NotifyError> {
        let input = NewAnalytics {
            notification_id: notification.id,
            user_id: notification.user_id,
            notification_type: notification.notification_type,
            channel: notification.channel,
        };
        Ok(self.store.track(&input, self.clock.now()).await?)
    }

    pub async fn mark_sent(
        &self,
        notification_id: DbId,
    ) -> Result<NotificationAnalytics, NotifyError> {
        self.transition(notification_id, DeliveryStage::Sent, None, None).await
    }

    pub async fn mark_delivered(
        &self,
        notification_id: DbId,
    ) -> Result<NotificationAnalytics, NotifyError> {
        self.transition(notification_id, DeliveryStage::Delivered, None, None).await
    }

    pub async fn mark_read(
        &self,
        notification_id: DbId,
    ) -> Result<NotificationAnalytics, NotifyError> {
        self.transition(notification_id, DeliveryStage::Read, None, None).await
    }

    /// Record a click. Every call bumps the click counter.
    pub async fn mark_clicked(
        &self,
        notification_id: DbId,
    ) -> Result<NotificationAnalytics, NotifyError> {
        self.transition(notification_id, DeliveryStage::Clicked, None, Some(Counter::Clicks))
            .await
    }

    pub async fn mark_failed(
        &self,
        notification_id: DbId,
        reason: &str,
    ) -> Result<NotificationAnalytics, NotifyError> {
        self.transition(notification_id, DeliveryStage::Failed, Some(reason), None)
            .await
    }

    /// Count an email open (tracking pixel). The lifecycle status is left
    /// unchanged.
    pub async fn track_email_open(
        &self,
        notification_id: DbId,
    ) -> Result<NotificationAnalytics, NotifyError> {
        self.store
            .bump_counter(notification_id, Counter::Opens, self.clock.now())
            .await?
            .ok_or_else(|| not_tracked(notification_id))
    }

    pub async fn get(&self, notification_id: DbId) -> Result<NotificationAnalytics, NotifyError> {
        self.store
            .get_analytics(notification_id)
            .await?
            .ok_or_else(|| not_tracked(notification_id))
    }

    /// Per-type counts and rates over notifications queued in `range`.
    pub async fn get_analytics_by_type(
        &self,
        range: DateRange,
    ) -> Result<Vec<TypeAnalytics>, NotifyError> {
        let rows = self.store.stage_counts_by_type(range).await?;
        Ok(rows
            .into_iter()
            .map(|row| TypeAnalytics {
                notification_type: row.notification_type,
                rates: DeliveryRates::from_counts(&row.counts),
                counts: row.counts,
            })
            .collect())
    }

    /// Counts and rates across all types.
    pub async fn get_overview_stats(&self, range: DateRange) -> Result<OverviewStats, NotifyError> {
        let mut counts = StageCounts::default();
        for row in self.store.stage_counts_by_type(range).await? {
            counts.accumulate(&row.counts);
        }
        Ok(OverviewStats {
            rates: DeliveryRates::from_counts(&counts),
            counts,
        })
    }

    /// Failed notifications, most recent failure first.
    pub async fn get_failed_notifications(
        &self,
        range: DateRange,
        limit: Option<i64>,
    ) -> Result<Vec<NotificationAnalytics>, NotifyError> {
        let limit = limit.unwrap_or(DEFAULT_FAILED_LIMIT).max(0);
        Ok(self.store.list_failed(range, limit).await?)
    }

    async fn transition(
        &self,
        notification_id: DbId,
        stage: DeliveryStage,
        failure_reason: Option<&str>,
        counter: Option<Counter>,
    ) -> Result<NotificationAnalytics, NotifyError> {
        let row = self
            .store
            .advance(notification_id, stage, self.clock.now(), failure_reason, counter)
            .await?;
        tracing::debug!(
            %notification_id,
            stage = %stage,
            status = %row.lifecycle.status,
            "Analytics transition"
        );
        Ok(row)
    }
}

fn not_tracked(notification_id: DbId) -> NotifyError {
    NotifyError::Core(CoreError::NotFound {
        entity: "notification_analytics",
        id: notification_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{Duration, TimeZone, Utc};
    use finpulse_core::channels::DeliveryChannel;
    use finpulse_core::clock::FakeClock;
    use finpulse_core::types::new_id;
    use finpulse_db::models::notification::NewNotification;
    use finpulse_db::{MemoryStore, NotificationStore, StoreError};

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: FakeClock,
        tracker: AnalyticsTracker,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = FakeClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());
        let tracker = AnalyticsTracker::new(store.clone(), Arc::new(clock.clone()));
        Fixture {
            store,
            clock,
            tracker,
        }
    }

    async fn tracked(f: &Fixture, notification_type: NotificationType) -> DbId {
        let notification = f
            .store
            .create_notification(
                &NewNotification {
                    user_id: new_id(),
                    notification_type,
                    channel: DeliveryChannel::Email,
                    recipient: "user@example.com".into(),
                    subject: "subject".into(),
                    template_data: serde_json::Value::Null,
                },
                f.clock.now(),
            )
            .await
            .unwrap();
        f.tracker.track_notification(&notification).await.unwrap();
        notification.id
    }

    #[tokio::test]
    async fn delivered_then_read_ends_in_read() {
        let f = fixture();
        let id = tracked(&f, NotificationType::BudgetAlert).await;

        f.clock.advance(Duration::seconds(1));
        let delivered = f.tracker.mark_delivered(id).await.unwrap();
        f.clock.advance(Duration::seconds(1));
        f.tracker.mark_read(id).await.unwrap();
        f.clock.advance(Duration::seconds(1));
        let row = f.tracker.mark_read(id).await.unwrap();

        assert_eq!(row.lifecycle.status, DeliveryStage::Read);
        assert_eq!(row.lifecycle.delivered_at, delivered.lifecycle.delivered_at);
        assert!(row.lifecycle.read_at.is_some());
    }

    #[tokio::test]
    async fn clicks_and_opens_are_counted() {
        let f = fixture();
        let id = tracked(&f, NotificationType::Welcome).await;

        f.tracker.mark_clicked(id).await.unwrap();
        f.tracker.mark_clicked(id).await.unwrap();
        f.tracker.track_email_open(id).await.unwrap();
        let row = f.tracker.track_email_open(id).await.unwrap();

        assert_eq!(row.click_count, 2);
        assert_eq!(row.open_count, 2);
        assert_eq!(row.lifecycle.status, DeliveryStage::Clicked);
    }

    #[tokio::test]
    async fn open_does_not_change_status() {
        let f = fixture();
        let id = tracked(&f, NotificationType::Welcome).await;
        f.tracker.mark_sent(id).await.unwrap();

        let row = f.tracker.track_email_open(id).await.unwrap();
        assert_eq!(row.lifecycle.status, DeliveryStage::Sent);
        assert_eq!(row.lifecycle.delivered_at, None);
    }

    #[tokio::test]
    async fn failure_after_read_is_a_conflict() {
        let f = fixture();
        let id = tracked(&f, NotificationType::Welcome).await;
        f.tracker.mark_read(id).await.unwrap();

        let err = f.tracker.mark_failed(id, "bounced").await.unwrap_err();
        assert_matches!(err, NotifyError::Store(StoreError::Core(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn open_on_untracked_notification_is_not_found() {
        let f = fixture();
        let err = f.tracker.track_email_open(new_id()).await.unwrap_err();
        assert_matches!(err, NotifyError::Core(CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn empty_range_yields_zero_rates() {
        let f = fixture();
        let stats = f.tracker.get_overview_stats(DateRange::default()).await.unwrap();
        assert_eq!(stats.counts.total, 0);
        assert_eq!(stats.rates, DeliveryRates::default());
        assert!(f
            .tracker
            .get_analytics_by_type(DateRange::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn rates_are_computed_per_type_and_overall() {
        let f = fixture();
        let a = tracked(&f, NotificationType::BudgetAlert).await;
        let b = tracked(&f, NotificationType::BudgetAlert).await;
        let c = tracked(&f, NotificationType::Welcome).await;
        f.tracker.mark_delivered(a).await.unwrap();
        f.tracker.mark_failed(b, "smtp down").await.unwrap();
        f.tracker.mark_read(c).await.unwrap();

        let by_type = f.tracker.get_analytics_by_type(DateRange::default()).await.unwrap();
        let budget = by_type
            .iter()
            .find(|t| t.notification_type == NotificationType::BudgetAlert)
            .unwrap();
        assert_eq!(budget.counts.total, 2);
        assert_eq!(budget.rates.delivery_rate, 0.5);
        assert_eq!(budget.rates.failure_rate, 0.5);

        let overview = f.tracker.get_overview_stats(DateRange::default()).await.unwrap();
        assert_eq!(overview.counts.total, 3);
        assert_eq!(overview.counts.delivered, 2);
        assert_eq!(overview.counts.read, 1);

        let failed = f
            .tracker
            .get_failed_notifications(DateRange::default(), None)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].failure_reason.as_deref(), Some("smtp down"));
    }

    #[tokio::test]
    async fn date_range_filters_on_queue_time() {
        let f = fixture();
        let start = f.clock.now();
        tracked(&f, NotificationType::Welcome).await;
        f.clock.advance(Duration::days(2));
        tracked(&f, NotificationType::Welcome).await;

        let range = DateRange::new(Some(start + Duration::days(1)), None);
        let stats = f.tracker.get_overview_stats(range).await.unwrap();
        assert_eq!(stats.counts.total, 1);
    }
}
