//! Storage seams consumed by the notification engine.
//!
//! Each trait covers one table. [`PgStore`] implements all of them on top of
//! the repositories; [`crate::MemoryStore`] implements them in-process.

use async_trait::async_trait;
use finpulse_core::analytics::DeliveryStage;
use finpulse_core::notification::NotificationType;
use finpulse_core::types::{DateRange, DbId, Timestamp};
use sqlx::PgPool;

use crate::error::StoreError;
use crate::models::alert_rule::{AlertRule, AlertRuleChanges, NewAlertRule};
use crate::models::analytics::{Counter, NewAnalytics, NotificationAnalytics, TypeStageCounts};
use crate::models::notification::{NewNotification, Notification};
use crate::models::preference::{NewPreference, NotificationPreference};
use crate::repositories::{
    AlertRuleRepo, AnalyticsRepo, NotificationPreferenceRepo, NotificationRepo,
};

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create_notification(
        &self,
        input: &NewNotification,
        at: Timestamp,
    ) -> Result<Notification, StoreError>;

    async fn get_notification(&self, id: DbId) -> Result<Option<Notification>, StoreError>;

    /// `pending` -> `sent`. Returns `false` when no transition happened.
    async fn mark_notification_sent(&self, id: DbId, at: Timestamp) -> Result<bool, StoreError>;

    /// `pending` -> `failed`. Returns `false` when no transition happened.
    async fn mark_notification_failed(
        &self,
        id: DbId,
        at: Timestamp,
        error: &str,
    ) -> Result<bool, StoreError>;

    async fn list_notifications(
        &self,
        user_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>, StoreError>;

    async fn delete_notification(&self, id: DbId, at: Timestamp) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get_preference(
        &self,
        user_id: DbId,
        notification_type: NotificationType,
    ) -> Result<Option<NotificationPreference>, StoreError>;

    async fn list_preferences(
        &self,
        user_id: DbId,
    ) -> Result<Vec<NotificationPreference>, StoreError>;

    /// Insert or replace the row keyed by `(user_id, notification_type)`.
    async fn upsert_preference(
        &self,
        input: &NewPreference,
        at: Timestamp,
    ) -> Result<NotificationPreference, StoreError>;
}

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Create the `queued` row. Returns the existing row when one is
    /// already tracked for the notification.
    async fn track(
        &self,
        input: &NewAnalytics,
        at: Timestamp,
    ) -> Result<NotificationAnalytics, StoreError>;

    async fn get_analytics(
        &self,
        notification_id: DbId,
    ) -> Result<Option<NotificationAnalytics>, StoreError>;

    /// Apply a lifecycle transition, optionally recording a failure reason
    /// and bumping a counter in the same write.
    async fn advance(
        &self,
        notification_id: DbId,
        stage: DeliveryStage,
        at: Timestamp,
        failure_reason: Option<&str>,
        counter: Option<Counter>,
    ) -> Result<NotificationAnalytics, StoreError>;

    /// Increment a counter without touching the lifecycle.
    async fn bump_counter(
        &self,
        notification_id: DbId,
        counter: Counter,
        at: Timestamp,
    ) -> Result<Option<NotificationAnalytics>, StoreError>;

    async fn stage_counts_by_type(
        &self,
        range: DateRange,
    ) -> Result<Vec<TypeStageCounts>, StoreError>;

    async fn list_failed(
        &self,
        range: DateRange,
        limit: i64,
    ) -> Result<Vec<NotificationAnalytics>, StoreError>;
}

#[async_trait]
pub trait AlertRuleStore: Send + Sync {
    async fn create_rule(&self, input: &NewAlertRule, at: Timestamp)
        -> Result<AlertRule, StoreError>;

    async fn get_rule(&self, id: DbId) -> Result<Option<AlertRule>, StoreError>;

    async fn list_rules(
        &self,
        user_id: DbId,
        enabled_only: bool,
    ) -> Result<Vec<AlertRule>, StoreError>;

    /// Enabled rules with a schedule whose `next_trigger_at` is unset or
    /// not after `now`.
    async fn list_scheduled(&self, now: Timestamp) -> Result<Vec<AlertRule>, StoreError>;

    async fn update_rule(
        &self,
        id: DbId,
        changes: &AlertRuleChanges,
        at: Timestamp,
    ) -> Result<Option<AlertRule>, StoreError>;

    async fn record_evaluation(
        &self,
        id: DbId,
        last_triggered_at: Option<Timestamp>,
        next_trigger_at: Option<Timestamp>,
        at: Timestamp,
    ) -> Result<bool, StoreError>;

    async fn delete_rule(&self, id: DbId, at: Timestamp) -> Result<bool, StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// Store backed by the PostgreSQL repositories.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn create_notification(
        &self,
        input: &NewNotification,
        at: Timestamp,
    ) -> Result<Notification, StoreError> {
        Ok(NotificationRepo::create(&self.pool, input, at).await?)
    }

    async fn get_notification(&self, id: DbId) -> Result<Option<Notification>, StoreError> {
        Ok(NotificationRepo::find_by_id(&self.pool, id).await?)
    }

    async fn mark_notification_sent(&self, id: DbId, at: Timestamp) -> Result<bool, StoreError> {
        Ok(NotificationRepo::mark_sent(&self.pool, id, at).await?)
    }

    async fn mark_notification_failed(
        &self,
        id: DbId,
        at: Timestamp,
        error: &str,
    ) -> Result<bool, StoreError> {
        Ok(NotificationRepo::mark_failed(&self.pool, id, at, error).await?)
    }

    async fn list_notifications(
        &self,
        user_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        Ok(NotificationRepo::list_for_user(&self.pool, user_id, limit, offset).await?)
    }

    async fn delete_notification(&self, id: DbId, at: Timestamp) -> Result<bool, StoreError> {
        Ok(NotificationRepo::soft_delete(&self.pool, id, at).await?)
    }
}

#[async_trait]
impl PreferenceStore for PgStore {
    async fn get_preference(
        &self,
        user_id: DbId,
        notification_type: NotificationType,
    ) -> Result<Option<NotificationPreference>, StoreError> {
        Ok(NotificationPreferenceRepo::get_for_type(&self.pool, user_id, notification_type).await?)
    }

    async fn list_preferences(
        &self,
        user_id: DbId,
    ) -> Result<Vec<NotificationPreference>, StoreError> {
        Ok(NotificationPreferenceRepo::list_for_user(&self.pool, user_id).await?)
    }

    async fn upsert_preference(
        &self,
        input: &NewPreference,
        at: Timestamp,
    ) -> Result<NotificationPreference, StoreError> {
        Ok(NotificationPreferenceRepo::upsert(&self.pool, input, at).await?)
    }
}

#[async_trait]
impl AnalyticsStore for PgStore {
    async fn track(
        &self,
        input: &NewAnalytics,
        at: Timestamp,
    ) -> Result<NotificationAnalytics, StoreError> {
        Ok(AnalyticsRepo::create(&self.pool, input, at).await?)
    }

    async fn get_analytics(
        &self,
        notification_id: DbId,
    ) -> Result<Option<NotificationAnalytics>, StoreError> {
        Ok(AnalyticsRepo::find_by_notification(&self.pool, notification_id).await?)
    }

    async fn advance(
        &self,
        notification_id: DbId,
        stage: DeliveryStage,
        at: Timestamp,
        failure_reason: Option<&str>,
        counter: Option<Counter>,
    ) -> Result<NotificationAnalytics, StoreError> {
        AnalyticsRepo::advance(&self.pool, notification_id, stage, at, failure_reason, counter)
            .await
    }

    async fn bump_counter(
        &self,
        notification_id: DbId,
        counter: Counter,
        at: Timestamp,
    ) -> Result<Option<NotificationAnalytics>, StoreError> {
        Ok(AnalyticsRepo::bump(&self.pool, notification_id, counter, at).await?)
    }

    async fn stage_counts_by_type(
        &self,
        range: DateRange,
    ) -> Result<Vec<TypeStageCounts>, StoreError> {
        Ok(AnalyticsRepo::stage_counts_by_type(&self.pool, range).await?)
    }

    async fn list_failed(
        &self,
        range: DateRange,
        limit: i64,
    ) -> Result<Vec<NotificationAnalytics>, StoreError> {
        Ok(AnalyticsRepo::list_failed(&self.pool, range, limit).await?)
    }
}

#[async_trait]
impl AlertRuleStore for PgStore {
    async fn create_rule(
        &self,
        input: &NewAlertRule,
        at: Timestamp,
    ) -> Result<AlertRule, StoreError> {
        Ok(AlertRuleRepo::create(&self.pool, input, at).await?)
    }

    async fn get_rule(&self, id: DbId) -> Result<Option<AlertRule>, StoreError> {
        Ok(AlertRuleRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list_rules(
        &self,
        user_id: DbId,
        enabled_only: bool,
    ) -> Result<Vec<AlertRule>, StoreError> {
        Ok(AlertRuleRepo::list_for_user(&self.pool, user_id, enabled_only).await?)
    }

    async fn list_scheduled(&self, now: Timestamp) -> Result<Vec<AlertRule>, StoreError> {
        Ok(AlertRuleRepo::list_scheduled(&self.pool, now).await?)
    }

    async fn update_rule(
        &self,
        id: DbId,
        changes: &AlertRuleChanges,
        at: Timestamp,
    ) -> Result<Option<AlertRule>, StoreError> {
        Ok(AlertRuleRepo::update(&self.pool, id, changes, at).await?)
    }

    async fn record_evaluation(
        &self,
        id: DbId,
        last_triggered_at: Option<Timestamp>,
        next_trigger_at: Option<Timestamp>,
        at: Timestamp,
    ) -> Result<bool, StoreError> {
        Ok(
            AlertRuleRepo::record_evaluation(&self.pool, id, last_triggered_at, next_trigger_at, at)
                .await?,
        )
    }

    async fn delete_rule(&self, id: DbId, at: Timestamp) -> Result<bool, StoreError> {
        Ok(AlertRuleRepo::soft_delete(&self.pool, id, at).await?)
    }
}
