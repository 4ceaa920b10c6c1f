//! In-process store implementing every storage trait.
//!
//! Mirrors the PostgreSQL semantics that the engine relies on: guarded
//! status transitions, soft deletes, the `(user_id, notification_type)`
//! preference key, one analytics row per notification, and row-scoped
//! lifecycle transitions.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use finpulse_core::analytics::{DeliveryStage, Lifecycle};
use finpulse_core::error::CoreError;
use finpulse_core::notification::{NotificationStatus, NotificationType};
use finpulse_core::types::{new_id, DateRange, DbId, Timestamp};

use crate::error::StoreError;
use crate::models::alert_rule::{AlertRule, AlertRuleChanges, NewAlertRule};
use crate::models::analytics::{
    Counter, NewAnalytics, NotificationAnalytics, StageCounts, TypeStageCounts,
};
use crate::models::notification::{NewNotification, Notification};
use crate::models::preference::{NewPreference, NotificationPreference};
use crate::store::{AlertRuleStore, AnalyticsStore, NotificationStore, PreferenceStore};

#[derive(Default)]
struct Inner {
    notifications: HashMap<DbId, Notification>,
    preferences: HashMap<(DbId, NotificationType), NotificationPreference>,
    /// Keyed by notification id.
    analytics: HashMap<DbId, NotificationAnalytics>,
    rules: HashMap<DbId, StoredRule>,
}

struct StoredRule {
    rule: AlertRule,
    deleted_at: Option<Timestamp>,
}

impl StoredRule {
    fn live(&self) -> Option<&AlertRule> {
        self.deleted_at.is_none().then_some(&self.rule)
    }
}

/// Thread-safe in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create_notification(
        &self,
        input: &NewNotification,
        at: Timestamp,
    ) -> Result<Notification, StoreError> {
        let notification = Notification {
            id: new_id(),
            user_id: input.user_id,
            notification_type: input.notification_type,
            channel: input.channel,
            recipient: input.recipient.clone(),
            subject: input.subject.clone(),
            template_data: input.template_data.clone(),
            status: NotificationStatus::Pending,
            sent_at: None,
            failed_at: None,
            error_message: None,
            retry_count: 0,
            created_at: at,
            updated_at: at,
            deleted_at: None,
        };
        self.lock()
            .notifications
            .insert(notification.id, notification.clone());
        Ok(notification)
    }

    async fn get_notification(&self, id: DbId) -> Result<Option<Notification>, StoreError> {
        Ok(self
            .lock()
            .notifications
            .get(&id)
            .filter(|n| n.deleted_at.is_none())
            .cloned())
    }

    async fn mark_notification_sent(&self, id: DbId, at: Timestamp) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        match inner.notifications.get_mut(&id) {
            Some(n) if n.status == NotificationStatus::Pending => {
                n.status = NotificationStatus::Sent;
                n.sent_at = Some(at);
                n.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_notification_failed(
        &self,
        id: DbId,
        at: Timestamp,
        error: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        match inner.notifications.get_mut(&id) {
            Some(n) if n.status == NotificationStatus::Pending => {
                n.status = NotificationStatus::Failed;
                n.failed_at = Some(at);
                n.error_message = Some(error.to_string());
                n.retry_count += 1;
                n.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_notifications(
        &self,
        user_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        let mut rows: Vec<Notification> = self
            .lock()
            .notifications
            .values()
            .filter(|n| n.user_id == user_id && n.deleted_at.is_none())
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn delete_notification(&self, id: DbId, at: Timestamp) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        match inner.notifications.get_mut(&id) {
            Some(n) if n.deleted_at.is_none() => {
                n.deleted_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Preferences
// ---------------------------------------------------------------------------

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn get_preference(
        &self,
        user_id: DbId,
        notification_type: NotificationType,
    ) -> Result<Option<NotificationPreference>, StoreError> {
        Ok(self
            .lock()
            .preferences
            .get(&(user_id, notification_type))
            .cloned())
    }

    async fn list_preferences(
        &self,
        user_id: DbId,
    ) -> Result<Vec<NotificationPreference>, StoreError> {
        let mut rows: Vec<NotificationPreference> = self
            .lock()
            .preferences
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.notification_type.as_str());
        Ok(rows)
    }

    async fn upsert_preference(
        &self,
        input: &NewPreference,
        at: Timestamp,
    ) -> Result<NotificationPreference, StoreError> {
        let mut inner = self.lock();
        let key = (input.user_id, input.notification_type);
        let (id, created_at) = inner
            .preferences
            .get(&key)
            .map_or((new_id(), at), |existing| (existing.id, existing.created_at));
        let row = NotificationPreference {
            id,
            user_id: input.user_id,
            notification_type: input.notification_type,
            enabled: input.enabled,
            preferred_channels: input.preferred_channels.clone(),
            min_interval_minutes: input.min_interval_minutes,
            quiet_hours: input.quiet_hours.clone(),
            created_at,
            updated_at: at,
        };
        inner.preferences.insert(key, row.clone());
        Ok(row)
    }
}

// ---------------------------------------------------------------------------
// Analytics
// ---------------------------------------------------------------------------

#[async_trait]
impl AnalyticsStore for MemoryStore {
    async fn track(
        &self,
        input: &NewAnalytics,
        at: Timestamp,
    ) -> Result<NotificationAnalytics, StoreError> {
        let mut inner = self.lock();
        let row = inner
            .analytics
            .entry(input.notification_id)
            .or_insert_with(|| NotificationAnalytics {
                id: new_id(),
                notification_id: input.notification_id,
                user_id: input.user_id,
                notification_type: input.notification_type,
                channel: input.channel,
                lifecycle: Lifecycle::queued(at),
                open_count: 0,
                click_count: 0,
                failure_reason: None,
                created_at: at,
                updated_at: at,
            });
        Ok(row.clone())
    }

    async fn get_analytics(
        &self,
        notification_id: DbId,
    ) -> Result<Option<NotificationAnalytics>, StoreError> {
        Ok(self.lock().analytics.get(&notification_id).cloned())
    }

    async fn advance(
        &self,
        notification_id: DbId,
        stage: DeliveryStage,
        at: Timestamp,
        failure_reason: Option<&str>,
        counter: Option<Counter>,
    ) -> Result<NotificationAnalytics, StoreError> {
        let mut inner = self.lock();
        let row = inner
            .analytics
            .get_mut(&notification_id)
            .ok_or(CoreError::NotFound {
                entity: "notification_analytics",
                id: notification_id,
            })?;

        // Apply to a copy so a rejected transition leaves the row untouched.
        let mut lifecycle = row.lifecycle.clone();
        lifecycle.advance(stage, at)?;
        row.lifecycle = lifecycle;
        if let Some(reason) = failure_reason {
            row.failure_reason = Some(reason.to_string());
        }
        match counter {
            Some(Counter::Opens) => row.open_count += 1,
            Some(Counter::Clicks) => row.click_count += 1,
            None => {}
        }
        row.updated_at = at;
        Ok(row.clone())
    }

    async fn bump_counter(
        &self,
        notification_id: DbId,
        counter: Counter,
        at: Timestamp,
    ) -> Result<Option<NotificationAnalytics>, StoreError> {
        let mut inner = self.lock();
        let Some(row) = inner.analytics.get_mut(&notification_id) else {
            return Ok(None);
        };
        match counter {
            Counter::Opens => row.open_count += 1,
            Counter::Clicks => row.click_count += 1,
        }
        row.updated_at = at;
        Ok(Some(row.clone()))
    }

    async fn stage_counts_by_type(
        &self,
        range: DateRange,
    ) -> Result<Vec<TypeStageCounts>, StoreError> {
        let inner = self.lock();
        let mut by_type: HashMap<NotificationType, StageCounts> = HashMap::new();
        for row in inner
            .analytics
            .values()
            .filter(|r| range.contains(r.lifecycle.queued_at))
        {
            by_type.entry(row.notification_type).or_default().record(row);
        }
        let mut out: Vec<TypeStageCounts> = by_type
            .into_iter()
            .map(|(notification_type, counts)| TypeStageCounts {
                notification_type,
                counts,
            })
            .collect();
        out.sort_by_key(|t| t.notification_type.as_str());
        Ok(out)
    }

    async fn list_failed(
        &self,
        range: DateRange,
        limit: i64,
    ) -> Result<Vec<NotificationAnalytics>, StoreError> {
        let mut rows: Vec<NotificationAnalytics> = self
            .lock()
            .analytics
            .values()
            .filter(|r| {
                r.lifecycle.status == DeliveryStage::Failed && range.contains(r.lifecycle.queued_at)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.lifecycle.failed_at.cmp(&a.lifecycle.failed_at));
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Alert rules
// ---------------------------------------------------------------------------

#[async_trait]
impl AlertRuleStore for MemoryStore {
    async fn create_rule(
        &self,
        input: &NewAlertRule,
        at: Timestamp,
    ) -> Result<AlertRule, StoreError> {
        let rule = AlertRule {
            id: new_id(),
            user_id: input.user_id,
            name: input.name.clone(),
            rule_type: input.conditions.rule_type(),
            enabled: input.enabled,
            conditions: input.conditions.clone(),
            channels: input.channels.clone(),
            schedule: input.schedule.clone(),
            last_triggered_at: None,
            next_trigger_at: input.next_trigger_at,
            created_at: at,
            updated_at: at,
        };
        self.lock().rules.insert(
            rule.id,
            StoredRule {
                rule: rule.clone(),
                deleted_at: None,
            },
        );
        Ok(rule)
    }

    async fn get_rule(&self, id: DbId) -> Result<Option<AlertRule>, StoreError> {
        Ok(self
            .lock()
            .rules
            .get(&id)
            .and_then(StoredRule::live)
            .cloned())
    }

    async fn list_rules(
        &self,
        user_id: DbId,
        enabled_only: bool,
    ) -> Result<Vec<AlertRule>, StoreError> {
        let mut rows: Vec<AlertRule> = self
            .lock()
            .rules
            .values()
            .filter_map(StoredRule::live)
            .filter(|r| r.user_id == user_id && (!enabled_only || r.enabled))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(rows)
    }

    async fn list_scheduled(&self, now: Timestamp) -> Result<Vec<AlertRule>, StoreError> {
        let mut rows: Vec<AlertRule> = self
            .lock()
            .rules
            .values()
            .filter_map(StoredRule::live)
            .filter(|r| r.is_due(now))
            .cloned()
            .collect();
        // `None` sorts first, matching NULLS FIRST.
        rows.sort_by(|a, b| (a.next_trigger_at, a.id).cmp(&(b.next_trigger_at, b.id)));
        Ok(rows)
    }

    async fn update_rule(
        &self,
        id: DbId,
        changes: &AlertRuleChanges,
        at: Timestamp,
    ) -> Result<Option<AlertRule>, StoreError> {
        let mut inner = self.lock();
        let Some(stored) = inner.rules.get_mut(&id).filter(|s| s.deleted_at.is_none()) else {
            return Ok(None);
        };
        let rule = &mut stored.rule;
        rule.name = changes.name.clone();
        rule.rule_type = changes.conditions.rule_type();
        rule.enabled = changes.enabled;
        rule.conditions = changes.conditions.clone();
        rule.channels = changes.channels.clone();
        rule.schedule = changes.schedule.clone();
        rule.next_trigger_at = changes.next_trigger_at;
        rule.updated_at = at;
        Ok(Some(rule.clone()))
    }

    async fn record_evaluation(
        &self,
        id: DbId,
        last_triggered_at: Option<Timestamp>,
        next_trigger_at: Option<Timestamp>,
        at: Timestamp,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let Some(stored) = inner.rules.get_mut(&id).filter(|s| s.deleted_at.is_none()) else {
            return Ok(false);
        };
        if last_triggered_at.is_some() {
            stored.rule.last_triggered_at = last_triggered_at;
        }
        stored.rule.next_trigger_at = next_trigger_at;
        stored.rule.updated_at = at;
        Ok(true)
    }

    async fn delete_rule(&self, id: DbId, at: Timestamp) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        match inner.rules.get_mut(&id) {
            Some(stored) if stored.deleted_at.is_none() => {
                stored.deleted_at = Some(at);
                stored.rule.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
