//! Per-user, per-type delivery preferences.
//!
//! A missing row means "use the defaults": send, over both channels. Quiet
//! hours and the minimum resend interval are stored and returned but do not
//! influence either decision.

use std::sync::Arc;

use finpulse_core::channels::DeliveryChannel;
use finpulse_core::clock::Clock;
use finpulse_core::notification::NotificationType;
use finpulse_core::types::DbId;
use finpulse_db::models::preference::{NewPreference, NotificationPreference};
use finpulse_db::PreferenceStore;

use crate::error::NotifyError;

/// Channels a preference row allows. `None` is the no-row case.
pub fn effective_channels(preference: Option<&NotificationPreference>) -> Vec<DeliveryChannel> {
    match preference {
        None => DeliveryChannel::defaults(),
        Some(p) if !p.enabled => Vec::new(),
        Some(p) if p.preferred_channels.is_empty() => DeliveryChannel::defaults(),
        Some(p) => p.preferred_channels.clone(),
    }
}

/// Whether a preference row allows sending at all.
pub fn should_send(preference: Option<&NotificationPreference>) -> bool {
    preference.is_none_or(|p| p.enabled)
}

/// Resolves preferences against the store.
pub struct PreferenceResolver {
    store: Arc<dyn PreferenceStore>,
    clock: Arc<dyn Clock>,
}

impl PreferenceResolver {
    pub fn new(store: Arc<dyn PreferenceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Channels to deliver `notification_type` over for this user. Empty
    /// when the user disabled the type.
    pub async fn get_effective_channels(
        &self,
        user_id: DbId,
        notification_type: NotificationType,
    ) -> Result<Vec<DeliveryChannel>, NotifyError> {
        let preference = self.store.get_preference(user_id, notification_type).await?;
        Ok(effective_channels(preference.as_ref()))
    }

    pub async fn should_send_notification(
        &self,
        user_id: DbId,
        notification_type: NotificationType,
    ) -> Result<bool, NotifyError> {
        let preference = self.store.get_preference(user_id, notification_type).await?;
        Ok(should_send(preference.as_ref()))
    }

    /// Validate and upsert a preference row.
    pub async fn set_preference(
        &self,
        input: NewPreference,
    ) -> Result<NotificationPreference, NotifyError> {
        let input = input.validated()?;
        let saved = self.store.upsert_preference(&input, self.clock.now()).await?;
        tracing::debug!(
            user_id = %saved.user_id,
            notification_type = %saved.notification_type,
            enabled = saved.enabled,
            "Notification preference saved"
        );
        Ok(saved)
    }

    pub async fn list_preferences(
        &self,
        user_id: DbId,
    ) -> Result<Vec<NotificationPreference>, NotifyError> {
        Ok(self.store.list_preferences(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finpulse_core::clock::SystemClock;
    use finpulse_core::types::new_id;
    use finpulse_db::models::preference::QuietHours;
    use finpulse_db::MemoryStore;

    fn resolver() -> PreferenceResolver {
        PreferenceResolver::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn no_row_uses_defaults() {
        let resolver = resolver();
        let user = new_id();

        let channels = resolver
            .get_effective_channels(user, NotificationType::BudgetAlert)
            .await
            .unwrap();
        assert_eq!(channels, vec![DeliveryChannel::Email, DeliveryChannel::InApp]);
        assert!(resolver
            .should_send_notification(user, NotificationType::BudgetAlert)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn disabled_row_suppresses_everything() {
        let resolver = resolver();
        let user = new_id();
        resolver
            .set_preference(NewPreference::new(
                user,
                NotificationType::GoalAchieved,
                false,
                vec![DeliveryChannel::Email],
            ))
            .await
            .unwrap();

        assert!(resolver
            .get_effective_channels(user, NotificationType::GoalAchieved)
            .await
            .unwrap()
            .is_empty());
        assert!(!resolver
            .should_send_notification(user, NotificationType::GoalAchieved)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn enabled_row_uses_preferred_channels() {
        let resolver = resolver();
        let user = new_id();
        resolver
            .set_preference(NewPreference::new(
                user,
                NotificationType::Welcome,
                true,
                vec![DeliveryChannel::InApp],
            ))
            .await
            .unwrap();

        let channels = resolver
            .get_effective_channels(user, NotificationType::Welcome)
            .await
            .unwrap();
        assert_eq!(channels, vec![DeliveryChannel::InApp]);
    }

    #[tokio::test]
    async fn enabled_row_without_channels_falls_back_to_defaults() {
        let resolver = resolver();
        let user = new_id();
        resolver
            .set_preference(NewPreference::new(user, NotificationType::Welcome, true, vec![]))
            .await
            .unwrap();

        let channels = resolver
            .get_effective_channels(user, NotificationType::Welcome)
            .await
            .unwrap();
        assert_eq!(channels, DeliveryChannel::defaults());
    }

    #[tokio::test]
    async fn quiet_hours_do_not_suppress() {
        let resolver = resolver();
        let user = new_id();
        let mut input = NewPreference::new(user, NotificationType::BudgetAlert, true, vec![]);
        input.quiet_hours = Some(QuietHours {
            from_hour: 0,
            to_hour: 23,
            timezone: "UTC".into(),
        });
        resolver.set_preference(input).await.unwrap();

        assert!(resolver
            .should_send_notification(user, NotificationType::BudgetAlert)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn invalid_preference_is_rejected_before_saving() {
        let resolver = resolver();
        let user = new_id();
        let mut input = NewPreference::new(user, NotificationType::Welcome, true, vec![]);
        input.min_interval_minutes = -1;

        let err = resolver.set_preference(input).await.unwrap_err();
        assert!(err.is_validation());
        assert!(resolver.list_preferences(user).await.unwrap().is_empty());
    }
}
