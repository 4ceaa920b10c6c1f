//! PostgreSQL repositories, one per table.

pub mod alert_rule_repo;
pub mod analytics_repo;
pub mod notification_preference_repo;
pub mod notification_repo;

pub use alert_rule_repo::AlertRuleRepo;
pub use analytics_repo::AnalyticsRepo;
pub use notification_preference_repo::NotificationPreferenceRepo;
pub use notification_repo::NotificationRepo;

use finpulse_core::channels::DeliveryChannel;

use crate::error::decode_error;

/// Decode a `TEXT[]` channel column.
pub(crate) fn decode_channels(raw: Vec<String>) -> Result<Vec<DeliveryChannel>, sqlx::Error> {
    raw.iter()
        .map(|s| DeliveryChannel::from_str(s).map_err(decode_error))
        .collect()
}

/// Encode channels for a `TEXT[]` column.
pub(crate) fn encode_channels(channels: &[DeliveryChannel]) -> Vec<String> {
    channels.iter().map(|c| c.as_str().to_string()).collect()
}
