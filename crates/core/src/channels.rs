//! Delivery channel names and the [`DeliveryChannel`] enum.
//!
//! The string constants must match the values stored in the
//! `notifications.channel` and `notification_preferences.preferred_channels`
//! columns.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// In-app notification: persisted for the notification bell and pushed over
/// any live WebSocket connection.
pub const CHANNEL_IN_APP: &str = "in_app";

/// Email notification delivered through the injected email sender.
pub const CHANNEL_EMAIL: &str = "email";

/// All valid channel strings.
const VALID_CHANNELS: &[&str] = &[CHANNEL_EMAIL, CHANNEL_IN_APP];

/// A notification transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    Email,
    InApp,
}

impl DeliveryChannel {
    /// Channels used when a user has no preference row for a notification
    /// type.
    pub const DEFAULTS: [DeliveryChannel; 2] = [DeliveryChannel::Email, DeliveryChannel::InApp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => CHANNEL_EMAIL,
            Self::InApp => CHANNEL_IN_APP,
        }
    }

    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            CHANNEL_EMAIL => Ok(Self::Email),
            CHANNEL_IN_APP => Ok(Self::InApp),
            _ => Err(CoreError::Validation(format!(
                "Invalid channel '{s}'. Must be one of: {}",
                VALID_CHANNELS.join(", ")
            ))),
        }
    }

    /// The default channel set as an owned list.
    pub fn defaults() -> Vec<DeliveryChannel> {
        Self::DEFAULTS.to_vec()
    }
}

impl std::fmt::Display for DeliveryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remove repeated channels, keeping the first occurrence of each.
pub fn dedup_channels(channels: &[DeliveryChannel]) -> Vec<DeliveryChannel> {
    let mut out = Vec::with_capacity(channels.len());
    for channel in channels {
        if !out.contains(channel) {
            out.push(*channel);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_channels() {
        for channel in DeliveryChannel::DEFAULTS {
            assert_eq!(DeliveryChannel::from_str(channel.as_str()).unwrap(), channel);
        }
    }

    #[test]
    fn rejects_unknown_channel() {
        let err = DeliveryChannel::from_str("sms").unwrap_err();
        assert!(err.to_string().contains("Invalid channel 'sms'"));
    }

    #[test]
    fn dedup_preserves_first_occurrence_order() {
        let channels = [
            DeliveryChannel::InApp,
            DeliveryChannel::Email,
            DeliveryChannel::InApp,
        ];
        assert_eq!(
            dedup_channels(&channels),
            vec![DeliveryChannel::InApp, DeliveryChannel::Email]
        );
    }
}
