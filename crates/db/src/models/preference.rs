//! Notification preference models.

use finpulse_core::channels::{dedup_channels, DeliveryChannel};
use finpulse_core::error::CoreError;
use finpulse_core::notification::NotificationType;
use finpulse_core::schedule::parse_timezone;
use finpulse_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};

/// Quiet-hours window. Stored and returned as configured; delivery does not
/// consult it yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub from_hour: u8,
    pub to_hour: u8,
    pub timezone: String,
}

/// A row from the `notification_preferences` table. Unique per
/// `(user_id, notification_type)`.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationPreference {
    pub id: DbId,
    pub user_id: DbId,
    pub notification_type: NotificationType,
    pub enabled: bool,
    pub preferred_channels: Vec<DeliveryChannel>,
    pub min_interval_minutes: i32,
    pub quiet_hours: Option<QuietHours>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for inserting or replacing a preference.
#[derive(Debug, Clone)]
pub struct NewPreference {
    pub user_id: DbId,
    pub notification_type: NotificationType,
    pub enabled: bool,
    pub preferred_channels: Vec<DeliveryChannel>,
    pub min_interval_minutes: i32,
    pub quiet_hours: Option<QuietHours>,
}

impl NewPreference {
    /// A preference row with the given enabled flag and channels and no
    /// interval or quiet hours.
    pub fn new(
        user_id: DbId,
        notification_type: NotificationType,
        enabled: bool,
        preferred_channels: Vec<DeliveryChannel>,
    ) -> Self {
        Self {
            user_id,
            notification_type,
            enabled,
            preferred_channels,
            min_interval_minutes: 0,
            quiet_hours: None,
        }
    }

    /// Validate field ranges and normalize the channel list.
    pub fn validated(mut self) -> Result<Self, CoreError> {
        if self.min_interval_minutes < 0 {
            return Err(CoreError::Validation(format!(
                "min_interval_minutes must not be negative, got {}",
                self.min_interval_minutes
            )));
        }
        if let Some(quiet) = &self.quiet_hours {
            for (name, hour) in [("from_hour", quiet.from_hour), ("to_hour", quiet.to_hour)] {
                if hour > 23 {
                    return Err(CoreError::Validation(format!(
                        "quiet hours {name} must be between 0 and 23, got {hour}"
                    )));
                }
            }
            parse_timezone(&quiet.timezone)?;
        }
        self.preferred_channels = dedup_channels(&self.preferred_channels);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finpulse_core::types::new_id;

    fn base() -> NewPreference {
        NewPreference::new(
            new_id(),
            NotificationType::BudgetAlert,
            true,
            vec![DeliveryChannel::Email, DeliveryChannel::Email],
        )
    }

    #[test]
    fn validated_dedups_channels() {
        let pref = base().validated().unwrap();
        assert_eq!(pref.preferred_channels, vec![DeliveryChannel::Email]);
    }

    #[test]
    fn rejects_out_of_range_quiet_hour() {
        let mut pref = base();
        pref.quiet_hours = Some(QuietHours {
            from_hour: 22,
            to_hour: 24,
            timezone: "UTC".into(),
        });
        assert!(pref.validated().is_err());
    }

    #[test]
    fn rejects_unknown_timezone() {
        let mut pref = base();
        pref.quiet_hours = Some(QuietHours {
            from_hour: 22,
            to_hour: 7,
            timezone: "Nowhere/Land".into(),
        });
        assert!(pref.validated().is_err());
    }

    #[test]
    fn rejects_negative_interval() {
        let mut pref = base();
        pref.min_interval_minutes = -5;
        assert!(pref.validated().is_err());
    }
}
