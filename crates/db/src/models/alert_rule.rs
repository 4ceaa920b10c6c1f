//! Alert rule models and DTOs.

use finpulse_core::alert::{AlertConditions, AlertRuleType};
use finpulse_core::channels::DeliveryChannel;
use finpulse_core::types::{DbId, Timestamp};
use serde::{Serialize, Serializer};

/// A row from the `alert_rules` table with its conditions already
/// validated against the rule type.
#[derive(Debug, Clone, Serialize)]
pub struct AlertRule {
    pub id: DbId,
    pub user_id: DbId,
    pub name: String,
    pub rule_type: AlertRuleType,
    pub enabled: bool,
    #[serde(serialize_with = "serialize_conditions")]
    pub conditions: AlertConditions,
    /// Overrides the user's preferred channels when set.
    pub channels: Option<Vec<DeliveryChannel>>,
    pub schedule: Option<String>,
    pub last_triggered_at: Option<Timestamp>,
    pub next_trigger_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl AlertRule {
    /// Whether the scheduled sweep should evaluate this rule at `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.enabled
            && self.schedule.is_some()
            && self.next_trigger_at.is_none_or(|next| next <= now)
    }
}

fn serialize_conditions<S: Serializer>(
    conditions: &AlertConditions,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    conditions.to_map().serialize(serializer)
}

/// DTO for inserting a validated rule.
#[derive(Debug, Clone)]
pub struct NewAlertRule {
    pub user_id: DbId,
    pub name: String,
    pub enabled: bool,
    pub conditions: AlertConditions,
    pub channels: Option<Vec<DeliveryChannel>>,
    pub schedule: Option<String>,
    pub next_trigger_at: Option<Timestamp>,
}

/// Full replacement of a rule's mutable fields.
#[derive(Debug, Clone)]
pub struct AlertRuleChanges {
    pub name: String,
    pub enabled: bool,
    pub conditions: AlertConditions,
    pub channels: Option<Vec<DeliveryChannel>>,
    pub schedule: Option<String>,
    pub next_trigger_at: Option<Timestamp>,
}

impl From<&AlertRule> for AlertRuleChanges {
    fn from(rule: &AlertRule) -> Self {
        Self {
            name: rule.name.clone(),
            enabled: rule.enabled,
            conditions: rule.conditions.clone(),
            channels: rule.channels.clone(),
            schedule: rule.schedule.clone(),
            next_trigger_at: rule.next_trigger_at,
        }
    }
}
