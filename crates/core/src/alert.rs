//! Alert rule types and their strongly-typed condition sets.
//!
//! Conditions arrive as a free-form JSON object. [`AlertConditions::from_map`]
//! checks the keys each rule type requires and produces a typed variant;
//! rule types without required keys keep the raw object.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::notification::NotificationType;

/// Free-form condition object as stored in the `alert_rules.conditions`
/// column.
pub type ConditionMap = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Rule type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertRuleType {
    BudgetThreshold,
    GoalMilestone,
    GoalOffTrack,
    ScheduledReport,
    LargeTransaction,
    UnusualActivity,
}

/// All valid rule type strings.
const VALID_RULE_TYPES: &[&str] = &[
    "budget_threshold",
    "goal_milestone",
    "goal_off_track",
    "scheduled_report",
    "large_transaction",
    "unusual_activity",
];

impl AlertRuleType {
    pub const ALL: [AlertRuleType; 6] = [
        Self::BudgetThreshold,
        Self::GoalMilestone,
        Self::GoalOffTrack,
        Self::ScheduledReport,
        Self::LargeTransaction,
        Self::UnusualActivity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BudgetThreshold => "budget_threshold",
            Self::GoalMilestone => "goal_milestone",
            Self::GoalOffTrack => "goal_off_track",
            Self::ScheduledReport => "scheduled_report",
            Self::LargeTransaction => "large_transaction",
            Self::UnusualActivity => "unusual_activity",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "budget_threshold" => Ok(Self::BudgetThreshold),
            "goal_milestone" => Ok(Self::GoalMilestone),
            "goal_off_track" => Ok(Self::GoalOffTrack),
            "scheduled_report" => Ok(Self::ScheduledReport),
            "large_transaction" => Ok(Self::LargeTransaction),
            "unusual_activity" => Ok(Self::UnusualActivity),
            _ => Err(CoreError::Validation(format!(
                "Invalid alert rule type '{s}'. Must be one of: {}",
                VALID_RULE_TYPES.join(", ")
            ))),
        }
    }

    /// Notification type sent when a rule of this type triggers.
    pub fn notification_type(&self) -> NotificationType {
        match self {
            Self::BudgetThreshold | Self::LargeTransaction | Self::UnusualActivity => {
                NotificationType::BudgetAlert
            }
            Self::GoalMilestone | Self::GoalOffTrack => NotificationType::GoalAchieved,
            Self::ScheduledReport => NotificationType::MonthlySummary,
        }
    }
}

impl std::fmt::Display for AlertRuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Report frequency
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFrequency {
    Daily,
    Weekly,
    Monthly,
}

impl ReportFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            _ => Err(CoreError::Validation(format!(
                "Invalid report frequency '{s}'. Must be one of: daily, weekly, monthly"
            ))),
        }
    }
}

impl std::fmt::Display for ReportFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// Validated conditions, one variant per rule type.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertConditions {
    BudgetThreshold {
        budget_id: String,
        threshold_percentage: f64,
    },
    GoalMilestone {
        goal_id: String,
        milestone_percentage: f64,
    },
    ScheduledReport {
        frequency: ReportFrequency,
    },
    /// Rule types whose evaluators define their own keys.
    Opaque {
        rule_type: AlertRuleType,
        conditions: ConditionMap,
    },
}

impl AlertConditions {
    /// Validate `map` against the keys `rule_type` requires.
    pub fn from_map(rule_type: AlertRuleType, map: &ConditionMap) -> Result<Self, CoreError> {
        match rule_type {
            AlertRuleType::BudgetThreshold => Ok(Self::BudgetThreshold {
                budget_id: required_id(rule_type, map, "budget_id")?,
                threshold_percentage: required_percentage(rule_type, map, "threshold_percentage")?,
            }),
            AlertRuleType::GoalMilestone => Ok(Self::GoalMilestone {
                goal_id: required_id(rule_type, map, "goal_id")?,
                milestone_percentage: required_percentage(rule_type, map, "milestone_percentage")?,
            }),
            AlertRuleType::ScheduledReport => {
                let raw = map.get("frequency").ok_or_else(|| missing(rule_type, "frequency"))?;
                let s = raw.as_str().ok_or_else(|| {
                    CoreError::Validation(format!(
                        "{rule_type} condition 'frequency' must be a string"
                    ))
                })?;
                Ok(Self::ScheduledReport {
                    frequency: ReportFrequency::from_str(s)?,
                })
            }
            AlertRuleType::GoalOffTrack
            | AlertRuleType::LargeTransaction
            | AlertRuleType::UnusualActivity => Ok(Self::Opaque {
                rule_type,
                conditions: map.clone(),
            }),
        }
    }

    pub fn rule_type(&self) -> AlertRuleType {
        match self {
            Self::BudgetThreshold { .. } => AlertRuleType::BudgetThreshold,
            Self::GoalMilestone { .. } => AlertRuleType::GoalMilestone,
            Self::ScheduledReport { .. } => AlertRuleType::ScheduledReport,
            Self::Opaque { rule_type, .. } => *rule_type,
        }
    }

    /// Storage form of the conditions.
    pub fn to_map(&self) -> ConditionMap {
        let mut map = ConditionMap::new();
        match self {
            Self::BudgetThreshold {
                budget_id,
                threshold_percentage,
            } => {
                map.insert("budget_id".into(), Value::from(budget_id.clone()));
                map.insert(
                    "threshold_percentage".into(),
                    Value::from(*threshold_percentage),
                );
            }
            Self::GoalMilestone {
                goal_id,
                milestone_percentage,
            } => {
                map.insert("goal_id".into(), Value::from(goal_id.clone()));
                map.insert(
                    "milestone_percentage".into(),
                    Value::from(*milestone_percentage),
                );
            }
            Self::ScheduledReport { frequency } => {
                map.insert("frequency".into(), Value::from(frequency.as_str()));
            }
            Self::Opaque { conditions, .. } => map = conditions.clone(),
        }
        map
    }

    /// Report frequency for scheduled-report rules.
    pub fn report_frequency(&self) -> Option<ReportFrequency> {
        match self {
            Self::ScheduledReport { frequency } => Some(*frequency),
            _ => None,
        }
    }
}

fn missing(rule_type: AlertRuleType, key: &str) -> CoreError {
    CoreError::Validation(format!(
        "{rule_type} rule requires condition '{key}'"
    ))
}

fn required_id(
    rule_type: AlertRuleType,
    map: &ConditionMap,
    key: &str,
) -> Result<String, CoreError> {
    let value = map.get(key).ok_or_else(|| missing(rule_type, key))?;
    match value.as_str() {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(CoreError::Validation(format!(
            "{rule_type} condition '{key}' must be a non-empty string"
        ))),
    }
}

fn required_percentage(
    rule_type: AlertRuleType,
    map: &ConditionMap,
    key: &str,
) -> Result<f64, CoreError> {
    let value = map.get(key).ok_or_else(|| missing(rule_type, key))?;
    match value.as_f64() {
        Some(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(CoreError::Validation(format!(
            "{rule_type} condition '{key}' must be a positive number"
        ))),
    }
}
