//! Notification types, delivery status, and the type → email template table.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Notification type
// ---------------------------------------------------------------------------

/// What a notification is about. Preferences are keyed by this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Welcome,
    BudgetAlert,
    GoalAchieved,
    MonthlySummary,
    EmailVerification,
    PasswordReset,
}

/// All valid notification type strings.
const VALID_TYPES: &[&str] = &[
    "welcome",
    "budget_alert",
    "goal_achieved",
    "monthly_summary",
    "email_verification",
    "password_reset",
];

impl NotificationType {
    pub const ALL: [NotificationType; 6] = [
        Self::Welcome,
        Self::BudgetAlert,
        Self::GoalAchieved,
        Self::MonthlySummary,
        Self::EmailVerification,
        Self::PasswordReset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::BudgetAlert => "budget_alert",
            Self::GoalAchieved => "goal_achieved",
            Self::MonthlySummary => "monthly_summary",
            Self::EmailVerification => "email_verification",
            Self::PasswordReset => "password_reset",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "welcome" => Ok(Self::Welcome),
            "budget_alert" => Ok(Self::BudgetAlert),
            "goal_achieved" => Ok(Self::GoalAchieved),
            "monthly_summary" => Ok(Self::MonthlySummary),
            "email_verification" => Ok(Self::EmailVerification),
            "password_reset" => Ok(Self::PasswordReset),
            _ => Err(CoreError::Validation(format!(
                "Invalid notification type '{s}'. Must be one of: {}",
                VALID_TYPES.join(", ")
            ))),
        }
    }

    /// Email template used when this type is delivered over the email
    /// channel.
    pub fn email_template(&self) -> EmailTemplate {
        match self {
            Self::Welcome => EmailTemplate::Welcome,
            Self::BudgetAlert => EmailTemplate::BudgetAlert,
            Self::GoalAchieved => EmailTemplate::GoalAchieved,
            Self::MonthlySummary => EmailTemplate::MonthlySummary,
            Self::EmailVerification => EmailTemplate::VerifyEmail,
            Self::PasswordReset => EmailTemplate::ResetPassword,
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Email templates
// ---------------------------------------------------------------------------

/// Template reference handed to the email sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTemplate {
    Welcome,
    BudgetAlert,
    GoalAchieved,
    MonthlySummary,
    VerifyEmail,
    ResetPassword,
}

impl EmailTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::BudgetAlert => "budget_alert",
            Self::GoalAchieved => "goal_achieved",
            Self::MonthlySummary => "monthly_summary",
            Self::VerifyEmail => "verify_email",
            Self::ResetPassword => "reset_password",
        }
    }
}

impl std::fmt::Display for EmailTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Delivery status of a single notification row.
///
/// `Pending` is the only non-terminal state; `Sent` and `Failed` accept no
/// further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(CoreError::Validation(format!(
                "Invalid notification status '{s}'"
            ))),
        }
    }

    /// Check whether a transition from `self` to `to` is allowed.
    pub fn can_transition(&self, to: NotificationStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Sent) | (Self::Pending, Self::Failed)
        )
    }
}
