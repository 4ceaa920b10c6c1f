//! Row models and input DTOs.

pub mod alert_rule;
pub mod analytics;
pub mod notification;
pub mod preference;
