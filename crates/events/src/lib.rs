//! Notification and alerting engine.
//!
//! - [`ws`]: connection registry and per-connection actor for real-time
//!   pushes.
//! - [`preferences`]: per-user channel resolution.
//! - [`dispatcher`]: multi-channel delivery (in-app, email).
//! - [`analytics`]: delivery lifecycle tracking and reporting.
//! - [`alerts`]: alert rule validation and evaluation.
//! - [`scheduler`]: cron-driven report fan-out and rule sweeps.
//!
//! Storage comes from `finpulse-db`; users and reports come from the
//! [`collaborators`] traits.

pub mod alerts;
pub mod analytics;
pub mod collaborators;
pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod preferences;
pub mod scheduler;
pub mod ws;

pub use alerts::{AlertEngine, Evaluation, FnEvaluator, RuleEvaluator, RuleInput};
pub use analytics::AnalyticsTracker;
pub use config::{ClientConfig, EngineConfig, HubConfig, SchedulerConfig};
pub use delivery::email::{EmailConfig, EmailError, EmailSender, SmtpEmailSender};
pub use dispatcher::{DispatchOutcome, Dispatcher, NotificationRequest};
pub use error::NotifyError;
pub use preferences::PreferenceResolver;
pub use scheduler::Scheduler;
pub use ws::ConnectionRegistry;
