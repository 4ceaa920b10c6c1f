//! Shared fakes and engine wiring for the integration tests.
//!
//! Everything runs on `MemoryStore`, a `FakeClock`, and in-process fakes for
//! the email sender and user/report collaborators.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use finpulse_core::alert::ReportFrequency;
use finpulse_core::clock::{Clock, FakeClock};
use finpulse_core::notification::EmailTemplate;
use finpulse_core::types::{new_id, DbId};
use finpulse_db::MemoryStore;
use finpulse_events::alerts::AlertEngine;
use finpulse_events::analytics::AnalyticsTracker;
use finpulse_events::collaborators::{Report, ReportGenerator, UserContact, UserRepository};
use finpulse_events::config::{HubConfig, SchedulerConfig};
use finpulse_events::delivery::email::{EmailError, EmailSender};
use finpulse_events::dispatcher::Dispatcher;
use finpulse_events::error::NotifyError;
use finpulse_events::preferences::PreferenceResolver;
use finpulse_events::scheduler::Scheduler;
use finpulse_events::ws::ConnectionRegistry;

// ---------------------------------------------------------------------------
// Email
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub template: EmailTemplate,
    pub data: serde_json::Value,
}

/// Records every send; fails when `failing` is set.
#[derive(Default)]
pub struct FakeEmailSender {
    pub sent: Mutex<Vec<SentEmail>>,
    pub failing: Mutex<bool>,
}

impl FakeEmailSender {
    pub fn fail(&self) {
        *self.failing.lock().unwrap() = true;
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for FakeEmailSender {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        template: EmailTemplate,
        data: &serde_json::Value,
    ) -> Result<(), EmailError> {
        if *self.failing.lock().unwrap() {
            return Err(EmailError::Delivery("smtp unavailable".into()));
        }
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            template,
            data: data.clone(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Users and reports
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeUsers {
    pub users: Mutex<Vec<UserContact>>,
}

impl FakeUsers {
    pub fn add(&self, name: &str) -> UserContact {
        let contact = UserContact {
            user_id: new_id(),
            email: format!("{}@example.com", name.to_lowercase()),
            name: name.to_string(),
        };
        self.users.lock().unwrap().push(contact.clone());
        contact
    }
}

#[async_trait]
impl UserRepository for FakeUsers {
    async fn list_active_users(&self) -> Result<Vec<UserContact>, NotifyError> {
        Ok(self.users.lock().unwrap().clone())
    }

    async fn find_contact(&self, user_id: DbId) -> Result<Option<UserContact>, NotifyError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.user_id == user_id)
            .cloned())
    }
}

/// Produces a report for every user except those listed in `failing_for`
/// (error) and `empty_for` (nothing to report).
#[derive(Default)]
pub struct FakeReports {
    pub failing_for: Mutex<Vec<DbId>>,
    pub empty_for: Mutex<Vec<DbId>>,
}

#[async_trait]
impl ReportGenerator for FakeReports {
    async fn generate(
        &self,
        user: &UserContact,
        frequency: ReportFrequency,
    ) -> Result<Option<Report>, NotifyError> {
        if self.failing_for.lock().unwrap().contains(&user.user_id) {
            return Err(NotifyError::Core(
                finpulse_core::error::CoreError::Internal("ledger unavailable".into()),
            ));
        }
        if self.empty_for.lock().unwrap().contains(&user.user_id) {
            return Ok(None);
        }
        Ok(Some(Report {
            subject: format!("Your {frequency} summary"),
            data: serde_json::json!({ "frequency": frequency, "spent": 1234.5 }),
        }))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: FakeClock,
    pub registry: Arc<ConnectionRegistry>,
    pub email: Arc<FakeEmailSender>,
    pub users: Arc<FakeUsers>,
    pub reports: Arc<FakeReports>,
    pub preferences: Arc<PreferenceResolver>,
    pub analytics: Arc<AnalyticsTracker>,
    pub dispatcher: Arc<Dispatcher>,
    pub alerts: Arc<AlertEngine>,
    pub scheduler: Scheduler,
}

impl Harness {
    /// Wire the engine. `configure` may register evaluators before the
    /// alert engine is shared.
    pub fn with_alerts(configure: impl FnOnce(&mut AlertEngine)) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = FakeClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap());
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let registry = ConnectionRegistry::start(HubConfig::default());
        let email = Arc::new(FakeEmailSender::default());
        let users = Arc::new(FakeUsers::default());
        let reports = Arc::new(FakeReports::default());
        let config = SchedulerConfig::standard().unwrap();

        let preferences = Arc::new(PreferenceResolver::new(store.clone(), shared_clock.clone()));
        let analytics = Arc::new(AnalyticsTracker::new(store.clone(), shared_clock.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            preferences.clone(),
            analytics.clone(),
            registry.clone(),
            email.clone(),
            shared_clock.clone(),
        ));
        let mut alerts = AlertEngine::new(store.clone(), shared_clock.clone(), config.timezone);
        configure(&mut alerts);
        let alerts = Arc::new(alerts);
        let scheduler = Scheduler::new(
            config,
            dispatcher.clone(),
            alerts.clone(),
            users.clone(),
            reports.clone(),
            shared_clock,
        );

        Self {
            store,
            clock,
            registry,
            email,
            users,
            reports,
            preferences,
            analytics,
            dispatcher,
            alerts,
            scheduler,
        }
    }

    pub fn new() -> Self {
        Self::with_alerts(|_| {})
    }
}
