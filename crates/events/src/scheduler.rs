//! Cron-driven background jobs.
//!
//! [`Scheduler`] runs one task per fixed job: daily, weekly, and monthly
//! report fan-out, plus a short-interval sweep of due alert rules. Each
//! task sleeps until its next cron time (computed from the injected
//! [`Clock`]) and then runs the job to completion; cancellation is only
//! observed between runs, so [`Scheduler::stop`] drains in-flight work.
//!
//! Every job handles its candidates one at a time and logs and skips
//! per-item failures.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use finpulse_core::alert::ReportFrequency;
use finpulse_core::clock::Clock;
use finpulse_core::notification::NotificationType;
use finpulse_core::schedule::CronSchedule;
use finpulse_core::types::Timestamp;
use finpulse_db::models::alert_rule::AlertRule;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::alerts::{AlertEngine, Evaluation};
use crate::collaborators::{ReportGenerator, UserContact, UserRepository};
use crate::config::SchedulerConfig;
use crate::dispatcher::{DispatchOutcome, Dispatcher, NotificationRequest};
use crate::error::NotifyError;

/// Counts from one report fan-out run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutSummary {
    pub users: usize,
    pub dispatched: usize,
    /// No report to send, or suppressed by preference.
    pub skipped: usize,
    pub failed: usize,
}

/// Counts from one rule sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub evaluated: usize,
    pub triggered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Report(ReportFrequency),
    RuleSweep,
}

impl Job {
    fn name(&self) -> &'static str {
        match self {
            Self::Report(ReportFrequency::Daily) => "daily_report",
            Self::Report(ReportFrequency::Weekly) => "weekly_report",
            Self::Report(ReportFrequency::Monthly) => "monthly_report",
            Self::RuleSweep => "rule_sweep",
        }
    }
}

/// Shared state of every job task.
struct Jobs {
    config: SchedulerConfig,
    dispatcher: Arc<Dispatcher>,
    alerts: Arc<AlertEngine>,
    users: Arc<dyn UserRepository>,
    reports: Arc<dyn ReportGenerator>,
    clock: Arc<dyn Clock>,
}

struct Running {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub struct Scheduler {
    jobs: Arc<Jobs>,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        dispatcher: Arc<Dispatcher>,
        alerts: Arc<AlertEngine>,
        users: Arc<dyn UserRepository>,
        reports: Arc<dyn ReportGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            jobs: Arc::new(Jobs {
                config,
                dispatcher,
                alerts,
                users,
                reports,
                clock,
            }),
            running: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the job tasks. A second call while running only warns.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(&self) {
        let mut running = self.state();
        if running.is_some() {
            tracing::warn!("Scheduler already running, ignoring start");
            return;
        }

        let cancel = CancellationToken::new();
        let handles = [
            Job::Report(ReportFrequency::Daily),
            Job::Report(ReportFrequency::Weekly),
            Job::Report(ReportFrequency::Monthly),
            Job::RuleSweep,
        ]
        .into_iter()
        .map(|job| tokio::spawn(run_job(Arc::clone(&self.jobs), job, cancel.clone())))
        .collect::<Vec<_>>();

        tracing::info!(
            jobs = handles.len(),
            timezone = %self.jobs.config.timezone,
            "Scheduler started"
        );
        *running = Some(Running { cancel, handles });
    }

    /// Stop the job tasks and wait for in-flight runs to finish. Calling it
    /// while stopped only warns.
    pub async fn stop(&self) {
        let running = self.state().take();
        let Some(Running { cancel, handles }) = running else {
            tracing::warn!("Scheduler not running, ignoring stop");
            return;
        };

        cancel.cancel();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Scheduler job task failed");
            }
        }
        tracing::info!("Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state().is_some()
    }

    /// Send the period's report to every active user.
    pub async fn run_report_fanout(
        &self,
        frequency: ReportFrequency,
    ) -> Result<FanoutSummary, NotifyError> {
        self.jobs.report_fanout(frequency).await
    }

    /// Evaluate and dispatch every due scheduled rule.
    pub async fn run_rule_sweep(&self) -> Result<SweepSummary, NotifyError> {
        self.jobs.rule_sweep().await
    }
}

// ---------------------------------------------------------------------------
// Job loop
// ---------------------------------------------------------------------------

async fn run_job(jobs: Arc<Jobs>, job: Job, cancel: CancellationToken) {
    let schedule = jobs.schedule(job).clone();
    let mut after = jobs.clock.now();

    loop {
        let Some(next) = schedule.next_after(after, jobs.config.timezone) else {
            tracing::warn!(job = job.name(), "Schedule has no future fire time");
            break;
        };
        let wait = (next - jobs.clock.now()).to_std().unwrap_or_default();

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        jobs.run(job).await;
        // Never fire twice for the same slot, even if the clock lags.
        after = jobs.clock.now().max(next);
    }

    tracing::debug!(job = job.name(), "Scheduler job exited");
}

impl Jobs {
    fn schedule(&self, job: Job) -> &CronSchedule {
        match job {
            Job::Report(ReportFrequency::Daily) => &self.config.daily_report,
            Job::Report(ReportFrequency::Weekly) => &self.config.weekly_report,
            Job::Report(ReportFrequency::Monthly) => &self.config.monthly_report,
            Job::RuleSweep => &self.config.rule_sweep,
        }
    }

    async fn run(&self, job: Job) {
        match job {
            Job::Report(frequency) => match self.report_fanout(frequency).await {
                Ok(summary) => tracing::info!(
                    job = job.name(),
                    users = summary.users,
                    dispatched = summary.dispatched,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    "Report fan-out finished"
                ),
                Err(e) => tracing::error!(job = job.name(), error = %e, "Report fan-out failed"),
            },
            Job::RuleSweep => match self.rule_sweep().await {
                Ok(summary) => tracing::info!(
                    evaluated = summary.evaluated,
                    triggered = summary.triggered,
                    failed = summary.failed,
                    "Rule sweep finished"
                ),
                Err(e) => tracing::error!(error = %e, "Rule sweep failed"),
            },
        }
    }

    async fn report_fanout(
        &self,
        frequency: ReportFrequency,
    ) -> Result<FanoutSummary, NotifyError> {
        let users = self.users.list_active_users().await?;
        let mut summary = FanoutSummary {
            users: users.len(),
            ..FanoutSummary::default()
        };

        for user in &users {
            match self.send_report(user, frequency).await {
                Ok(true) => summary.dispatched += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(
                        user_id = %user.user_id,
                        frequency = %frequency,
                        error = %e,
                        "Failed to send report"
                    );
                }
            }
        }
        Ok(summary)
    }

    /// Returns whether a report went out.
    async fn send_report(
        &self,
        user: &UserContact,
        frequency: ReportFrequency,
    ) -> Result<bool, NotifyError> {
        let Some(report) = self.reports.generate(user, frequency).await? else {
            return Ok(false);
        };
        let request = NotificationRequest {
            user_id: user.user_id,
            email: user.email.clone(),
            name: user.name.clone(),
            notification_type: NotificationType::MonthlySummary,
            subject: report.subject,
            data: report.data,
        };
        let outcome = self.dispatcher.notify(&request).await?;
        Ok(matches!(outcome, DispatchOutcome::Dispatched(_)))
    }

    async fn rule_sweep(&self) -> Result<SweepSummary, NotifyError> {
        let now = self.clock.now();
        let rules = self.alerts.list_scheduled(now).await?;
        let mut summary = SweepSummary::default();

        for rule in &rules {
            summary.evaluated += 1;
            match self.process_rule(rule).await {
                Ok(true) => summary.triggered += 1,
                Ok(false) => {}
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(rule_id = %rule.id, error = %e, "Scheduled rule failed");
                }
            }
            self.plan_next(rule, now).await;
        }
        Ok(summary)
    }

    /// Evaluate a due rule and dispatch it if it fired. Returns whether it
    /// fired.
    async fn process_rule(&self, rule: &AlertRule) -> Result<bool, NotifyError> {
        let Evaluation::Triggered { subject, data } = self.alerts.evaluate_rule(rule).await? else {
            return Ok(false);
        };

        let Some(contact) = self.users.find_contact(rule.user_id).await? else {
            tracing::warn!(
                rule_id = %rule.id,
                user_id = %rule.user_id,
                "Rule owner has no contact"
            );
            return Ok(true);
        };
        let request = NotificationRequest {
            user_id: rule.user_id,
            email: contact.email,
            name: contact.name,
            notification_type: rule.rule_type.notification_type(),
            subject,
            data,
        };
        self.dispatcher
            .notify_with_channels(&request, rule.channels.as_deref())
            .await?;
        Ok(true)
    }

    /// Move the rule to its next slot. A schedule that cannot fire again
    /// disables the rule so the sweep stops picking it up.
    async fn plan_next(&self, rule: &AlertRule, now: Timestamp) {
        let next = match self.alerts.next_trigger_after(rule, now) {
            Ok(Some(next)) => next,
            Ok(None) => {
                tracing::warn!(
                    rule_id = %rule.id,
                    "Schedule has no future fire time, disabling rule"
                );
                self.retire(rule).await;
                return;
            }
            Err(e) => {
                tracing::error!(
                    rule_id = %rule.id,
                    error = %e,
                    "Invalid stored schedule, disabling rule"
                );
                self.retire(rule).await;
                return;
            }
        };
        if let Err(e) = self.alerts.reschedule(rule, Some(next)).await {
            tracing::error!(rule_id = %rule.id, error = %e, "Failed to reschedule rule");
        }
    }

    async fn retire(&self, rule: &AlertRule) {
        if let Err(e) = self.alerts.toggle_rule(rule.id, false).await {
            tracing::error!(rule_id = %rule.id, error = %e, "Failed to disable rule");
        }
    }
}
