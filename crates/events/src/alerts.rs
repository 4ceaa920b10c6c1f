//! Alert rule engine.
//!
//! Rules are validated on create/update: the condition map must carry the
//! keys its rule type requires, and a schedule must be a valid cron
//! expression. Evaluation dispatches on the rule type through a table of
//! [`RuleEvaluator`]s that hosts can replace.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono_tz::Tz;
use finpulse_core::alert::{AlertConditions, AlertRuleType, ConditionMap};
use finpulse_core::channels::{dedup_channels, DeliveryChannel};
use finpulse_core::clock::Clock;
use finpulse_core::error::CoreError;
use finpulse_core::schedule::CronSchedule;
use finpulse_core::types::{DbId, Timestamp};
use finpulse_db::models::alert_rule::{AlertRule, AlertRuleChanges, NewAlertRule};
use finpulse_db::AlertRuleStore;

use crate::error::NotifyError;

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    NotTriggered,
    Triggered {
        subject: String,
        data: serde_json::Value,
    },
}

impl Evaluation {
    pub fn is_triggered(&self) -> bool {
        matches!(self, Self::Triggered { .. })
    }
}

/// Decides whether one rule fires.
#[async_trait]
pub trait RuleEvaluator: Send + Sync {
    async fn evaluate(&self, rule: &AlertRule) -> Result<Evaluation, NotifyError>;
}

/// Stand-in for evaluators whose data lives in another domain (budgets,
/// goals, transactions). Never fires.
#[derive(Debug, Default)]
pub struct UnavailableEvaluator;

#[async_trait]
impl RuleEvaluator for UnavailableEvaluator {
    async fn evaluate(&self, rule: &AlertRule) -> Result<Evaluation, NotifyError> {
        tracing::trace!(
            rule_id = %rule.id,
            rule_type = %rule.rule_type,
            "No evaluator data source"
        );
        Ok(Evaluation::NotTriggered)
    }
}

/// A due scheduled report always fires.
#[derive(Debug, Default)]
pub struct ScheduledReportEvaluator;

#[async_trait]
impl RuleEvaluator for ScheduledReportEvaluator {
    async fn evaluate(&self, rule: &AlertRule) -> Result<Evaluation, NotifyError> {
        let frequency = rule.conditions.report_frequency().ok_or_else(|| {
            CoreError::Internal(format!("rule {} is not a scheduled report", rule.id))
        })?;
        Ok(Evaluation::Triggered {
            subject: format!("Your {frequency} report: {}", rule.name),
            data: serde_json::json!({
                "rule_id": rule.id,
                "rule_name": rule.name,
                "frequency": frequency,
            }),
        })
    }
}

/// Adapts a closure into a [`RuleEvaluator`].
pub struct FnEvaluator<F>(pub F);

#[async_trait]
impl<F> RuleEvaluator for FnEvaluator<F>
where
    F: Fn(&AlertRule) -> Result<Evaluation, NotifyError> + Send + Sync,
{
    async fn evaluate(&self, rule: &AlertRule) -> Result<Evaluation, NotifyError> {
        (self.0)(rule)
    }
}

// ---------------------------------------------------------------------------
// Rule input
// ---------------------------------------------------------------------------

/// User-supplied rule fields, before validation.
#[derive(Debug, Clone)]
pub struct RuleInput {
    pub name: String,
    pub rule_type: AlertRuleType,
    pub enabled: bool,
    pub conditions: ConditionMap,
    pub channels: Option<Vec<DeliveryChannel>>,
    pub schedule: Option<String>,
}

/// Validated form of a [`RuleInput`].
struct ValidatedRule {
    name: String,
    conditions: AlertConditions,
    channels: Option<Vec<DeliveryChannel>>,
    schedule: Option<CronSchedule>,
}

impl RuleInput {
    fn validate(&self) -> Result<ValidatedRule, CoreError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation("Rule name must not be empty".into()));
        }
        let conditions = AlertConditions::from_map(self.rule_type, &self.conditions)?;
        let schedule = self
            .schedule
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(CronSchedule::parse)
            .transpose()?;
        let channels = self
            .channels
            .as_deref()
            .map(dedup_channels)
            .filter(|c| !c.is_empty());
        Ok(ValidatedRule {
            name: name.to_string(),
            conditions,
            channels,
            schedule,
        })
    }
}

// ---------------------------------------------------------------------------
// AlertEngine
// ---------------------------------------------------------------------------

pub struct AlertEngine {
    store: Arc<dyn AlertRuleStore>,
    evaluators: HashMap<AlertRuleType, Arc<dyn RuleEvaluator>>,
    clock: Arc<dyn Clock>,
    timezone: Tz,
}

impl AlertEngine {
    /// Engine with the default evaluator table: scheduled reports fire,
    /// every other type is unavailable until a host registers one.
    pub fn new(store: Arc<dyn AlertRuleStore>, clock: Arc<dyn Clock>, timezone: Tz) -> Self {
        let unavailable: Arc<dyn RuleEvaluator> = Arc::new(UnavailableEvaluator);
        let mut evaluators: HashMap<AlertRuleType, Arc<dyn RuleEvaluator>> = AlertRuleType::ALL
            .iter()
            .map(|t| (*t, Arc::clone(&unavailable)))
            .collect();
        evaluators.insert(AlertRuleType::ScheduledReport, Arc::new(ScheduledReportEvaluator));

        Self {
            store,
            evaluators,
            clock,
            timezone,
        }
    }

    /// Replace the evaluator for a rule type.
    pub fn register_evaluator(
        &mut self,
        rule_type: AlertRuleType,
        evaluator: Arc<dyn RuleEvaluator>,
    ) {
        self.evaluators.insert(rule_type, evaluator);
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub async fn create_rule(
        &self,
        user_id: DbId,
        input: RuleInput,
    ) -> Result<AlertRule, NotifyError> {
        let rule = input.validate()?;
        let now = self.clock.now();
        let next_trigger_at = self.first_trigger(rule.schedule.as_ref(), now)?;

        let created = self
            .store
            .create_rule(
                &NewAlertRule {
                    user_id,
                    name: rule.name,
                    enabled: input.enabled,
                    conditions: rule.conditions,
                    channels: rule.channels,
                    schedule: rule.schedule.map(|s| s.expression().to_string()),
                    next_trigger_at,
                },
                now,
            )
            .await?;
        tracing::info!(
            %user_id,
            rule_id = %created.id,
            rule_type = %created.rule_type,
            "Alert rule created"
        );
        Ok(created)
    }

    /// Replace a rule's fields. The next trigger time is recomputed from
    /// the new schedule.
    pub async fn update_rule(&self, id: DbId, input: RuleInput) -> Result<AlertRule, NotifyError> {
        let rule = input.validate()?;
        let now = self.clock.now();
        let next_trigger_at = self.first_trigger(rule.schedule.as_ref(), now)?;

        let changes = AlertRuleChanges {
            name: rule.name,
            enabled: input.enabled,
            conditions: rule.conditions,
            channels: rule.channels,
            schedule: rule.schedule.map(|s| s.expression().to_string()),
            next_trigger_at,
        };
        self.store
            .update_rule(id, &changes, now)
            .await?
            .ok_or_else(|| rule_not_found(id))
    }

    pub async fn get_rule(&self, id: DbId) -> Result<AlertRule, NotifyError> {
        self.store.get_rule(id).await?.ok_or_else(|| rule_not_found(id))
    }

    pub async fn list_user_rules(&self, user_id: DbId) -> Result<Vec<AlertRule>, NotifyError> {
        Ok(self.store.list_rules(user_id, false).await?)
    }

    /// Soft-delete a rule.
    pub async fn delete_rule(&self, id: DbId) -> Result<(), NotifyError> {
        if self.store.delete_rule(id, self.clock.now()).await? {
            Ok(())
        } else {
            Err(rule_not_found(id))
        }
    }

    pub async fn toggle_rule(&self, id: DbId, enabled: bool) -> Result<AlertRule, NotifyError> {
        let rule = self.get_rule(id).await?;
        let mut changes = AlertRuleChanges::from(&rule);
        changes.enabled = enabled;
        self.store
            .update_rule(id, &changes, self.clock.now())
            .await?
            .ok_or_else(|| rule_not_found(id))
    }

    /// Evaluate one rule. Disabled rules never fire; a fired rule has its
    /// `last_triggered_at` stamped.
    pub async fn evaluate_rule(&self, rule: &AlertRule) -> Result<Evaluation, NotifyError> {
        if !rule.enabled {
            return Ok(Evaluation::NotTriggered);
        }
        let Some(evaluator) = self.evaluators.get(&rule.rule_type) else {
            return Ok(Evaluation::NotTriggered);
        };

        let evaluation = evaluator.evaluate(rule).await?;
        if evaluation.is_triggered() {
            let now = self.clock.now();
            self.store
                .record_evaluation(rule.id, Some(now), rule.next_trigger_at, now)
                .await?;
            tracing::info!(rule_id = %rule.id, user_id = %rule.user_id, "Alert rule triggered");
        }
        Ok(evaluation)
    }

    /// Evaluate every enabled rule of a user. A rule that fails to evaluate
    /// is logged and left out of the result.
    pub async fn evaluate_all_user_rules(
        &self,
        user_id: DbId,
    ) -> Result<Vec<(AlertRule, Evaluation)>, NotifyError> {
        let rules = self.store.list_rules(user_id, true).await?;
        let mut results = Vec::with_capacity(rules.len());
        for rule in rules {
            match self.evaluate_rule(&rule).await {
                Ok(evaluation) => results.push((rule, evaluation)),
                Err(e) => {
                    tracing::error!(
                        rule_id = %rule.id,
                        %user_id,
                        error = %e,
                        "Alert rule evaluation failed"
                    );
                }
            }
        }
        Ok(results)
    }

    /// Scheduled rules that are due at `now`.
    pub async fn list_scheduled(&self, now: Timestamp) -> Result<Vec<AlertRule>, NotifyError> {
        Ok(self.store.list_scheduled(now).await?)
    }

    /// First fire time of a new or edited schedule. A schedule that never
    /// fires again is rejected.
    fn first_trigger(
        &self,
        schedule: Option<&CronSchedule>,
        now: Timestamp,
    ) -> Result<Option<Timestamp>, CoreError> {
        let Some(schedule) = schedule else {
            return Ok(None);
        };
        match schedule.next_after(now, self.timezone) {
            Some(next) => Ok(Some(next)),
            None => Err(CoreError::Validation(format!(
                "Schedule '{}' has no future fire time",
                schedule.expression()
            ))),
        }
    }

    /// Next fire time of a rule's schedule strictly after `after`.
    pub fn next_trigger_after(
        &self,
        rule: &AlertRule,
        after: Timestamp,
    ) -> Result<Option<Timestamp>, NotifyError> {
        let Some(expression) = rule.schedule.as_deref() else {
            return Ok(None);
        };
        Ok(CronSchedule::parse(expression)?.next_after(after, self.timezone))
    }

    /// Store the next planned evaluation time of a rule.
    pub async fn reschedule(
        &self,
        rule: &AlertRule,
        next_trigger_at: Option<Timestamp>,
    ) -> Result<(), NotifyError> {
        self.store
            .record_evaluation(rule.id, None, next_trigger_at, self.clock.now())
            .await?;
        Ok(())
    }
}

fn rule_not_found(id: DbId) -> NotifyError {
    NotifyError::Core(CoreError::NotFound {
        entity: "alert_rule",
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};
    use finpulse_core::clock::FakeClock;
    use finpulse_core::types::new_id;
    use finpulse_db::MemoryStore;

    fn engine() -> (AlertEngine, FakeClock) {
        let clock = FakeClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap());
        let engine = AlertEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(clock.clone()),
            chrono_tz::UTC,
        );
        (engine, clock)
    }

    fn conditions(value: serde_json::Value) -> ConditionMap {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("conditions must be an object"),
        }
    }

    fn budget_rule(map: serde_json::Value) -> RuleInput {
        RuleInput {
            name: "Groceries watch".into(),
            rule_type: AlertRuleType::BudgetThreshold,
            enabled: true,
            conditions: conditions(map),
            channels: None,
            schedule: None,
        }
    }

    fn weekly_report() -> RuleInput {
        RuleInput {
            name: "Weekly digest".into(),
            rule_type: AlertRuleType::ScheduledReport,
            enabled: true,
            conditions: conditions(serde_json::json!({"frequency": "weekly"})),
            channels: Some(vec![DeliveryChannel::Email, DeliveryChannel::Email]),
            schedule: Some("0 8 * * Mon".into()),
        }
    }

    #[tokio::test]
    async fn budget_rule_without_keys_is_rejected() {
        let (engine, _) = engine();
        let err = engine
            .create_rule(new_id(), budget_rule(serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn budget_rule_with_keys_is_created() {
        let (engine, _) = engine();
        let rule = engine
            .create_rule(
                new_id(),
                budget_rule(serde_json::json!({"budget_id": "x", "threshold_percentage": 80})),
            )
            .await
            .unwrap();
        assert_eq!(rule.rule_type, AlertRuleType::BudgetThreshold);
        assert_eq!(rule.next_trigger_at, None);
    }

    #[tokio::test]
    async fn scheduled_rule_gets_next_trigger_time() {
        let (engine, _) = engine();
        let rule = engine.create_rule(new_id(), weekly_report()).await.unwrap();

        // 2024-03-01 is a Friday; the next Monday 08:00 is 2024-03-04.
        assert_eq!(
            rule.next_trigger_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap())
        );
        assert_eq!(rule.channels, Some(vec![DeliveryChannel::Email]));
    }

    #[tokio::test]
    async fn invalid_schedule_is_rejected() {
        let (engine, _) = engine();
        let mut input = weekly_report();
        input.schedule = Some("whenever".into());
        let err = engine.create_rule(new_id(), input).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn expired_schedule_is_rejected() {
        let (engine, _) = engine();
        let mut input = weekly_report();
        input.schedule = Some("0 0 8 1 1 * 2020".into());
        let err = engine.create_rule(new_id(), input).await.unwrap_err();
        assert!(err.is_validation());

        let rule = engine.create_rule(new_id(), weekly_report()).await.unwrap();
        let mut input = weekly_report();
        input.schedule = Some("0 0 8 1 1 * 2020".into());
        let err = engine.update_rule(rule.id, input).await.unwrap_err();
        assert!(err.is_validation());
        let stored = engine.get_rule(rule.id).await.unwrap();
        assert_eq!(stored.schedule, rule.schedule);
    }

    #[tokio::test]
    async fn update_validates_before_saving() {
        let (engine, _) = engine();
        let rule = engine
            .create_rule(
                new_id(),
                budget_rule(serde_json::json!({"budget_id": "x", "threshold_percentage": 80})),
            )
            .await
            .unwrap();

        let err = engine
            .update_rule(rule.id, budget_rule(serde_json::json!({"budget_id": "x"})))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        let stored = engine.get_rule(rule.id).await.unwrap();
        assert_eq!(stored.conditions, rule.conditions);
    }

    #[tokio::test]
    async fn disabled_rule_is_not_triggered() {
        let (engine, _) = engine();
        let user = new_id();
        let rule = engine.create_rule(user, weekly_report()).await.unwrap();
        let rule = engine.toggle_rule(rule.id, false).await.unwrap();

        let evaluation = engine.evaluate_rule(&rule).await.unwrap();
        assert_eq!(evaluation, Evaluation::NotTriggered);
        assert_eq!(engine.get_rule(rule.id).await.unwrap().last_triggered_at, None);
    }

    #[tokio::test]
    async fn unavailable_evaluator_does_not_fail() {
        let (engine, _) = engine();
        let rule = engine
            .create_rule(
                new_id(),
                budget_rule(serde_json::json!({"budget_id": "x", "threshold_percentage": 80})),
            )
            .await
            .unwrap();
        assert_eq!(engine.evaluate_rule(&rule).await.unwrap(), Evaluation::NotTriggered);
    }

    #[tokio::test]
    async fn triggered_rule_records_last_trigger() {
        let (engine, clock) = engine();
        let rule = engine.create_rule(new_id(), weekly_report()).await.unwrap();

        let evaluation = engine.evaluate_rule(&rule).await.unwrap();
        assert!(evaluation.is_triggered());
        let stored = engine.get_rule(rule.id).await.unwrap();
        assert_eq!(stored.last_triggered_at, Some(clock.now()));
        assert_eq!(stored.next_trigger_at, rule.next_trigger_at);
    }

    #[tokio::test]
    async fn failing_rule_is_skipped_in_batch() {
        let (mut engine, _) = engine();
        engine.register_evaluator(
            AlertRuleType::BudgetThreshold,
            Arc::new(FnEvaluator(
                |_: &AlertRule| -> Result<Evaluation, NotifyError> {
                    Err(NotifyError::Core(CoreError::Internal("ledger offline".into())))
                },
            )),
        );
        let user = new_id();
        engine
            .create_rule(
                user,
                budget_rule(serde_json::json!({"budget_id": "x", "threshold_percentage": 80})),
            )
            .await
            .unwrap();
        engine.create_rule(user, weekly_report()).await.unwrap();

        let results = engine.evaluate_all_user_rules(user).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.rule_type, AlertRuleType::ScheduledReport);
        assert!(results[0].1.is_triggered());
    }

    #[tokio::test]
    async fn delete_hides_rule() {
        let (engine, _) = engine();
        let user = new_id();
        let rule = engine.create_rule(user, weekly_report()).await.unwrap();

        engine.delete_rule(rule.id).await.unwrap();
        assert_matches!(
            engine.get_rule(rule.id).await,
            Err(NotifyError::Core(CoreError::NotFound { .. }))
        );
        assert!(engine.list_user_rules(user).await.unwrap().is_empty());
        assert!(engine.delete_rule(rule.id).await.is_err());
    }
}
