//! Repository for the `alert_rules` table.

use finpulse_core::alert::{AlertConditions, AlertRuleType};
use finpulse_core::error::CoreError;
use finpulse_core::types::{new_id, DbId, Timestamp};
use sqlx::{FromRow, PgPool};

use super::{decode_channels, encode_channels};
use crate::error::decode_error;
use crate::models::alert_rule::{AlertRule, AlertRuleChanges, NewAlertRule};

/// Column list for `alert_rules` queries.
const COLUMNS: &str = "id, user_id, name, rule_type, enabled, conditions, channels, \
    schedule, last_triggered_at, next_trigger_at, created_at, updated_at";

#[derive(FromRow)]
struct AlertRuleRow {
    id: DbId,
    user_id: DbId,
    name: String,
    rule_type: String,
    enabled: bool,
    conditions: serde_json::Value,
    channels: Option<Vec<String>>,
    schedule: Option<String>,
    last_triggered_at: Option<Timestamp>,
    next_trigger_at: Option<Timestamp>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl TryFrom<AlertRuleRow> for AlertRule {
    type Error = sqlx::Error;

    fn try_from(row: AlertRuleRow) -> Result<Self, Self::Error> {
        let rule_type = AlertRuleType::from_str(&row.rule_type).map_err(decode_error)?;
        let map = match row.conditions {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(decode_error(CoreError::Validation(format!(
                    "alert rule {} has non-object conditions: {other}",
                    row.id
                ))))
            }
        };
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            rule_type,
            enabled: row.enabled,
            conditions: AlertConditions::from_map(rule_type, &map).map_err(decode_error)?,
            channels: row.channels.map(decode_channels).transpose()?,
            schedule: row.schedule,
            last_triggered_at: row.last_triggered_at,
            next_trigger_at: row.next_trigger_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Provides CRUD operations and due-rule lookup for alert rules.
pub struct AlertRuleRepo;

impl AlertRuleRepo {
    /// Insert a new rule, returning the created row.
    pub async fn create(
        pool: &PgPool,
        input: &NewAlertRule,
        at: Timestamp,
    ) -> Result<AlertRule, sqlx::Error> {
        let query = format!(
            "INSERT INTO alert_rules \
                (id, user_id, name, rule_type, enabled, conditions, channels, schedule, \
                 next_trigger_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AlertRuleRow>(&query)
            .bind(new_id())
            .bind(input.user_id)
            .bind(&input.name)
            .bind(input.conditions.rule_type().as_str())
            .bind(input.enabled)
            .bind(serde_json::Value::Object(input.conditions.to_map()))
            .bind(input.channels.as_deref().map(encode_channels))
            .bind(&input.schedule)
            .bind(input.next_trigger_at)
            .bind(at)
            .fetch_one(pool)
            .await?
            .try_into()
    }

    /// Find a live rule by ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<AlertRule>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM alert_rules WHERE id = $1 AND deleted_at IS NULL"
        );
        sqlx::query_as::<_, AlertRuleRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .map(AlertRule::try_from)
            .transpose()
    }

    /// List a user's live rules, oldest first.
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: DbId,
        enabled_only: bool,
    ) -> Result<Vec<AlertRule>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM alert_rules \
             WHERE user_id = $1 AND deleted_at IS NULL AND (NOT $2 OR enabled) \
             ORDER BY created_at, id"
        );
        sqlx::query_as::<_, AlertRuleRow>(&query)
            .bind(user_id)
            .bind(enabled_only)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(AlertRule::try_from)
            .collect()
    }

    /// List enabled scheduled rules whose next trigger time has passed.
    ///
    /// A scheduled rule that has never been planned (`next_trigger_at`
    /// is NULL) is treated as due.
    pub async fn list_scheduled(
        pool: &PgPool,
        now: Timestamp,
    ) -> Result<Vec<AlertRule>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM alert_rules \
             WHERE deleted_at IS NULL AND enabled AND schedule IS NOT NULL \
               AND (next_trigger_at IS NULL OR next_trigger_at <= $1) \
             ORDER BY next_trigger_at NULLS FIRST, id"
        );
        sqlx::query_as::<_, AlertRuleRow>(&query)
            .bind(now)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(AlertRule::try_from)
            .collect()
    }

    /// Replace a rule's mutable fields. Returns `None` if the rule is
    /// missing or deleted.
    pub async fn update(
        pool: &PgPool,
        id: DbId,
        changes: &AlertRuleChanges,
        at: Timestamp,
    ) -> Result<Option<AlertRule>, sqlx::Error> {
        let query = format!(
            "UPDATE alert_rules SET \
                name = $2, rule_type = $3, enabled = $4, conditions = $5, channels = $6, \
                schedule = $7, next_trigger_at = $8, updated_at = $9 \
             WHERE id = $1 AND deleted_at IS NULL \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AlertRuleRow>(&query)
            .bind(id)
            .bind(&changes.name)
            .bind(changes.conditions.rule_type().as_str())
            .bind(changes.enabled)
            .bind(serde_json::Value::Object(changes.conditions.to_map()))
            .bind(changes.channels.as_deref().map(encode_channels))
            .bind(&changes.schedule)
            .bind(changes.next_trigger_at)
            .bind(at)
            .fetch_optional(pool)
            .await?
            .map(AlertRule::try_from)
            .transpose()
    }

    /// Record the outcome of an evaluation pass.
    ///
    /// `last_triggered_at` is only overwritten when a new value is given.
    pub async fn record_evaluation(
        pool: &PgPool,
        id: DbId,
        last_triggered_at: Option<Timestamp>,
        next_trigger_at: Option<Timestamp>,
        at: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE alert_rules SET \
                last_triggered_at = COALESCE($2, last_triggered_at), \
                next_trigger_at = $3, updated_at = $4 \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(last_triggered_at)
        .bind(next_trigger_at)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete a rule. Returns `true` if a live row was marked.
    pub async fn soft_delete(pool: &PgPool, id: DbId, at: Timestamp) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE alert_rules SET deleted_at = $2, updated_at = $2 \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
