//! Repository for the `notifications` table.

use finpulse_core::channels::DeliveryChannel;
use finpulse_core::notification::{NotificationStatus, NotificationType};
use finpulse_core::types::{new_id, DbId, Timestamp};
use sqlx::{FromRow, PgPool};

use crate::error::decode_error;
use crate::models::notification::{NewNotification, Notification};

/// Column list for `notifications` queries.
const COLUMNS: &str = "id, user_id, notification_type, channel, recipient, subject, \
    template_data, status, sent_at, failed_at, error_message, retry_count, \
    created_at, updated_at, deleted_at";

#[derive(FromRow)]
struct NotificationRow {
    id: DbId,
    user_id: DbId,
    notification_type: String,
    channel: String,
    recipient: String,
    subject: String,
    template_data: serde_json::Value,
    status: String,
    sent_at: Option<Timestamp>,
    failed_at: Option<Timestamp>,
    error_message: Option<String>,
    retry_count: i32,
    created_at: Timestamp,
    updated_at: Timestamp,
    deleted_at: Option<Timestamp>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = sqlx::Error;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            notification_type: NotificationType::from_str(&row.notification_type)
                .map_err(decode_error)?,
            channel: DeliveryChannel::from_str(&row.channel).map_err(decode_error)?,
            recipient: row.recipient,
            subject: row.subject,
            template_data: row.template_data,
            status: NotificationStatus::from_str(&row.status).map_err(decode_error)?,
            sent_at: row.sent_at,
            failed_at: row.failed_at,
            error_message: row.error_message,
            retry_count: row.retry_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

/// Provides CRUD operations for notifications.
pub struct NotificationRepo;

impl NotificationRepo {
    /// Insert a `pending` notification.
    pub async fn create(
        pool: &PgPool,
        input: &NewNotification,
        at: Timestamp,
    ) -> Result<Notification, sqlx::Error> {
        let query = format!(
            "INSERT INTO notifications \
                (id, user_id, notification_type, channel, recipient, subject, \
                 template_data, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, NotificationRow>(&query)
            .bind(new_id())
            .bind(input.user_id)
            .bind(input.notification_type.as_str())
            .bind(input.channel.as_str())
            .bind(&input.recipient)
            .bind(&input.subject)
            .bind(&input.template_data)
            .bind(at)
            .fetch_one(pool)
            .await?
            .try_into()
    }

    /// Find a notification by id, excluding soft-deleted rows.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Notification>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM notifications WHERE id = $1 AND deleted_at IS NULL");
        sqlx::query_as::<_, NotificationRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .map(Notification::try_from)
            .transpose()
    }

    /// Transition `pending` -> `sent`.
    ///
    /// Returns `false` when the row was not pending (or does not exist).
    pub async fn mark_sent(pool: &PgPool, id: DbId, at: Timestamp) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE notifications \
             SET status = 'sent', sent_at = $2, updated_at = $2 \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Transition `pending` -> `failed`, recording the error text.
    pub async fn mark_failed(
        pool: &PgPool,
        id: DbId,
        at: Timestamp,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE notifications \
             SET status = 'failed', failed_at = $2, error_message = $3, \
                 retry_count = retry_count + 1, updated_at = $2 \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(at)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List a user's notifications, newest first.
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE user_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, NotificationRow>(&query)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(Notification::try_from)
            .collect()
    }

    /// Soft-delete a notification.
    pub async fn soft_delete(pool: &PgPool, id: DbId, at: Timestamp) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE notifications SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
