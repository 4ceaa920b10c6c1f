//! Repository for the `notification_analytics` table.

use finpulse_core::analytics::{DeliveryStage, Lifecycle};
use finpulse_core::channels::DeliveryChannel;
use finpulse_core::error::CoreError;
use finpulse_core::notification::NotificationType;
use finpulse_core::types::{new_id, DateRange, DbId, Timestamp};
use sqlx::{FromRow, PgPool};

use crate::error::{decode_error, StoreError};
use crate::models::analytics::{
    Counter, NewAnalytics, NotificationAnalytics, StageCounts, TypeStageCounts,
};

/// Column list for `notification_analytics` queries.
const COLUMNS: &str = "id, notification_id, user_id, notification_type, channel, status, \
    queued_at, sent_at, delivered_at, read_at, clicked_at, failed_at, open_count, \
    click_count, failure_reason, created_at, updated_at";

/// Optional `[from, to)` filter on `queued_at`, bound as `$1` / `$2`.
const RANGE_FILTER: &str = "($1::timestamptz IS NULL OR queued_at >= $1) \
    AND ($2::timestamptz IS NULL OR queued_at < $2)";

#[derive(FromRow)]
struct AnalyticsRow {
    id: DbId,
    notification_id: DbId,
    user_id: DbId,
    notification_type: String,
    channel: String,
    status: String,
    queued_at: Timestamp,
    sent_at: Option<Timestamp>,
    delivered_at: Option<Timestamp>,
    read_at: Option<Timestamp>,
    clicked_at: Option<Timestamp>,
    failed_at: Option<Timestamp>,
    open_count: i32,
    click_count: i32,
    failure_reason: Option<String>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl TryFrom<AnalyticsRow> for NotificationAnalytics {
    type Error = sqlx::Error;

    fn try_from(row: AnalyticsRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            notification_id: row.notification_id,
            user_id: row.user_id,
            notification_type: NotificationType::from_str(&row.notification_type)
                .map_err(decode_error)?,
            channel: DeliveryChannel::from_str(&row.channel).map_err(decode_error)?,
            lifecycle: Lifecycle {
                status: DeliveryStage::from_str(&row.status).map_err(decode_error)?,
                queued_at: row.queued_at,
                sent_at: row.sent_at,
                delivered_at: row.delivered_at,
                read_at: row.read_at,
                clicked_at: row.clicked_at,
                failed_at: row.failed_at,
            },
            open_count: row.open_count,
            click_count: row.click_count,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct CountsRow {
    notification_type: String,
    total_count: i64,
    sent_count: i64,
    delivered_count: i64,
    read_count: i64,
    clicked_count: i64,
    failed_count: i64,
    open_total: i64,
    click_total: i64,
}

/// Provides lifecycle tracking and aggregation for notification analytics.
pub struct AnalyticsRepo;

impl AnalyticsRepo {
    /// Start tracking a notification in the `queued` stage.
    ///
    /// Tracking the same notification twice returns the existing row.
    pub async fn create(
        pool: &PgPool,
        input: &NewAnalytics,
        at: Timestamp,
    ) -> Result<NotificationAnalytics, sqlx::Error> {
        sqlx::query(
            "INSERT INTO notification_analytics \
                (id, notification_id, user_id, notification_type, channel, status, \
                 queued_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, 'queued', $6, $6, $6) \
             ON CONFLICT (notification_id) DO NOTHING",
        )
        .bind(new_id())
        .bind(input.notification_id)
        .bind(input.user_id)
        .bind(input.notification_type.as_str())
        .bind(input.channel.as_str())
        .bind(at)
        .execute(pool)
        .await?;

        Self::find_by_notification(pool, input.notification_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Find the analytics row for a notification.
    pub async fn find_by_notification(
        pool: &PgPool,
        notification_id: DbId,
    ) -> Result<Option<NotificationAnalytics>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM notification_analytics WHERE notification_id = $1");
        sqlx::query_as::<_, AnalyticsRow>(&query)
            .bind(notification_id)
            .fetch_optional(pool)
            .await?
            .map(NotificationAnalytics::try_from)
            .transpose()
    }

    /// Apply a lifecycle transition under a row lock.
    ///
    /// The row is read `FOR UPDATE`, advanced with [`Lifecycle::advance`],
    /// and written back in the same transaction so concurrent transitions
    /// on one notification serialize.
    pub async fn advance(
        pool: &PgPool,
        notification_id: DbId,
        stage: DeliveryStage,
        at: Timestamp,
        failure_reason: Option<&str>,
        counter: Option<Counter>,
    ) -> Result<NotificationAnalytics, StoreError> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "SELECT {COLUMNS} FROM notification_analytics \
             WHERE notification_id = $1 FOR UPDATE"
        );
        let mut record: NotificationAnalytics = sqlx::query_as::<_, AnalyticsRow>(&query)
            .bind(notification_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "notification_analytics",
                id: notification_id,
            })?
            .try_into()?;

        record.lifecycle.advance(stage, at)?;
        if let Some(reason) = failure_reason {
            record.failure_reason = Some(reason.to_string());
        }
        match counter {
            Some(Counter::Opens) => record.open_count += 1,
            Some(Counter::Clicks) => record.click_count += 1,
            None => {}
        }

        let lc = &record.lifecycle;
        let update = format!(
            "UPDATE notification_analytics SET \
                status = $2, sent_at = $3, delivered_at = $4, read_at = $5, \
                clicked_at = $6, failed_at = $7, open_count = $8, click_count = $9, \
                failure_reason = $10, updated_at = $11 \
             WHERE notification_id = $1 \
             RETURNING {COLUMNS}"
        );
        let saved = sqlx::query_as::<_, AnalyticsRow>(&update)
            .bind(notification_id)
            .bind(lc.status.as_str())
            .bind(lc.sent_at)
            .bind(lc.delivered_at)
            .bind(lc.read_at)
            .bind(lc.clicked_at)
            .bind(lc.failed_at)
            .bind(record.open_count)
            .bind(record.click_count)
            .bind(&record.failure_reason)
            .bind(at)
            .fetch_one(&mut *tx)
            .await?
            .try_into()?;

        tx.commit().await?;
        Ok(saved)
    }

    /// Increment a counter without touching the lifecycle.
    pub async fn bump(
        pool: &PgPool,
        notification_id: DbId,
        counter: Counter,
        at: Timestamp,
    ) -> Result<Option<NotificationAnalytics>, sqlx::Error> {
        let column = match counter {
            Counter::Opens => "open_count",
            Counter::Clicks => "click_count",
        };
        let query = format!(
            "UPDATE notification_analytics \
             SET {column} = {column} + 1, updated_at = $2 \
             WHERE notification_id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AnalyticsRow>(&query)
            .bind(notification_id)
            .bind(at)
            .fetch_optional(pool)
            .await?
            .map(NotificationAnalytics::try_from)
            .transpose()
    }

    /// Count rows per notification type that reached each stage.
    pub async fn stage_counts_by_type(
        pool: &PgPool,
        range: DateRange,
    ) -> Result<Vec<TypeStageCounts>, sqlx::Error> {
        let query = format!(
            "SELECT notification_type, \
                COUNT(*) AS total_count, \
                COUNT(sent_at) AS sent_count, \
                COUNT(delivered_at) AS delivered_count, \
                COUNT(read_at) AS read_count, \
                COUNT(clicked_at) AS clicked_count, \
                COUNT(failed_at) AS failed_count, \
                COALESCE(SUM(open_count), 0)::BIGINT AS open_total, \
                COALESCE(SUM(click_count), 0)::BIGINT AS click_total \
             FROM notification_analytics \
             WHERE {RANGE_FILTER} \
             GROUP BY notification_type \
             ORDER BY notification_type"
        );
        sqlx::query_as::<_, CountsRow>(&query)
            .bind(range.from)
            .bind(range.to)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(|row| {
                Ok(TypeStageCounts {
                    notification_type: NotificationType::from_str(&row.notification_type)
                        .map_err(decode_error)?,
                    counts: StageCounts {
                        total: row.total_count,
                        sent: row.sent_count,
                        delivered: row.delivered_count,
                        read: row.read_count,
                        clicked: row.clicked_count,
                        failed: row.failed_count,
                        opens: row.open_total,
                        clicks: row.click_total,
                    },
                })
            })
            .collect()
    }

    /// List failed rows, most recent failure first.
    pub async fn list_failed(
        pool: &PgPool,
        range: DateRange,
        limit: i64,
    ) -> Result<Vec<NotificationAnalytics>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_analytics \
             WHERE status = 'failed' AND {RANGE_FILTER} \
             ORDER BY failed_at DESC \
             LIMIT $3"
        );
        sqlx::query_as::<_, AnalyticsRow>(&query)
            .bind(range.from)
            .bind(range.to)
            .bind(limit)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(NotificationAnalytics::try_from)
            .collect()
    }
}
