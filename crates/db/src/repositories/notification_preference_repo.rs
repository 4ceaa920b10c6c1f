//! Repository for the `notification_preferences` table.

use finpulse_core::notification::NotificationType;
use finpulse_core::types::{new_id, DbId, Timestamp};
use sqlx::{FromRow, PgPool};

use super::{decode_channels, encode_channels};
use crate::error::decode_error;
use crate::models::preference::{NewPreference, NotificationPreference, QuietHours};

/// Column list for `notification_preferences` queries.
const PREF_COLUMNS: &str = "id, user_id, notification_type, enabled, preferred_channels, \
    min_interval_minutes, quiet_hours_from, quiet_hours_to, quiet_hours_timezone, \
    created_at, updated_at";

#[derive(FromRow)]
struct PreferenceRow {
    id: DbId,
    user_id: DbId,
    notification_type: String,
    enabled: bool,
    preferred_channels: Vec<String>,
    min_interval_minutes: i32,
    quiet_hours_from: Option<i16>,
    quiet_hours_to: Option<i16>,
    quiet_hours_timezone: Option<String>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl TryFrom<PreferenceRow> for NotificationPreference {
    type Error = sqlx::Error;

    fn try_from(row: PreferenceRow) -> Result<Self, Self::Error> {
        let quiet = (row.quiet_hours_from, row.quiet_hours_to, row.quiet_hours_timezone);
        let quiet_hours = match quiet {
            (Some(from), Some(to), Some(timezone)) => Some(QuietHours {
                from_hour: u8::try_from(from).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                to_hour: u8::try_from(to).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                timezone,
            }),
            _ => None,
        };
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            notification_type: NotificationType::from_str(&row.notification_type)
                .map_err(decode_error)?,
            enabled: row.enabled,
            preferred_channels: decode_channels(row.preferred_channels)?,
            min_interval_minutes: row.min_interval_minutes,
            quiet_hours,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Provides lookup and upsert for notification preferences.
pub struct NotificationPreferenceRepo;

impl NotificationPreferenceRepo {
    /// List all preferences for a user.
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Vec<NotificationPreference>, sqlx::Error> {
        let query = format!(
            "SELECT {PREF_COLUMNS} FROM notification_preferences \
             WHERE user_id = $1 \
             ORDER BY notification_type"
        );
        sqlx::query_as::<_, PreferenceRow>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(NotificationPreference::try_from)
            .collect()
    }

    /// Get the preference for a specific notification type and user.
    pub async fn get_for_type(
        pool: &PgPool,
        user_id: DbId,
        notification_type: NotificationType,
    ) -> Result<Option<NotificationPreference>, sqlx::Error> {
        let query = format!(
            "SELECT {PREF_COLUMNS} FROM notification_preferences \
             WHERE user_id = $1 AND notification_type = $2"
        );
        sqlx::query_as::<_, PreferenceRow>(&query)
            .bind(user_id)
            .bind(notification_type.as_str())
            .fetch_optional(pool)
            .await?
            .map(NotificationPreference::try_from)
            .transpose()
    }

    /// Insert or update a preference.
    ///
    /// Uses `INSERT ... ON CONFLICT (user_id, notification_type) DO UPDATE`
    /// to upsert in a single round-trip.
    pub async fn upsert(
        pool: &PgPool,
        input: &NewPreference,
        at: Timestamp,
    ) -> Result<NotificationPreference, sqlx::Error> {
        let query = format!(
            "INSERT INTO notification_preferences \
                (id, user_id, notification_type, enabled, preferred_channels, \
                 min_interval_minutes, quiet_hours_from, quiet_hours_to, \
                 quiet_hours_timezone, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10) \
             ON CONFLICT (user_id, notification_type) DO UPDATE SET \
                enabled = EXCLUDED.enabled, \
                preferred_channels = EXCLUDED.preferred_channels, \
                min_interval_minutes = EXCLUDED.min_interval_minutes, \
                quiet_hours_from = EXCLUDED.quiet_hours_from, \
                quiet_hours_to = EXCLUDED.quiet_hours_to, \
                quiet_hours_timezone = EXCLUDED.quiet_hours_timezone, \
                updated_at = EXCLUDED.updated_at \
             RETURNING {PREF_COLUMNS}"
        );
        let quiet = input.quiet_hours.as_ref();
        sqlx::query_as::<_, PreferenceRow>(&query)
            .bind(new_id())
            .bind(input.user_id)
            .bind(input.notification_type.as_str())
            .bind(input.enabled)
            .bind(encode_channels(&input.preferred_channels))
            .bind(input.min_interval_minutes)
            .bind(quiet.map(|q| i16::from(q.from_hour)))
            .bind(quiet.map(|q| i16::from(q.to_hour)))
            .bind(quiet.map(|q| q.timezone.clone()))
            .bind(at)
            .fetch_one(pool)
            .await?
            .try_into()
    }
}
