//! Multi-channel notification dispatch.
//!
//! One logical notification becomes one `notifications` row per channel.
//! Channels are attempted independently: a failure on one is recorded and
//! the rest still run, and the caller gets the last error seen.

use std::sync::Arc;

use finpulse_core::channels::{dedup_channels, DeliveryChannel};
use finpulse_core::clock::Clock;
use finpulse_core::notification::{NotificationStatus, NotificationType};
use finpulse_core::types::{DbId, Timestamp};
use finpulse_db::models::notification::{NewNotification, Notification};
use finpulse_db::NotificationStore;
use serde::Serialize;

use crate::analytics::AnalyticsTracker;
use crate::delivery::email::EmailSender;
use crate::error::NotifyError;
use crate::preferences::PreferenceResolver;
use crate::ws::ConnectionRegistry;

/// Message type of in-app pushes on the WebSocket wire.
pub const IN_APP_MESSAGE_TYPE: &str = "notification";

/// One logical notification addressed to a user.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub user_id: DbId,
    pub email: String,
    pub name: String,
    pub notification_type: NotificationType,
    pub subject: String,
    pub data: serde_json::Value,
}

/// Result of one channel attempt.
#[derive(Debug, Clone)]
pub struct ChannelAttempt {
    pub channel: DeliveryChannel,
    pub notification_id: DbId,
    /// `Pending` for in-app notifications nobody was connected to receive.
    pub status: NotificationStatus,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub attempts: Vec<ChannelAttempt>,
}

#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// Preferences disabled this notification type for the user.
    Suppressed,
    Dispatched(DispatchReport),
}

/// Payload of an in-app push.
#[derive(Debug, Serialize)]
struct InAppPayload<'a> {
    id: DbId,
    #[serde(rename = "type")]
    notification_type: NotificationType,
    subject: &'a str,
    data: &'a serde_json::Value,
    created_at: Timestamp,
}

pub struct Dispatcher {
    notifications: Arc<dyn NotificationStore>,
    preferences: Arc<PreferenceResolver>,
    analytics: Arc<AnalyticsTracker>,
    registry: Arc<ConnectionRegistry>,
    email: Arc<dyn EmailSender>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        preferences: Arc<PreferenceResolver>,
        analytics: Arc<AnalyticsTracker>,
        registry: Arc<ConnectionRegistry>,
        email: Arc<dyn EmailSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            notifications,
            preferences,
            analytics,
            registry,
            email,
            clock,
        }
    }

    /// Send over the user's effective channels, unless preferences suppress
    /// the type.
    pub async fn notify(
        &self,
        request: &NotificationRequest,
    ) -> Result<DispatchOutcome, NotifyError> {
        self.notify_with_channels(request, None).await
    }

    /// Like [`Dispatcher::notify`], but `channels` (when given) replaces the
    /// user's preferred channel list. A disabled preference still
    /// suppresses.
    pub async fn notify_with_channels(
        &self,
        request: &NotificationRequest,
        channels: Option<&[DeliveryChannel]>,
    ) -> Result<DispatchOutcome, NotifyError> {
        let (user_id, notification_type) = (request.user_id, request.notification_type);
        if !self
            .preferences
            .should_send_notification(user_id, notification_type)
            .await?
        {
            tracing::debug!(%user_id, %notification_type, "Notification suppressed by preference");
            return Ok(DispatchOutcome::Suppressed);
        }

        let channels = match channels {
            Some(channels) if !channels.is_empty() => channels.to_vec(),
            _ => {
                self.preferences
                    .get_effective_channels(user_id, notification_type)
                    .await?
            }
        };
        if channels.is_empty() {
            return Ok(DispatchOutcome::Suppressed);
        }

        let report = self.send_multi_channel(request, &channels).await?;
        Ok(DispatchOutcome::Dispatched(report))
    }

    /// Attempt delivery on each channel independently.
    ///
    /// Returns the last channel error if any channel failed; the other
    /// channels have still taken effect.
    pub async fn send_multi_channel(
        &self,
        request: &NotificationRequest,
        channels: &[DeliveryChannel],
    ) -> Result<DispatchReport, NotifyError> {
        let mut report = DispatchReport::default();
        let mut last_error = None;

        for channel in dedup_channels(channels) {
            let attempt = match channel {
                DeliveryChannel::InApp => self.send_in_app(request).await,
                DeliveryChannel::Email => self.send_email(request).await,
            };
            match attempt {
                Ok(attempt) => report.attempts.push(attempt),
                Err(e) => {
                    tracing::error!(
                        user_id = %request.user_id,
                        notification_type = %request.notification_type,
                        channel = %channel,
                        error = %e,
                        "Notification delivery failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn send_in_app(
        &self,
        request: &NotificationRequest,
    ) -> Result<ChannelAttempt, NotifyError> {
        let notification = self
            .create(request, DeliveryChannel::InApp, request.user_id.to_string())
            .await?;
        let mut status = NotificationStatus::Pending;

        if self.registry.is_user_connected(request.user_id).await {
            let payload = InAppPayload {
                id: notification.id,
                notification_type: notification.notification_type,
                subject: &notification.subject,
                data: &notification.template_data,
                created_at: notification.created_at,
            };
            let pushed = match self
                .registry
                .send_to_user(request.user_id, IN_APP_MESSAGE_TYPE, &payload)
                .await
            {
                Ok(pushed) => pushed,
                Err(e) => {
                    tracing::warn!(user_id = %request.user_id, error = %e, "In-app push skipped");
                    0
                }
            };
            if pushed > 0 {
                self.mark_sent(&notification).await?;
                status = NotificationStatus::Sent;
            }
            tracing::debug!(
                user_id = %request.user_id,
                notification_id = %notification.id,
                pushed,
                "In-app notification pushed"
            );
        }

        Ok(ChannelAttempt {
            channel: DeliveryChannel::InApp,
            notification_id: notification.id,
            status,
        })
    }

    async fn send_email(
        &self,
        request: &NotificationRequest,
    ) -> Result<ChannelAttempt, NotifyError> {
        let notification = self
            .create(request, DeliveryChannel::Email, request.email.clone())
            .await?;
        let template = request.notification_type.email_template();
        let data = email_data(&request.data, &request.name);

        match self
            .email
            .send(&request.email, &request.subject, template, &data)
            .await
        {
            Ok(()) => {
                self.mark_sent(&notification).await?;
                Ok(ChannelAttempt {
                    channel: DeliveryChannel::Email,
                    notification_id: notification.id,
                    status: NotificationStatus::Sent,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                if let Err(store_err) = self
                    .notifications
                    .mark_notification_failed(notification.id, self.clock.now(), &reason)
                    .await
                {
                    tracing::error!(
                        notification_id = %notification.id,
                        error = %store_err,
                        "Failed to mark notification failed"
                    );
                }
                if let Err(track_err) = self.analytics.mark_failed(notification.id, &reason).await {
                    tracing::error!(
                        notification_id = %notification.id,
                        error = %track_err,
                        "Failed to record delivery failure"
                    );
                }
                Err(e.into())
            }
        }
    }

    /// Persist the `pending` row and start tracking it.
    async fn create(
        &self,
        request: &NotificationRequest,
        channel: DeliveryChannel,
        recipient: String,
    ) -> Result<Notification, NotifyError> {
        let notification = self
            .notifications
            .create_notification(
                &NewNotification {
                    user_id: request.user_id,
                    notification_type: request.notification_type,
                    channel,
                    recipient,
                    subject: request.subject.clone(),
                    template_data: request.data.clone(),
                },
                self.clock.now(),
            )
            .await?;

        if let Err(e) = self.analytics.track_notification(&notification).await {
            tracing::error!(
                notification_id = %notification.id,
                error = %e,
                "Failed to track notification"
            );
        }
        Ok(notification)
    }

    async fn mark_sent(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.notifications
            .mark_notification_sent(notification.id, self.clock.now())
            .await?;
        if let Err(e) = self.analytics.mark_sent(notification.id).await {
            tracing::error!(
                notification_id = %notification.id,
                error = %e,
                "Failed to record delivery"
            );
        }
        Ok(())
    }
}

/// Template data for email rendering, with the recipient's name added under
/// `name` unless the caller already set one.
fn email_data(data: &serde_json::Value, name: &str) -> serde_json::Value {
    match data {
        serde_json::Value::Object(map) => {
            let mut map = map.clone();
            map.entry("name")
                .or_insert_with(|| serde_json::Value::String(name.to_string()));
            serde_json::Value::Object(map)
        }
        serde_json::Value::Null => serde_json::json!({ "name": name }),
        other => other.clone(),
    }
}
