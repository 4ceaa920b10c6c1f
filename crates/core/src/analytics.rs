//! Delivery lifecycle state machine for notification analytics.
//!
//! ```text
//! queued -> sent -> delivered -> read -> clicked
//! queued | sent | delivered -> failed
//! ```
//!
//! Every transition is idempotent: repeating one refreshes that stage's
//! timestamp. A later-stage timestamp always implies the earlier ones are
//! set; skipped stages are backfilled with the transition time.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStage {
    Queued,
    Sent,
    Delivered,
    Read,
    Clicked,
    Failed,
}

impl DeliveryStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Clicked => "clicked",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "queued" => Ok(Self::Queued),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            "clicked" => Ok(Self::Clicked),
            "failed" => Ok(Self::Failed),
            _ => Err(CoreError::Validation(format!(
                "Invalid delivery stage '{s}'"
            ))),
        }
    }

    /// Position on the success path. `Failed` is off the path.
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Queued => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Read => Some(3),
            Self::Clicked => Some(4),
            Self::Failed => None,
        }
    }

    /// Stages from which a failure may still be recorded.
    pub fn can_fail(&self) -> bool {
        matches!(self, Self::Queued | Self::Sent | Self::Delivered | Self::Failed)
    }
}

impl std::fmt::Display for DeliveryStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// The timestamp columns of one analytics row plus its furthest stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    pub status: DeliveryStage,
    pub queued_at: Timestamp,
    pub sent_at: Option<Timestamp>,
    pub delivered_at: Option<Timestamp>,
    pub read_at: Option<Timestamp>,
    pub clicked_at: Option<Timestamp>,
    pub failed_at: Option<Timestamp>,
}

impl Lifecycle {
    pub fn queued(at: Timestamp) -> Self {
        Self {
            status: DeliveryStage::Queued,
            queued_at: at,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            clicked_at: None,
            failed_at: None,
        }
    }

    /// Apply a transition to `to` at time `at`.
    ///
    /// Returns `CoreError::Conflict` when the transition leaves the state
    /// machine: any success-path stage after a failure, or a failure after
    /// the notification was read.
    pub fn advance(&mut self, to: DeliveryStage, at: Timestamp) -> Result<(), CoreError> {
        if to == DeliveryStage::Failed {
            if !self.status.can_fail() {
                return Err(CoreError::Conflict(format!(
                    "Cannot mark a {} notification as failed",
                    self.status
                )));
            }
            self.failed_at = Some(at);
            self.status = DeliveryStage::Failed;
            return Ok(());
        }

        if self.status == DeliveryStage::Failed {
            return Err(CoreError::Conflict(format!(
                "Cannot move a failed notification to {to}"
            )));
        }

        // Rank is always Some here: Failed was handled above.
        let target = to.rank().unwrap_or(0);
        if target >= 1 {
            Self::stamp(&mut self.sent_at, at, target == 1);
        }
        if target >= 2 {
            Self::stamp(&mut self.delivered_at, at, target == 2);
        }
        if target >= 3 {
            Self::stamp(&mut self.read_at, at, target == 3);
        }
        if target >= 4 {
            Self::stamp(&mut self.clicked_at, at, target == 4);
        }

        if self.status.rank().unwrap_or(0) < target {
            self.status = to;
        }
        Ok(())
    }

    /// Overwrite the slot when it is the transition's own stage, otherwise
    /// only backfill it.
    fn stamp(slot: &mut Option<Timestamp>, at: Timestamp, own_stage: bool) {
        if own_stage || slot.is_none() {
            *slot = Some(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn delivered_then_read_keeps_delivered_at() {
        let t0 = Utc::now();
        let mut lc = Lifecycle::queued(t0);
        lc.advance(DeliveryStage::Delivered, t0 + Duration::seconds(1)).unwrap();
        lc.advance(DeliveryStage::Read, t0 + Duration::seconds(2)).unwrap();

        assert_eq!(lc.status, DeliveryStage::Read);
        assert_eq!(lc.delivered_at, Some(t0 + Duration::seconds(1)));
        assert_eq!(lc.read_at, Some(t0 + Duration::seconds(2)));
    }

    #[test]
    fn repeated_read_refreshes_read_at_only() {
        let t0 = Utc::now();
        let mut lc = Lifecycle::queued(t0);
        lc.advance(DeliveryStage::Delivered, t0).unwrap();
        lc.advance(DeliveryStage::Read, t0 + Duration::seconds(5)).unwrap();
        lc.advance(DeliveryStage::Read, t0 + Duration::seconds(9)).unwrap();

        assert_eq!(lc.delivered_at, Some(t0));
        assert_eq!(lc.read_at, Some(t0 + Duration::seconds(9)));
        assert_eq!(lc.status, DeliveryStage::Read);
    }

    #[test]
    fn skipped_stages_are_backfilled() {
        let t0 = Utc::now();
        let mut lc = Lifecycle::queued(t0);
        lc.advance(DeliveryStage::Clicked, t0).unwrap();

        assert!(lc.sent_at.is_some());
        assert!(lc.delivered_at.is_some());
        assert!(lc.read_at.is_some());
        assert_eq!(lc.clicked_at, Some(t0));
    }

    #[test]
    fn earlier_stage_does_not_regress_status() {
        let t0 = Utc::now();
        let mut lc = Lifecycle::queued(t0);
        lc.advance(DeliveryStage::Read, t0).unwrap();
        lc.advance(DeliveryStage::Delivered, t0 + Duration::seconds(1)).unwrap();

        assert_eq!(lc.status, DeliveryStage::Read);
    }

    #[test]
    fn failure_short_circuits_from_sent() {
        let t0 = Utc::now();
        let mut lc = Lifecycle::queued(t0);
        lc.advance(DeliveryStage::Sent, t0).unwrap();
        lc.advance(DeliveryStage::Failed, t0).unwrap();

        assert_eq!(lc.status, DeliveryStage::Failed);
        assert!(lc.delivered_at.is_none());
        assert_eq!(lc.failed_at, Some(t0));
    }

    #[test]
    fn failure_after_read_is_rejected() {
        let t0 = Utc::now();
        let mut lc = Lifecycle::queued(t0);
        lc.advance(DeliveryStage::Read, t0).unwrap();
        assert!(matches!(
            lc.advance(DeliveryStage::Failed, t0),
            Err(CoreError::Conflict(_))
        ));
    }

    #[test]
    fn nothing_follows_failure() {
        let t0 = Utc::now();
        let mut lc = Lifecycle::queued(t0);
        lc.advance(DeliveryStage::Failed, t0).unwrap();
        assert!(lc.advance(DeliveryStage::Delivered, t0).is_err());
        // Repeating the failure is fine.
        assert!(lc.advance(DeliveryStage::Failed, t0).is_ok());
    }
}
