use finpulse_core::error::CoreError;
use finpulse_db::StoreError;

use crate::delivery::email::EmailError;
use crate::ws::HubError;

/// Error returned by the dispatcher, rule engine, and scheduler jobs.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NotifyError {
    /// Whether the error is a rejected input rather than an operational
    /// failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Core(CoreError::Validation(_))
                | Self::Store(StoreError::Core(CoreError::Validation(_)))
        )
    }
}
