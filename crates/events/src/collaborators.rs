//! Read-only collaborators owned by other parts of the backend.

use async_trait::async_trait;
use finpulse_core::alert::ReportFrequency;
use finpulse_core::types::DbId;

use crate::error::NotifyError;

/// Where and how to address a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContact {
    pub user_id: DbId,
    pub email: String,
    pub name: String,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Users that should receive periodic reports.
    async fn list_active_users(&self) -> Result<Vec<UserContact>, NotifyError>;

    async fn find_contact(&self, user_id: DbId) -> Result<Option<UserContact>, NotifyError>;
}

/// A rendered periodic report.
#[derive(Debug, Clone)]
pub struct Report {
    pub subject: String,
    pub data: serde_json::Value,
}

#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Build the user's report for the period, or `None` when there is
    /// nothing to report.
    async fn generate(
        &self,
        user: &UserContact,
        frequency: ReportFrequency,
    ) -> Result<Option<Report>, NotifyError>;
}
