use chrono::{DateTime, Utc};
use thiserror::Error;

use signoff_core::errors::StoreError;

pub mod approval;
pub mod configuration;
pub mod identity;
pub mod memory;

pub use approval::SqlApprovalLedger;
pub use configuration::SqlConfigurationStore;
pub use identity::SqlIdentityStore;
pub use memory::{InMemoryApprovalLedger, InMemoryConfigurationStore, InMemoryIdentityStore};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => StoreError::Backend(error.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
        }
    }
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}
