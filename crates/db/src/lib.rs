pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{CatalogSummary, WorkflowCatalog, DEMO_CATALOG};
pub use repositories::{
    InMemoryApprovalLedger, InMemoryConfigurationStore, InMemoryIdentityStore, RepositoryError,
    SqlApprovalLedger, SqlConfigurationStore, SqlIdentityStore,
};
