//! Collaborator interfaces the workflow engine depends on. Implementations
//! live in `signoff-db` (SQLite and in-memory).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::approval::{
    ApprovableRef, Approval, ApprovalDraft, ApprovalId, ApprovalStatus, Decision,
};
use crate::domain::identity::{Employee, EmployeeId, Role, RoleId, User, UserId};
use crate::domain::layer::{ApprovableType, ApprovableTypeId, ApproverLayer, LayerId};
use crate::errors::{LedgerError, StoreError};

/// Read-only view of approvable types and their configured layers.
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    async fn approvable_type(&self, type_key: &str)
        -> Result<Option<ApprovableType>, StoreError>;

    /// Active layers only, in no particular order.
    async fn active_layers(
        &self,
        type_id: ApprovableTypeId,
    ) -> Result<Vec<ApproverLayer>, StoreError>;
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;
    async fn find_employee_by_id(&self, id: EmployeeId) -> Result<Option<Employee>, StoreError>;
    async fn find_employee_by_code(&self, code: &str) -> Result<Option<Employee>, StoreError>;
    async fn find_employee_for_user(&self, user: UserId) -> Result<Option<Employee>, StoreError>;
    async fn find_role_by_id(&self, id: RoleId) -> Result<Option<Role>, StoreError>;

    /// Users holding the role, ordered by ascending user id.
    async fn find_users_with_role(&self, id: RoleId) -> Result<Vec<UserId>, StoreError>;

    async fn employee_linked_user(&self, id: EmployeeId) -> Result<Option<UserId>, StoreError> {
        Ok(self.find_employee_by_id(id).await?.and_then(|employee| employee.user_id))
    }
}

/// Result of writing one level's drafts in a single transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelWrite {
    pub created: Vec<Approval>,
    pub duplicates: Vec<ApprovalDraft>,
}

/// Durable record of approval rows. Implementations must make duplicate
/// prevention hold under concurrent writers, not only through `exists_pending`.
#[async_trait]
pub trait ApprovalLedger: Send + Sync {
    async fn exists_pending(
        &self,
        subject: &ApprovableRef,
        layer_id: LayerId,
        approver: UserId,
    ) -> Result<bool, StoreError>;

    /// Fails with `DuplicateApproval` when the pending triple already exists.
    async fn create(&self, draft: ApprovalDraft) -> Result<Approval, LedgerError>;

    /// Writes every draft atomically, skipping drafts whose pending triple
    /// already exists. Either all new rows commit or none do.
    async fn open_level(&self, drafts: Vec<ApprovalDraft>) -> Result<LevelWrite, StoreError>;

    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, StoreError>;

    async fn decide(
        &self,
        id: &ApprovalId,
        acting: UserId,
        decision: Decision,
    ) -> Result<Approval, LedgerError>;

    /// All rows for the subject, oldest first.
    async fn list_for(&self, subject: &ApprovableRef) -> Result<Vec<Approval>, StoreError>;

    async fn latest_for(&self, subject: &ApprovableRef) -> Result<Option<Approval>, StoreError>;

    /// Pending rows assigned to the approver, oldest first.
    async fn pending_for_approver(&self, approver: UserId) -> Result<Vec<Approval>, StoreError>;

    /// Latest row wins. A subject without rows reports `Pending`.
    async fn status_for(&self, subject: &ApprovableRef) -> Result<ApprovalStatus, StoreError> {
        Ok(self
            .latest_for(subject)
            .await?
            .map(|approval| approval.status)
            .unwrap_or(ApprovalStatus::Pending))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequested {
    pub approval_id: ApprovalId,
    pub approver: UserId,
    pub subject: ApprovableRef,
    pub display_name: String,
    pub level: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecided {
    pub approval_id: ApprovalId,
    pub sender: UserId,
    pub subject: ApprovableRef,
    pub decision: Decision,
    pub level: i32,
    pub decider: UserId,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Outbound notification requests. Delivery is external.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn approval_requested(&self, event: ApprovalRequested) -> Result<(), NotifyError>;
    async fn approval_decided(&self, event: ApprovalDecided) -> Result<(), NotifyError>;
}
