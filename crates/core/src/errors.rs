use thiserror::Error;

use crate::domain::approval::{ApprovableRef, ApprovalId, ApprovalStatus};
use crate::domain::identity::UserId;
use crate::domain::layer::LayerId;

/// Failure reported by a storage-backed collaborator. Always treated as
/// transient by callers.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Backend(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflicting write: {0}")]
    Conflict(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("pending approval already exists for {subject} on layer {layer_id} for user {approver}")]
    DuplicateApproval { subject: ApprovableRef, layer_id: LayerId, approver: UserId },
    #[error("user {acting} is not the approver of {approval_id}")]
    NotAuthorized { approval_id: ApprovalId, acting: UserId },
    #[error("approval {approval_id} was already decided as {}", .status.as_str())]
    AlreadyDecided { approval_id: ApprovalId, status: ApprovalStatus },
    #[error("approval {0} not found")]
    NotFound(ApprovalId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("user {acting} is not authorized to decide approval {approval_id}")]
    NotAuthorized { approval_id: ApprovalId, acting: UserId },
    #[error("approval {approval_id} was already decided as {}", .status.as_str())]
    AlreadyDecided { approval_id: ApprovalId, status: ApprovalStatus },
    #[error("approval {0} not found")]
    ApprovalNotFound(ApprovalId),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl WorkflowError {
    /// Storage failures roll back and may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<LedgerError> for WorkflowError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::NotAuthorized { approval_id, acting } => {
                Self::NotAuthorized { approval_id, acting }
            }
            LedgerError::AlreadyDecided { approval_id, status } => {
                Self::AlreadyDecided { approval_id, status }
            }
            LedgerError::NotFound(id) => Self::ApprovalNotFound(id),
            LedgerError::DuplicateApproval { .. } => {
                Self::Storage(StoreError::Conflict(value.to_string()))
            }
            LedgerError::Store(error) => Self::Storage(error),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Forbidden { .. } => "You are not the assigned approver for this request.",
            Self::Conflict { .. } => "This approval has already been decided.",
            Self::NotFound { .. } => "The approval could not be found.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Forbidden { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. } => correlation_id,
        }
    }
}

impl WorkflowError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let message = self.to_string();
        match self {
            Self::NotAuthorized { .. } => InterfaceError::Forbidden { message, correlation_id },
            Self::AlreadyDecided { .. } => InterfaceError::Conflict { message, correlation_id },
            Self::ApprovalNotFound(_) => InterfaceError::NotFound { message, correlation_id },
            Self::Storage(_) => InterfaceError::ServiceUnavailable { message, correlation_id },
        }
    }
}
