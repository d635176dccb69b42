use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::identity::UserId;
use crate::domain::layer::LayerId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Groups the rows created by a single level opening.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpeningId(pub String);

impl OpeningId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Opaque reference to the business object under approval.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovableRef {
    pub type_key: String,
    pub object_id: String,
}

impl ApprovableRef {
    pub fn new(type_key: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self { type_key: type_key.into(), object_id: object_id.into() }
    }
}

impl fmt::Display for ApprovableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_key, self.object_id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn status(&self) -> ApprovalStatus {
        match self {
            Self::Approved => ApprovalStatus::Approved,
            Self::Rejected => ApprovalStatus::Rejected,
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" => Ok(Self::Approved),
            "reject" | "rejected" => Ok(Self::Rejected),
            other => Err(format!("unsupported decision `{other}` (expected approved|rejected)")),
        }
    }
}

/// A row to be written when a level opens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDraft {
    pub subject: ApprovableRef,
    pub layer_id: LayerId,
    pub level: i32,
    pub approver: UserId,
    pub sender: UserId,
    pub display_name: String,
    pub opening_id: OpeningId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub subject: ApprovableRef,
    pub layer_id: LayerId,
    pub level: i32,
    pub approver: UserId,
    pub sender: UserId,
    pub display_name: String,
    pub opening_id: OpeningId,
    pub status: ApprovalStatus,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Approval {
    pub fn from_draft(draft: ApprovalDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: ApprovalId::generate(),
            subject: draft.subject,
            layer_id: draft.layer_id,
            level: draft.level,
            approver: draft.approver,
            sender: draft.sender,
            display_name: draft.display_name,
            opening_id: draft.opening_id,
            status: ApprovalStatus::Pending,
            decided_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
