use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::identity::{EmployeeId, RoleId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApprovableTypeId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LayerId(pub i64);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry entry for a kind of business object that needs sign-off.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovableType {
    pub id: ApprovableTypeId,
    pub key: String,
    pub display_name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ApproverSpec {
    FixedUser(UserId),
    FixedEmployee(EmployeeId),
    Role(RoleId),
    ReportsTo,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ApproverSpecError {
    #[error("unknown approver type `{0}`")]
    UnknownType(String),
    #[error("approver type `{approver_type}` requires an approver id")]
    MissingId { approver_type: String },
}

impl ApproverSpec {
    /// Decodes the stored `(approver_type, approver_id)` pair. Legacy class-name
    /// aliases are accepted so older configuration rows keep working.
    pub fn from_parts(
        approver_type: &str,
        approver_id: Option<i64>,
    ) -> Result<Self, ApproverSpecError> {
        let key = approver_type.trim().to_ascii_lowercase();
        let require_id = || {
            approver_id.ok_or_else(|| ApproverSpecError::MissingId {
                approver_type: approver_type.to_string(),
            })
        };

        match key.as_str() {
            "user" | "fixed_user" | "app\\models\\user" => {
                Ok(Self::FixedUser(UserId(require_id()?)))
            }
            "employee" | "fixed_employee" | "app\\models\\employee" => {
                Ok(Self::FixedEmployee(EmployeeId(require_id()?)))
            }
            "role" | "spatie\\permission\\models\\role" | "app\\models\\role" => {
                Ok(Self::Role(RoleId(require_id()?)))
            }
            "reports_to" | "reportsto" | "approval_line" | "app\\models\\reportsto" => {
                Ok(Self::ReportsTo)
            }
            _ => Err(ApproverSpecError::UnknownType(approver_type.to_string())),
        }
    }

    pub fn type_str(&self) -> &'static str {
        match self {
            Self::FixedUser(_) => "user",
            Self::FixedEmployee(_) => "employee",
            Self::Role(_) => "role",
            Self::ReportsTo => "reports_to",
        }
    }

    pub fn id_value(&self) -> Option<i64> {
        match self {
            Self::FixedUser(id) => Some(id.0),
            Self::FixedEmployee(id) => Some(id.0),
            Self::Role(id) => Some(id.0),
            Self::ReportsTo => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerStatus {
    Active,
    Inactive,
}

impl LayerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" | "1" => Some(Self::Active),
            "inactive" | "0" => Some(Self::Inactive),
            _ => None,
        }
    }
}

/// One configured rung of an approval ladder. Layers sharing a level are
/// parallel approver slots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverLayer {
    pub id: LayerId,
    pub approvable_type_id: ApprovableTypeId,
    pub level: i32,
    pub approver_spec: ApproverSpec,
    pub status: LayerStatus,
    pub description: String,
}

impl ApproverLayer {
    pub fn is_active(&self) -> bool {
        self.status == LayerStatus::Active
    }
}
