use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::identity::{Employee, EmployeeId, RoleId, UserId};
use crate::domain::layer::ApproverSpec;
use crate::errors::StoreError;
use crate::ports::IdentityStore;

/// Per-call inputs for resolution. Built fresh for every submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionContext {
    pub requester: UserId,
    pub explicit_approval_line: Option<String>,
    pub requester_employee: Option<Employee>,
}

impl ResolutionContext {
    pub fn new(requester: UserId) -> Self {
        Self { requester, explicit_approval_line: None, requester_employee: None }
    }

    pub fn with_approval_line(mut self, code: impl Into<String>) -> Self {
        self.explicit_approval_line = Some(code.into());
        self
    }

    pub fn with_employee(mut self, employee: Option<Employee>) -> Self {
        self.requester_employee = employee;
        self
    }

    /// The explicit override wins over the requester's stored approval line.
    /// Blank codes count as absent.
    pub fn approval_line(&self) -> Option<&str> {
        self.explicit_approval_line
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .or_else(|| self.requester_employee.as_ref().and_then(Employee::approval_line))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum UnresolvedReason {
    NoApprovalLine,
    UnknownApprovalLine(String),
    EmployeeWithoutUser(EmployeeId),
    UnknownEmployee(EmployeeId),
    UnknownRole(RoleId),
    RoleWithoutMembers(RoleId),
    UnknownUser(UserId),
}

impl UnresolvedReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoApprovalLine => "no_approval_line",
            Self::UnknownApprovalLine(_) => "unknown_approval_line",
            Self::EmployeeWithoutUser(_) => "employee_without_user",
            Self::UnknownEmployee(_) => "unknown_employee",
            Self::UnknownRole(_) => "unknown_role",
            Self::RoleWithoutMembers(_) => "role_without_members",
            Self::UnknownUser(_) => "unknown_user",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Resolved(UserId),
    Unresolved(UnresolvedReason),
}

impl Resolution {
    pub fn approver(&self) -> Option<UserId> {
        match self {
            Self::Resolved(user) => Some(*user),
            Self::Unresolved(_) => None,
        }
    }
}

/// Turns an abstract approver spec into at most one concrete user. Has no
/// side effects; an empty outcome is never an error.
pub struct ApproverResolver<'a, I: ?Sized> {
    identities: &'a I,
}

impl<'a, I> ApproverResolver<'a, I>
where
    I: IdentityStore + ?Sized,
{
    pub fn new(identities: &'a I) -> Self {
        Self { identities }
    }

    pub async fn resolve(
        &self,
        spec: &ApproverSpec,
        context: &ResolutionContext,
    ) -> Result<Resolution, StoreError> {
        let resolution = match spec {
            ApproverSpec::ReportsTo => self.resolve_reports_to(context).await?,
            ApproverSpec::Role(role_id) => self.resolve_role(*role_id, context).await?,
            ApproverSpec::FixedEmployee(employee_id) => {
                self.resolve_employee(*employee_id).await?
            }
            ApproverSpec::FixedUser(user_id) => {
                match self.identities.find_user_by_id(*user_id).await? {
                    Some(user) => Resolution::Resolved(user.id),
                    None => Resolution::Unresolved(UnresolvedReason::UnknownUser(*user_id)),
                }
            }
        };

        debug!(
            event_name = "approval.resolution.completed",
            approver_type = spec.type_str(),
            requester = context.requester.0,
            resolved = ?resolution.approver().map(|user| user.0),
            "approver spec resolved"
        );
        Ok(resolution)
    }

    async fn resolve_reports_to(
        &self,
        context: &ResolutionContext,
    ) -> Result<Resolution, StoreError> {
        let Some(code) = context.approval_line() else {
            return Ok(Resolution::Unresolved(UnresolvedReason::NoApprovalLine));
        };

        let Some(manager) = self.identities.find_employee_by_code(code).await? else {
            return Ok(Resolution::Unresolved(UnresolvedReason::UnknownApprovalLine(
                code.to_string(),
            )));
        };

        Ok(match manager.user_id {
            Some(user) => Resolution::Resolved(user),
            None => Resolution::Unresolved(UnresolvedReason::EmployeeWithoutUser(manager.id)),
        })
    }

    async fn resolve_role(
        &self,
        role_id: RoleId,
        context: &ResolutionContext,
    ) -> Result<Resolution, StoreError> {
        let Some(role) = self.identities.find_role_by_id(role_id).await? else {
            return Ok(Resolution::Unresolved(UnresolvedReason::UnknownRole(role_id)));
        };

        if role.is_manager() {
            return self.resolve_reports_to(context).await;
        }

        let members = self.identities.find_users_with_role(role.id).await?;
        Ok(match members.into_iter().min() {
            Some(user) => Resolution::Resolved(user),
            None => Resolution::Unresolved(UnresolvedReason::RoleWithoutMembers(role.id)),
        })
    }

    async fn resolve_employee(&self, employee_id: EmployeeId) -> Result<Resolution, StoreError> {
        if self.identities.find_employee_by_id(employee_id).await?.is_none() {
            return Ok(Resolution::Unresolved(UnresolvedReason::UnknownEmployee(employee_id)));
        }

        Ok(match self.identities.employee_linked_user(employee_id).await? {
            Some(user) => Resolution::Resolved(user),
            None => Resolution::Unresolved(UnresolvedReason::EmployeeWithoutUser(employee_id)),
        })
    }
}
