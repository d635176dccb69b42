pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod notify;
pub mod orchestrator;
pub mod planner;
pub mod ports;
pub mod resolver;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use domain::approval::{
    ApprovableRef, Approval, ApprovalDraft, ApprovalId, ApprovalStatus, Decision, OpeningId,
};
pub use domain::identity::{Employee, EmployeeId, Role, RoleId, User, UserId};
pub use domain::layer::{
    ApprovableType, ApprovableTypeId, ApproverLayer, ApproverSpec, LayerId, LayerStatus,
};
pub use errors::{InterfaceError, LedgerError, StoreError, WorkflowError};
pub use notify::{InMemoryNotifier, Notification, TracingNotifier};
pub use orchestrator::{
    SubmissionOutcome, SubmissionReport, UnresolvedSlot, WorkflowOrchestrator, WorkflowState,
};
pub use planner::{ConfigMissing, LayerPlan, LayerPlanner};
pub use ports::{ApprovalLedger, ConfigurationStore, IdentityStore, LevelWrite, Notifier};
pub use resolver::{ApproverResolver, Resolution, ResolutionContext, UnresolvedReason};
