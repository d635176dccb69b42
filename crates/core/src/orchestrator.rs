//! Entry point for submissions and decisions. Coordinates the layer planner,
//! the approver resolver and the approval ledger, and emits notification
//! requests after ledger writes commit.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink};
use crate::config::{AdvancePolicy, WorkflowConfig};
use crate::domain::approval::{
    ApprovableRef, Approval, ApprovalDraft, ApprovalId, ApprovalStatus, Decision, OpeningId,
};
use crate::domain::identity::UserId;
use crate::domain::layer::LayerId;
use crate::errors::WorkflowError;
use crate::planner::{ConfigMissing, LayerPlan, LayerPlanner};
use crate::ports::{
    ApprovalDecided, ApprovalLedger, ApprovalRequested, ConfigurationStore, IdentityStore,
    LevelWrite, Notifier,
};
use crate::resolver::{ApproverResolver, Resolution, ResolutionContext, UnresolvedReason};

/// Conceptual state of one approvable object, derived from its ledger rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "level", rename_all = "snake_case")]
pub enum WorkflowState {
    NoWorkflow,
    AwaitingLayer(i32),
    Approved,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    /// Nothing configured; the object needs no approval.
    NoWorkflow { missing: ConfigMissing },
    /// At least one pending row exists for the level.
    Opened { level: i32 },
    /// Layers exist at the level but none resolved to an approver.
    Unfilled { level: i32 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedSlot {
    pub layer_id: LayerId,
    pub level: i32,
    pub approver_type: String,
    pub reason: UnresolvedReason,
}

/// Slot whose approver already holds a row from an earlier slot of the same level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoveredSlot {
    pub layer_id: LayerId,
    pub approver: UserId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReport {
    pub subject: ApprovableRef,
    pub outcome: SubmissionOutcome,
    pub created: Vec<Approval>,
    pub duplicates: usize,
    pub covered: Vec<CoveredSlot>,
    pub unresolved: Vec<UnresolvedSlot>,
}

impl SubmissionReport {
    fn no_workflow(subject: ApprovableRef, missing: ConfigMissing) -> Self {
        Self {
            subject,
            outcome: SubmissionOutcome::NoWorkflow { missing },
            created: Vec::new(),
            duplicates: 0,
            covered: Vec::new(),
            unresolved: Vec::new(),
        }
    }

    fn from_opening(subject: ApprovableRef, opening: LevelOpening) -> Self {
        let outcome = if opening.has_pending_rows() {
            SubmissionOutcome::Opened { level: opening.level }
        } else {
            SubmissionOutcome::Unfilled { level: opening.level }
        };
        Self {
            subject,
            outcome,
            created: opening.created,
            duplicates: opening.duplicates,
            covered: opening.covered,
            unresolved: opening.unresolved,
        }
    }

    /// True when at least one configured slot produced no approver.
    pub fn is_partial(&self) -> bool {
        !self.unresolved.is_empty()
    }

    pub fn requires_approval(&self) -> bool {
        !matches!(self.outcome, SubmissionOutcome::NoWorkflow { .. })
    }
}

struct LevelOpening {
    level: i32,
    created: Vec<Approval>,
    duplicates: usize,
    covered: Vec<CoveredSlot>,
    unresolved: Vec<UnresolvedSlot>,
}

impl LevelOpening {
    fn has_pending_rows(&self) -> bool {
        !self.created.is_empty() || self.duplicates > 0
    }
}

pub struct WorkflowOrchestrator<C: ?Sized, I: ?Sized, L: ?Sized, N: ?Sized> {
    config: Arc<C>,
    identities: Arc<I>,
    ledger: Arc<L>,
    notifier: Arc<N>,
    audit: Arc<dyn AuditSink>,
    settings: WorkflowConfig,
}

impl<C, I, L, N> WorkflowOrchestrator<C, I, L, N>
where
    C: ConfigurationStore + ?Sized,
    I: IdentityStore + ?Sized,
    L: ApprovalLedger + ?Sized,
    N: Notifier + ?Sized,
{
    pub fn new(config: Arc<C>, identities: Arc<I>, ledger: Arc<L>, notifier: Arc<N>) -> Self {
        Self {
            config,
            identities,
            ledger,
            notifier,
            audit: Arc::new(NoopAuditSink),
            settings: WorkflowConfig::default(),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_settings(mut self, settings: WorkflowConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &WorkflowConfig {
        &self.settings
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Opens the lowest active level for `subject`. Unresolvable slots and
    /// already-pending rows are skipped, never raised.
    pub async fn submit_for_approval(
        &self,
        subject: &ApprovableRef,
        sender: UserId,
        approval_line: Option<&str>,
    ) -> Result<SubmissionReport, WorkflowError> {
        let correlation_id = Uuid::new_v4().to_string();

        let planner = LayerPlanner::new(self.config.as_ref());
        let plan = match planner.layers_for(&subject.type_key).await? {
            Ok(plan) => plan,
            Err(missing) => {
                info!(
                    event_name = "approval.config.missing",
                    correlation_id = %correlation_id,
                    subject = %subject,
                    missing = ?missing,
                    "no approval workflow configured"
                );
                self.audit.emit(
                    AuditEvent::new(
                        Some(subject.clone()),
                        correlation_id.as_str(),
                        "approval.config.missing",
                        AuditCategory::Submission,
                        actor(sender),
                        AuditOutcome::Skipped,
                    )
                    .with_metadata("missing", format!("{missing:?}")),
                );
                return Ok(SubmissionReport::no_workflow(subject.clone(), missing));
            }
        };

        let Some(level) = plan.min_level() else {
            let missing = ConfigMissing::NoActiveLayers { type_key: subject.type_key.clone() };
            return Ok(SubmissionReport::no_workflow(subject.clone(), missing));
        };

        let requester_employee = self.identities.find_employee_for_user(sender).await?;
        let mut context = ResolutionContext::new(sender).with_employee(requester_employee);
        if let Some(code) = approval_line {
            context = context.with_approval_line(code);
        }

        let opening =
            self.open_level(&plan, level, subject, sender, &context, &correlation_id).await?;

        Ok(SubmissionReport::from_opening(subject.clone(), opening))
    }

    /// Applies an approver's decision. Authorization and double-decision
    /// failures are returned to the caller untouched. Once the ledger commits
    /// the decision the call succeeds; a failed follow-up level opening is
    /// logged and left for [`Self::advance`].
    pub async fn decide(
        &self,
        approval_id: &ApprovalId,
        acting: UserId,
        decision: Decision,
    ) -> Result<Approval, WorkflowError> {
        let correlation_id = Uuid::new_v4().to_string();

        let approval = match self.ledger.decide(approval_id, acting, decision).await {
            Ok(approval) => approval,
            Err(error) => {
                let error = WorkflowError::from(error);
                warn!(
                    event_name = "approval.decision.rejected",
                    correlation_id = %correlation_id,
                    approval_id = %approval_id,
                    acting = acting.0,
                    error = %error,
                    "approval decision rejected"
                );
                self.audit.emit(
                    AuditEvent::new(
                        None,
                        correlation_id.as_str(),
                        "approval.decision.rejected",
                        AuditCategory::Decision,
                        actor(acting),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("approval_id", approval_id.to_string())
                    .with_metadata("error", error.to_string()),
                );
                return Err(error);
            }
        };

        info!(
            event_name = "approval.decision.applied",
            correlation_id = %correlation_id,
            approval_id = %approval.id,
            subject = %approval.subject,
            layer_level = approval.level,
            status = approval.status.as_str(),
            "approval decision applied"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(approval.subject.clone()),
                correlation_id.as_str(),
                "approval.decision.applied",
                AuditCategory::Decision,
                actor(acting),
                AuditOutcome::Success,
            )
            .with_metadata("approval_id", approval.id.to_string())
            .with_metadata("level", approval.level.to_string())
            .with_metadata("status", approval.status.as_str()),
        );

        if self.settings.notify_on_decision {
            let event = ApprovalDecided {
                approval_id: approval.id.clone(),
                sender: approval.sender,
                subject: approval.subject.clone(),
                decision,
                level: approval.level,
                decider: acting,
            };
            if let Err(error) = self.notifier.approval_decided(event).await {
                self.notification_failed(&approval, &correlation_id, &error.to_string());
            }
        }

        if self.settings.advance_policy == AdvancePolicy::Sequential
            && decision == Decision::Approved
        {
            if let Err(error) = self.advance_due(&approval.subject, &correlation_id).await {
                self.advance_failed(&approval.subject, acting, &correlation_id, &error);
            }
        }

        Ok(approval)
    }

    /// Opens the next level when the latest opening for `subject` is fully
    /// approved and that level has not been opened yet. The due level is read
    /// from the ledger, so repeating the call is harmless. Returns `None` when
    /// nothing is due or the advance policy is `latest_wins`.
    pub async fn advance(
        &self,
        subject: &ApprovableRef,
    ) -> Result<Option<SubmissionReport>, WorkflowError> {
        if self.settings.advance_policy != AdvancePolicy::Sequential {
            return Ok(None);
        }
        let correlation_id = Uuid::new_v4().to_string();
        self.advance_due(subject, &correlation_id).await
    }

    /// Status of the most recently created row; `Pending` when none exist.
    pub async fn status_of(
        &self,
        subject: &ApprovableRef,
    ) -> Result<ApprovalStatus, WorkflowError> {
        Ok(self.ledger.status_for(subject).await?)
    }

    pub async fn workflow_state(
        &self,
        subject: &ApprovableRef,
    ) -> Result<WorkflowState, WorkflowError> {
        let rows = self.ledger.list_for(subject).await?;
        Ok(derive_state(&rows))
    }

    pub async fn history_of(
        &self,
        subject: &ApprovableRef,
    ) -> Result<Vec<Approval>, WorkflowError> {
        Ok(self.ledger.list_for(subject).await?)
    }

    pub async fn inbox(&self, approver: UserId) -> Result<Vec<Approval>, WorkflowError> {
        Ok(self.ledger.pending_for_approver(approver).await?)
    }

    async fn open_level(
        &self,
        plan: &LayerPlan,
        level: i32,
        subject: &ApprovableRef,
        sender: UserId,
        context: &ResolutionContext,
        correlation_id: &str,
    ) -> Result<LevelOpening, WorkflowError> {
        let resolver = ApproverResolver::new(self.identities.as_ref());
        let opening_id = OpeningId::generate();
        let mut seen: HashSet<UserId> = HashSet::new();
        let mut drafts = Vec::new();
        let mut covered = Vec::new();
        let mut unresolved = Vec::new();

        for layer in plan.layers_at(level) {
            match resolver.resolve(&layer.approver_spec, context).await? {
                Resolution::Resolved(approver) => {
                    if !seen.insert(approver) {
                        covered.push(CoveredSlot { layer_id: layer.id, approver });
                        continue;
                    }
                    drafts.push(ApprovalDraft {
                        subject: subject.clone(),
                        layer_id: layer.id,
                        level,
                        approver,
                        sender,
                        display_name: plan.approvable_type.display_name.clone(),
                        opening_id: opening_id.clone(),
                    });
                }
                Resolution::Unresolved(reason) => {
                    warn!(
                        event_name = "approval.slot.unresolved",
                        correlation_id = %correlation_id,
                        subject = %subject,
                        layer_id = layer.id.0,
                        layer_level = level,
                        approver_type = layer.approver_spec.type_str(),
                        reason = reason.code(),
                        "approver slot resolved to nobody; slot skipped"
                    );
                    self.audit.emit(
                        AuditEvent::new(
                            Some(subject.clone()),
                            correlation_id,
                            "approval.slot.unresolved",
                            AuditCategory::Resolution,
                            actor(sender),
                            AuditOutcome::Skipped,
                        )
                        .with_metadata("layer_id", layer.id.to_string())
                        .with_metadata("level", level.to_string())
                        .with_metadata("reason", reason.code()),
                    );
                    unresolved.push(UnresolvedSlot {
                        layer_id: layer.id,
                        level,
                        approver_type: layer.approver_spec.type_str().to_string(),
                        reason,
                    });
                }
            }
        }

        let write = if drafts.is_empty() {
            LevelWrite::default()
        } else {
            self.ledger.open_level(drafts).await?
        };

        let unfilled = write.created.is_empty() && write.duplicates.is_empty();
        let event_name =
            if unfilled { "approval.level.unfilled" } else { "approval.level.opened" };
        if unfilled {
            warn!(
                event_name,
                correlation_id = %correlation_id,
                subject = %subject,
                layer_level = level,
                unresolved = unresolved.len(),
                "no approver could be resolved for level"
            );
        } else {
            info!(
                event_name,
                correlation_id = %correlation_id,
                subject = %subject,
                layer_level = level,
                created = write.created.len(),
                duplicates = write.duplicates.len(),
                unresolved = unresolved.len(),
                "approval level opened"
            );
        }
        self.audit.emit(
            AuditEvent::new(
                Some(subject.clone()),
                correlation_id,
                event_name,
                AuditCategory::Ledger,
                actor(sender),
                if write.created.is_empty() {
                    AuditOutcome::Skipped
                } else {
                    AuditOutcome::Success
                },
            )
            .with_metadata("level", level.to_string())
            .with_metadata("created", write.created.len().to_string())
            .with_metadata("duplicates", write.duplicates.len().to_string())
            .with_metadata("unresolved", unresolved.len().to_string()),
        );

        for approval in &write.created {
            let event = ApprovalRequested {
                approval_id: approval.id.clone(),
                approver: approval.approver,
                subject: approval.subject.clone(),
                display_name: approval.display_name.clone(),
                level: approval.level,
            };
            if let Err(error) = self.notifier.approval_requested(event).await {
                self.notification_failed(approval, correlation_id, &error.to_string());
            }
        }

        Ok(LevelOpening {
            level,
            created: write.created,
            duplicates: write.duplicates.len(),
            covered,
            unresolved,
        })
    }

    async fn advance_due(
        &self,
        subject: &ApprovableRef,
        correlation_id: &str,
    ) -> Result<Option<SubmissionReport>, WorkflowError> {
        let rows = self.ledger.list_for(subject).await?;
        let Some(latest) = rows.last() else {
            return Ok(None);
        };

        let opening_complete = rows
            .iter()
            .filter(|row| row.opening_id == latest.opening_id)
            .all(|row| row.status == ApprovalStatus::Approved);
        let level_pending =
            rows.iter().any(|row| row.level == latest.level && row.status.is_pending());
        if !opening_complete || level_pending {
            return Ok(None);
        }

        let planner = LayerPlanner::new(self.config.as_ref());
        let Ok(plan) = planner.layers_for(&subject.type_key).await? else {
            return Ok(None);
        };
        let Some(next_level) = plan.next_level_after(latest.level) else {
            return Ok(None);
        };

        let sender = latest.sender;
        let from_level = latest.level;
        let requester_employee = self.identities.find_employee_for_user(sender).await?;
        let context = ResolutionContext::new(sender).with_employee(requester_employee);
        let opening = self
            .open_level(&plan, next_level, subject, sender, &context, correlation_id)
            .await?;

        info!(
            event_name = "approval.level.advanced",
            correlation_id = %correlation_id,
            subject = %subject,
            from_level,
            to_level = next_level,
            created = opening.created.len(),
            "workflow advanced to next level"
        );
        Ok(Some(SubmissionReport::from_opening(subject.clone(), opening)))
    }

    fn advance_failed(
        &self,
        subject: &ApprovableRef,
        acting: UserId,
        correlation_id: &str,
        error: &WorkflowError,
    ) {
        warn!(
            event_name = "approval.level.advance_failed",
            correlation_id = %correlation_id,
            subject = %subject,
            error = %error,
            retryable = error.is_retryable(),
            "decision kept; next level not opened"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(subject.clone()),
                correlation_id,
                "approval.level.advance_failed",
                AuditCategory::Ledger,
                actor(acting),
                AuditOutcome::Failed,
            )
            .with_metadata("error", error.to_string()),
        );
    }

    fn notification_failed(&self, approval: &Approval, correlation_id: &str, error: &str) {
        warn!(
            event_name = "approval.notify.failed",
            correlation_id = %correlation_id,
            approval_id = %approval.id,
            subject = %approval.subject,
            error = %error,
            "notification request failed; ledger change kept"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(approval.subject.clone()),
                correlation_id,
                "approval.notify.failed",
                AuditCategory::Notification,
                "notifier",
                AuditOutcome::Failed,
            )
            .with_metadata("approval_id", approval.id.to_string())
            .with_metadata("error", error),
        );
    }
}

/// Latest-row-wins view over a subject's rows, oldest first.
pub fn derive_state(rows: &[Approval]) -> WorkflowState {
    let Some(latest) = rows.last() else {
        return WorkflowState::NoWorkflow;
    };

    match latest.status {
        ApprovalStatus::Approved => WorkflowState::Approved,
        ApprovalStatus::Rejected => WorkflowState::Rejected,
        ApprovalStatus::Pending => {
            let level = rows
                .iter()
                .filter(|row| row.status.is_pending())
                .map(|row| row.level)
                .min()
                .unwrap_or(latest.level);
            WorkflowState::AwaitingLayer(level)
        }
    }
}

fn actor(user: UserId) -> String {
    format!("user:{}", user.0)
}
