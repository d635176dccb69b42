//! End-to-end workflow scenarios run against both the in-memory stores and
//! SQLite, through the public orchestrator API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use signoff_core::audit::InMemoryAuditSink;
use signoff_core::config::{AdvancePolicy, WorkflowConfig};
use signoff_core::domain::approval::{
    ApprovableRef, Approval, ApprovalDraft, ApprovalId, ApprovalStatus, Decision,
};
use signoff_core::domain::identity::{RoleId, UserId};
use signoff_core::domain::layer::LayerId;
use signoff_core::errors::{LedgerError, StoreError, WorkflowError};
use signoff_core::notify::InMemoryNotifier;
use signoff_core::orchestrator::{SubmissionOutcome, WorkflowOrchestrator, WorkflowState};
use signoff_core::planner::ConfigMissing;
use signoff_core::ports::{ApprovalLedger, ConfigurationStore, IdentityStore, LevelWrite};
use signoff_core::resolver::UnresolvedReason;
use signoff_db::{
    connect_with_settings, migrations, InMemoryApprovalLedger, InMemoryConfigurationStore,
    InMemoryIdentityStore, SqlApprovalLedger, SqlConfigurationStore, SqlIdentityStore,
    WorkflowCatalog,
};

type Orchestrator = WorkflowOrchestrator<
    dyn ConfigurationStore,
    dyn IdentityStore,
    dyn ApprovalLedger,
    InMemoryNotifier,
>;

#[derive(Clone, Copy, Debug)]
enum Backend {
    InMemory,
    Sqlite,
}

struct Harness {
    orchestrator: Orchestrator,
    notifier: InMemoryNotifier,
    audit: InMemoryAuditSink,
    memory_ledger: Option<Arc<InMemoryApprovalLedger>>,
}

/// Requester Ana (user 3, employee EMP003) reports to MGR007 (user 7). The
/// HR role exists but nobody holds it.
const BASE_DIRECTORY: &str = r#"
[[users]]
id = 3
name = "Ana"

[[users]]
id = 5
name = "Director"

[[users]]
id = 7
name = "Budi"

[[users]]
id = 9
name = "Citra"

[[users]]
id = 42
name = "Dewi"

[[roles]]
id = 1
name = "Manager"
members = [9]

[[roles]]
id = 2
name = "HR"
members = []

[[roles]]
id = 3
name = "Finance"
members = [9, 5]

[[employees]]
id = 1
code = "EMP003"
name = "Ana"
approval_line = "MGR007"
user_id = 3

[[employees]]
id = 2
code = "MGR007"
name = "Budi"
user_id = 7

[[employees]]
id = 3
code = "EMP010"
name = "Unlinked"
approval_line = "MGR404"
"#;

const HR_AND_FIXED_USER: &str = r#"
[[approvable_types]]
id = 1
key = "leave"
display_name = "Leave Request"

[[approvable_types.layers]]
id = 1
level = 1
approver_type = "role"
approver_id = 2

[[approvable_types.layers]]
id = 2
level = 1
approver_type = "App\\Models\\User"
approver_id = 42
"#;

const MANAGER_AND_HR: &str = r#"
[[approvable_types]]
id = 1
key = "leave"
display_name = "Leave Request"

[[approvable_types.layers]]
id = 1
level = 1
approver_type = "Spatie\\Permission\\Models\\Role"
approver_id = 1

[[approvable_types.layers]]
id = 2
level = 1
approver_type = "role"
approver_id = 3
"#;

const TWO_LEVELS: &str = r#"
[[approvable_types]]
id = 1
key = "leave"
display_name = "Leave Request"

[[approvable_types.layers]]
id = 1
level = 1
approver_type = "user"
approver_id = 42

[[approvable_types.layers]]
id = 2
level = 1
approver_type = "reports_to"

[[approvable_types.layers]]
id = 3
level = 2
approver_type = "user"
approver_id = 5

[[approvable_types.layers]]
id = 4
level = 3
approver_type = "user"
approver_id = 9
status = "inactive"
"#;

const SAME_APPROVER_TWICE: &str = r#"
[[approvable_types]]
id = 1
key = "leave"
display_name = "Leave Request"

[[approvable_types.layers]]
id = 1
level = 1
approver_type = "reports_to"

[[approvable_types.layers]]
id = 2
level = 1
approver_type = "employee"
approver_id = 2
"#;

const ONLY_INACTIVE: &str = r#"
[[approvable_types]]
id = 1
key = "leave"
display_name = "Leave Request"

[[approvable_types.layers]]
id = 1
level = 1
approver_type = "user"
approver_id = 42
status = "inactive"
"#;

async fn harness(backend: Backend, workflow: &str, settings: WorkflowConfig) -> Harness {
    let catalog =
        WorkflowCatalog::parse(&format!("{BASE_DIRECTORY}\n{workflow}")).expect("catalog");
    let notifier = InMemoryNotifier::default();
    let audit = InMemoryAuditSink::default();

    let (config, identities, ledger, memory_ledger) = match backend {
        Backend::InMemory => {
            let config = Arc::new(InMemoryConfigurationStore::default());
            let identities = Arc::new(InMemoryIdentityStore::default());
            catalog.populate(&config, &identities).await.expect("populate");
            let ledger = Arc::new(InMemoryApprovalLedger::default());

            let config: Arc<dyn ConfigurationStore> = config;
            let identities: Arc<dyn IdentityStore> = identities;
            let shared: Arc<dyn ApprovalLedger> = ledger.clone();
            (config, identities, shared, Some(ledger))
        }
        Backend::Sqlite => {
            let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
            migrations::run_pending(&pool).await.expect("migrations");
            catalog.load(&pool).await.expect("load catalog");

            let config: Arc<dyn ConfigurationStore> =
                Arc::new(SqlConfigurationStore::new(pool.clone()));
            let identities: Arc<dyn IdentityStore> = Arc::new(SqlIdentityStore::new(pool.clone()));
            let ledger: Arc<dyn ApprovalLedger> = Arc::new(SqlApprovalLedger::new(pool));
            (config, identities, ledger, None)
        }
    };

    let orchestrator =
        WorkflowOrchestrator::new(config, identities, ledger, Arc::new(notifier.clone()))
            .with_audit_sink(Arc::new(audit.clone()))
            .with_settings(settings);

    Harness { orchestrator, notifier, audit, memory_ledger }
}

fn leave(object_id: &str) -> ApprovableRef {
    ApprovableRef::new("leave", object_id)
}

fn sequential() -> WorkflowConfig {
    WorkflowConfig { advance_policy: AdvancePolicy::Sequential, ..WorkflowConfig::default() }
}

async fn hr_slot_without_holder_is_skipped(backend: Backend) {
    let h = harness(backend, HR_AND_FIXED_USER, WorkflowConfig::default()).await;
    let subject = leave("LV-1");

    let report =
        h.orchestrator.submit_for_approval(&subject, UserId(3), None).await.expect("submit");

    assert_eq!(report.outcome, SubmissionOutcome::Opened { level: 1 });
    assert_eq!(report.created.len(), 1);
    assert_eq!(report.created[0].approver, UserId(42));
    assert_eq!(report.created[0].layer_id, LayerId(2));
    assert!(report.is_partial());
    assert_eq!(report.unresolved.len(), 1);
    assert_eq!(report.unresolved[0].reason, UnresolvedReason::RoleWithoutMembers(RoleId(2)));

    let history = h.orchestrator.history_of(&subject).await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(h.audit.events_of_type("approval.slot.unresolved").len(), 1);
    assert_eq!(h.notifier.requested().len(), 1);
}

async fn manager_role_follows_explicit_approval_line(backend: Backend) {
    let h = harness(backend, MANAGER_AND_HR, WorkflowConfig::default()).await;
    let subject = leave("LV-2");

    // User 9 nominally holds the Manager role and has no employee record, so
    // only the explicit code can route the Manager slot.
    let report = h
        .orchestrator
        .submit_for_approval(&subject, UserId(9), Some("MGR007"))
        .await
        .expect("submit");

    let approvers: Vec<(LayerId, UserId)> =
        report.created.iter().map(|row| (row.layer_id, row.approver)).collect();
    assert_eq!(approvers, vec![(LayerId(1), UserId(7)), (LayerId(2), UserId(5))]);
    assert!(!report.is_partial());
}

async fn manager_role_without_line_is_unresolved(backend: Backend) {
    let h = harness(backend, MANAGER_AND_HR, WorkflowConfig::default()).await;

    // User 9 has no employee record, so there is no stored line to fall back on.
    let report = h
        .orchestrator
        .submit_for_approval(&leave("LV-3"), UserId(9), Some("   "))
        .await
        .expect("submit");

    assert_eq!(report.created.len(), 1);
    assert_eq!(report.created[0].layer_id, LayerId(2));
    assert_eq!(report.unresolved[0].reason, UnresolvedReason::NoApprovalLine);
}

async fn resubmission_never_duplicates_pending_rows(backend: Backend) {
    let h = harness(backend, TWO_LEVELS, WorkflowConfig::default()).await;
    let subject = leave("LV-4");

    let first = h.orchestrator.submit_for_approval(&subject, UserId(3), None).await.expect("1st");
    let second =
        h.orchestrator.submit_for_approval(&subject, UserId(3), None).await.expect("2nd");

    assert_eq!(first.created.len(), 2);
    assert!(second.created.is_empty());
    assert_eq!(second.duplicates, 2);
    assert_eq!(second.outcome, SubmissionOutcome::Opened { level: 1 });
    assert_eq!(h.orchestrator.history_of(&subject).await.expect("history").len(), 2);
    assert_eq!(h.notifier.requested().len(), 2);
}

async fn submission_only_opens_the_lowest_level(backend: Backend) {
    let h = harness(backend, TWO_LEVELS, WorkflowConfig::default()).await;
    let subject = leave("LV-5");

    let report =
        h.orchestrator.submit_for_approval(&subject, UserId(3), None).await.expect("submit");

    assert!(report.created.iter().all(|row| row.level == 1));
    let rows = h.orchestrator.history_of(&subject).await.expect("history");
    assert!(rows.iter().all(|row| row.level == 1));
    assert_eq!(
        h.orchestrator.workflow_state(&subject).await.expect("state"),
        WorkflowState::AwaitingLayer(1)
    );
}

async fn decide_applies_once(backend: Backend) {
    let h = harness(backend, HR_AND_FIXED_USER, WorkflowConfig::default()).await;
    let subject = leave("LV-6");
    let report =
        h.orchestrator.submit_for_approval(&subject, UserId(3), None).await.expect("submit");
    let id = report.created[0].id.clone();

    let decided =
        h.orchestrator.decide(&id, UserId(42), Decision::Approved).await.expect("decide");
    assert_eq!(decided.status, ApprovalStatus::Approved);
    assert!(decided.decided_at.is_some());

    let error = h
        .orchestrator
        .decide(&id, UserId(42), Decision::Rejected)
        .await
        .expect_err("second decision");
    assert!(matches!(
        error,
        WorkflowError::AlreadyDecided { status: ApprovalStatus::Approved, .. }
    ));
    assert_eq!(h.orchestrator.status_of(&subject).await.expect("status"), ApprovalStatus::Approved);

    let decided_events = h.notifier.decided();
    assert_eq!(decided_events.len(), 1);
    assert_eq!(decided_events[0].sender, UserId(3));
    assert_eq!(decided_events[0].decision, Decision::Approved);
}

async fn wrong_approver_is_not_authorized(backend: Backend) {
    let h = harness(backend, HR_AND_FIXED_USER, WorkflowConfig::default()).await;
    let subject = leave("LV-7");
    let report =
        h.orchestrator.submit_for_approval(&subject, UserId(3), None).await.expect("submit");
    let id = report.created[0].id.clone();

    let error =
        h.orchestrator.decide(&id, UserId(7), Decision::Approved).await.expect_err("forbidden");
    assert!(matches!(error, WorkflowError::NotAuthorized { acting: UserId(7), .. }));
    assert!(!error.is_retryable());

    let row = h.orchestrator.ledger().find_by_id(&id).await.expect("find").expect("row");
    assert_eq!(row.status, ApprovalStatus::Pending);
    assert!(row.decided_at.is_none());
    assert_eq!(h.audit.events_of_type("approval.decision.rejected").len(), 1);
}

async fn latest_row_decides_status(backend: Backend) {
    let h = harness(backend, HR_AND_FIXED_USER, WorkflowConfig::default()).await;
    let subject = leave("LV-8");
    assert_eq!(h.orchestrator.status_of(&subject).await.expect("status"), ApprovalStatus::Pending);
    assert_eq!(
        h.orchestrator.workflow_state(&subject).await.expect("state"),
        WorkflowState::NoWorkflow
    );

    let first = h.orchestrator.submit_for_approval(&subject, UserId(3), None).await.expect("1st");
    h.orchestrator
        .decide(&first.created[0].id, UserId(42), Decision::Rejected)
        .await
        .expect("reject");
    assert_eq!(h.orchestrator.status_of(&subject).await.expect("status"), ApprovalStatus::Rejected);

    let second = h.orchestrator.submit_for_approval(&subject, UserId(3), None).await.expect("2nd");
    assert_eq!(second.created.len(), 1);
    assert_eq!(h.orchestrator.status_of(&subject).await.expect("status"), ApprovalStatus::Pending);

    h.orchestrator
        .decide(&second.created[0].id, UserId(42), Decision::Approved)
        .await
        .expect("approve");
    assert_eq!(h.orchestrator.status_of(&subject).await.expect("status"), ApprovalStatus::Approved);
    assert_eq!(h.orchestrator.history_of(&subject).await.expect("history").len(), 2);
}

async fn latest_wins_never_opens_later_levels(backend: Backend) {
    let h = harness(backend, TWO_LEVELS, WorkflowConfig::default()).await;
    let subject = leave("LV-9");
    let report =
        h.orchestrator.submit_for_approval(&subject, UserId(3), None).await.expect("submit");

    for row in &report.created {
        h.orchestrator.decide(&row.id, row.approver, Decision::Approved).await.expect("decide");
    }

    let rows = h.orchestrator.history_of(&subject).await.expect("history");
    assert_eq!(rows.len(), 2);
    assert!(h.orchestrator.advance(&subject).await.expect("advance").is_none());
    assert!(h.orchestrator.inbox(UserId(5)).await.expect("inbox").is_empty());
    assert_eq!(
        h.orchestrator.workflow_state(&subject).await.expect("state"),
        WorkflowState::Approved
    );
}

async fn sequential_policy_advances_after_full_approval(backend: Backend) {
    let h = harness(backend, TWO_LEVELS, sequential()).await;
    let subject = leave("LV-10");
    let report =
        h.orchestrator.submit_for_approval(&subject, UserId(3), None).await.expect("submit");
    let by_approver = |user: UserId| {
        report.created.iter().find(|row| row.approver == user).expect("row").id.clone()
    };

    h.orchestrator
        .decide(&by_approver(UserId(42)), UserId(42), Decision::Approved)
        .await
        .expect("first approval");
    assert!(h.orchestrator.inbox(UserId(5)).await.expect("inbox").is_empty());

    h.orchestrator
        .decide(&by_approver(UserId(7)), UserId(7), Decision::Approved)
        .await
        .expect("second approval");
    let inbox = h.orchestrator.inbox(UserId(5)).await.expect("inbox");
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].level, 2);
    assert_eq!(
        h.orchestrator.workflow_state(&subject).await.expect("state"),
        WorkflowState::AwaitingLayer(2)
    );

    h.orchestrator.decide(&inbox[0].id, UserId(5), Decision::Approved).await.expect("final");
    assert_eq!(
        h.orchestrator.workflow_state(&subject).await.expect("state"),
        WorkflowState::Approved
    );
    // Level 3 is inactive, so nothing else opens.
    assert!(h.orchestrator.advance(&subject).await.expect("advance").is_none());
    assert_eq!(h.orchestrator.history_of(&subject).await.expect("history").len(), 3);
}

async fn sequential_policy_stops_on_rejection(backend: Backend) {
    let h = harness(backend, TWO_LEVELS, sequential()).await;
    let subject = leave("LV-11");
    let report =
        h.orchestrator.submit_for_approval(&subject, UserId(3), None).await.expect("submit");

    for row in &report.created {
        h.orchestrator.decide(&row.id, row.approver, Decision::Rejected).await.expect("reject");
    }

    assert_eq!(h.orchestrator.history_of(&subject).await.expect("history").len(), 2);
    assert_eq!(h.orchestrator.status_of(&subject).await.expect("status"), ApprovalStatus::Rejected);
}

async fn same_approver_in_two_slots_gets_one_row(backend: Backend) {
    let h = harness(backend, SAME_APPROVER_TWICE, WorkflowConfig::default()).await;

    let report =
        h.orchestrator.submit_for_approval(&leave("LV-12"), UserId(3), None).await.expect("submit");

    assert_eq!(report.created.len(), 1);
    assert_eq!(report.created[0].layer_id, LayerId(1));
    assert_eq!(report.covered.len(), 1);
    assert_eq!(report.covered[0].layer_id, LayerId(2));
    assert_eq!(report.covered[0].approver, UserId(7));
}

async fn missing_configuration_needs_no_approval(backend: Backend) {
    let h = harness(backend, ONLY_INACTIVE, WorkflowConfig::default()).await;

    let inactive =
        h.orchestrator.submit_for_approval(&leave("LV-13"), UserId(3), None).await.expect("leave");
    assert!(!inactive.requires_approval());
    assert!(matches!(
        inactive.outcome,
        SubmissionOutcome::NoWorkflow { missing: ConfigMissing::NoActiveLayers { .. } }
    ));

    let unknown = h
        .orchestrator
        .submit_for_approval(&ApprovableRef::new("overtime", "OT-1"), UserId(3), None)
        .await
        .expect("overtime");
    assert!(matches!(
        unknown.outcome,
        SubmissionOutcome::NoWorkflow { missing: ConfigMissing::UnknownApprovableType { .. } }
    ));
    assert!(unknown.created.is_empty());
    assert_eq!(h.audit.events_of_type("approval.config.missing").len(), 2);
}

async fn unresolvable_level_is_reported_unfilled(backend: Backend) {
    let workflow = HR_AND_FIXED_USER.replace("42", "404");
    let h = harness(backend, &workflow, WorkflowConfig::default()).await;

    let report =
        h.orchestrator.submit_for_approval(&leave("LV-14"), UserId(3), None).await.expect("submit");

    assert_eq!(report.outcome, SubmissionOutcome::Unfilled { level: 1 });
    assert!(report.created.is_empty());
    assert_eq!(report.unresolved.len(), 2);
    assert!(h.notifier.sent().is_empty());
    assert_eq!(h.audit.events_of_type("approval.level.unfilled").len(), 1);
    assert!(h.audit.events_of_type("approval.level.opened").is_empty());
}

async fn notifier_failure_keeps_committed_rows(backend: Backend) {
    let h = harness(backend, HR_AND_FIXED_USER, WorkflowConfig::default()).await;
    h.notifier.set_failing(true);
    let subject = leave("LV-15");

    let report =
        h.orchestrator.submit_for_approval(&subject, UserId(3), None).await.expect("submit");
    assert_eq!(report.created.len(), 1);

    h.orchestrator
        .decide(&report.created[0].id, UserId(42), Decision::Approved)
        .await
        .expect("decide despite failing notifier");

    assert_eq!(h.orchestrator.status_of(&subject).await.expect("status"), ApprovalStatus::Approved);
    assert_eq!(h.audit.events_of_type("approval.notify.failed").len(), 2);
}

async fn inbox_lists_pending_rows_per_approver(backend: Backend) {
    let h = harness(backend, TWO_LEVELS, WorkflowConfig::default()).await;

    h.orchestrator.submit_for_approval(&leave("LV-16"), UserId(3), None).await.expect("first");
    let second =
        h.orchestrator.submit_for_approval(&leave("LV-17"), UserId(3), None).await.expect("second");
    let decided = second.created.iter().find(|row| row.approver == UserId(42)).expect("row");
    h.orchestrator.decide(&decided.id, UserId(42), Decision::Approved).await.expect("decide");

    let inbox = h.orchestrator.inbox(UserId(42)).await.expect("inbox");
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].subject, leave("LV-16"));
    assert_eq!(h.orchestrator.inbox(UserId(7)).await.expect("inbox").len(), 2);
}

macro_rules! on_both_backends {
    ($($scenario:ident),* $(,)?) => {
        mod in_memory {
            $(
                #[tokio::test]
                async fn $scenario() {
                    super::$scenario(super::Backend::InMemory).await;
                }
            )*
        }

        mod sqlite {
            $(
                #[tokio::test]
                async fn $scenario() {
                    super::$scenario(super::Backend::Sqlite).await;
                }
            )*
        }
    };
}

on_both_backends!(
    hr_slot_without_holder_is_skipped,
    manager_role_follows_explicit_approval_line,
    manager_role_without_line_is_unresolved,
    resubmission_never_duplicates_pending_rows,
    submission_only_opens_the_lowest_level,
    decide_applies_once,
    wrong_approver_is_not_authorized,
    latest_row_decides_status,
    latest_wins_never_opens_later_levels,
    sequential_policy_advances_after_full_approval,
    sequential_policy_stops_on_rejection,
    same_approver_in_two_slots_gets_one_row,
    missing_configuration_needs_no_approval,
    unresolvable_level_is_reported_unfilled,
    notifier_failure_keeps_committed_rows,
    inbox_lists_pending_rows_per_approver,
);

#[tokio::test]
async fn storage_failure_is_retryable_and_writes_nothing() {
    let h = harness(Backend::InMemory, HR_AND_FIXED_USER, WorkflowConfig::default()).await;
    let ledger = h.memory_ledger.clone().expect("in-memory ledger");
    ledger.set_unavailable(true);

    let error = h
        .orchestrator
        .submit_for_approval(&leave("LV-18"), UserId(3), None)
        .await
        .expect_err("storage failure");

    assert!(error.is_retryable());
    assert!(matches!(error, WorkflowError::Storage(_)));
    assert!(ledger.is_empty().await);
    assert!(h.notifier.sent().is_empty());

    ledger.set_unavailable(false);
    let report = h
        .orchestrator
        .submit_for_approval(&leave("LV-18"), UserId(3), None)
        .await
        .expect("retry succeeds");
    assert_eq!(report.created.len(), 1);
}

/// In-memory ledger whose level openings fail while `fail_openings` is set.
#[derive(Default)]
struct FailingOpenings {
    inner: InMemoryApprovalLedger,
    fail_openings: AtomicBool,
}

#[async_trait]
impl ApprovalLedger for FailingOpenings {
    async fn exists_pending(
        &self,
        subject: &ApprovableRef,
        layer_id: LayerId,
        approver: UserId,
    ) -> Result<bool, StoreError> {
        self.inner.exists_pending(subject, layer_id, approver).await
    }

    async fn create(&self, draft: ApprovalDraft) -> Result<Approval, LedgerError> {
        self.inner.create(draft).await
    }

    async fn open_level(&self, drafts: Vec<ApprovalDraft>) -> Result<LevelWrite, StoreError> {
        if self.fail_openings.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("level write refused".to_string()));
        }
        self.inner.open_level(drafts).await
    }

    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, StoreError> {
        self.inner.find_by_id(id).await
    }

    async fn decide(
        &self,
        id: &ApprovalId,
        acting: UserId,
        decision: Decision,
    ) -> Result<Approval, LedgerError> {
        self.inner.decide(id, acting, decision).await
    }

    async fn list_for(&self, subject: &ApprovableRef) -> Result<Vec<Approval>, StoreError> {
        self.inner.list_for(subject).await
    }

    async fn latest_for(&self, subject: &ApprovableRef) -> Result<Option<Approval>, StoreError> {
        self.inner.latest_for(subject).await
    }

    async fn pending_for_approver(&self, approver: UserId) -> Result<Vec<Approval>, StoreError> {
        self.inner.pending_for_approver(approver).await
    }
}

#[tokio::test]
async fn failed_level_opening_keeps_decision_and_advances_later() {
    let catalog =
        WorkflowCatalog::parse(&format!("{BASE_DIRECTORY}\n{TWO_LEVELS}")).expect("catalog");
    let config = Arc::new(InMemoryConfigurationStore::default());
    let identities = Arc::new(InMemoryIdentityStore::default());
    catalog.populate(&config, &identities).await.expect("populate");
    let ledger = Arc::new(FailingOpenings::default());
    let audit = InMemoryAuditSink::default();
    let orchestrator = WorkflowOrchestrator::new(
        config,
        identities,
        ledger.clone(),
        Arc::new(InMemoryNotifier::default()),
    )
    .with_audit_sink(Arc::new(audit.clone()))
    .with_settings(sequential());

    let subject = leave("LV-19");
    let report = orchestrator.submit_for_approval(&subject, UserId(3), None).await.expect("submit");
    let by_approver = |user: UserId| {
        report.created.iter().find(|row| row.approver == user).expect("row").id.clone()
    };
    orchestrator
        .decide(&by_approver(UserId(42)), UserId(42), Decision::Approved)
        .await
        .expect("first approval");

    ledger.fail_openings.store(true, Ordering::SeqCst);
    let decided = orchestrator
        .decide(&by_approver(UserId(7)), UserId(7), Decision::Approved)
        .await
        .expect("committed decision is reported as applied");
    assert_eq!(decided.status, ApprovalStatus::Approved);
    assert_eq!(audit.events_of_type("approval.level.advance_failed").len(), 1);
    assert!(orchestrator.inbox(UserId(5)).await.expect("inbox").is_empty());

    let error = orchestrator
        .advance(&subject)
        .await
        .expect_err("level write still refused");
    assert!(error.is_retryable());

    ledger.fail_openings.store(false, Ordering::SeqCst);
    let advanced = orchestrator.advance(&subject).await.expect("advance").expect("level due");
    assert_eq!(advanced.outcome, SubmissionOutcome::Opened { level: 2 });
    assert_eq!(advanced.created.len(), 1);
    assert_eq!(advanced.created[0].approver, UserId(5));
    assert_eq!(
        orchestrator.workflow_state(&subject).await.expect("state"),
        WorkflowState::AwaitingLayer(2)
    );

    assert!(orchestrator.advance(&subject).await.expect("advance again").is_none());
    assert_eq!(orchestrator.inbox(UserId(5)).await.expect("inbox").len(), 1);
}
