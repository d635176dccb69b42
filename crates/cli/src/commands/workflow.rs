//! Submission, decision and query commands. Each call opens the configured
//! database, makes sure the schema is current, and runs one orchestrator
//! operation.

use std::future::Future;
use std::sync::Arc;

use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::commands::{build_runtime, load_config, CommandFailure, CommandResult};
use signoff_core::config::AppConfig;
use signoff_core::domain::approval::{ApprovableRef, ApprovalId, Decision};
use signoff_core::domain::identity::UserId;
use signoff_core::errors::WorkflowError;
use signoff_core::notify::TracingNotifier;
use signoff_core::orchestrator::{SubmissionOutcome, SubmissionReport, WorkflowOrchestrator};
use signoff_db::{
    connect_with_settings, migrations, DbPool, SqlApprovalLedger, SqlConfigurationStore,
    SqlIdentityStore,
};

type SqlOrchestrator = WorkflowOrchestrator<
    SqlConfigurationStore,
    SqlIdentityStore,
    SqlApprovalLedger,
    TracingNotifier,
>;

pub fn submit(
    type_key: &str,
    object_id: &str,
    sender: i64,
    approval_line: Option<&str>,
) -> CommandResult {
    let subject = ApprovableRef::new(type_key, object_id);
    let approval_line = approval_line.map(str::to_string);

    execute("submit", |orchestrator| async move {
        match orchestrator
            .submit_for_approval(&subject, UserId(sender), approval_line.as_deref())
            .await
        {
            Ok(report) => {
                CommandResult::success_with_data("submit", describe_submission(&report), &report)
            }
            Err(error) => workflow_failure("submit", error),
        }
    })
}

pub fn decide(approval_id: &str, acting: i64, decision: &str) -> CommandResult {
    let decision = match decision.parse::<Decision>() {
        Ok(decision) => decision,
        Err(message) => return CommandResult::failure("decide", "invalid_argument", message, 2),
    };
    let approval_id = ApprovalId(approval_id.trim().to_string());

    execute("decide", |orchestrator| async move {
        match orchestrator.decide(&approval_id, UserId(acting), decision).await {
            Ok(approval) => CommandResult::success_with_data(
                "decide",
                format!("approval {} is now {}", approval.id, approval.status.as_str()),
                &approval,
            ),
            Err(error) => workflow_failure("decide", error),
        }
    })
}

pub fn advance(type_key: &str, object_id: &str) -> CommandResult {
    let subject = ApprovableRef::new(type_key, object_id);

    execute("advance", |orchestrator| async move {
        match orchestrator.advance(&subject).await {
            Ok(Some(report)) => {
                CommandResult::success_with_data("advance", describe_submission(&report), &report)
            }
            Ok(None) => CommandResult::success_with_data(
                "advance",
                format!("no level is due for {subject}"),
                &json!({ "subject": subject, "advanced": false }),
            ),
            Err(error) => workflow_failure("advance", error),
        }
    })
}

pub fn status(type_key: &str, object_id: &str) -> CommandResult {
    let subject = ApprovableRef::new(type_key, object_id);

    execute("status", |orchestrator| async move {
        let status = match orchestrator.status_of(&subject).await {
            Ok(status) => status,
            Err(error) => return workflow_failure("status", error),
        };
        let state = match orchestrator.workflow_state(&subject).await {
            Ok(state) => state,
            Err(error) => return workflow_failure("status", error),
        };

        CommandResult::success_with_data(
            "status",
            format!("{subject} is {}", status.as_str()),
            &json!({ "subject": subject, "status": status, "workflow": state }),
        )
    })
}

pub fn inbox(user: i64) -> CommandResult {
    execute("inbox", |orchestrator| async move {
        match orchestrator.inbox(UserId(user)).await {
            Ok(pending) => CommandResult::success_with_data(
                "inbox",
                format!("{} pending approval(s) for user {user}", pending.len()),
                &pending,
            ),
            Err(error) => workflow_failure("inbox", error),
        }
    })
}

pub fn history(type_key: &str, object_id: &str) -> CommandResult {
    let subject = ApprovableRef::new(type_key, object_id);

    execute("history", |orchestrator| async move {
        match orchestrator.history_of(&subject).await {
            Ok(rows) => CommandResult::success_with_data(
                "history",
                format!("{} approval row(s) for {subject}", rows.len()),
                &rows,
            ),
            Err(error) => workflow_failure("history", error),
        }
    })
}

fn execute<F, Fut>(command: &'static str, body: F) -> CommandResult
where
    F: FnOnce(SqlOrchestrator) -> Fut,
    Fut: Future<Output = CommandResult>,
{
    let config = match load_config(command) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match build_runtime(command) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    runtime.block_on(async {
        match open_orchestrator(&config).await {
            Ok((pool, orchestrator)) => {
                let result = body(orchestrator).await;
                pool.close().await;
                result
            }
            Err(failure) => CommandResult::from((command, failure)),
        }
    })
}

async fn open_orchestrator(
    config: &AppConfig,
) -> Result<(DbPool, SqlOrchestrator), CommandFailure> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string(), 5u8))?;

    let orchestrator = WorkflowOrchestrator::new(
        Arc::new(SqlConfigurationStore::new(pool.clone())),
        Arc::new(SqlIdentityStore::new(pool.clone())),
        Arc::new(SqlApprovalLedger::new(pool.clone())),
        Arc::new(TracingNotifier),
    )
    .with_settings(config.workflow.clone());
    Ok((pool, orchestrator))
}

fn describe_submission(report: &SubmissionReport) -> String {
    match &report.outcome {
        SubmissionOutcome::NoWorkflow { .. } => format!(
            "no approval workflow configured for `{}`; approval not required",
            report.subject.type_key
        ),
        SubmissionOutcome::Opened { level } => {
            let mut message = format!(
                "level {level} opened: {} approval(s) created, {} already pending",
                report.created.len(),
                report.duplicates
            );
            if report.is_partial() {
                message.push_str(&format!(", {} slot(s) unresolved", report.unresolved.len()));
            }
            message
        }
        SubmissionOutcome::Unfilled { level } => format!(
            "level {level} has no resolvable approver ({} slot(s) unresolved)",
            report.unresolved.len()
        ),
    }
}

fn workflow_failure(command: &str, error: WorkflowError) -> CommandResult {
    let correlation_id = Uuid::new_v4().to_string();
    let (error_class, exit_code) = match &error {
        WorkflowError::NotAuthorized { .. } => ("not_authorized", 6),
        WorkflowError::AlreadyDecided { .. } => ("already_decided", 7),
        WorkflowError::ApprovalNotFound(_) => ("not_found", 8),
        WorkflowError::Storage(_) => ("storage_unavailable", 4),
    };
    warn!(
        event_name = "cli.command.failed",
        command,
        correlation_id = %correlation_id,
        retryable = error.is_retryable(),
        error = %error,
        "workflow command failed"
    );

    let interface = error.into_interface(correlation_id);
    CommandResult::failure_with_correlation(
        command,
        error_class,
        interface.user_message(),
        interface.correlation_id(),
        exit_code,
    )
}

#[cfg(test)]
mod tests {
    use signoff_core::domain::approval::{ApprovableRef, ApprovalId, ApprovalStatus};
    use signoff_core::errors::WorkflowError;
    use signoff_core::orchestrator::{SubmissionOutcome, SubmissionReport};
    use signoff_core::planner::ConfigMissing;

    use super::{describe_submission, workflow_failure};

    #[test]
    fn already_decided_maps_to_conflict_exit_code() {
        let result = workflow_failure(
            "decide",
            WorkflowError::AlreadyDecided {
                approval_id: ApprovalId("apr-1".to_string()),
                status: ApprovalStatus::Approved,
            },
        );
        let payload: serde_json::Value = serde_json::from_str(&result.output).expect("json");

        assert_eq!(result.exit_code, 7);
        assert_eq!(payload["error_class"], "already_decided");
        assert_eq!(payload["message"], "This approval has already been decided.");
        assert!(payload["correlation_id"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[test]
    fn no_workflow_submission_reads_as_not_required() {
        let report = SubmissionReport {
            subject: ApprovableRef::new("overtime", "OT-1"),
            outcome: SubmissionOutcome::NoWorkflow {
                missing: ConfigMissing::UnknownApprovableType { type_key: "overtime".to_string() },
            },
            created: Vec::new(),
            duplicates: 0,
            covered: Vec::new(),
            unresolved: Vec::new(),
        };

        assert_eq!(
            describe_submission(&report),
            "no approval workflow configured for `overtime`; approval not required"
        );
    }
}
