use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;

use crate::ports::{ApprovalDecided, ApprovalRequested, Notifier, NotifyError};

/// Writes notification requests to the log. Used when no delivery transport
/// is wired in.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn approval_requested(&self, event: ApprovalRequested) -> Result<(), NotifyError> {
        info!(
            event_name = "approval.notify.requested",
            approval_id = %event.approval_id,
            approver = event.approver.0,
            subject = %event.subject,
            level = event.level,
            "approval requested"
        );
        Ok(())
    }

    async fn approval_decided(&self, event: ApprovalDecided) -> Result<(), NotifyError> {
        info!(
            event_name = "approval.notify.decided",
            approval_id = %event.approval_id,
            sender = event.sender.0,
            subject = %event.subject,
            decision = ?event.decision,
            level = event.level,
            decider = event.decider.0,
            "approval decided"
        );
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    Requested(ApprovalRequested),
    Decided(ApprovalDecided),
}

/// Records every request; can be switched into a failing mode to exercise
/// delivery errors.
#[derive(Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing: Arc<Mutex<bool>>,
}

impl InMemoryNotifier {
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.set_failing(true);
        notifier
    }

    pub fn set_failing(&self, failing: bool) {
        match self.failing.lock() {
            Ok(mut flag) => *flag = failing,
            Err(poisoned) => *poisoned.into_inner() = failing,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn requested(&self) -> Vec<ApprovalRequested> {
        self.sent()
            .into_iter()
            .filter_map(|notification| match notification {
                Notification::Requested(event) => Some(event),
                Notification::Decided(_) => None,
            })
            .collect()
    }

    pub fn decided(&self) -> Vec<ApprovalDecided> {
        self.sent()
            .into_iter()
            .filter_map(|notification| match notification {
                Notification::Decided(event) => Some(event),
                Notification::Requested(_) => None,
            })
            .collect()
    }

    fn record(&self, notification: Notification) -> Result<(), NotifyError> {
        let failing = match self.failing.lock() {
            Ok(flag) => *flag,
            Err(poisoned) => *poisoned.into_inner(),
        };
        if failing {
            return Err(NotifyError("notifier configured to fail".to_string()));
        }

        match self.sent.lock() {
            Ok(mut sent) => sent.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn approval_requested(&self, event: ApprovalRequested) -> Result<(), NotifyError> {
        self.record(Notification::Requested(event))
    }

    async fn approval_decided(&self, event: ApprovalDecided) -> Result<(), NotifyError> {
        self.record(Notification::Decided(event))
    }
}
