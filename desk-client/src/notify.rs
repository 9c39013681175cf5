// desk-client/src/notify.rs
// 操作结果通知 - 成功/失败各上报一次

use crate::error::SyncError;
use crate::sync::mutation::MutationKind;

/// Outcome of one mutation, as shown to the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success {
        action: MutationKind,
        target: String,
    },
    Failure {
        action: MutationKind,
        target: String,
        error: SyncError,
    },
}

impl Notice {
    pub fn action(&self) -> MutationKind {
        match self {
            Notice::Success { action, .. } | Notice::Failure { action, .. } => *action,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Notice::Success { target, .. } | Notice::Failure { target, .. } => target,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Notice::Failure { .. })
    }

    /// Toast text
    pub fn message(&self) -> String {
        match self {
            Notice::Success { action, .. } => format!("{} succeeded", action.label()),
            Notice::Failure { action, error, .. } => format!("{} failed: {error}", action.label()),
        }
    }
}

/// Receives mutation outcomes (toast layer)
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Default notifier: writes outcomes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match &notice {
            Notice::Success { action, target } => {
                tracing::info!(%action, ticket_id = %target, "{}", notice.message());
            }
            Notice::Failure {
                action,
                target,
                error,
            } => {
                tracing::warn!(%action, ticket_id = %target, %error, "{}", notice.message());
            }
        }
    }
}
