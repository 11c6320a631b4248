use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::service::ServiceState;

/// Whether an error ends a run depends on the step that hit it; the
/// orchestrator decides.
#[derive(Debug, Error)]
pub enum ReplicError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("service '{name}' is not available: {reason}")]
    ServiceNotFound { name: String, reason: String },

    #[error(
        "service '{name}' did not reach {target} within {}s, last state: {last}",
        timeout.as_secs()
    )]
    ServiceTimeout {
        name: String,
        target: ServiceState,
        last: ServiceState,
        timeout: Duration,
    },

    #[error("could not {action} service '{name}': {reason}")]
    ServiceControl {
        name: String,
        action: &'static str,
        reason: String,
    },

    #[error("executable not found: {}", path.display())]
    ExecutableNotFound { path: PathBuf },

    #[error("failed to launch {}: {reason}", path.display())]
    LaunchFailed { path: PathBuf, reason: String },

    #[error("backup of database '{database}' failed: {reason}")]
    BackupFailed { database: String, reason: String },

    #[error("installation of {} failed with exit code {code}", path.display())]
    InstallFailed { path: PathBuf, code: i32 },

    #[error("recompilation failed with exit code {0}")]
    RecompileFailed(i32),

    #[error("failed to remove {}: {reason}", path.display())]
    CleanupFailed { path: PathBuf, reason: String },

    #[error("mail delivery failed: {0}")]
    Mail(String),

    #[error("settings store: {0}")]
    Settings(String),

    #[error("logging: {0}")]
    Logging(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReplicError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_last_state() {
        let err = ReplicError::ServiceTimeout {
            name: "Console".into(),
            target: ServiceState::Stopped,
            last: ServiceState::StopPending,
            timeout: Duration::from_secs(600),
        };
        let msg = err.to_string();
        assert!(msg.contains("Console"));
        assert!(msg.contains("600s"));
        assert!(msg.contains("StopPending"));
    }
}
