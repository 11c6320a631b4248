//! systemd backend driven through the `systemctl` command.

use std::path::PathBuf;
use std::process::{Command, Output};

use super::{ServiceHandle, ServiceManager, ServiceState};
use crate::error::{ReplicError, Result};

#[derive(Debug, Clone)]
pub struct SystemctlManager {
    program: PathBuf,
}

impl Default for SystemctlManager {
    fn default() -> Self {
        Self {
            program: PathBuf::from("systemctl"),
        }
    }
}

impl SystemctlManager {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn exec(&self, args: &[&str]) -> std::io::Result<Output> {
        Command::new(&self.program).args(args).output()
    }

    fn show(&self, name: &str, property: &str) -> Result<String> {
        let output = self
            .exec(&["show", name, "--property", property, "--value"])
            .map_err(|e| ReplicError::ServiceNotFound {
                name: name.to_string(),
                reason: format!("cannot run {}: {e}", self.program.display()),
            })?;
        if !output.status.success() {
            return Err(ReplicError::ServiceNotFound {
                name: name.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn control(&self, verb: &'static str, handle: &ServiceHandle) -> Result<()> {
        let output = self
            .exec(&[verb, "--no-block", &handle.name])
            .map_err(|e| ReplicError::ServiceControl {
                name: handle.name.clone(),
                action: verb,
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(ReplicError::ServiceControl {
                name: handle.name.clone(),
                action: verb,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl ServiceManager for SystemctlManager {
    fn resolve(&self, name: &str) -> Result<ServiceHandle> {
        let load_state = self.show(name, "LoadState")?;
        if load_state == "not-found" || load_state.is_empty() {
            return Err(ReplicError::ServiceNotFound {
                name: name.to_string(),
                reason: format!("unit load state is '{load_state}'"),
            });
        }
        Ok(ServiceHandle::new(name))
    }

    fn query(&self, handle: &ServiceHandle) -> Result<ServiceState> {
        let active = self.show(&handle.name, "ActiveState")?;
        Ok(parse_active_state(&active))
    }

    fn start(&self, handle: &ServiceHandle) -> Result<()> {
        self.control("start", handle)
    }

    fn stop(&self, handle: &ServiceHandle) -> Result<()> {
        self.control("stop", handle)
    }
}

/// Map systemd's `ActiveState` onto the service state model.
pub fn parse_active_state(value: &str) -> ServiceState {
    match value.trim() {
        "active" | "reloading" => ServiceState::Running,
        "inactive" | "failed" => ServiceState::Stopped,
        "activating" => ServiceState::StartPending,
        "deactivating" => ServiceState::StopPending,
        _ => ServiceState::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_states_map() {
        assert_eq!(parse_active_state("active\n"), ServiceState::Running);
        assert_eq!(parse_active_state("failed"), ServiceState::Stopped);
        assert_eq!(parse_active_state("inactive"), ServiceState::Stopped);
        assert_eq!(parse_active_state("activating"), ServiceState::StartPending);
        assert_eq!(parse_active_state("deactivating"), ServiceState::StopPending);
        assert_eq!(parse_active_state("maintenance"), ServiceState::Unknown);
    }

    #[test]
    fn missing_program_is_not_found() {
        let manager = SystemctlManager::with_program("/nonexistent/systemctl-for-tests");
        let err = manager.resolve("anything").unwrap_err();
        assert!(matches!(err, ReplicError::ServiceNotFound { .. }));
    }
}
