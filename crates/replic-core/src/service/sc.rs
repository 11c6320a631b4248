//! Windows Service Control Manager backend driven through `sc.exe`.
//!
//! `sc query <name>` prints a block like:
//!
//! ```text
//! SERVICE_NAME: Console
//!         TYPE               : 10  WIN32_OWN_PROCESS
//!         STATE              : 4  RUNNING
//! ```
//!
//! The numeric code after `STATE` is the SCM state constant.

use std::path::PathBuf;
use std::process::{Command, Output};

use super::{ServiceHandle, ServiceManager, ServiceState};
use crate::error::{ReplicError, Result};

/// `ERROR_SERVICE_DOES_NOT_EXIST`
const SERVICE_DOES_NOT_EXIST: i32 = 1060;

#[derive(Debug, Clone)]
pub struct ScManager {
    program: PathBuf,
}

impl Default for ScManager {
    fn default() -> Self {
        Self {
            program: PathBuf::from("sc.exe"),
        }
    }
}

impl ScManager {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn exec(&self, args: &[&str]) -> std::io::Result<Output> {
        Command::new(&self.program).args(args).output()
    }

    fn control(&self, verb: &'static str, handle: &ServiceHandle) -> Result<()> {
        let output = self
            .exec(&[verb, &handle.name])
            .map_err(|e| ReplicError::ServiceControl {
                name: handle.name.clone(),
                action: verb,
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(ReplicError::ServiceControl {
                name: handle.name.clone(),
                action: verb,
                reason: combined(&output),
            });
        }
        Ok(())
    }
}

impl ServiceManager for ScManager {
    fn resolve(&self, name: &str) -> Result<ServiceHandle> {
        let output = self
            .exec(&["query", name])
            .map_err(|e| ReplicError::ServiceNotFound {
                name: name.to_string(),
                reason: format!("cannot run {}: {e}", self.program.display()),
            })?;
        if !output.status.success() {
            let reason = match output.status.code() {
                Some(SERVICE_DOES_NOT_EXIST) => "service does not exist".to_string(),
                _ => combined(&output),
            };
            return Err(ReplicError::ServiceNotFound {
                name: name.to_string(),
                reason,
            });
        }
        Ok(ServiceHandle::new(name))
    }

    fn query(&self, handle: &ServiceHandle) -> Result<ServiceState> {
        let output = self
            .exec(&["query", &handle.name])
            .map_err(|e| ReplicError::ServiceControl {
                name: handle.name.clone(),
                action: "query",
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(ReplicError::ServiceControl {
                name: handle.name.clone(),
                action: "query",
                reason: combined(&output),
            });
        }
        Ok(parse_query_state(&String::from_utf8_lossy(&output.stdout)))
    }

    fn start(&self, handle: &ServiceHandle) -> Result<()> {
        self.control("start", handle)
    }

    fn stop(&self, handle: &ServiceHandle) -> Result<()> {
        self.control("stop", handle)
    }
}

fn combined(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let err = String::from_utf8_lossy(&output.stderr);
    if !err.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(err.trim());
    }
    text
}

/// Extract the service state from `sc query` output.
pub fn parse_query_state(output: &str) -> ServiceState {
    let code = output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim() == "STATE")
        .and_then(|(_, value)| value.split_whitespace().next())
        .and_then(|code| code.parse::<u32>().ok());

    match code {
        Some(1) => ServiceState::Stopped,
        Some(2) => ServiceState::StartPending,
        Some(3) => ServiceState::StopPending,
        Some(4) => ServiceState::Running,
        Some(5) => ServiceState::ContinuePending,
        Some(6) => ServiceState::PausePending,
        Some(7) => ServiceState::Paused,
        _ => ServiceState::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUNNING: &str = "\r\nSERVICE_NAME: Console\r\n        TYPE               : 10  WIN32_OWN_PROCESS\r\n        STATE              : 4  RUNNING\r\n                                (STOPPABLE, NOT_PAUSABLE, ACCEPTS_SHUTDOWN)\r\n        WIN32_EXIT_CODE    : 0  (0x0)\r\n";

    #[test]
    fn parses_running() {
        assert_eq!(parse_query_state(RUNNING), ServiceState::Running);
    }

    #[test]
    fn parses_every_scm_code() {
        let expected = [
            (1, ServiceState::Stopped),
            (2, ServiceState::StartPending),
            (3, ServiceState::StopPending),
            (5, ServiceState::ContinuePending),
            (6, ServiceState::PausePending),
            (7, ServiceState::Paused),
        ];
        for (code, state) in expected {
            let text = format!("        STATE              : {code}  WHATEVER\n");
            assert_eq!(parse_query_state(&text), state, "code {code}");
        }
    }

    #[test]
    fn garbage_is_unknown() {
        assert_eq!(parse_query_state("[SC] OpenService FAILED 5"), ServiceState::Unknown);
    }
}
