//! OS service lifecycle control.
//!
//! [`ServiceManager`] is the narrow capability over the platform's service
//! manager (resolve, query, start, stop). [`ServiceController`] layers the
//! policy on top: empty names are unmanaged, services already in the target
//! state are left alone, and after a native action the state is polled at a
//! fixed cadence until it lands or the timeout elapses.

pub mod sc;
pub mod systemctl;

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::ServiceSettings;
use crate::error::{ReplicError, Result};

pub use sc::ScManager;
pub use systemctl::SystemctlManager;

// ---------------------------------------------------------------------------
// ServiceState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Stopped,
    StartPending,
    StopPending,
    Running,
    ContinuePending,
    PausePending,
    Paused,
    Unknown,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Stopped => "Stopped",
            ServiceState::StartPending => "StartPending",
            ServiceState::StopPending => "StopPending",
            ServiceState::Running => "Running",
            ServiceState::ContinuePending => "ContinuePending",
            ServiceState::PausePending => "PausePending",
            ServiceState::Paused => "Paused",
            ServiceState::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

impl ServiceState {
    /// The transitional state a service passes through on its way to `self`.
    fn pending_towards(self) -> Option<ServiceState> {
        match self {
            ServiceState::Running => Some(ServiceState::StartPending),
            ServiceState::Stopped => Some(ServiceState::StopPending),
            _ => None,
        }
    }

    /// The settled state a start or stop request moves away from.
    fn opposite(self) -> Option<ServiceState> {
        match self {
            ServiceState::Running => Some(ServiceState::Stopped),
            ServiceState::Stopped => Some(ServiceState::Running),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceHandle / ServiceManager
// ---------------------------------------------------------------------------

/// A resolved service and the last state observed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    pub name: String,
    pub state: ServiceState,
}

impl ServiceHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ServiceState::Unknown,
        }
    }
}

/// Platform service manager.
///
/// `resolve` fails with [`ReplicError::ServiceNotFound`] when the service is
/// not installed or cannot be opened. `start` and `stop` only issue the
/// request; waiting is the controller's job.
pub trait ServiceManager {
    fn resolve(&self, name: &str) -> Result<ServiceHandle>;
    fn query(&self, handle: &ServiceHandle) -> Result<ServiceState>;
    fn start(&self, handle: &ServiceHandle) -> Result<()>;
    fn stop(&self, handle: &ServiceHandle) -> Result<()>;
}

/// The service manager for the platform this binary runs on.
pub fn default_manager() -> Box<dyn ServiceManager> {
    if cfg!(windows) {
        Box::new(ScManager::default())
    } else {
        Box::new(SystemctlManager::default())
    }
}

// ---------------------------------------------------------------------------
// ServiceController
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl From<&ServiceSettings> for PollSettings {
    fn from(settings: &ServiceSettings) -> Self {
        Self {
            interval: settings.poll_interval(),
            timeout: settings.timeout(),
        }
    }
}

pub struct ServiceController {
    manager: Box<dyn ServiceManager>,
    poll: PollSettings,
}

impl ServiceController {
    pub fn new(manager: Box<dyn ServiceManager>, poll: PollSettings) -> Self {
        Self { manager, poll }
    }

    pub fn query(&self, name: &str) -> Result<ServiceState> {
        let handle = self.manager.resolve(name)?;
        self.manager.query(&handle)
    }

    pub fn start(&self, name: &str) -> Result<()> {
        self.drive(name, ServiceState::Running)
    }

    pub fn stop(&self, name: &str) -> Result<()> {
        self.drive(name, ServiceState::Stopped)
    }

    fn drive(&self, name: &str, target: ServiceState) -> Result<()> {
        if name.trim().is_empty() {
            debug!(target_state = %target, "no service configured, nothing to do");
            return Ok(());
        }

        let mut handle = self.manager.resolve(name).inspect_err(|e| {
            error!(service = name, error = %e, "failed to resolve service");
        })?;
        handle.state = self.manager.query(&handle).inspect_err(|e| {
            error!(service = name, error = %e, "failed to query service state");
        })?;
        info!(service = name, state = %handle.state, "service state");

        if handle.state == target {
            info!(service = name, state = %target, "service already in target state");
            return Ok(());
        }

        // The manager rejects control requests mid-transition, so a service
        // heading the other way has to settle first.
        if let Some(settled) = target
            .opposite()
            .filter(|o| Some(handle.state) == o.pending_towards())
        {
            info!(service = name, state = %handle.state, "waiting for pending transition to finish");
            self.wait_for(&mut handle, settled)?;
        }

        // A service already on its way there only needs waiting on.
        if Some(handle.state) != target.pending_towards() {
            let requested = match target {
                ServiceState::Running => self.manager.start(&handle),
                _ => self.manager.stop(&handle),
            };
            requested.inspect_err(|e| {
                error!(service = name, error = %e, "service control request failed");
            })?;
        }

        let reached = self.wait_for(&mut handle, target)?;
        info!(service = name, state = %reached, "service reached target state");
        Ok(())
    }

    fn wait_for(&self, handle: &mut ServiceHandle, target: ServiceState) -> Result<ServiceState> {
        let deadline = Instant::now() + self.poll.timeout;
        loop {
            let state = self.manager.query(handle).inspect_err(|e| {
                error!(service = %handle.name, error = %e, "failed to query service state");
            })?;
            if state != handle.state {
                info!(service = %handle.name, from = %handle.state, to = %state, "service state changed");
                handle.state = state;
            }
            if state == target {
                return Ok(state);
            }
            if Instant::now() >= deadline {
                let err = ReplicError::ServiceTimeout {
                    name: handle.name.clone(),
                    target,
                    last: state,
                    timeout: self.poll.timeout,
                };
                error!(service = %handle.name, error = %err, "timed out waiting for service");
                return Err(err);
            }
            std::thread::sleep(self.poll.interval);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
