//! The replication run.
//!
//! ```text
//! Idle → ServicesStopping → BackingUp → InstallingPackages → Recompiling
//!      → ServicesStarting → Done
//!                 any fatal error → Aborted
//! ```
//!
//! Every step blocks. A fatal error ends the run where it happened; the
//! outcome is then reported exactly once, whatever it is.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::backup::{BackupGate, BackupOutcome, Database};
use crate::config::RunConfiguration;
use crate::error::{ReplicError, Result};
use crate::logging::LogHandle;
use crate::notify::Notifier;
use crate::process::{EleedTools, ExternalProcessRunner, ProcessLauncher};
use crate::queue::ReplicationQueue;
use crate::service::{PollSettings, ServiceController, ServiceManager};

// ---------------------------------------------------------------------------
// RunState / RunOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    ServicesStopping,
    BackingUp,
    InstallingPackages,
    Recompiling,
    ServicesStarting,
    Done,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub succeeded: bool,
    pub failure_cause: Option<String>,
    /// Packages installed before the run ended, in installation order.
    pub installed: Vec<PathBuf>,
}

impl RunOutcome {
    pub fn success(installed: Vec<PathBuf>) -> Self {
        Self {
            succeeded: true,
            failure_cause: None,
            installed,
        }
    }

    pub fn aborted(cause: &ReplicError, installed: Vec<PathBuf>) -> Self {
        Self {
            succeeded: false,
            failure_cause: Some(cause.to_string()),
            installed,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// External systems the run talks to.
pub struct Collaborators {
    pub services: Box<dyn ServiceManager>,
    pub launcher: Box<dyn ProcessLauncher>,
    pub database: Box<dyn Database>,
    pub notifier: Box<dyn Notifier>,
}

pub struct Orchestrator {
    config: RunConfiguration,
    replics_base: PathBuf,
    services: ServiceController,
    runner: ExternalProcessRunner,
    tools: EleedTools,
    database: Box<dyn Database>,
    notifier: Box<dyn Notifier>,
    log: Option<LogHandle>,
    state: RunState,
}

impl Orchestrator {
    pub fn new(
        config: RunConfiguration,
        replics_base: impl Into<PathBuf>,
        collaborators: Collaborators,
        log: Option<LogHandle>,
    ) -> Self {
        let services = ServiceController::new(
            collaborators.services,
            PollSettings::from(&config.services),
        );
        let tools = EleedTools::new(&config.eleed);
        Self {
            replics_base: replics_base.into(),
            services,
            runner: ExternalProcessRunner::new(collaborators.launcher),
            tools,
            database: collaborators.database,
            notifier: collaborators.notifier,
            log,
            state: RunState::Idle,
            config,
        }
    }

    /// Execute the whole run and report it. Consumes the orchestrator: a run
    /// happens once.
    pub fn run(mut self) -> RunOutcome {
        let span = info_span!("run", run_id = %Uuid::new_v4(), project = %self.config.project_name);
        let _guard = span.enter();

        let mut installed = Vec::new();
        let outcome = match self.execute(&mut installed) {
            Ok(()) => {
                info!(installed = installed.len(), "all replications have been loaded successfully");
                RunOutcome::success(installed)
            }
            Err(e) => {
                let from = self.state;
                self.transition(RunState::Aborted);
                error!(state = %from, error = %e, "run aborted");
                RunOutcome::aborted(&e, installed)
            }
        };

        if let Some(log) = &self.log {
            log.flush();
        }
        let log_file = self.log.as_ref().map(|l| l.path());
        if let Err(e) = self.notifier.notify(&outcome, log_file) {
            error!(error = %e, "failed to send the run report");
        }
        outcome
    }

    fn execute(&mut self, installed: &mut Vec<PathBuf>) -> Result<()> {
        // The database name locates the queue; check it before touching
        // any service.
        let queue = ReplicationQueue::open(&self.replics_base, &self.config.database.name)?;

        self.transition(RunState::ServicesStopping);
        self.stop_services()?;

        self.transition(RunState::BackingUp);
        let backup = BackupGate::new(self.database.as_ref()).run(&self.config)?;
        if let BackupOutcome::Completed { file } = &backup {
            info!(file = %file.display(), "backup verified");
        }
        // The installer talks to the running application.
        self.services
            .start(&self.config.services.console)
            .inspect_err(|e| error!(error = %e, "failed to start the console service"))?;

        let pending = queue.list_pending()?;
        if pending.is_empty() {
            info!(dir = %queue.dir().display(), "no replications pending");
        } else {
            info!(
                count = pending.len(),
                dir = %queue.dir().display(),
                "replications found"
            );
            self.transition(RunState::InstallingPackages);
            for item in &pending {
                info!(package = %item.path.display(), "replication is loading");
                self.tools.install(&self.runner, &item.path)?;
                installed.push(item.path.clone());
                if let Err(e) = queue.remove(item) {
                    warn!(error = %e, "failed to remove an installed replication file");
                }
            }

            self.transition(RunState::Recompiling);
            if let Err(e) = self.tools.recompile(&self.runner) {
                error!(error = %e, "recompilation failed; run the compiler manually");
            }
        }

        self.transition(RunState::ServicesStarting);
        if let Err(e) = self.services.start(&self.config.services.netpipe) {
            warn!(error = %e, "failed to start the netpipe service");
        }

        self.transition(RunState::Done);
        Ok(())
    }

    fn stop_services(&self) -> Result<()> {
        if let Err(e) = self.services.stop(&self.config.services.netpipe) {
            warn!(error = %e, "failed to stop the netpipe service");
        }
        self.services
            .stop(&self.config.services.console)
            .inspect_err(|e| error!(error = %e, "failed to stop the console service"))
    }

    fn transition(&mut self, next: RunState) {
        info!(from = %self.state, to = %next, "run state");
        self.state = next;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
