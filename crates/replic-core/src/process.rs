//! External process invocation for the installer and the compiler.
//!
//! The installer (`Akforta.eLeed.AdminToolsConsole.exe`) cannot cope with
//! automatically escaped arguments, so callers build one pre-quoted argument
//! line and the launcher hands it to the OS untouched:
//!
//! - Windows: appended to the raw command line.
//! - elsewhere: split with shell-word quoting rules and passed as separate
//!   arguments. No shell runs, so `$`, backticks and `$(...)` stay literal.
//!
//! Exit code policy lives in [`EleedTools`]: a failing installer aborts the
//! run, a failing compiler is only reported.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{error, info};

use crate::config::EleedSettings;
use crate::error::{ReplicError, Result};

pub const INSTALLER_EXE: &str = "Akforta.eLeed.AdminToolsConsole.exe";
pub const COMPILER_EXE: &str = "BIZ.Compiler.exe";
const INSTALL_PLUGIN: &str = "InnerReplicationPlugin";
const INSTALL_VERBOSITY: u32 = 4;

// ---------------------------------------------------------------------------
// ProcessInvocation
// ---------------------------------------------------------------------------

/// One finished external process call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInvocation {
    pub executable_path: PathBuf,
    pub argument_line: String,
    pub exit_code: i32,
    pub combined_output: String,
}

impl ProcessInvocation {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

// ---------------------------------------------------------------------------
// ProcessLauncher
// ---------------------------------------------------------------------------

/// Starts an executable with a verbatim argument line and waits for it.
pub trait ProcessLauncher {
    /// Resolve `executable` to a runnable file, searching `PATH` for bare names.
    fn resolve(&self, executable: &Path) -> Result<PathBuf>;

    /// Run to completion and return `(exit_code, combined_output)`.
    fn launch(&self, executable: &Path, argument_line: &str) -> Result<(i32, String)>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemLauncher {
    working_dir: Option<PathBuf>,
}

impl SystemLauncher {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
        }
    }
}

impl ProcessLauncher for SystemLauncher {
    fn resolve(&self, executable: &Path) -> Result<PathBuf> {
        which::which(executable).map_err(|_| ReplicError::ExecutableNotFound {
            path: executable.to_path_buf(),
        })
    }

    fn launch(&self, executable: &Path, argument_line: &str) -> Result<(i32, String)> {
        let mut cmd = build_command(executable, argument_line)?;
        if let Some(dir) = self.working_dir.as_ref().filter(|d| d.is_dir()) {
            cmd.current_dir(dir);
        }

        let output = cmd.output().map_err(|e| ReplicError::LaunchFailed {
            path: executable.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        // Killed by a signal: no exit code, report as a failure.
        let code = output.status.code().unwrap_or(-1);
        Ok((code, combined))
    }
}

#[cfg(windows)]
fn build_command(executable: &Path, argument_line: &str) -> Result<Command> {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    let mut cmd = Command::new(executable);
    cmd.raw_arg(argument_line).creation_flags(CREATE_NO_WINDOW);
    Ok(cmd)
}

#[cfg(not(windows))]
fn build_command(executable: &Path, argument_line: &str) -> Result<Command> {
    let args = shell_words::split(argument_line).map_err(|e| ReplicError::LaunchFailed {
        path: executable.to_path_buf(),
        reason: format!("malformed argument line: {e}"),
    })?;
    let mut cmd = Command::new(executable);
    cmd.args(args);
    Ok(cmd)
}

// ---------------------------------------------------------------------------
// ExternalProcessRunner
// ---------------------------------------------------------------------------

pub struct ExternalProcessRunner {
    launcher: Box<dyn ProcessLauncher>,
}

impl ExternalProcessRunner {
    pub fn new(launcher: Box<dyn ProcessLauncher>) -> Self {
        Self { launcher }
    }

    /// Resolve and run `executable`. A non-zero exit code is not an error at
    /// this level; it is returned for the caller to classify.
    pub fn run(&self, executable: &Path, argument_line: &str) -> Result<ProcessInvocation> {
        let resolved = self.launcher.resolve(executable).inspect_err(|e| {
            error!(executable = %executable.display(), error = %e, "cannot resolve executable");
        })?;

        let (exit_code, combined_output) = self
            .launcher
            .launch(&resolved, argument_line)
            .inspect_err(|e| {
                error!(executable = %resolved.display(), error = %e, "cannot launch executable");
            })?;

        let invocation = ProcessInvocation {
            executable_path: resolved,
            argument_line: argument_line.to_string(),
            exit_code,
            combined_output,
        };

        if invocation.succeeded() {
            info!(output = %invocation.combined_output.trim_end(), "process output");
        } else {
            error!(output = %invocation.combined_output.trim_end(), "process output");
        }
        info!(
            executable = %invocation.executable_path.display(),
            exit_code,
            "process completed"
        );
        Ok(invocation)
    }
}

// ---------------------------------------------------------------------------
// Argument line helpers
// ---------------------------------------------------------------------------

/// ` --key "value"`, or nothing when `value` is empty.
pub fn quoted_argument(key: &str, value: &str) -> String {
    if value.is_empty() {
        String::new()
    } else {
        format!(" --{key} \"{value}\"")
    }
}

/// ` --key value` for numeric arguments.
pub fn int_argument(key: &str, value: u32) -> String {
    format!(" --{key} {value}")
}

// ---------------------------------------------------------------------------
// EleedTools
// ---------------------------------------------------------------------------

/// The installer and compiler of the target application.
#[derive(Debug, Clone)]
pub struct EleedTools {
    installer: PathBuf,
    compiler: PathBuf,
    user: String,
    password: String,
}

impl EleedTools {
    pub fn new(settings: &EleedSettings) -> Self {
        Self {
            installer: settings.working_directory.join(INSTALLER_EXE),
            compiler: settings.working_directory.join(COMPILER_EXE),
            user: settings.user.clone(),
            password: settings.password.clone(),
        }
    }

    pub fn compiler_path(&self) -> &Path {
        &self.compiler
    }

    pub fn installer_arguments(&self, package: &Path) -> String {
        let mut line = String::with_capacity(200);
        line.push_str(&quoted_argument("plugin", INSTALL_PLUGIN));
        line.push_str(&quoted_argument("user", &self.user));
        line.push_str(&quoted_argument("password", &self.password));
        line.push_str(" --import --nocompilation");
        line.push_str(&int_argument("verbose", INSTALL_VERBOSITY));
        line.push_str(&quoted_argument("file", &package.to_string_lossy()));
        line
    }

    pub fn compiler_arguments(&self) -> String {
        let mut line = quoted_argument("user", &self.user);
        line.push_str(&quoted_argument("password", &self.password));
        line
    }

    /// Install one package. Any non-zero exit is [`ReplicError::InstallFailed`].
    pub fn install(&self, runner: &ExternalProcessRunner, package: &Path) -> Result<ProcessInvocation> {
        let invocation = runner.run(&self.installer, &self.installer_arguments(package))?;
        if !invocation.succeeded() {
            return Err(ReplicError::InstallFailed {
                path: package.to_path_buf(),
                code: invocation.exit_code,
            });
        }
        Ok(invocation)
    }

    /// Recompile the application. Any non-zero exit is
    /// [`ReplicError::RecompileFailed`], which callers treat as non-fatal.
    pub fn recompile(&self, runner: &ExternalProcessRunner) -> Result<ProcessInvocation> {
        let invocation = runner.run(&self.compiler, &self.compiler_arguments())?;
        if !invocation.succeeded() {
            return Err(ReplicError::RecompileFailed(invocation.exit_code));
        }
        Ok(invocation)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Canned {
        missing: bool,
        exit_code: i32,
        calls: Rc<RefCell<Vec<(PathBuf, String)>>>,
    }

    impl ProcessLauncher for Canned {
        fn resolve(&self, executable: &Path) -> Result<PathBuf> {
            if self.missing {
                return Err(ReplicError::ExecutableNotFound {
                    path: executable.to_path_buf(),
                });
            }
            Ok(executable.to_path_buf())
        }

        fn launch(&self, executable: &Path, argument_line: &str) -> Result<(i32, String)> {
            self.calls
                .borrow_mut()
                .push((executable.to_path_buf(), argument_line.to_string()));
            Ok((self.exit_code, "done\n".to_string()))
        }
    }

    fn tools() -> EleedTools {
        EleedTools::new(&EleedSettings {
            working_directory: PathBuf::from("/opt/eleed"),
            user: "admin".to_string(),
            password: "pa ss".to_string(),
        })
    }

    #[test]
    fn empty_values_drop_the_whole_argument() {
        assert_eq!(quoted_argument("user", ""), "");
        assert_eq!(quoted_argument("user", "bob"), " --user \"bob\"");
        assert_eq!(int_argument("verbose", 4), " --verbose 4");
    }

    #[test]
    fn installer_line_layout() {
        let line = tools().installer_arguments(Path::new("/r/a.rep"));
        assert_eq!(
            line,
            " --plugin \"InnerReplicationPlugin\" --user \"admin\" --password \"pa ss\" --import --nocompilation --verbose 4 --file \"/r/a.rep\""
        );
    }

    #[test]
    fn compiler_line_without_credentials() {
        let tools = EleedTools::new(&EleedSettings::default());
        assert_eq!(tools.compiler_arguments(), "");
        assert!(tools.compiler_path().ends_with(COMPILER_EXE));
    }

    #[test]
    fn runner_passes_line_verbatim() {
        let launcher = Canned::default();
        let runner = ExternalProcessRunner::new(Box::new(launcher.clone()));
        let inv = runner.run(Path::new("tool"), " --x \"a b\"").unwrap();
        assert!(inv.succeeded());
        assert_eq!(inv.combined_output, "done\n");
        assert_eq!(launcher.calls.borrow()[0].1, " --x \"a b\"");
    }

    #[test]
    fn missing_executable_never_launches() {
        let launcher = Canned {
            missing: true,
            ..Canned::default()
        };
        let runner = ExternalProcessRunner::new(Box::new(launcher.clone()));
        let err = runner.run(Path::new("nope.exe"), "").unwrap_err();
        assert!(matches!(err, ReplicError::ExecutableNotFound { .. }));
        assert!(launcher.calls.borrow().is_empty());
    }

    #[test]
    fn installer_failure_carries_package_and_code() {
        let runner = ExternalProcessRunner::new(Box::new(Canned {
            exit_code: 2,
            ..Canned::default()
        }));
        let err = tools().install(&runner, Path::new("/r/b.rep")).unwrap_err();
        match err {
            ReplicError::InstallFailed { path, code } => {
                assert_eq!(path, PathBuf::from("/r/b.rep"));
                assert_eq!(code, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn compiler_failure_is_recompile_error() {
        let runner = ExternalProcessRunner::new(Box::new(Canned {
            exit_code: 1,
            ..Canned::default()
        }));
        let err = tools().recompile(&runner).unwrap_err();
        assert!(matches!(err, ReplicError::RecompileFailed(1)));
    }

    #[cfg(unix)]
    #[test]
    fn system_launcher_keeps_quoted_argument_intact() {
        let launcher = SystemLauncher::default();
        let echo = launcher.resolve(Path::new("echo")).unwrap();
        let (code, output) = launcher.launch(&echo, " \"a  b\" c").unwrap();
        assert_eq!(code, 0);
        assert_eq!(output, "a  b c\n");
    }

    #[cfg(unix)]
    #[test]
    fn system_launcher_reports_exit_code() {
        let launcher = SystemLauncher::default();
        let sh = launcher.resolve(Path::new("sh")).unwrap();
        let (code, _) = launcher.launch(&sh, " -c 'exit 3'").unwrap();
        assert_eq!(code, 3);
    }

    #[cfg(unix)]
    #[test]
    fn system_launcher_keeps_dollar_in_credentials() {
        let tools = EleedTools::new(&EleedSettings {
            working_directory: PathBuf::from("/opt/eleed"),
            user: "$USER".to_string(),
            password: "pa$word".to_string(),
        });
        let launcher = SystemLauncher::default();
        let echo = launcher.resolve(Path::new("echo")).unwrap();
        let (code, output) = launcher.launch(&echo, &tools.compiler_arguments()).unwrap();
        assert_eq!(code, 0);
        assert_eq!(output, "--user $USER --password pa$word\n");
    }

    #[cfg(unix)]
    #[test]
    fn system_launcher_never_runs_substitutions_in_file_names() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("touched");
        let package = format!("/r/a$(touch {}).rep", marker.display());
        let line = tools().installer_arguments(Path::new(&package));

        let launcher = SystemLauncher::default();
        let echo = launcher.resolve(Path::new("echo")).unwrap();
        let (code, output) = launcher.launch(&echo, &line).unwrap();
        assert_eq!(code, 0);
        assert!(output.trim_end().ends_with(&format!("--file {package}")));
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[test]
    fn unbalanced_quotes_fail_to_launch() {
        let launcher = SystemLauncher::default();
        let echo = launcher.resolve(Path::new("echo")).unwrap();
        let err = launcher.launch(&echo, " --user \"admin").unwrap_err();
        assert!(matches!(err, ReplicError::LaunchFailed { .. }));
    }
}
