//! Database backup gate.
//!
//! No package may be installed until a backup of the target database has
//! been taken, unless the operator explicitly skipped it. A failed backup
//! is fatal to the run.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{error, info};

use crate::config::{DatabaseSettings, RunConfiguration};
use crate::error::{ReplicError, Result};

const BACKUP_SUFFIX: &str = "_ReplicLoaderAutobackup.bak";

// ---------------------------------------------------------------------------
// Connection settings
// ---------------------------------------------------------------------------

/// Connection parameters for the database server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub server: String,
    pub database: String,
    pub trusted: bool,
    pub timeout_secs: u32,
    pub user_id: String,
    pub password: String,
}

impl From<&DatabaseSettings> for ConnectionSettings {
    fn from(db: &DatabaseSettings) -> Self {
        Self {
            server: db.data_source.clone(),
            database: db.name.clone(),
            trusted: db.trusted_connection,
            timeout_secs: db.connection_timeout_secs,
            user_id: db.user_id.clone(),
            password: db.password.clone(),
        }
    }
}

impl ConnectionSettings {
    /// ADO-style connection string. Blank server, database, user and
    /// password parts are left out.
    pub fn connection_string(&self) -> String {
        self.parts(&self.password).join("; ")
    }

    /// The connection string with the password masked, for logs.
    pub fn redacted(&self) -> String {
        let mask = if self.password.trim().is_empty() {
            ""
        } else {
            "********"
        };
        self.parts(mask).join("; ")
    }

    fn parts(&self, password: &str) -> Vec<String> {
        let mut parts = Vec::with_capacity(6);
        if !self.server.trim().is_empty() {
            parts.push(format!("Server={}", self.server));
        }
        if !self.database.trim().is_empty() {
            parts.push(format!("Database={}", self.database));
        }
        parts.push(format!("Trusted_Connection={}", self.trusted));
        parts.push(format!("Connection Timeout={}", self.timeout_secs));
        if !self.user_id.trim().is_empty() {
            parts.push(format!("User Id={}", self.user_id));
        }
        if !password.trim().is_empty() {
            parts.push(format!("Password={password}"));
        }
        parts
    }
}

// ---------------------------------------------------------------------------
// Database collaborator
// ---------------------------------------------------------------------------

/// Executes one SQL command against a server.
pub trait Database {
    fn execute(&self, connection: &ConnectionSettings, sql: &str) -> Result<()>;
}

/// Runs commands through the `sqlcmd` command-line client.
#[derive(Debug, Clone)]
pub struct SqlcmdDatabase {
    program: PathBuf,
}

impl Default for SqlcmdDatabase {
    fn default() -> Self {
        Self {
            program: PathBuf::from("sqlcmd"),
        }
    }
}

impl SqlcmdDatabase {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Command-line arguments equivalent to the connection settings.
    pub fn arguments(connection: &ConnectionSettings, sql: &str) -> Vec<String> {
        let mut args = Vec::new();
        if !connection.server.trim().is_empty() {
            args.extend(["-S".to_string(), connection.server.clone()]);
        }
        if !connection.database.trim().is_empty() {
            args.extend(["-d".to_string(), connection.database.clone()]);
        }
        if connection.trusted || connection.user_id.trim().is_empty() {
            args.push("-E".to_string());
        } else {
            args.extend(["-U".to_string(), connection.user_id.clone()]);
            args.extend(["-P".to_string(), connection.password.clone()]);
        }
        args.extend(["-l".to_string(), connection.timeout_secs.to_string()]);
        // -b: exit non-zero on SQL errors
        args.extend(["-b".to_string(), "-Q".to_string(), sql.to_string()]);
        args
    }
}

impl Database for SqlcmdDatabase {
    fn execute(&self, connection: &ConnectionSettings, sql: &str) -> Result<()> {
        let program = which::which(&self.program).map_err(|_| ReplicError::ExecutableNotFound {
            path: self.program.clone(),
        })?;
        let output = Command::new(&program)
            .args(Self::arguments(connection, sql))
            .output()
            .map_err(|e| ReplicError::LaunchFailed {
                path: program.clone(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            info!(output = %stdout.trim_end(), "sqlcmd output");
        }
        if !output.status.success() {
            let mut reason = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if reason.is_empty() {
                reason = stdout.trim().to_string();
            }
            return Err(ReplicError::LaunchFailed {
                path: program,
                reason: format!(
                    "exit code {}: {reason}",
                    output.status.code().unwrap_or(-1)
                ),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Backup command
// ---------------------------------------------------------------------------

pub fn backup_file(backup_path: &Path, database: &str) -> PathBuf {
    backup_path.join(format!("{database}{BACKUP_SUFFIX}"))
}

pub fn backup_command(db: &DatabaseSettings) -> String {
    let file = backup_file(&db.backup_path, &db.name);
    let compression = if db.use_compression {
        "COMPRESSION, "
    } else {
        ""
    };
    format!(
        "BACKUP DATABASE {name} TO DISK = '{file}' \
         WITH NOFORMAT, INIT, NAME = N'{name} Database Backup', \
         SKIP, NOREWIND, NOUNLOAD, {compression}STATS = 10",
        name = db.name,
        file = file.display(),
    )
}

// ---------------------------------------------------------------------------
// BackupGate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Skipped,
    Completed { file: PathBuf },
}

pub struct BackupGate<'a> {
    database: &'a dyn Database,
}

impl<'a> BackupGate<'a> {
    pub fn new(database: &'a dyn Database) -> Self {
        Self { database }
    }

    pub fn run(&self, config: &RunConfiguration) -> Result<BackupOutcome> {
        let db = &config.database;
        if db.skip_backup {
            info!("backup of database skipped due to skip-backup flag");
            return Ok(BackupOutcome::Skipped);
        }

        if db.name.trim().is_empty() {
            let err = ReplicError::Precondition(
                "the database name is not set; use --db-name".to_string(),
            );
            error!(error = %err, "backup cannot start");
            return Err(err);
        }

        info!(database = %db.name, "backup of database started");
        let file = backup_file(&db.backup_path, &db.name);
        let sql = backup_command(db);
        let connection = ConnectionSettings::from(db);
        info!(file = %file.display(), "backup will be saved");
        info!(connection = %connection.redacted(), sql = %sql, "backup command");

        match self.database.execute(&connection, &sql) {
            Ok(()) => {
                info!(database = %db.name, "backup of database finished successfully");
                Ok(BackupOutcome::Completed { file })
            }
            Err(e) => {
                let err = ReplicError::BackupFailed {
                    database: db.name.clone(),
                    reason: e.to_string(),
                };
                error!(
                    database = %db.name,
                    error = %err,
                    "backup of database finished with error; installing without a backup is not allowed"
                );
                Err(err)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
