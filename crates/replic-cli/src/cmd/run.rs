use anyhow::{bail, Context};
use clap::Args;
use replic_core::backup::SqlcmdDatabase;
use replic_core::config::{RunConfiguration, WarnLevel};
use replic_core::logging::LogSink;
use replic_core::notify::{MailNotifier, SmtpMailer};
use replic_core::orchestrator::{Collaborators, Orchestrator};
use replic_core::process::SystemLauncher;
use replic_core::queue::ReplicationQueue;
use replic_core::service::default_manager;
use replic_core::settings::{EncryptedFileStore, SettingsStore};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Project name; names the log file and the report subject
    #[arg(long = "prj-name")]
    pub project_name: Option<String>,

    /// Application console service, stopped for the backup and installation
    #[arg(short = 'c', long = "console-service")]
    pub console_service: Option<String>,

    /// Net.Pipe transport service, stopped for the whole run
    #[arg(short = 'n', long = "netpipe-service")]
    pub netpipe_service: Option<String>,

    /// Directory holding the installer and compiler executables
    #[arg(short = 'd', long = "working-dir")]
    pub working_dir: Option<PathBuf>,

    /// Application user for the installer and compiler
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Application password for the installer and compiler
    #[arg(short = 'p', long)]
    pub password: Option<String>,

    /// Report recipient (repeatable, or comma-separated)
    #[arg(short = 't', long = "to", value_delimiter = ',')]
    pub to: Vec<String>,

    /// Report body text
    #[arg(short = 'b', long)]
    pub body: Option<String>,

    /// Report sender address
    #[arg(short = 'f', long)]
    pub from: Option<String>,

    /// SMTP server
    #[arg(long)]
    pub smtp: Option<String>,

    /// SMTP port
    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long = "smtp-login")]
    pub smtp_login: Option<String>,

    #[arg(long = "smtp-pass")]
    pub smtp_pass: Option<String>,

    /// Database server
    #[arg(long = "db-data-source")]
    pub db_data_source: Option<String>,

    /// Database to back up; also names the package folder (<name>Replics)
    #[arg(long = "db-name")]
    pub db_name: Option<String>,

    #[arg(long = "db-user-id")]
    pub db_user_id: Option<String>,

    #[arg(long = "db-password")]
    pub db_password: Option<String>,

    /// Directory on the database server receiving the backup file
    #[arg(long = "backup-path")]
    pub backup_path: Option<PathBuf>,

    /// Compress the backup
    #[arg(long = "use-compression")]
    pub use_compression: bool,

    /// Use a trusted (integrated) database connection
    #[arg(long = "db-trust")]
    pub db_trust: bool,

    /// Database connection timeout in seconds
    #[arg(long = "db-timeout")]
    pub db_timeout: Option<u32>,

    /// Install without taking a backup first
    #[arg(long = "skip-backup")]
    pub skip_backup: bool,

    /// Save these arguments for later runs
    #[arg(long = "save-args", alias = "saveargs")]
    pub save_args: bool,

    /// Run with previously saved arguments instead of flags
    #[arg(long = "read-saved-args", alias = "rsd")]
    pub read_saved_args: bool,

    /// Directory containing the <db-name>Replics folder (default: beside the executable)
    #[arg(long = "replics-dir", env = "REPLIC_REPLICS_DIR")]
    pub replics_dir: Option<PathBuf>,
}

impl RunArgs {
    /// Overlay the given flags on the defaults.
    pub fn configuration(&self) -> RunConfiguration {
        let mut config = RunConfiguration::default();

        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }

        set(&mut config.project_name, &self.project_name);

        set(&mut config.services.console, &self.console_service);
        set(&mut config.services.netpipe, &self.netpipe_service);

        set(&mut config.eleed.working_directory, &self.working_dir);
        set(&mut config.eleed.user, &self.user);
        set(&mut config.eleed.password, &self.password);

        config.mail.to = self.to.clone();
        set(&mut config.mail.body, &self.body);
        set(&mut config.mail.from, &self.from);
        set(&mut config.mail.smtp_server, &self.smtp);
        set(&mut config.mail.smtp_port, &self.port);
        set(&mut config.mail.smtp_login, &self.smtp_login);
        set(&mut config.mail.smtp_password, &self.smtp_pass);

        let db = &mut config.database;
        set(&mut db.data_source, &self.db_data_source);
        set(&mut db.name, &self.db_name);
        set(&mut db.user_id, &self.db_user_id);
        set(&mut db.password, &self.db_password);
        set(&mut db.backup_path, &self.backup_path);
        set(&mut db.connection_timeout_secs, &self.db_timeout);
        db.use_compression = self.use_compression;
        db.trusted_connection = self.db_trust;
        db.skip_backup = self.skip_backup;

        config
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub fn run(args: &RunArgs, settings_file: &Path, log_dir: &Path) -> anyhow::Result<()> {
    let store = EncryptedFileStore::new(settings_file);

    let config = if args.read_saved_args {
        let mut saved = store
            .load()?
            .with_context(|| format!("no saved arguments in {}; run once with --save-args", settings_file.display()))?;
        // A retry after a failed install keeps the first attempt's backup.
        saved.database.skip_backup |= args.skip_backup;
        saved
    } else {
        args.configuration()
    };

    if config.project_name.trim().is_empty() {
        bail!("the project name has to be set in arguments (--prj-name)");
    }

    let sink = LogSink::init(log_dir, &config.project_name)
        .with_context(|| format!("cannot open log directory {}", log_dir.display()))?;

    if args.save_args && !args.read_saved_args {
        store.save(&config).context("failed to save arguments")?;
    }

    for warning in config.validate() {
        match warning.level {
            WarnLevel::Error => error!("{}", warning.message),
            WarnLevel::Warning => warn!("{}", warning.message),
        }
    }

    let replics_base = match &args.replics_dir {
        Some(base) => base.clone(),
        None => ReplicationQueue::default_base().context("cannot locate the executable")?,
    };

    let notifier = MailNotifier::new(Box::new(SmtpMailer::new(&config.mail)), &config)
        .with_descriptions(replics_base.clone());
    let collaborators = Collaborators {
        services: default_manager(),
        launcher: Box::new(SystemLauncher::in_dir(config.eleed.working_directory.clone())),
        database: Box::new(SqlcmdDatabase::default()),
        notifier: Box::new(notifier),
    };

    info!(settings = ?config.redacted(), "starting replication run");
    let outcome = Orchestrator::new(config, replics_base, collaborators, Some(sink.handle())).run();
    let log_file = sink.path().to_path_buf();
    sink.shutdown();

    if !outcome.succeeded {
        bail!(
            "replication failed: {} (see {})",
            outcome.failure_cause.as_deref().unwrap_or("unknown error"),
            log_file.display()
        );
    }
    println!(
        "Installed {} replication package(s). Log: {}",
        outcome.installed.len(),
        log_file.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_survive_when_flags_are_absent() {
        let config = RunArgs::default().configuration();
        assert_eq!(config, RunConfiguration::default());
    }

    #[test]
    fn flags_overlay_defaults() {
        let args = RunArgs {
            project_name: Some("Demo".to_string()),
            db_name: Some("Prod".to_string()),
            port: Some(587),
            to: vec!["a@example.com".to_string(), "b@example.com".to_string()],
            skip_backup: true,
            ..RunArgs::default()
        };
        let config = args.configuration();
        assert_eq!(config.project_name, "Demo");
        assert_eq!(config.database.name, "Prod");
        assert_eq!(config.database.data_source, "localhost");
        assert_eq!(config.mail.smtp_port, 587);
        assert_eq!(config.mail.to.len(), 2);
        assert!(config.database.skip_backup);
    }
}
