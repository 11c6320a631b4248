//! End-of-run report.
//!
//! Exactly one report goes out per run. On success the body carries the
//! configured text followed by the package descriptions, which are then
//! deleted; on failure it carries the error. The run log is attached to both
//! when it exists.

use std::path::{Path, PathBuf};

use chrono::Local;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::{error, info, warn};

use crate::config::{MailSettings, RunConfiguration};
use crate::error::{ReplicError, Result};
use crate::orchestrator::RunOutcome;
use crate::queue::ReplicationQueue;

const SUBJECT_TIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

// ---------------------------------------------------------------------------
// Mailer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: Option<PathBuf>,
}

pub trait Mailer {
    fn send(&self, message: &MailMessage) -> Result<()>;
}

/// SMTP over an implicit TLS connection (port 465 by default).
pub struct SmtpMailer {
    server: String,
    port: u16,
    login: String,
    password: String,
}

impl SmtpMailer {
    pub fn new(settings: &MailSettings) -> Self {
        Self {
            server: settings.smtp_server.clone(),
            port: settings.smtp_port,
            login: settings.smtp_login.clone(),
            password: settings.smtp_password.clone(),
        }
    }

    fn build(&self, message: &MailMessage) -> Result<Message> {
        let mut builder = Message::builder()
            .from(parse_mailbox(&message.from)?)
            .subject(message.subject.clone());
        for recipient in &message.to {
            builder = builder.to(parse_mailbox(recipient)?);
        }

        let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(message.body.clone()));
        if let Some(path) = &message.attachment {
            match std::fs::read(path) {
                Ok(content) => {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "replication.log".to_string());
                    parts = parts.singlepart(Attachment::new(name).body(content, ContentType::TEXT_PLAIN));
                }
                Err(e) => {
                    error!(file = %path.display(), error = %e, "couldn't attach log file");
                }
            }
        }

        builder
            .multipart(parts)
            .map_err(|e| ReplicError::Mail(e.to_string()))
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| ReplicError::Mail(format!("invalid address '{address}': {e}")))
}

impl Mailer for SmtpMailer {
    fn send(&self, message: &MailMessage) -> Result<()> {
        let email = self.build(message)?;
        let transport = SmtpTransport::relay(&self.server)
            .map_err(|e| ReplicError::Mail(e.to_string()))?
            .port(self.port)
            .credentials(Credentials::new(self.login.clone(), self.password.clone()))
            .build();
        transport
            .send(&email)
            .map_err(|e| ReplicError::Mail(e.to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Receives the terminal outcome of a run, once.
pub trait Notifier {
    fn notify(&self, outcome: &RunOutcome, log_file: Option<&Path>) -> Result<()>;
}

pub struct MailNotifier {
    mailer: Box<dyn Mailer>,
    settings: MailSettings,
    project: String,
    database: String,
    replics_base: Option<PathBuf>,
}

impl MailNotifier {
    pub fn new(mailer: Box<dyn Mailer>, config: &RunConfiguration) -> Self {
        Self {
            mailer,
            settings: config.mail.clone(),
            project: config.project_name.clone(),
            database: config.database.name.clone(),
            replics_base: None,
        }
    }

    /// Report the package descriptions of the queue under `replics_base`
    /// on success.
    pub fn with_descriptions(mut self, replics_base: impl Into<PathBuf>) -> Self {
        self.replics_base = Some(replics_base.into());
        self
    }

    fn description_queue(&self) -> Option<ReplicationQueue> {
        let base = self.replics_base.as_ref()?;
        ReplicationQueue::open(base, &self.database)
            .inspect_err(|e| warn!(error = %e, "couldn't open the package descriptions"))
            .ok()
    }

    pub fn success_subject(&self) -> String {
        format!(
            "Replication on {} Base Completed Successfully at {}",
            self.project,
            Local::now().format(SUBJECT_TIME_FORMAT)
        )
    }

    pub fn failure_subject(&self) -> String {
        format!(
            "Replication on {} Base Failed at {}",
            self.project,
            Local::now().format(SUBJECT_TIME_FORMAT)
        )
    }

    fn success_body(&self, queue: Option<&ReplicationQueue>) -> String {
        let descriptions = match queue {
            Some(queue) => queue.read_descriptions().unwrap_or_else(|e| {
                warn!(error = %e, "couldn't read package descriptions");
                String::new()
            }),
            None => String::new(),
        };
        format!("{}\n\n{}", self.settings.body, descriptions)
    }

    fn failure_body(cause: &str) -> String {
        format!(
            "The replication failed with next exception: {cause}\n\
             See the attached log file for details."
        )
    }

    fn compose(
        &self,
        outcome: &RunOutcome,
        queue: Option<&ReplicationQueue>,
        log_file: Option<&Path>,
    ) -> MailMessage {
        let (subject, body) = if outcome.succeeded {
            (self.success_subject(), self.success_body(queue))
        } else {
            let cause = outcome.failure_cause.as_deref().unwrap_or("unknown error");
            (self.failure_subject(), Self::failure_body(cause))
        };
        MailMessage {
            from: self.settings.from.clone(),
            to: self.settings.to.clone(),
            subject,
            body,
            attachment: log_file.map(Path::to_path_buf),
        }
    }
}

impl Notifier for MailNotifier {
    fn notify(&self, outcome: &RunOutcome, log_file: Option<&Path>) -> Result<()> {
        if !self.settings.is_configured() {
            info!("mail settings are not configured; no report sent");
            return Ok(());
        }

        // Failure reports leave the descriptions for the next run.
        let queue = if outcome.succeeded {
            self.description_queue()
        } else {
            None
        };
        let message = self.compose(outcome, queue.as_ref(), log_file);
        self.mailer.send(&message)?;
        info!(subject = %message.subject, recipients = message.to.len(), "report sent");

        if let Some(queue) = &queue {
            queue.discard_descriptions()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
