use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const MASK: &str = "********";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ServiceSettings
// ---------------------------------------------------------------------------

/// Names of the OS services to cycle around the installation. An empty name
/// means the service is not managed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default)]
    pub console: String,
    #[serde(default)]
    pub netpipe: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_service_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_service_timeout_secs() -> u64 {
    600
}

impl ServiceSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            console: String::new(),
            netpipe: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_service_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// EleedSettings
// ---------------------------------------------------------------------------

/// Location of the installer and compiler executables and the application
/// account they run under.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EleedSettings {
    #[serde(default)]
    pub working_directory: PathBuf,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

// ---------------------------------------------------------------------------
// DatabaseSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_data_source")]
    pub data_source: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub backup_path: PathBuf,
    #[serde(default)]
    pub use_compression: bool,
    #[serde(default)]
    pub trusted_connection: bool,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u32,
    /// Set on a second attempt after a failed installation, when the backup
    /// taken by the first attempt is the one worth keeping.
    #[serde(default)]
    pub skip_backup: bool,
}

fn default_data_source() -> String {
    "localhost".to_string()
}

fn default_connection_timeout() -> u32 {
    7200
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            data_source: default_data_source(),
            name: String::new(),
            user_id: String::new(),
            password: String::new(),
            backup_path: PathBuf::new(),
            use_compression: false,
            trusted_connection: false,
            connection_timeout_secs: default_connection_timeout(),
            skip_backup: false,
        }
    }
}

// ---------------------------------------------------------------------------
// MailSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailSettings {
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default = "default_body")]
    pub body: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_login: String,
    #[serde(default)]
    pub smtp_password: String,
}

fn default_body() -> String {
    "See the attached log file for details".to_string()
}

fn default_smtp_port() -> u16 {
    465
}

impl MailSettings {
    /// Mail goes out only when the server, login, sender and at least one
    /// recipient are set, and no recipient is blank.
    pub fn is_configured(&self) -> bool {
        !self.smtp_server.trim().is_empty()
            && !self.smtp_login.trim().is_empty()
            && !self.from.trim().is_empty()
            && !self.to.is_empty()
            && self.to.iter().all(|r| !r.trim().is_empty())
    }
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            to: Vec::new(),
            body: default_body(),
            from: String::new(),
            smtp_server: String::new(),
            smtp_port: default_smtp_port(),
            smtp_login: String::new(),
            smtp_password: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// RunConfiguration
// ---------------------------------------------------------------------------

/// Everything one run needs. Built once before the run starts and never
/// mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfiguration {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub services: ServiceSettings,
    #[serde(default)]
    pub eleed: EleedSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub mail: MailSettings,
}

impl RunConfiguration {
    /// Report problems that would make a run fail or behave unexpectedly.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.project_name.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "project name is not set".to_string(),
            });
        }

        if self.database.name.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "database name is not set; use --db-name".to_string(),
            });
        }

        if self.services.console.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "console service name is not set; the application will not be stopped"
                    .to_string(),
            });
        }

        if self.services.poll_interval_ms == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "service poll interval is zero".to_string(),
            });
        }

        let mail = &self.mail;
        let any_mail = !mail.smtp_server.trim().is_empty()
            || !mail.smtp_login.trim().is_empty()
            || !mail.to.is_empty();
        if any_mail && !mail.is_configured() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "mail settings are incomplete; no report will be sent".to_string(),
            });
        }

        warnings
    }

    /// A copy safe to print: every password replaced by a mask.
    pub fn redacted(&self) -> RunConfiguration {
        let mut copy = self.clone();
        for secret in [
            &mut copy.eleed.password,
            &mut copy.database.password,
            &mut copy.mail.smtp_password,
        ] {
            if !secret.is_empty() {
                *secret = MASK.to_string();
            }
        }
        copy
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_mail() -> MailSettings {
        MailSettings {
            to: vec!["ops@example.com".to_string()],
            from: "loader@example.com".to_string(),
            smtp_server: "mail.example.com".to_string(),
            smtp_login: "loader".to_string(),
            ..MailSettings::default()
        }
    }

    #[test]
    fn defaults_match_cli_defaults() {
        let config = RunConfiguration::default();
        assert_eq!(config.database.data_source, "localhost");
        assert_eq!(config.database.connection_timeout_secs, 7200);
        assert_eq!(config.mail.smtp_port, 465);
        assert_eq!(config.mail.body, "See the attached log file for details");
        assert_eq!(config.services.timeout(), Duration::from_secs(600));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: RunConfiguration =
            serde_json::from_str(r#"{"project_name":"Demo","database":{"name":"Prod"}}"#)
                .unwrap();
        assert_eq!(config.project_name, "Demo");
        assert_eq!(config.database.name, "Prod");
        assert_eq!(config.database.data_source, "localhost");
        assert_eq!(config.services.poll_interval_ms, 1000);
    }

    #[test]
    fn mail_requires_every_field() {
        assert!(complete_mail().is_configured());

        let mut no_login = complete_mail();
        no_login.smtp_login = "  ".to_string();
        assert!(!no_login.is_configured());

        let mut no_recipients = complete_mail();
        no_recipients.to.clear();
        assert!(!no_recipients.is_configured());

        let mut blank_recipient = complete_mail();
        blank_recipient.to.push(String::new());
        assert!(!blank_recipient.is_configured());
    }

    #[test]
    fn validate_flags_missing_database() {
        let config = RunConfiguration {
            project_name: "Demo".to_string(),
            ..RunConfiguration::default()
        };
        let warnings = config.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("database name")));
    }

    #[test]
    fn validate_flags_partial_mail() {
        let mut config = RunConfiguration {
            project_name: "Demo".to_string(),
            ..RunConfiguration::default()
        };
        config.database.name = "Prod".to_string();
        config.services.console = "Console".to_string();
        config.mail.smtp_server = "mail.example.com".to_string();

        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("incomplete"));
    }

    #[test]
    fn redacted_masks_passwords_only_when_set() {
        let mut config = RunConfiguration::default();
        config.eleed.password = "secret".to_string();
        config.mail.smtp_password = "hunter2".to_string();

        let shown = config.redacted();
        assert_eq!(shown.eleed.password, MASK);
        assert_eq!(shown.mail.smtp_password, MASK);
        assert!(shown.database.password.is_empty());
        assert_eq!(config.eleed.password, "secret");
    }
}
