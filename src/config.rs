//! Configuration types.
//!
//! A `ResponderConfig` is built once at startup, either from a JSON file
//! using the reference key names (`IMAP_SERVER`, `EMAIL_USER`, ...) or from
//! environment variables, and then moved into the components that need it.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

/// Default system prompt for the completion endpoint.
pub const DEFAULT_PROMPT: &str = "Escribe una respuesta profesional al correo que te ha llegado dando informacion sobre el tema que preguntan.";

/// Default subject keyword.
pub const DEFAULT_FILTER_KEYWORD: &str = "URGENTE";

/// Default config file, overridable with `MAIL_RESPONDER_CONFIG`.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

const DEFAULT_PROCESSED_IDS_FILE: &str = "processed_ids.json";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// When a candidate counts as processed relative to its reply going out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryPolicy {
    /// Record on selection, before generation. A failed send is never retried.
    #[default]
    AtMostOnce,
    /// Record only after the reply was accepted by the SMTP server.
    AtLeastOnce,
}

impl FromStr for DeliveryPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "at-most-once" => Ok(Self::AtMostOnce),
            "at-least-once" => Ok(Self::AtLeastOnce),
            other => Err(ConfigError::InvalidValue {
                key: "DELIVERY_POLICY".into(),
                message: format!("expected at-most-once or at-least-once, got {other:?}"),
            }),
        }
    }
}

/// IMAP side of the mailbox.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub folder: String,
    /// Socket read timeout.
    pub timeout: Duration,
}

/// SMTP side of the mailbox.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    /// Use STARTTLS instead of implicit TLS.
    pub starttls: bool,
    /// Connect timeout.
    pub timeout: Duration,
}

/// Completion endpoint.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_url: String,
    pub model: String,
    pub system_prompt: String,
}

/// Everything the responder needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    pub imap: ImapConfig,
    pub smtp: SmtpConfig,
    pub llm: LlmConfig,
    pub filter_keyword: String,
    pub poll_interval: Duration,
    pub processed_ids_path: PathBuf,
    pub delivery: DeliveryPolicy,
}

/// On-disk layout of `config.json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct FileConfig {
    imap_server: Option<String>,
    imap_port: Option<u16>,
    imap_folder: Option<String>,
    email_user: Option<String>,
    email_pass: Option<String>,
    smtp_server: Option<String>,
    smtp_port: Option<u16>,
    smtp_starttls: Option<bool>,
    from_address: Option<String>,
    filter_keyword: Option<String>,
    prompt: Option<String>,
    llm_api_url: Option<String>,
    llm_model: Option<String>,
    poll_interval_secs: Option<u64>,
    processed_ids_file: Option<PathBuf>,
    delivery_policy: Option<String>,
}

impl ResponderConfig {
    /// Load from the config file if it exists, otherwise from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("MAIL_RESPONDER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        if path.exists() {
            tracing::info!(path = %path.display(), "Loading configuration file");
            Self::from_file(&path)
        } else {
            tracing::info!("No configuration file, reading environment");
            Self::from_env()
        }
    }

    /// Parse a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let file: FileConfig =
            serde_json::from_str(&raw).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Self::from_file_config(file)
    }

    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str| -> Result<Option<u64>, ConfigError> {
            get(key)
                .map(|v| {
                    v.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: e.to_string(),
                    })
                })
                .transpose()
        };
        let port = |key: &str| -> Result<Option<u16>, ConfigError> {
            parsed(key)?
                .map(|p| {
                    u16::try_from(p).map_err(|_| ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: format!("{p} is not a valid port"),
                    })
                })
                .transpose()
        };
        let flag = |key: &str| {
            get(key).is_some_and(|v| matches!(v.trim(), "1" | "true" | "yes" | "on"))
        };

        let imap_host = require(get("EMAIL_IMAP_HOST"), "EMAIL_IMAP_HOST")?;
        let smtp_host = get("EMAIL_SMTP_HOST").unwrap_or_else(|| imap_host.replace("imap", "smtp"));
        let username = require(get("EMAIL_USERNAME"), "EMAIL_USERNAME")?;
        let raw = FileConfig {
            imap_server: Some(imap_host),
            imap_port: port("EMAIL_IMAP_PORT")?,
            imap_folder: get("EMAIL_IMAP_FOLDER"),
            email_user: Some(username),
            email_pass: get("EMAIL_PASSWORD"),
            smtp_server: Some(smtp_host),
            smtp_port: port("EMAIL_SMTP_PORT")?,
            smtp_starttls: Some(flag("EMAIL_SMTP_STARTTLS")),
            from_address: get("EMAIL_FROM_ADDRESS"),
            filter_keyword: get("EMAIL_FILTER_KEYWORD"),
            prompt: get("LLM_SYSTEM_PROMPT"),
            llm_api_url: get("LLM_API_URL"),
            llm_model: get("LLM_MODEL"),
            poll_interval_secs: parsed("EMAIL_POLL_INTERVAL_SECS")?,
            processed_ids_file: get("PROCESSED_IDS_PATH").map(PathBuf::from),
            delivery_policy: get("DELIVERY_POLICY"),
        };

        Self::from_file_config(raw)
    }

    fn from_file_config(file: FileConfig) -> Result<Self, ConfigError> {
        let imap_host = require(file.imap_server, "IMAP_SERVER")?;
        let smtp_host = require(file.smtp_server, "SMTP_SERVER")?;
        let username = require(file.email_user, "EMAIL_USER")?;
        let password = SecretString::from(file.email_pass.unwrap_or_default());
        let api_url = require(file.llm_api_url, "LLM_API_URL")?;
        let model = require(file.llm_model, "LLM_MODEL")?;

        let delivery = file
            .delivery_policy
            .as_deref()
            .map(str::parse::<DeliveryPolicy>)
            .transpose()?
            .unwrap_or_default();

        let poll_secs = file.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if poll_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "POLL_INTERVAL_SECS".into(),
                message: "must be at least 1 second".into(),
            });
        }

        Ok(Self {
            imap: ImapConfig {
                host: imap_host,
                port: file.imap_port.unwrap_or(993),
                username: username.clone(),
                password: password.clone(),
                folder: file.imap_folder.unwrap_or_else(|| "INBOX".to_string()),
                timeout: DEFAULT_IO_TIMEOUT,
            },
            smtp: SmtpConfig {
                host: smtp_host,
                port: file.smtp_port.unwrap_or(465),
                from_address: file.from_address.unwrap_or_else(|| username.clone()),
                username,
                password,
                starttls: file.smtp_starttls.unwrap_or(false),
                timeout: DEFAULT_IO_TIMEOUT,
            },
            llm: LlmConfig {
                api_url,
                model,
                system_prompt: file.prompt.unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
            },
            filter_keyword: file
                .filter_keyword
                .unwrap_or_else(|| DEFAULT_FILTER_KEYWORD.to_string()),
            poll_interval: Duration::from_secs(poll_secs),
            processed_ids_path: file
                .processed_ids_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROCESSED_IDS_FILE)),
            delivery,
        })
    }
}

fn require(value: Option<String>, key: &str) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingRequired {
            key: key.to_string(),
            hint: "Set it in the config file or the environment.".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn file_with_reference_keys_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "IMAP_SERVER": "imap.example.com",
                "EMAIL_USER": "bot@example.com",
                "EMAIL_PASS": "hunter2",
                "SMTP_SERVER": "smtp.example.com",
                "LLM_API_URL": "http://localhost:11434/api/chat",
                "LLM_MODEL": "llama3"
            }"#,
        )
        .unwrap();

        let config = ResponderConfig::from_file(&path).unwrap();
        assert_eq!(config.imap.host, "imap.example.com");
        assert_eq!(config.imap.port, 993);
        assert_eq!(config.imap.folder, "INBOX");
        assert_eq!(config.smtp.port, 465);
        assert!(!config.smtp.starttls);
        assert_eq!(config.smtp.from_address, "bot@example.com");
        assert_eq!(config.imap.password.expose_secret(), "hunter2");
        assert_eq!(config.filter_keyword, "URGENTE");
        assert_eq!(config.llm.system_prompt, DEFAULT_PROMPT);
        assert_eq!(config.poll_interval, Duration::from_secs(300));
        assert_eq!(config.processed_ids_path, PathBuf::from("processed_ids.json"));
        assert_eq!(config.delivery, DeliveryPolicy::AtMostOnce);
    }

    #[test]
    fn file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "IMAP_SERVER": "imap.example.com",
                "IMAP_PORT": 1993,
                "EMAIL_USER": "bot@example.com",
                "SMTP_SERVER": "smtp.example.com",
                "SMTP_PORT": 587,
                "SMTP_STARTTLS": true,
                "FILTER_KEYWORD": "help",
                "PROMPT": "Be brief.",
                "LLM_API_URL": "http://localhost:11434/api/chat",
                "LLM_MODEL": "llama3",
                "DELIVERY_POLICY": "at-least-once"
            }"#,
        )
        .unwrap();

        let config = ResponderConfig::from_file(&path).unwrap();
        assert_eq!(config.imap.port, 1993);
        assert_eq!(config.smtp.port, 587);
        assert!(config.smtp.starttls);
        assert_eq!(config.filter_keyword, "help");
        assert_eq!(config.llm.system_prompt, "Be brief.");
        assert_eq!(config.delivery, DeliveryPolicy::AtLeastOnce);
    }

    #[test]
    fn file_missing_required_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"IMAP_SERVER": "imap.example.com"}"#).unwrap();

        let err = ResponderConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref key, .. } if key == "SMTP_SERVER"));
    }

    #[test]
    fn file_not_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "IMAP_SERVER=imap.example.com").unwrap();

        let err = ResponderConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_lookup_builds_config() {
        let config = ResponderConfig::from_lookup(lookup(&[
            ("EMAIL_IMAP_HOST", "imap.example.com"),
            ("EMAIL_USERNAME", "bot@example.com"),
            ("EMAIL_PASSWORD", "secret"),
            ("EMAIL_POLL_INTERVAL_SECS", "60"),
            ("EMAIL_SMTP_STARTTLS", "true"),
            ("LLM_API_URL", "http://localhost:11434/api/chat"),
            ("LLM_MODEL", "llama3"),
        ]))
        .unwrap();

        assert_eq!(config.smtp.host, "smtp.example.com");
        assert!(config.smtp.starttls);
        assert_eq!(config.smtp.password.expose_secret(), "secret");
        assert_eq!(config.imap.password.expose_secret(), "secret");
        assert_eq!(config.poll_interval, Duration::from_secs(60));
    }

    #[test]
    fn env_lookup_requires_imap_host() {
        let err = ResponderConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref key, .. } if key == "EMAIL_IMAP_HOST"));
    }

    #[test]
    fn env_lookup_rejects_bad_port() {
        let err = ResponderConfig::from_lookup(lookup(&[
            ("EMAIL_IMAP_HOST", "imap.example.com"),
            ("EMAIL_USERNAME", "bot@example.com"),
            ("EMAIL_IMAP_PORT", "99999"),
            ("LLM_API_URL", "http://localhost"),
            ("LLM_MODEL", "llama3"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "EMAIL_IMAP_PORT"));
    }

    #[test]
    fn delivery_policy_parsing() {
        assert_eq!("at-most-once".parse::<DeliveryPolicy>().unwrap(), DeliveryPolicy::AtMostOnce);
        assert_eq!("AT_LEAST_ONCE".parse::<DeliveryPolicy>().unwrap(), DeliveryPolicy::AtLeastOnce);
        assert!("sometimes".parse::<DeliveryPolicy>().is_err());
    }
}
