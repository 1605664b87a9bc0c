//! Configuration loading for the Slack event receiver.
//!
//! Loads layered `.env` files and environment variables, producing a typed
//! [`AppConfig`]. Keys keep the names the deployment already uses
//! (`SLACKBOT_*`, `SLACK_*`, `BIGQUERY_*`, ...).

use std::{collections::BTreeMap, env, path::PathBuf, time::Duration};

use serde::Serialize;
use thiserror::Error;
use url::Url;

/// Application configuration, built once at startup and shared read-only.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    pub profile: String,
    pub log_level: String,
    pub log_format: String,
    pub host: String,
    pub port: u16,
    pub reaction_sentiment_enable: bool,
    pub outbound_timeout_ms: u64,
    pub signature_tolerance_seconds: u64,
    pub slack_signing_secret: String,
    pub slack_oauth_access_token: String,
    pub slack_api_base: String,
    pub bigquery_project_id: String,
    pub bigquery_dataset_id: String,
    pub bigquery_table_id: String,
    pub bigquery_api_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_oauth_access_token: Option<String>,
    pub language_api_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_api_key: Option<String>,
    /// Host of the GCE metadata server, used when no static token is set.
    pub gce_metadata_host: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            host: default_host(),
            port: default_port(),
            reaction_sentiment_enable: false,
            outbound_timeout_ms: default_outbound_timeout_ms(),
            signature_tolerance_seconds: default_signature_tolerance_seconds(),
            slack_signing_secret: String::new(),
            slack_oauth_access_token: String::new(),
            slack_api_base: default_slack_api_base(),
            bigquery_project_id: String::new(),
            bigquery_dataset_id: String::new(),
            bigquery_table_id: String::new(),
            bigquery_api_base: default_bigquery_api_base(),
            google_oauth_access_token: None,
            language_api_base: default_language_api_base(),
            language_api_key: None,
            gce_metadata_host: default_gce_metadata_host(),
        }
    }
}

impl AppConfig {
    /// Host and port to listen on. The host may be a name; it is resolved at bind time.
    pub fn bind_target(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }

    /// Deadline applied to every outbound call made while handling a request.
    pub fn outbound_timeout(&self) -> Duration {
        Duration::from_millis(self.outbound_timeout_ms)
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.slack_signing_secret.is_empty() {
            config.slack_signing_secret = "[REDACTED]".to_string();
        }
        if !config.slack_oauth_access_token.is_empty() {
            config.slack_oauth_access_token = "[REDACTED]".to_string();
        }
        if config.google_oauth_access_token.is_some() {
            config.google_oauth_access_token = Some("[REDACTED]".to_string());
        }
        if config.language_api_key.is_some() {
            config.language_api_key = Some("[REDACTED]".to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("SLACK_SIGNING_SECRET", &self.slack_signing_secret),
            ("SLACK_OAUTH_ACCESS_TOKEN", &self.slack_oauth_access_token),
            ("BIGQUERY_PROJECT_ID", &self.bigquery_project_id),
            ("BIGQUERY_DATASET_ID", &self.bigquery_dataset_id),
            ("BIGQUERY_TABLE_ID", &self.bigquery_table_id),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingRequired { key });
            }
        }

        if self.signature_tolerance_seconds == 0 {
            return Err(ConfigError::InvalidSignatureTolerance {
                value: self.signature_tolerance_seconds,
            });
        }

        if self.outbound_timeout_ms == 0 {
            return Err(ConfigError::InvalidOutboundTimeout {
                value: self.outbound_timeout_ms,
            });
        }

        for (key, value) in [
            ("SLACK_API_BASE", &self.slack_api_base),
            ("BIGQUERY_API_BASE", &self.bigquery_api_base),
            ("LANGUAGE_API_BASE", &self.language_api_base),
        ] {
            Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
                key,
                value: value.clone(),
                source,
            })?;
        }

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_outbound_timeout_ms() -> u64 {
    5000
}

fn default_signature_tolerance_seconds() -> u64 {
    300 // 5 minutes
}

fn default_slack_api_base() -> String {
    "https://slack.com/api".to_string()
}

fn default_bigquery_api_base() -> String {
    "https://bigquery.googleapis.com/bigquery/v2".to_string()
}

fn default_language_api_base() -> String {
    "https://language.googleapis.com/v1".to_string()
}

fn default_gce_metadata_host() -> String {
    "metadata.google.internal".to_string()
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("required configuration is missing; set {key} environment variable")]
    MissingRequired { key: &'static str },
    #[error("invalid boolean for {key}: '{value}'")]
    InvalidBool { key: &'static str, value: String },
    #[error("invalid number for {key}: '{value}'")]
    InvalidNumber { key: &'static str, value: String },
    #[error("signature tolerance must be positive, got {value}")]
    InvalidSignatureTolerance { value: u64 },
    #[error("outbound timeout must be positive, got {value}ms")]
    InvalidOutboundTimeout { value: u64 },
    #[error("invalid url for {key} '{value}': {source}")]
    InvalidUrl {
        key: &'static str,
        value: String,
        source: url::ParseError,
    },
}

/// Keys read by the loader. Anything else found in env files is ignored.
const KNOWN_KEYS: &[&str] = &[
    "SLACKBOT_PROFILE",
    "SLACKBOT_LOGLEVEL",
    "SLACKBOT_LOGFORMAT",
    "SLACKBOT_HOST",
    "SLACKBOT_PORT",
    "SLACKBOT_REACTION_SENTIMENT_ENABLE",
    "SLACKBOT_OUTBOUND_TIMEOUT_MS",
    "SLACKBOT_SIGNATURE_TOLERANCE_SECONDS",
    "SLACK_SIGNING_SECRET",
    "SLACK_OAUTH_ACCESS_TOKEN",
    "SLACK_API_BASE",
    "BIGQUERY_PROJECT_ID",
    "BIGQUERY_DATASET_ID",
    "BIGQUERY_TABLE_ID",
    "BIGQUERY_API_BASE",
    "GOOGLE_OAUTH_ACCESS_TOKEN",
    "LANGUAGE_API_BASE",
    "LANGUAGE_API_KEY",
    "GCE_METADATA_HOST",
];

/// Loads configuration using layered `.env` files and process env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates configuration. Process environment wins over env files.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile) = self.collect_layered_env()?;

        for key in KNOWN_KEYS {
            if let Ok(value) = env::var(key) {
                layered.insert((*key).to_string(), value);
            }
        }

        let mut take = |key: &str| layered.remove(key).filter(|v| !v.trim().is_empty());

        let config = AppConfig {
            profile,
            log_level: take("SLACKBOT_LOGLEVEL").unwrap_or_else(default_log_level),
            log_format: take("SLACKBOT_LOGFORMAT").unwrap_or_else(default_log_format),
            host: take("SLACKBOT_HOST").unwrap_or_else(default_host),
            port: take("SLACKBOT_PORT")
                .map(|v| parse_port("SLACKBOT_PORT", &v))
                .transpose()?
                .unwrap_or_else(default_port),
            reaction_sentiment_enable: take("SLACKBOT_REACTION_SENTIMENT_ENABLE")
                .map(|v| parse_bool("SLACKBOT_REACTION_SENTIMENT_ENABLE", &v))
                .transpose()?
                .unwrap_or(false),
            outbound_timeout_ms: take("SLACKBOT_OUTBOUND_TIMEOUT_MS")
                .map(|v| parse_number("SLACKBOT_OUTBOUND_TIMEOUT_MS", &v))
                .transpose()?
                .unwrap_or_else(default_outbound_timeout_ms),
            signature_tolerance_seconds: take("SLACKBOT_SIGNATURE_TOLERANCE_SECONDS")
                .map(|v| parse_number("SLACKBOT_SIGNATURE_TOLERANCE_SECONDS", &v))
                .transpose()?
                .unwrap_or_else(default_signature_tolerance_seconds),
            slack_signing_secret: take("SLACK_SIGNING_SECRET").unwrap_or_default(),
            slack_oauth_access_token: take("SLACK_OAUTH_ACCESS_TOKEN").unwrap_or_default(),
            slack_api_base: take("SLACK_API_BASE").unwrap_or_else(default_slack_api_base),
            bigquery_project_id: take("BIGQUERY_PROJECT_ID").unwrap_or_default(),
            bigquery_dataset_id: take("BIGQUERY_DATASET_ID").unwrap_or_default(),
            bigquery_table_id: take("BIGQUERY_TABLE_ID").unwrap_or_default(),
            bigquery_api_base: take("BIGQUERY_API_BASE").unwrap_or_else(default_bigquery_api_base),
            google_oauth_access_token: take("GOOGLE_OAUTH_ACCESS_TOKEN"),
            language_api_base: take("LANGUAGE_API_BASE").unwrap_or_else(default_language_api_base),
            language_api_key: take("LANGUAGE_API_KEY"),
            gce_metadata_host: take("GCE_METADATA_HOST")
                .unwrap_or_else(default_gce_metadata_host),
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("SLACKBOT_PROFILE")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| values.get("SLACKBOT_PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if KNOWN_KEYS.contains(&key.as_str()) {
                        values.insert(key, value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Ok(true),
        "0" | "f" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_number(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            key,
            value: value.to_string(),
        })
}

fn parse_port(key: &'static str, value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            key,
            value: value.to_string(),
        })
}
