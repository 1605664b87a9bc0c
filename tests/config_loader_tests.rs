use slackbot::config::{ConfigError, ConfigLoader};
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

const ALL_KEYS: &[&str] = &[
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

const REQUIRED: &str = "SLACK_SIGNING_SECRET=s3cret\n\
SLACK_OAUTH_ACCESS_TOKEN=xoxb-1\n\
BIGQUERY_PROJECT_ID=proj\n\
BIGQUERY_DATASET_ID=slack\n\
BIGQUERY_TABLE_ID=events\n";

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    for key in ALL_KEYS {
        unsafe {
            env::remove_var(key);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

fn loader(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(PathBuf::from(dir.path()))
}

#[test]
fn loads_defaults_when_only_required_keys_present() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", REQUIRED);

    let cfg = loader(&temp_dir).load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.log_level, "warn");
    assert_eq!(cfg.log_format, "text");
    assert_eq!(cfg.host, "0.0.0.0");
    assert_eq!(cfg.port, 8080);
    assert!(!cfg.reaction_sentiment_enable);
    assert_eq!(cfg.outbound_timeout_ms, 5000);
    assert_eq!(cfg.signature_tolerance_seconds, 300);
    assert_eq!(cfg.slack_api_base, "https://slack.com/api");
    assert!(cfg.google_oauth_access_token.is_none());
    assert_eq!(cfg.gce_metadata_host, "metadata.google.internal");
    assert_eq!(cfg.bind_target(), ("0.0.0.0", 8080));
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", &format!("{REQUIRED}SLACKBOT_PORT=3000\n"));
    // Profile is selected in .env.local, before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "SLACKBOT_PROFILE=test\nSLACKBOT_PORT=4000\n",
    );
    write_env_file(&temp_dir, ".env.test", "SLACKBOT_PORT=5000\n");
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "SLACKBOT_PORT=6000\nSLACKBOT_LOGLEVEL=debug\n",
    );

    let cfg = loader(&temp_dir).load().expect("layered config loads");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.port, 6000);
    assert_eq!(cfg.log_level, "debug");
    clear_env();
}

#[test]
fn process_env_overrides_files() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        &format!("{REQUIRED}SLACKBOT_REACTION_SENTIMENT_ENABLE=false\n"),
    );
    unsafe {
        env::set_var("SLACKBOT_REACTION_SENTIMENT_ENABLE", "true");
        env::set_var("BIGQUERY_TABLE_ID", "events_override");
    }

    let cfg = loader(&temp_dir).load().expect("config loads");

    assert!(cfg.reaction_sentiment_enable);
    assert_eq!(cfg.bigquery_table_id, "events_override");
    clear_env();
}

#[test]
fn missing_required_key_is_rejected() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "SLACK_SIGNING_SECRET=s3cret\nSLACK_OAUTH_ACCESS_TOKEN=xoxb-1\n",
    );

    let err = loader(&temp_dir).load().unwrap_err();
    assert!(matches!(
        err,
        ConfigError::MissingRequired {
            key: "BIGQUERY_PROJECT_ID"
        }
    ));
    clear_env();
}

#[test]
fn invalid_bool_is_rejected() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        &format!("{REQUIRED}SLACKBOT_REACTION_SENTIMENT_ENABLE=maybe\n"),
    );

    let err = loader(&temp_dir).load().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidBool { .. }));
    clear_env();
}

#[test]
fn invalid_port_is_rejected() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", REQUIRED);
    unsafe {
        env::set_var("SLACKBOT_PORT", "not-a-port");
    }

    let err = loader(&temp_dir).load().unwrap_err();
    assert!(matches!(
        err,
        ConfigError::InvalidNumber {
            key: "SLACKBOT_PORT",
            ..
        }
    ));
    clear_env();
}

#[test]
fn hostname_bind_host_is_accepted() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        &format!("{REQUIRED}SLACKBOT_HOST=localhost\nSLACKBOT_PORT=9090\n"),
    );

    let cfg = loader(&temp_dir).load().expect("hostname host loads");
    assert_eq!(cfg.bind_target(), ("localhost", 9090));
    clear_env();
}

#[test]
fn redacted_json_hides_secrets() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        &format!("{REQUIRED}GOOGLE_OAUTH_ACCESS_TOKEN=ya29.token\n"),
    );

    let cfg = loader(&temp_dir).load().unwrap();
    let json = cfg.redacted_json().unwrap();

    assert!(!json.contains("s3cret"));
    assert!(!json.contains("xoxb-1"));
    assert!(!json.contains("ya29.token"));
    assert!(json.contains("[REDACTED]"));
    assert!(json.contains("events"));
    clear_env();
}
