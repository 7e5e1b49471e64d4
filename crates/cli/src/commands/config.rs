use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use approvey_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::CommandResult;

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult {
                exit_code: 2,
                output: format!("config validation failed: {error}"),
            };
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let relay_api_key = match &config.notifications.relay_api_key {
        Some(key) => redact_secret(key.expose_secret()),
        None => "<unset>".to_string(),
    };

    let fields = vec![
        field("database.url", config.database.url.clone(), &["APPROVEY_DATABASE_URL"]),
        field(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["APPROVEY_DATABASE_MAX_CONNECTIONS"],
        ),
        field(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["APPROVEY_DATABASE_TIMEOUT_SECS"],
        ),
        field(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["APPROVEY_SERVER_BIND_ADDRESS"],
        ),
        field("server.port", config.server.port.to_string(), &["APPROVEY_SERVER_PORT"]),
        field(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["APPROVEY_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        field(
            "notifications.sender_address",
            config.notifications.sender_address.clone(),
            &["APPROVEY_NOTIFICATIONS_SENDER_ADDRESS"],
        ),
        field(
            "notifications.approval_notice",
            config.notifications.approval_notice.to_string(),
            &["APPROVEY_NOTIFICATIONS_APPROVAL_NOTICE"],
        ),
        field(
            "notifications.response_base_url",
            config.notifications.response_base_url.clone(),
            &["APPROVEY_NOTIFICATIONS_RESPONSE_BASE_URL"],
        ),
        field(
            "notifications.relay_url",
            config.notifications.relay_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["APPROVEY_NOTIFICATIONS_RELAY_URL"],
        ),
        field(
            "notifications.relay_api_key",
            relay_api_key,
            &["APPROVEY_NOTIFICATIONS_RELAY_API_KEY"],
        ),
        field(
            "notifications.relay_timeout_secs",
            config.notifications.relay_timeout_secs.to_string(),
            &["APPROVEY_NOTIFICATIONS_RELAY_TIMEOUT_SECS"],
        ),
        field(
            "ncr.ba80_budget_mailbox",
            config.ncr.ba80_budget_mailbox.clone(),
            &["APPROVEY_NCR_BA80_BUDGET_MAILBOX"],
        ),
        field(
            "ncr.ba61_tier1_budget_mailbox",
            config.ncr.ba61_tier1_budget_mailbox.clone(),
            &["APPROVEY_NCR_BA61_TIER1_BUDGET_MAILBOX"],
        ),
        field(
            "ncr.ba61_tier2_budget_mailbox",
            config.ncr.ba61_tier2_budget_mailbox.clone(),
            &["APPROVEY_NCR_BA61_TIER2_BUDGET_MAILBOX"],
        ),
        field(
            "logging.level",
            config.logging.level.clone(),
            &["APPROVEY_LOGGING_LEVEL", "APPROVEY_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["APPROVEY_LOGGING_FORMAT", "APPROVEY_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        fields
            .into_iter()
            .map(|field| render_line(field.key, &field.value, source(field.key, field.env_keys))),
    );

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

struct ConfigField {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn field(key: &'static str, value: String, env_keys: &'static [&'static str]) -> ConfigField {
    ConfigField { key, value, env_keys }
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("approvey.toml"), PathBuf::from("config/approvey.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }
    "<redacted>".to_string()
}
