use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub notifications: NotificationConfig,
    pub ncr: NcrConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct NotificationConfig {
    pub sender_address: String,
    /// Send "an approver responded" notices to requesters.
    pub approval_notice: bool,
    /// Base for approve/reject links embedded in approval requests.
    pub response_base_url: String,
    /// Outbound mail relay; notices are only logged when unset.
    pub relay_url: Option<String>,
    pub relay_api_key: Option<SecretString>,
    pub relay_timeout_secs: u64,
}

/// Budget office mailboxes used when building NCR approval chains.
#[derive(Clone, Debug)]
pub struct NcrConfig {
    pub ba80_budget_mailbox: String,
    pub ba61_tier1_budget_mailbox: String,
    pub ba61_tier2_budget_mailbox: String,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub relay_url: Option<String>,
    pub approval_notice: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://approvey.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            notifications: NotificationConfig {
                sender_address: "approvals@approvey.local".to_string(),
                approval_notice: true,
                response_base_url: "http://127.0.0.1:8080".to_string(),
                relay_url: None,
                relay_api_key: None,
                relay_timeout_secs: 10,
            },
            ncr: NcrConfig {
                ba80_budget_mailbox: "ba80-budget@approvey.local".to_string(),
                ba61_tier1_budget_mailbox: "ba61-tier1-budget@approvey.local".to_string(),
                ba61_tier2_budget_mailbox: "ba61-tier2-budget@approvey.local".to_string(),
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("approvey.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(notifications) = patch.notifications {
            if let Some(sender_address) = notifications.sender_address {
                self.notifications.sender_address = sender_address;
            }
            if let Some(approval_notice) = notifications.approval_notice {
                self.notifications.approval_notice = approval_notice;
            }
            if let Some(response_base_url) = notifications.response_base_url {
                self.notifications.response_base_url = response_base_url;
            }
            if let Some(relay_url) = notifications.relay_url {
                self.notifications.relay_url = Some(relay_url);
            }
            if let Some(relay_api_key) = notifications.relay_api_key {
                self.notifications.relay_api_key = Some(secret_value(relay_api_key));
            }
            if let Some(relay_timeout_secs) = notifications.relay_timeout_secs {
                self.notifications.relay_timeout_secs = relay_timeout_secs;
            }
        }

        if let Some(ncr) = patch.ncr {
            if let Some(mailbox) = ncr.ba80_budget_mailbox {
                self.ncr.ba80_budget_mailbox = mailbox;
            }
            if let Some(mailbox) = ncr.ba61_tier1_budget_mailbox {
                self.ncr.ba61_tier1_budget_mailbox = mailbox;
            }
            if let Some(mailbox) = ncr.ba61_tier2_budget_mailbox {
                self.ncr.ba61_tier2_budget_mailbox = mailbox;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("APPROVEY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("APPROVEY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("APPROVEY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("APPROVEY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("APPROVEY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("APPROVEY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("APPROVEY_SERVER_PORT") {
            self.server.port = parse_u16("APPROVEY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("APPROVEY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("APPROVEY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("APPROVEY_NOTIFICATIONS_SENDER_ADDRESS") {
            self.notifications.sender_address = value;
        }
        if let Some(value) = read_env("APPROVEY_NOTIFICATIONS_APPROVAL_NOTICE") {
            self.notifications.approval_notice =
                parse_bool("APPROVEY_NOTIFICATIONS_APPROVAL_NOTICE", &value)?;
        }
        if let Some(value) = read_env("APPROVEY_NOTIFICATIONS_RESPONSE_BASE_URL") {
            self.notifications.response_base_url = value;
        }
        if let Some(value) = read_env("APPROVEY_NOTIFICATIONS_RELAY_URL") {
            self.notifications.relay_url = Some(value);
        }
        if let Some(value) = read_env("APPROVEY_NOTIFICATIONS_RELAY_API_KEY") {
            self.notifications.relay_api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("APPROVEY_NOTIFICATIONS_RELAY_TIMEOUT_SECS") {
            self.notifications.relay_timeout_secs =
                parse_u64("APPROVEY_NOTIFICATIONS_RELAY_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("APPROVEY_NCR_BA80_BUDGET_MAILBOX") {
            self.ncr.ba80_budget_mailbox = value;
        }
        if let Some(value) = read_env("APPROVEY_NCR_BA61_TIER1_BUDGET_MAILBOX") {
            self.ncr.ba61_tier1_budget_mailbox = value;
        }
        if let Some(value) = read_env("APPROVEY_NCR_BA61_TIER2_BUDGET_MAILBOX") {
            self.ncr.ba61_tier2_budget_mailbox = value;
        }

        let log_level =
            read_env("APPROVEY_LOGGING_LEVEL").or_else(|| read_env("APPROVEY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("APPROVEY_LOGGING_FORMAT").or_else(|| read_env("APPROVEY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(relay_url) = overrides.relay_url {
            self.notifications.relay_url = Some(relay_url);
        }
        if let Some(approval_notice) = overrides.approval_notice {
            self.notifications.approval_notice = approval_notice;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_notifications(&self.notifications)?;
        validate_ncr(&self.ncr)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("approvey.toml"), PathBuf::from("config/approvey.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_notifications(notifications: &NotificationConfig) -> Result<(), ConfigError> {
    if !looks_like_mailbox(&notifications.sender_address) {
        return Err(ConfigError::Validation(
            "notifications.sender_address must be an email address".to_string(),
        ));
    }

    if !is_http_url(&notifications.response_base_url) {
        return Err(ConfigError::Validation(
            "notifications.response_base_url must start with http:// or https://".to_string(),
        ));
    }

    if let Some(relay_url) = &notifications.relay_url {
        if !is_http_url(relay_url) {
            return Err(ConfigError::Validation(
                "notifications.relay_url must start with http:// or https://".to_string(),
            ));
        }
        let missing_key = notifications
            .relay_api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing_key {
            return Err(ConfigError::Validation(
                "notifications.relay_api_key is required when notifications.relay_url is set"
                    .to_string(),
            ));
        }
    }

    if notifications.relay_timeout_secs == 0 || notifications.relay_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "notifications.relay_timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_ncr(ncr: &NcrConfig) -> Result<(), ConfigError> {
    let mailboxes = [
        ("ncr.ba80_budget_mailbox", &ncr.ba80_budget_mailbox),
        ("ncr.ba61_tier1_budget_mailbox", &ncr.ba61_tier1_budget_mailbox),
        ("ncr.ba61_tier2_budget_mailbox", &ncr.ba61_tier2_budget_mailbox),
    ];
    for (key, mailbox) in mailboxes {
        if !looks_like_mailbox(mailbox) {
            return Err(ConfigError::Validation(format!("{key} must be an email address")));
        }
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn looks_like_mailbox(value: &str) -> bool {
    match value.trim().split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty(),
        None => false,
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    notifications: Option<NotificationPatch>,
    ncr: Option<NcrPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationPatch {
    sender_address: Option<String>,
    approval_notice: Option<bool>,
    response_base_url: Option<String>,
    relay_url: Option<String>,
    relay_api_key: Option<String>,
    relay_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct NcrPatch {
    ba80_budget_mailbox: Option<String>,
    ba61_tier1_budget_mailbox: Option<String>,
    ba61_tier2_budget_mailbox: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_load_without_any_file() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.notifications.approval_notice, "approval notices default to on")?;
        ensure(config.notifications.relay_url.is_none(), "relay is optional")?;
        ensure(config.server_address() == "127.0.0.1:8080", "default server address")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_RELAY_API_KEY", "relay-key-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("approvey.toml");
            fs::write(
                &path,
                r#"
[notifications]
relay_url = "https://relay.example.gov/send"
relay_api_key = "${TEST_RELAY_API_KEY}"

[ncr]
ba80_budget_mailbox = "ba80@ncr.example.gov"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config
                    .notifications
                    .relay_api_key
                    .as_ref()
                    .map(|key| key.expose_secret() == "relay-key-from-env")
                    .unwrap_or(false),
                "relay api key should be loaded from environment",
            )?;
            ensure(
                config.ncr.ba80_budget_mailbox == "ba80@ncr.example.gov",
                "ncr mailbox should come from file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_RELAY_API_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("APPROVEY_LOG_LEVEL", "warn");
        env::set_var("APPROVEY_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["APPROVEY_LOG_LEVEL", "APPROVEY_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("APPROVEY_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("APPROVEY_NOTIFICATIONS_APPROVAL_NOTICE", "false");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("approvey.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[server]
port = 9090

[notifications]
approval_notice = true

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.server.port == 9090, "file port should win over defaults")?;
            ensure(
                !config.notifications.approval_notice,
                "env approval notice flag should win over file",
            )?;
            Ok(())
        })();

        clear_vars(&["APPROVEY_DATABASE_URL", "APPROVEY_NOTIFICATIONS_APPROVAL_NOTICE"]);
        result
    }

    #[test]
    fn relay_without_api_key_fails_fast() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("APPROVEY_NOTIFICATIONS_RELAY_URL", "https://relay.example.gov/send");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("relay_api_key")
            );
            ensure(has_message, "validation failure should mention relay_api_key")
        })();

        clear_vars(&["APPROVEY_NOTIFICATIONS_RELAY_URL"]);
        result
    }

    #[test]
    fn invalid_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("APPROVEY_SERVER_PORT", "not-a-port");

        let result = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => Err("expected invalid override error".to_string()),
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "APPROVEY_SERVER_PORT", "error should name the variable")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
        };

        clear_vars(&["APPROVEY_SERVER_PORT"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("APPROVEY_NOTIFICATIONS_RELAY_URL", "https://relay.example.gov/send");
        env::set_var("APPROVEY_NOTIFICATIONS_RELAY_API_KEY", "relay-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("relay-secret-value"),
                "debug output should not contain relay api key",
            )
        })();

        clear_vars(&["APPROVEY_NOTIFICATIONS_RELAY_URL", "APPROVEY_NOTIFICATIONS_RELAY_API_KEY"]);
        result
    }
}
