use std::env;
use std::sync::{Mutex, OnceLock};

use approvey_cli::commands::{config, doctor, migrate, seed};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("APPROVEY_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_override() {
    with_env(
        &[("APPROVEY_DATABASE_URL", "sqlite::memory:"), ("APPROVEY_SERVER_PORT", "not-a-port")],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "migrate");
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        },
    );
}

#[test]
fn seed_rejects_relay_without_api_key() {
    with_env(
        &[
            ("APPROVEY_DATABASE_URL", "sqlite::memory:"),
            ("APPROVEY_NOTIFICATIONS_RELAY_URL", "https://relay.example.gov/send"),
        ],
        || {
            let result = seed::run();
            assert_eq!(result.exit_code, 2);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["error_class"], "config_validation");
            let message = payload["message"].as_str().unwrap_or_default();
            assert!(message.contains("relay_api_key"), "unexpected message: {message}");
        },
    );
}

#[test]
fn seed_reports_each_dispatch_kind() {
    with_env(&[("APPROVEY_DATABASE_URL", "sqlite::memory:")], || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected seed success: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");

        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("linear: P-SEED-LINEAR-001"));
        assert!(message.contains("parallel: P-SEED-PARALLEL-001"));
        assert!(message.contains("ncr: P-SEED-NCR-001"));
    });
}

#[test]
fn seed_is_idempotent_across_runs_on_a_file_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("seed.db").display());

    with_env(&[("APPROVEY_DATABASE_URL", url.as_str())], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed success: {}", first.output);
        let first_message = parse_payload(&first.output)["message"].to_string();
        assert!(first_message.contains("inserted"));

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed success: {}", second.output);
        let second_message = parse_payload(&second.output)["message"].to_string();
        assert!(second_message.contains("already present"));
        assert!(!second_message.contains("; inserted"));
    });
}

#[test]
fn doctor_passes_once_the_database_is_migrated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("doctor.db").display());

    with_env(&[("APPROVEY_DATABASE_URL", url.as_str())], || {
        let before = doctor::run(true);
        assert_eq!(before.exit_code, 1, "unmigrated database should fail doctor");
        let report = parse_payload(&before.output);
        assert_eq!(report["overall_status"], "fail");
        assert_eq!(check_status(&report, "database_connectivity"), "pass");
        assert_eq!(check_status(&report, "schema_migrations"), "fail");

        assert_eq!(migrate::run().exit_code, 0);

        let after = doctor::run(true);
        assert_eq!(after.exit_code, 0, "doctor output: {}", after.output);
        let report = parse_payload(&after.output);
        assert_eq!(report["overall_status"], "pass");
        assert_eq!(check_status(&report, "notification_transport"), "pass");
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_fails() {
    with_env(&[("APPROVEY_DATABASE_URL", "postgres://elsewhere")], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 1);
        assert!(result.output.contains("- [fail] config_validation"));
        assert!(result.output.contains("- [skip] database_connectivity"));
        assert!(result.output.contains("- [skip] schema_migrations"));
    });
}

#[test]
fn config_attributes_sources_and_redacts_the_relay_key() {
    with_env(
        &[
            ("APPROVEY_DATABASE_URL", "sqlite::memory:"),
            ("APPROVEY_NOTIFICATIONS_RELAY_URL", "https://relay.example.gov/send"),
            ("APPROVEY_NOTIFICATIONS_RELAY_API_KEY", "relay-topsecret"),
            ("APPROVEY_LOG_LEVEL", "debug"),
        ],
        || {
            let result = config::run();
            assert_eq!(result.exit_code, 0);

            let output = result.output;
            assert!(output.contains(
                "- database.url = sqlite::memory: (source: env (APPROVEY_DATABASE_URL))"
            ));
            assert!(output.contains("- notifications.relay_api_key = relay-*** (source: env"));
            assert!(output.contains("- logging.level = debug (source: env (APPROVEY_LOG_LEVEL))"));
            assert!(output.contains("- server.port = 8080 (source: default)"));
            assert!(!output.contains("topsecret"));
        },
    );
}

fn check_status(report: &Value, name: &str) -> String {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .and_then(|check| check["status"].as_str())
        .unwrap_or_default()
        .to_string()
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "APPROVEY_DATABASE_URL",
        "APPROVEY_DATABASE_MAX_CONNECTIONS",
        "APPROVEY_DATABASE_TIMEOUT_SECS",
        "APPROVEY_SERVER_BIND_ADDRESS",
        "APPROVEY_SERVER_PORT",
        "APPROVEY_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "APPROVEY_NOTIFICATIONS_SENDER_ADDRESS",
        "APPROVEY_NOTIFICATIONS_APPROVAL_NOTICE",
        "APPROVEY_NOTIFICATIONS_RESPONSE_BASE_URL",
        "APPROVEY_NOTIFICATIONS_RELAY_URL",
        "APPROVEY_NOTIFICATIONS_RELAY_API_KEY",
        "APPROVEY_NOTIFICATIONS_RELAY_TIMEOUT_SECS",
        "APPROVEY_NCR_BA80_BUDGET_MAILBOX",
        "APPROVEY_NCR_BA61_TIER1_BUDGET_MAILBOX",
        "APPROVEY_NCR_BA61_TIER2_BUDGET_MAILBOX",
        "APPROVEY_LOGGING_LEVEL",
        "APPROVEY_LOGGING_FORMAT",
        "APPROVEY_LOG_LEVEL",
        "APPROVEY_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
