use std::env;
use std::sync::{Mutex, OnceLock};

use penny_cli::commands::{migrate, smoke};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("PENNY_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_with_bad_provider() {
    with_env(&[("PENNY_LLM_PROVIDER", "mainframe")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn smoke_returns_success_report_with_valid_env() {
    with_env(
        &[
            ("PENNY_DATABASE_URL", "sqlite::memory:"),
            ("PENNY_ANALYSIS_EXECUTABLE", "/bin/sh"),
        ],
        || {
            let result = smoke::run();
            assert_eq!(result.exit_code, 0, "expected successful smoke report");

            let payload = parse_payload(last_line(&result.output));
            assert_eq!(payload["command"], "smoke");
            assert_eq!(payload["status"], "pass");
        },
    );
}

#[test]
fn smoke_fails_when_analysis_executable_is_missing() {
    with_env(
        &[
            ("PENNY_DATABASE_URL", "sqlite::memory:"),
            ("PENNY_ANALYSIS_EXECUTABLE", "/nonexistent/penny-analyzer"),
        ],
        || {
            let result = smoke::run();
            assert_eq!(result.exit_code, 6, "expected smoke failure code");

            let payload = parse_payload(last_line(&result.output));
            assert_eq!(payload["command"], "smoke");
            assert_eq!(payload["status"], "fail");

            let checks = payload["checks"].as_array().expect("checks array");
            let exe_check = checks
                .iter()
                .find(|check| check["name"] == "analysis_executable")
                .expect("analysis_executable check");
            assert_eq!(exe_check["status"], "fail");
        },
    );
}

#[test]
fn smoke_fails_when_config_invalid() {
    with_env(&[("PENNY_LLM_PROVIDER", "mainframe")], || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 6, "expected smoke failure code");

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "fail");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default()
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "PENNY_DATABASE_URL",
        "PENNY_DATABASE_MAX_CONNECTIONS",
        "PENNY_DATABASE_TIMEOUT_SECS",
        "PENNY_DATABASE_BUSY_TIMEOUT_MS",
        "PENNY_LLM_PROVIDER",
        "PENNY_LLM_API_KEY",
        "PENNY_LLM_BASE_URL",
        "PENNY_LLM_MODEL",
        "PENNY_LLM_TIMEOUT_SECS",
        "PENNY_LLM_MAX_RETRIES",
        "PENNY_ANALYSIS_EXECUTABLE",
        "PENNY_ANALYSIS_TIMEOUT_SECS",
        "PENNY_ANALYSIS_SPOOL_DIR",
        "PENNY_RETRIEVAL_TOP_K",
        "PENNY_PERSONA_NAME",
        "PENNY_SERVER_BIND_ADDRESS",
        "PENNY_SERVER_PORT",
        "PENNY_LOG_LEVEL",
        "PENNY_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, previous) in previous_values {
        match previous {
            Some(value) => env::set_var(key, value),
            None => env::remove_var(key),
        }
    }
}
