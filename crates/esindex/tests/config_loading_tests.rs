//! Table-driven tests for configuration loading and validation.

use std::time::Duration;

use esindex::config::{load_config, load_config_from_str};
use esindex::coordinator::IndexingSpeed;

/// Represents a single config loading test case.
struct ConfigTestCase {
    /// Test case name for identification.
    name: &'static str,
    /// The config JSON content to test.
    config_json: &'static str,
    /// Whether loading should succeed.
    should_succeed: bool,
    /// Expected error substring (if should_succeed is false).
    expected_error: Option<&'static str>,
}

const JSON_CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "valid_minimal",
        config_json: r#"{ "version": "1.0" }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_full",
        config_json: r#"{
            "version": "1.0",
            "api": {
                "base_url": "https://mail.example.com/api",
                "connect_timeout_secs": 5,
                "request_timeout_secs": 20,
                "priority": "u=7",
                "uid": "uid-1",
                "access_token": { "env_var": "ESINDEX_TOKEN" }
            },
            "indexing": {
                "label_id": "5",
                "page_size": 50,
                "max_concurrent": 6,
                "reduced_concurrent": 2,
                "page_retry": { "max_attempts": 4, "base_delay_ms": 200, "max_delay_ms": 5000 },
                "message_retry": { "max_attempts": 2, "base_delay_ms": 100, "max_delay_ms": 1000 }
            },
            "database": { "path": "/tmp/esindex.db" },
            "index_key": { "file": "/run/secrets/index_key" }
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_legacy_value_alias",
        config_json: r#"{ "version": "1.0", "index_key": { "value": "00ff" } }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "invalid_json",
        config_json: r#"{ "version": "1.0", "#,
        should_succeed: false,
        expected_error: Some("Failed to parse config JSON"),
    },
    ConfigTestCase {
        name: "invalid_missing_version",
        config_json: r#"{ "indexing": { "page_size": 10 } }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "invalid_unknown_field",
        config_json: r#"{ "version": "1.0", "worker_count": 4 }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "invalid_page_size_too_large",
        config_json: r#"{ "version": "1.0", "indexing": { "page_size": 500 } }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "invalid_zero_concurrency",
        config_json: r#"{ "version": "1.0", "indexing": { "max_concurrent": 0 } }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "invalid_incomplete_retry",
        config_json: r#"{ "version": "1.0", "indexing": { "page_retry": { "max_attempts": 3 } } }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "invalid_version",
        config_json: r#"{ "version": "2.0" }"#,
        should_succeed: false,
        expected_error: Some("Unsupported config version"),
    },
    ConfigTestCase {
        name: "invalid_base_url_scheme",
        config_json: r#"{ "version": "1.0", "api": { "base_url": "ftp://mail.example.com" } }"#,
        should_succeed: false,
        expected_error: Some("http(s) URL"),
    },
    ConfigTestCase {
        name: "invalid_reduced_above_max",
        config_json: r#"{
            "version": "1.0",
            "indexing": { "max_concurrent": 2, "reduced_concurrent": 4 }
        }"#,
        should_succeed: false,
        expected_error: Some("exceeds max_concurrent"),
    },
    ConfigTestCase {
        name: "invalid_retry_delays",
        config_json: r#"{
            "version": "1.0",
            "indexing": {
                "message_retry": { "max_attempts": 3, "base_delay_ms": 5000, "max_delay_ms": 100 }
            }
        }"#,
        should_succeed: false,
        expected_error: Some("Invalid retry policy 'message_retry'"),
    },
];

#[test]
fn test_json_config_loading() {
    for test_case in JSON_CONFIG_TESTS {
        let result = load_config_from_str(test_case.config_json);

        if test_case.should_succeed {
            assert!(
                result.is_ok(),
                "Test '{}': Expected success but got error: {:?}",
                test_case.name,
                result.err()
            );
        } else {
            assert!(
                result.is_err(),
                "Test '{}': Expected error but got success",
                test_case.name
            );

            if let Some(expected_error) = test_case.expected_error {
                let error_msg = result.err().unwrap().to_string();
                assert!(
                    error_msg.contains(expected_error),
                    "Test '{}': Expected error containing '{}', got '{}'",
                    test_case.name,
                    expected_error,
                    error_msg
                );
            }
        }
    }
}

#[test]
fn test_valid_config_field_values() {
    let config = load_config_from_str(JSON_CONFIG_TESTS[1].config_json).unwrap();

    assert_eq!(config.api.base_url, "https://mail.example.com/api");
    assert_eq!(config.api.uid.as_deref(), Some("uid-1"));
    assert_eq!(
        config.api.access_token.env_var.as_deref(),
        Some("ESINDEX_TOKEN")
    );

    let options = config.api.options();
    assert_eq!(options.connect_timeout, Duration::from_secs(5));
    assert_eq!(options.request_timeout, Duration::from_secs(20));

    let settings = config.indexing.settings();
    assert_eq!(settings.page_size, 50);
    assert_eq!(settings.concurrency(IndexingSpeed::Full), 6);
    assert_eq!(settings.concurrency(IndexingSpeed::Reduced), 2);
    assert_eq!(settings.page_retry.max_attempts, 4);
    assert_eq!(settings.message_retry.max_delay, Duration::from_millis(1000));

    assert_eq!(
        config.database.resolved_path().unwrap(),
        std::path::PathBuf::from("/tmp/esindex.db")
    );
}

#[test]
fn test_config_defaults_applied() {
    let config = load_config_from_str(r#"{ "version": "1.0" }"#).unwrap();

    assert_eq!(config.indexing.label_id, "5");
    assert_eq!(config.indexing.page_size, 150);
    assert!(config.indexing.reduced_concurrent <= config.indexing.max_concurrent);
    assert_eq!(config.api.priority, "u=7");
    assert!(!config.index_key.is_configured());
}

#[test]
fn test_load_config_from_file() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    std::fs::write(&path, r#"{ "version": "1.0", "indexing": { "page_size": 25 } }"#).unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.indexing.page_size, 25);
}

#[test]
fn test_missing_config_file() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let err = load_config(temp_dir.path().join("absent.json")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
