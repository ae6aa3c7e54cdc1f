use fittest_core::config::{ConfigError, FitTestConfig};
use fittest_core::execution::ExecutionConfig;
use fittest_core::link::{LinkConfig, DEFAULT_CANDIDATE_RATES};
use pretty_assertions::assert_eq;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_empty_object_gives_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, "{}").unwrap();

    let config = FitTestConfig::load(&path).unwrap();
    assert_eq!(config, FitTestConfig::default());
    assert_eq!(config.link.candidate_rates, DEFAULT_CANDIDATE_RATES.to_vec());
    assert_eq!(config.sampling.window_max_age_ms, 600_000);
    assert_eq!(config.execution.min_samples, 3);
    assert!(config.execution.require_receiving);
}

#[test]
fn test_partial_sections_merge_with_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(
        &path,
        r#"{ "link": { "candidate_rates": [1200] }, "execution": { "min_samples": 5 } }"#,
    )
    .unwrap();

    let config = FitTestConfig::load(&path).unwrap();
    assert_eq!(
        config.link,
        LinkConfig {
            candidate_rates: vec![1200],
            ..LinkConfig::default()
        }
    );
    assert_eq!(
        config.execution,
        ExecutionConfig {
            min_samples: 5,
            ..ExecutionConfig::default()
        }
    );
}

#[test]
fn test_save_then_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");

    let mut config = FitTestConfig::default();
    config.link.read_timeout_ms = 750;
    config.sampling.purge_gating = false;
    config.execution.tick_interval_ms = 250;
    config.save(&path).unwrap();

    assert_eq!(FitTestConfig::load(&path).unwrap(), config);
}

#[test]
fn test_load_errors() {
    let dir = tempdir().unwrap();

    let missing = dir.path().join("missing.json");
    assert!(matches!(
        FitTestConfig::load(&missing),
        Err(ConfigError::Io { .. })
    ));

    let broken = dir.path().join("broken.json");
    fs::write(&broken, "{ not json").unwrap();
    assert!(matches!(
        FitTestConfig::load(&broken),
        Err(ConfigError::Parse { .. })
    ));
    assert!(FitTestConfig::load_or_default(Some(&broken)).is_err());
}
