//! Config file loading.

use std::path::PathBuf;

use feedguard::config::load_config;
use feedguard::error::FilterError;

fn temp_file(content: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("feedguard-config-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.toml");
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn explicit_file_overrides_defaults() {
    let path = temp_file(
        r#"
[backend]
base_url = "http://classifier.internal:8080"

[cache]
capacity = 64

[logging]
level = "debug"
json = true
"#,
    );
    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.backend.base_url, "http://classifier.internal:8080");
    assert_eq!(config.cache.capacity, 64);
    assert_eq!(config.cache.ttl_ms, 300_000);
    assert_eq!(config.pipeline.media_host_pattern, r"twimg\.com");
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let path = std::env::temp_dir().join(format!("feedguard-missing-{}.toml", uuid::Uuid::new_v4()));
    assert!(matches!(load_config(Some(&path)), Err(FilterError::Config(_))));
}

#[test]
fn unparsable_file_is_an_error() {
    let path = temp_file("[pipeline]\nconcurrency = \"five\"\n");
    assert!(matches!(load_config(Some(&path)), Err(FilterError::Toml(_))));
}
