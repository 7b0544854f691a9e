//! Integration tests for config module public API.

use funnel::cache::DuplicateKeyPolicy;
use funnel::config::{
    load_settings, load_settings_with, parse_settings, CacheFormat, EnvLayer, Settings,
};
use funnel::metadata::{open_metadata_store, MetadataStoreKind};
use funnel::value::CacheValue;
use funnel::FunnelError;
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

#[test]
fn public_api_is_accessible() {
    let settings = Settings::default();
    let _layer = EnvLayer::new("test");
    let _format = CacheFormat::Chunked;
    assert!(settings.validate().is_ok());
}

#[test]
fn full_settings_workflow() {
    let temp = TempDir::new().unwrap();
    let cache_dir = temp.path().join("cache");
    let config = temp.path().join("config.yml");
    fs::write(
        &config,
        format!(
            r#"
cache_dir: {}
cache_format: chunked
on_duplicate_key: overwrite
metadata_store: sql
"#,
            cache_dir.display()
        ),
    )
    .unwrap();

    let settings = load_settings_with(Some(config.as_path()), &EnvLayer::default()).unwrap();
    assert_eq!(settings.cache_format, CacheFormat::Chunked);
    assert_eq!(settings.on_duplicate_key, DuplicateKeyPolicy::Overwrite);

    let store = open_metadata_store(&settings).unwrap();
    store.put("k", &json!(1).into(), Default::default()).unwrap();
    store.put("k", &json!(2).into(), Default::default()).unwrap();
    assert_eq!(
        store.get("k", &Default::default()).unwrap(),
        CacheValue::from(json!(2))
    );
    assert!(cache_dir.join("funnel.db").is_file());
}

#[test]
fn environment_layer_wins() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("config.yml");
    fs::write(&config, "metadata_store: sql\nreadonly: false\n").unwrap();

    let env = EnvLayer::from_vars(
        "test",
        [
            ("FUNNEL_METADATA_STORE", "memory"),
            ("FUNNEL_READONLY", "true"),
            ("UNRELATED", "ignored"),
        ],
    );
    let settings = load_settings_with(Some(config.as_path()), &env).unwrap();
    assert_eq!(settings.metadata_store, MetadataStoreKind::Memory);
    assert!(settings.readonly);
}

#[test]
fn invalid_settings_are_rejected() {
    let err = parse_settings("on_duplicate_key: sometimes\n", Path::new("bad.yml")).unwrap_err();
    assert!(matches!(err, FunnelError::ConfigParse { .. }));

    let temp = TempDir::new().unwrap();
    let config = temp.path().join("config.yml");
    fs::write(&config, "cache_dir: \"\"\n").unwrap();
    let err = load_settings_with(Some(config.as_path()), &EnvLayer::default()).unwrap_err();
    assert!(matches!(err, FunnelError::Validation { .. }));
}

#[test]
fn explicit_path_must_exist() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("missing.yml");
    let err = load_settings(Some(missing.as_path())).unwrap_err();
    assert!(err.is_not_found());
}
