use super::*;

use std::{
    collections::HashMap,
    env,
    time::{SystemTime, UNIX_EPOCH},
};

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
}

#[test]
fn keeps_memory_and_full_urls_untouched() {
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    assert_eq!(
        normalize_database_url("sqlite://./x.db?mode=rwc"),
        "sqlite://./x.db?mode=rwc"
    );
}

#[test]
fn blank_database_url_falls_back_to_default() {
    assert_eq!(normalize_database_url("   "), Settings::default().database_url);
}

#[test]
fn creates_parent_dir_for_relative_sqlite_url() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();

    let temp_root = env::temp_dir().join(format!("survey_server_config_test_{suffix}"));
    let db_path = temp_root.join("data").join("test.db");

    prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare db url");
    assert!(temp_root.join("data").exists());

    fs::remove_dir_all(temp_root).expect("cleanup");
}

#[test]
fn file_settings_then_env_overrides_apply_in_order() {
    let file_cfg = parse_file_settings(
        r#"
        bind_addr = "0.0.0.0:9000"
        database_url = "sqlite://./file.db"
        max_body_bytes = 2048
        "#,
    );

    let settings = apply_overrides(
        Settings::default(),
        file_cfg,
        env_from(&[
            ("DATABASE_URL", "sqlite://./env.db"),
            ("APP__DATABASE_URL", "sqlite://./app-env.db"),
        ]),
    );

    assert_eq!(settings.server_bind, "0.0.0.0:9000");
    assert_eq!(settings.database_url, "sqlite://./app-env.db");
    assert_eq!(settings.max_body_bytes, 2048);
}

#[test]
fn invalid_body_limit_env_is_ignored() {
    let settings = apply_overrides(
        Settings::default(),
        FileSettings::default(),
        env_from(&[("APP__MAX_BODY_BYTES", "lots"), ("SERVER_BIND", "127.0.0.1:1")]),
    );
    assert_eq!(settings.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
    assert_eq!(settings.server_bind, "127.0.0.1:1");
}

#[test]
fn unreadable_file_settings_fall_back_to_defaults() {
    let file_cfg = parse_file_settings("bind_addr = [");
    assert!(file_cfg.bind_addr.is_none());
}

#[tokio::test]
async fn prepared_database_url_creates_openable_sqlite_file() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();

    let temp_root = env::temp_dir().join(format!("survey_server_open_test_{suffix}"));
    let db_path = temp_root.join("nested").join("server.db");

    let prepared = prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare");
    let storage = storage::Storage::new(&prepared).await.expect("open sqlite");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should be created: {}",
        db_path.display()
    );

    fs::remove_dir_all(temp_root).expect("cleanup");
}
