//! Coverage for config file loading and path resolution.

use std::time::Duration;

use rocketchat_connector::config::{config_dir, config_path_with, load_config, Config};

#[test]
fn config_dir_resolves() {
    let dir = config_dir();
    assert!(dir.is_ok());
    let path = match dir {
        Ok(path) => path,
        Err(err) => panic!("config dir should resolve: {err}"),
    };
    assert!(path.ends_with(".rocketchat-connector"));
}

#[test]
fn default_path_is_config_toml_in_config_dir() {
    let path = match config_path_with(|_| None) {
        Ok(path) => path,
        Err(err) => panic!("config path should resolve: {err}"),
    };
    assert!(path.ends_with(".rocketchat-connector/config.toml"));
}

#[test]
fn load_config_reads_file() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[connector]
name = "team-chat"
token = "test"
user-id = "userID"
update-interval = 0.25
page-size = 50
"#,
    )
    .expect("should write config");

    let config = match load_config(&path) {
        Ok(config) => config,
        Err(err) => panic!("config should load: {err:#}"),
    };
    assert_eq!(config.connector.name, "team-chat");
    assert_eq!(config.connector.page_size, 50);
    assert!(config.connector.group.is_none());
    assert!(config.connector.poll_interval() <= Duration::from_secs(60));
}

#[test]
fn missing_file_yields_defaults() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("absent.toml");

    let config = match load_config(&path) {
        Ok(config) => config,
        Err(err) => panic!("missing file should not be an error: {err:#}"),
    };
    assert_eq!(config.connector.name, "rocket.chat");
    assert_eq!(config.connector.page_size, 100);
}

#[test]
fn malformed_file_is_an_error() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, "[connector\ntoken = ").expect("should write config");

    let result = load_config(&path);
    assert!(result.is_err());
    let message = match result {
        Ok(_) => String::new(),
        Err(err) => format!("{err:#}"),
    };
    assert!(message.contains("invalid config"), "got: {message}");
}

#[test]
fn unknown_sections_are_tolerated() {
    let config = Config::from_toml(
        r#"
[connector]
token = "t"

[something-else]
key = 1
"#,
    );
    assert!(config.is_ok());
}
