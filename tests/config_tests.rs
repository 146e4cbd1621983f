// ABOUTME: Tests for configuration loading - TOML file, env overrides, and validation.
// ABOUTME: Serialized because environment variables are process-global.

use serial_test::serial;
use tether::config::{Config, HandoffMode};

const ENV_VARS: &[&str] = &[
    "TETHER_DESK_BASE_URL",
    "TETHER_DESK_ORG_ID",
    "TETHER_DESK_DEPLOYMENT_ID",
    "TETHER_DESK_BUTTON_ID",
    "TETHER_HOST_BASE_URL",
    "TETHER_HOST_BOT_USERNAME",
    "TETHER_HOST_BOT_PASSWORD",
    "TETHER_SERVER_PORT",
    "TETHER_API_KEY",
    "TETHER_WORKSPACE_PATH",
    "TETHER_DEBUG",
];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn loads_file_and_applies_env_overrides() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tether.toml");
    std::fs::write(
        &path,
        r#"
            [desk]
            base_url = "https://desk.example.com"
            org_id = "00Dfile"
            deployment_id = "572file"
            button_id = "573file"

            [host]
            base_url = "https://chat.example.com"
            bot_username = "tether.bot"
            bot_password = "from-file"

            [handoff]
            mode = "queue"
            target_department = "support"
        "#,
    )
    .unwrap();

    std::env::set_var("TETHER_DESK_ORG_ID", "00Denv");
    std::env::set_var("TETHER_HOST_BOT_PASSWORD", "from-env");
    std::env::set_var("TETHER_DEBUG", "true");

    let config = Config::load_from(&path).unwrap();

    // Env wins over file, file wins over defaults
    assert_eq!(config.desk.org_id, "00Denv");
    assert_eq!(config.desk.deployment_id, "572file");
    assert_eq!(config.host.bot_password, "from-env");
    assert_eq!(config.handoff.mode, HandoffMode::Queue);
    assert!(config.debug);
    config.desk_ready().unwrap();

    clear_env();
}

#[test]
#[serial]
fn missing_file_falls_back_to_defaults_plus_env() {
    clear_env();
    std::env::set_var("TETHER_HOST_BASE_URL", "https://chat.example.com");
    std::env::set_var("TETHER_SERVER_PORT", "14000");

    let config = Config::load_from("/nonexistent/tether.toml").unwrap();

    assert_eq!(config.host.base_url, "https://chat.example.com");
    assert_eq!(config.server.port, 14000);
    assert_eq!(config.handoff.mode, HandoffMode::Direct);
    // Desk section is empty, so session starts would be refused
    assert!(config.desk_ready().is_err());

    clear_env();
}

#[test]
#[serial]
fn missing_host_base_url_is_fatal() {
    clear_env();

    let err = Config::load_from("/nonexistent/tether.toml").unwrap_err();
    assert!(err.to_string().contains("host.base_url"));
}

#[test]
#[serial]
fn invalid_port_override_keeps_configured_value() {
    clear_env();
    std::env::set_var("TETHER_HOST_BASE_URL", "https://chat.example.com");
    std::env::set_var("TETHER_SERVER_PORT", "not-a-port");

    let config = Config::load_from("/nonexistent/tether.toml").unwrap();
    assert_eq!(config.server.port, 13800);

    clear_env();
}
