//! Unit tests for configuration parsing, defaults, and validation.

use sim_warden::config::{BackendKind, GlobalConfig};
use sim_warden::AppError;

fn base_toml() -> String {
    r#"
db_path = "/tmp/warden/registry.db"
log_root = "/tmp/warden/logs"
default_interpreter = "/usr/bin/python3"

[backend]
kind = "sqlite"
sqlite_path = "/tmp/warden/sim.db"

[launcher]
server_entry = "/opt/sim/server.py"
client_entry = "/opt/sim/client.py"
server_config = "/opt/sim/server.toml"
"#
    .to_owned()
}

#[test]
fn parses_minimal_config_with_defaults() {
    let config = GlobalConfig::from_toml_str(&base_toml()).expect("valid config");

    assert_eq!(config.backend.kind, BackendKind::Sqlite);
    // Timing tables are optional and fully defaulted.
    assert_eq!(config.termination.grace_period_seconds, 5);
    assert_eq!(config.termination.poll_interval_ms, 100);
    assert_eq!(config.watchdog.tick_interval_seconds, 10);
    assert_eq!(config.watchdog.heartbeat_stale_seconds, 120);
    assert!(config.watchdog.enabled);
    assert_eq!(config.launcher.warmup_seconds, 2);
    assert_eq!(config.launcher.health_retries, 10);
}

#[test]
fn sqlite_backend_requires_path() {
    let toml = base_toml().replace("sqlite_path = \"/tmp/warden/sim.db\"", "");
    let err = GlobalConfig::from_toml_str(&toml).expect_err("missing sqlite_path must fail");
    assert!(matches!(err, AppError::Config(_)), "got {err:?}");
}

#[test]
fn postgres_backend_requires_front_end_command() {
    let toml = base_toml().replace(
        "kind = \"sqlite\"\nsqlite_path = \"/tmp/warden/sim.db\"",
        "kind = \"postgres\"",
    );
    let err = GlobalConfig::from_toml_str(&toml).expect_err("missing app_server_command");
    assert!(matches!(err, AppError::Config(_)), "got {err:?}");
}

#[test]
fn postgres_backend_with_front_end_command_parses() {
    let toml = base_toml().replace(
        "kind = \"sqlite\"\nsqlite_path = \"/tmp/warden/sim.db\"",
        "kind = \"postgres\"\napp_server_command = [\"gunicorn\", \"sim_server.wsgi\"]",
    );
    let config = GlobalConfig::from_toml_str(&toml).expect("valid config");
    assert_eq!(config.backend.kind, BackendKind::Postgres);
    assert_eq!(config.backend.app_server_command.len(), 2);
}

#[test]
fn zero_tick_interval_rejected() {
    let toml = format!("{}\n[watchdog]\ntick_interval_seconds = 0\n", base_toml());
    let err = GlobalConfig::from_toml_str(&toml).expect_err("zero tick must fail");
    assert!(matches!(err, AppError::Config(_)), "got {err:?}");
}

#[test]
fn zero_grace_period_rejected() {
    let toml = format!(
        "{}\n[termination]\ngrace_period_seconds = 0\n",
        base_toml()
    );
    let err = GlobalConfig::from_toml_str(&toml).expect_err("zero grace must fail");
    assert!(matches!(err, AppError::Config(_)), "got {err:?}");
}

#[test]
fn empty_interpreter_rejected() {
    let toml = base_toml().replace(
        "default_interpreter = \"/usr/bin/python3\"",
        "default_interpreter = \"  \"",
    );
    let err = GlobalConfig::from_toml_str(&toml).expect_err("blank interpreter must fail");
    assert!(matches!(err, AppError::Config(_)), "got {err:?}");
}

#[test]
fn worker_log_dir_is_scoped_by_worker_id() {
    let config = GlobalConfig::from_toml_str(&base_toml()).expect("valid config");
    let dir = config.worker_log_dir("server-exp1");
    assert!(dir.ends_with("server-exp1"));
    assert!(dir.starts_with(&config.log_root));
}
