//! Unit tests for interpreter resolution and invocation classification.
//!
//! Tests that mutate `VIRTUAL_ENV` / `CONDA_PREFIX` run serially so they
//! cannot observe each other's process environment.

use std::env;
use std::fs;
use std::path::Path;

use serial_test::serial;
use tempfile::TempDir;

use sim_warden::config::GlobalConfig;
use sim_warden::orchestrator::environment::{classify, resolve, InvocationDescriptor};
use sim_warden::AppError;

fn test_config(interpreter: &str) -> GlobalConfig {
    let toml = format!(
        r#"
db_path = "/tmp/warden/registry.db"
log_root = "/tmp/warden/logs"
default_interpreter = "{interpreter}"

[backend]
kind = "sqlite"
sqlite_path = "/tmp/warden/sim.db"

[launcher]
server_entry = "/opt/sim/server.py"
client_entry = "/opt/sim/client.py"
server_config = "/opt/sim/server.toml"
"#
    );
    GlobalConfig::from_toml_str(&toml).expect("valid test config")
}

fn clear_markers() {
    env::remove_var("VIRTUAL_ENV");
    env::remove_var("CONDA_PREFIX");
}

/// Lay down a fake interpreter inside an environment prefix.
#[cfg(unix)]
fn fake_interpreter(prefix: &Path) {
    fs::create_dir_all(prefix.join("bin")).expect("create bin dir");
    fs::write(prefix.join("bin").join("python"), "#!/bin/sh\n").expect("write python");
}

#[cfg(windows)]
fn fake_interpreter(prefix: &Path) {
    fs::create_dir_all(prefix.join("Scripts")).expect("create Scripts dir");
    fs::write(prefix.join("Scripts").join("python.exe"), "").expect("write python");
    fs::write(prefix.join("python.exe"), "").expect("write python");
}

#[test]
#[cfg(unix)]
fn absolute_path_is_a_single_token() {
    let descriptor = classify("/usr/bin/python3").expect("classify");
    assert_eq!(
        descriptor,
        InvocationDescriptor::Absolute("/usr/bin/python3".into())
    );
    assert_eq!(descriptor.tokens(), vec!["/usr/bin/python3".to_owned()]);
}

#[test]
#[cfg(windows)]
fn absolute_path_with_spaces_is_a_single_token() {
    // An absolute path containing whitespace must never be split.
    let descriptor = classify(r"C:\Users\A B\python.exe").expect("classify");
    assert_eq!(
        descriptor,
        InvocationDescriptor::Absolute(r"C:\Users\A B\python.exe".into())
    );
    assert_eq!(descriptor.tokens().len(), 1);
}

#[test]
fn launch_command_splits_on_whitespace() {
    let descriptor = classify("envtool run python").expect("classify");
    assert_eq!(
        descriptor,
        InvocationDescriptor::Command(vec![
            "envtool".to_owned(),
            "run".to_owned(),
            "python".to_owned()
        ])
    );
    assert_eq!(descriptor.program(), "envtool");
    assert_eq!(descriptor.leading_args(), vec!["run", "python"]);
}

#[test]
fn empty_interpreter_string_is_rejected() {
    let err = classify("   ").expect_err("blank must fail");
    assert!(matches!(err, AppError::EnvironmentResolution(_)), "got {err:?}");
}

#[test]
#[serial]
fn falls_back_to_configured_command_without_markers() {
    clear_markers();
    let config = test_config("envtool run python");
    let descriptor = resolve(&config).expect("resolve");
    assert_eq!(descriptor.tokens().len(), 3);
}

#[test]
#[serial]
fn missing_fallback_interpreter_fails_resolution() {
    clear_markers();
    let config = test_config("/nonexistent/interp/python3");
    let err = resolve(&config).expect_err("missing interpreter must fail");
    assert!(matches!(err, AppError::EnvironmentResolution(_)), "got {err:?}");
}

#[test]
#[serial]
fn virtualenv_marker_wins_when_interpreter_exists() {
    clear_markers();
    let prefix = TempDir::new().expect("tempdir");
    fake_interpreter(prefix.path());
    env::set_var("VIRTUAL_ENV", prefix.path());

    let config = test_config("envtool run python");
    let descriptor = resolve(&config).expect("resolve");

    match descriptor {
        InvocationDescriptor::Absolute(path) => {
            assert!(path.starts_with(prefix.path()), "got {}", path.display());
        }
        other => panic!("expected absolute interpreter, got {other:?}"),
    }

    clear_markers();
}

#[test]
#[serial]
fn virtualenv_takes_priority_over_conda() {
    clear_markers();
    let venv = TempDir::new().expect("tempdir");
    let conda = TempDir::new().expect("tempdir");
    fake_interpreter(venv.path());
    fake_interpreter(conda.path());
    env::set_var("VIRTUAL_ENV", venv.path());
    env::set_var("CONDA_PREFIX", conda.path());

    let config = test_config("envtool run python");
    let descriptor = resolve(&config).expect("resolve");

    match descriptor {
        InvocationDescriptor::Absolute(path) => {
            assert!(path.starts_with(venv.path()), "got {}", path.display());
        }
        other => panic!("expected virtualenv interpreter, got {other:?}"),
    }

    clear_markers();
}

#[test]
#[serial]
fn conda_marker_detected_when_no_virtualenv() {
    clear_markers();
    let conda = TempDir::new().expect("tempdir");
    fake_interpreter(conda.path());
    env::set_var("CONDA_PREFIX", conda.path());

    let config = test_config("envtool run python");
    let descriptor = resolve(&config).expect("resolve");

    match descriptor {
        InvocationDescriptor::Absolute(path) => {
            assert!(path.starts_with(conda.path()), "got {}", path.display());
        }
        other => panic!("expected conda interpreter, got {other:?}"),
    }

    clear_markers();
}

#[test]
#[serial]
fn stale_marker_without_interpreter_falls_through() {
    clear_markers();
    let prefix = TempDir::new().expect("tempdir");
    // Marker set, but no interpreter inside the prefix.
    env::set_var("VIRTUAL_ENV", prefix.path());

    let config = test_config("envtool run python");
    let descriptor = resolve(&config).expect("resolve");
    assert_eq!(descriptor.program(), "envtool");

    clear_markers();
}
