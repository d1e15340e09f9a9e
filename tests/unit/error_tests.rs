//! Unit tests for error display formatting.

use sim_warden::AppError;

#[test]
fn display_includes_variant_prefix() {
    let cases: Vec<(AppError, &str)> = vec![
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Db("locked".into()), "db: locked"),
        (
            AppError::EnvironmentResolution("no python".into()),
            "environment resolution: no python",
        ),
        (AppError::Spawn("missing entry".into()), "spawn: missing entry"),
        (AppError::Handshake("refused".into()), "handshake: refused"),
        (AppError::NotFound("worker".into()), "not found: worker"),
        (AppError::Io("eof".into()), "io: eof"),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn termination_timeout_names_the_pid() {
    let err = AppError::TerminationTimeout(4242);
    let text = err.to_string();
    assert!(text.contains("4242"), "got: {text}");
    assert!(text.contains("termination timeout"), "got: {text}");
}
