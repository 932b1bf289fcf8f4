//! Unit tests for error display and conversions.

use agent_conductor::AppError;

#[test]
fn display_prefixes_category() {
    assert_eq!(AppError::Config("bad".into()).to_string(), "config: bad");
    assert_eq!(AppError::Spawn("no pty".into()).to_string(), "spawn: no pty");
    assert_eq!(AppError::NotFound("session x".into()).to_string(), "not found: session x");
    assert_eq!(AppError::Timeout("late".into()).to_string(), "timeout: late");
    assert_eq!(AppError::Loop("halted".into()).to_string(), "loop: halted");
}

#[test]
fn json_errors_become_store_errors() {
    let err: AppError = serde_json::from_str::<u32>("not json")
        .expect_err("invalid")
        .into();
    assert!(matches!(err, AppError::Store(_)));
}

#[test]
fn io_errors_become_io_errors() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(err, AppError::Io(ref msg) if msg == "gone"));
}

#[test]
fn toml_errors_become_config_errors() {
    let err: AppError = toml::from_str::<toml::Value>("= nope")
        .expect_err("invalid")
        .into();
    assert!(matches!(err, AppError::Config(_)));
}
