use steward::AppError;

#[test]
fn transport_and_timeout_count_as_transport() {
    assert!(AppError::Transport("refused".into()).is_transport());
    assert!(AppError::Timeout("slow".into()).is_transport());
}

#[test]
fn other_errors_are_not_transport() {
    assert!(!AppError::Backend("bad prompt".into()).is_transport());
    assert!(!AppError::Protocol("id mismatch".into()).is_transport());
    assert!(!AppError::QueueFull("normal".into()).is_transport());
}

#[test]
fn display_prefixes_category() {
    assert_eq!(
        AppError::InvalidTransition("completed -> running".into()).to_string(),
        "invalid transition: completed -> running"
    );
    assert_eq!(
        AppError::PathViolation("../etc".into()).to_string(),
        "path violation: ../etc"
    );
}

#[test]
fn io_error_converts() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("gone")));
}

#[test]
fn toml_error_converts_to_config() {
    let parse: Result<toml::Value, _> = toml::from_str("= broken");
    let err: AppError = parse.expect_err("invalid toml").into();
    assert!(matches!(err, AppError::Config(_)));
}
