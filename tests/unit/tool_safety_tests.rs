use steward::tools::builtin::is_blacklisted;
use steward::tools::path_safety::resolve_in_workspace;
use steward::AppError;

#[test]
fn relative_path_resolves_inside_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join("notes.md"), "hi").expect("write");

    let resolved = resolve_in_workspace(temp.path(), "notes.md").expect("resolve");
    assert_eq!(
        resolved,
        temp.path().canonicalize().expect("canonical").join("notes.md")
    );
}

#[test]
fn new_file_inside_root_is_allowed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let resolved = resolve_in_workspace(temp.path(), "sub/dir/../new.txt").expect("resolve");
    assert!(resolved.ends_with("sub/new.txt"));
}

#[test]
fn parent_escape_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let result = resolve_in_workspace(temp.path(), "../outside.txt");
    assert!(matches!(result, Err(AppError::PathViolation(_))));
}

#[test]
fn absolute_path_outside_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let result = resolve_in_workspace(temp.path(), "/etc/passwd");
    assert!(matches!(result, Err(AppError::PathViolation(_))));
}

#[cfg(unix)]
#[test]
fn symlink_escape_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let outside = tempfile::tempdir().expect("outside");
    std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).expect("symlink");

    let result = resolve_in_workspace(temp.path(), "link");
    assert!(matches!(result, Err(AppError::PathViolation(_))));
}

#[test]
fn destructive_shell_commands_are_blacklisted() {
    assert!(is_blacklisted("rm -rf /"));
    assert!(is_blacklisted("sudo REBOOT now"));
    assert!(is_blacklisted("echo x > /dev/sda"));
    assert!(!is_blacklisted("ls -la"));
    assert!(!is_blacklisted("git status"));
}
