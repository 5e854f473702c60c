use steward::models::delegate::Delegate;
use steward::orchestrator::delegates::{parse_mention, DelegateRegistry};

#[test]
fn parses_mention_with_body() {
    assert_eq!(
        parse_mention("@coder fix the build"),
        Some(("coder", "fix the build"))
    );
    assert_eq!(
        parse_mention("  @web-scout_2 find docs\nand summarize  "),
        Some(("web-scout_2", "find docs\nand summarize"))
    );
}

#[test]
fn rejects_non_mentions() {
    assert_eq!(parse_mention("hello @coder"), None);
    assert_eq!(parse_mention("@coder"), None);
    assert_eq!(parse_mention("@ coder do it"), None);
}

#[test]
fn augment_prefixes_instructions() {
    let delegate = Delegate {
        id: "coder".into(),
        name: "Coder".into(),
        description: String::new(),
        instructions: "Write Rust.".into(),
        skills: vec![],
    };
    let content = delegate.augment("add tests");
    assert!(content.starts_with("DELEGATE AGENT: Coder"));
    assert!(content.contains("INSTRUCTIONS: Write Rust."));
    assert!(content.ends_with("USER TASK: add tests"));
}

#[tokio::test]
async fn loads_json_definitions_and_skips_bad_files() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        temp.path().join("coder.json"),
        r#"{"id": "coder", "name": "Coder", "instructions": "Write Rust."}"#,
    )
    .expect("write");
    std::fs::write(temp.path().join("broken.json"), "{").expect("write");
    std::fs::write(temp.path().join("notes.txt"), "ignored").expect("write");

    let registry = DelegateRegistry::load_dir(temp.path()).expect("load");

    let listed = registry.list().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(registry.get("coder").await.map(|d| d.name), Some("Coder".into()));
    assert!(registry.get("missing").await.is_none());
}

#[tokio::test]
async fn missing_directory_is_empty() {
    let temp = tempfile::tempdir().expect("tempdir");
    let registry = DelegateRegistry::load_dir(&temp.path().join("nope")).expect("load");
    assert!(registry.list().await.is_empty());
}
