//! Integration tests for the `SQLite` repositories.

use std::sync::Arc;

use chrono::{Duration, Utc};

use steward::models::grievance::Grievance;
use steward::persistence::db;
use steward::persistence::grievance_repo::GrievanceRepo;
use steward::persistence::history_repo::HistoryRepo;

#[tokio::test]
async fn platform_chat_maps_to_one_conversation() {
    let history = HistoryRepo::new(Arc::new(db::connect_memory().await.expect("db")));

    let first = history
        .get_or_create_conversation("telegram", "42")
        .await
        .expect("create");
    let again = history
        .get_or_create_conversation("telegram", "42")
        .await
        .expect("lookup");
    let other = history
        .get_or_create_conversation("discord", "42")
        .await
        .expect("create other");

    assert_eq!(first, again);
    assert_ne!(first, other);
    assert_eq!(history.list_conversations().await.expect("list").len(), 2);
}

#[tokio::test]
async fn recent_messages_returns_last_n_oldest_first() {
    let history = HistoryRepo::new(Arc::new(db::connect_memory().await.expect("db")));
    let id = history.create_conversation("chat").await.expect("create");

    for (role, content) in [
        ("user", "one"),
        ("assistant", "two"),
        ("user", "three"),
        ("assistant", "four"),
    ] {
        history.add_message(&id, role, content).await.expect("add");
    }

    let recent = history.recent_messages(&id, 3).await.expect("recent");
    let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["two", "three", "four"]);
}

#[tokio::test]
async fn invalid_role_is_rejected() {
    let history = HistoryRepo::new(Arc::new(db::connect_memory().await.expect("db")));
    let id = history.create_conversation("chat").await.expect("create");

    assert!(history.add_message(&id, "robot", "beep").await.is_err());
}

#[tokio::test]
async fn adding_a_message_bumps_conversation_order() {
    let history = HistoryRepo::new(Arc::new(db::connect_memory().await.expect("db")));
    let older = history.create_conversation("older").await.expect("create");
    let newer = history.create_conversation("newer").await.expect("create");

    history.add_message(&older, "user", "ping").await.expect("add");

    let listed = history.list_conversations().await.expect("list");
    assert_eq!(listed[0].id, older);
    assert_eq!(listed[1].id, newer);
}

#[tokio::test]
async fn grievances_round_trip_embedding_and_purge() {
    let repo = GrievanceRepo::new(Arc::new(db::connect_memory().await.expect("db")));

    let mut old = Grievance::new("shell", "command refused", None);
    old.created_at = Utc::now() - Duration::days(40);
    repo.record(&old).await.expect("record old");
    let fresh = Grievance::new("preflight", "tests failed", Some(vec![0.5, -1.0]));
    repo.record(&fresh).await.expect("record fresh");

    let recent = repo.recent(10).await.expect("recent");
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].id, fresh.id);
    assert_eq!(recent[0].embedding, Some(vec![0.5, -1.0]));
    assert!(recent[1].embedding.is_none());

    let purged = repo
        .purge(Utc::now() - Duration::days(30))
        .await
        .expect("purge");
    assert_eq!(purged, 1);
    assert_eq!(repo.recent(10).await.expect("recent").len(), 1);
}

#[tokio::test]
async fn file_database_persists_across_connections() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("history.db");

    let id = {
        let history = HistoryRepo::new(Arc::new(db::connect(&path).await.expect("connect")));
        let id = history
            .get_or_create_conversation("ipc", "ctl-1")
            .await
            .expect("create");
        history.add_message(&id, "user", "remember me").await.expect("add");
        id
    };

    let history = HistoryRepo::new(Arc::new(db::connect(&path).await.expect("reconnect")));
    assert_eq!(
        history
            .get_or_create_conversation("ipc", "ctl-1")
            .await
            .expect("lookup"),
        id
    );
    let messages = history.recent_messages(&id, 10).await.expect("recent");
    assert_eq!(messages[0].content, "remember me");
}
