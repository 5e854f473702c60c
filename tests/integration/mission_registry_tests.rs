//! Integration tests for the mission registry.

use chrono::{Duration, Utc};
use serde_json::json;

use steward::models::mission::{MissionStatus, SubTaskStatus};
use steward::orchestrator::missions::{parse_deadline, strip_code_fence, MissionRegistry, NewSubTask};
use steward::AppError;

use super::test_helpers::{Behavior, FakeReasoner};

fn registry(dir: &std::path::Path) -> MissionRegistry {
    MissionRegistry::load(dir.join("missions.json")).expect("load")
}

#[tokio::test]
async fn create_persists_and_reloads() {
    let temp = tempfile::tempdir().expect("tempdir");
    let deadline = Utc::now() + Duration::days(3);

    let created = registry(temp.path())
        .create("Ship", "cut the release", "v1 tagged", deadline)
        .await
        .expect("create");
    assert_eq!(created.status, MissionStatus::Active);
    assert_eq!(created.id.len(), "YYYYMMDD-HHMMSS".len());

    let reloaded = registry(temp.path());
    assert_eq!(reloaded.get(&created.id).await, Some(created));
}

#[tokio::test]
async fn ids_stay_unique_within_one_second() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missions = registry(temp.path());
    let deadline = Utc::now() + Duration::days(1);

    let a = missions.create("A", "", "a", deadline).await.expect("a");
    let b = missions.create("B", "", "b", deadline).await.expect("b");
    assert_ne!(a.id, b.id);
    assert_eq!(missions.list().await.len(), 2);
}

#[tokio::test]
async fn active_mission_is_earliest_deadline() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missions = registry(temp.path());

    missions
        .create("Later", "", "x", Utc::now() + Duration::days(5))
        .await
        .expect("later");
    let sooner = missions
        .create("Sooner", "", "y", Utc::now() + Duration::days(1))
        .await
        .expect("sooner");

    assert_eq!(missions.active_mission().await.map(|m| m.id), Some(sooner.id.clone()));

    missions.complete(&sooner.id).await.expect("complete");
    assert_eq!(
        missions.active_mission().await.map(|m| m.title),
        Some("Later".to_owned())
    );
}

#[tokio::test]
async fn progress_is_clamped_and_requires_active() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missions = registry(temp.path());
    let mission = missions
        .create("Ship", "", "x", Utc::now() + Duration::days(1))
        .await
        .expect("create");

    let updated = missions
        .update_progress(&mission.id, 1.7, Some(Duration::hours(2)))
        .await
        .expect("progress");
    assert!((updated.progress - 1.0).abs() < f64::EPSILON);
    assert_eq!(updated.estimated_ttc_seconds, Some(7200));

    missions
        .set_status(&mission.id, MissionStatus::Abandoned)
        .await
        .expect("abandon");
    let result = missions.update_progress(&mission.id, 0.5, None).await;
    assert!(matches!(result, Err(AppError::InvalidTransition(_))));

    let completed = missions.complete(&mission.id).await;
    assert!(matches!(completed, Err(AppError::InvalidTransition(_))));
}

#[tokio::test]
async fn time_remaining_for_unknown_mission() {
    let temp = tempfile::tempdir().expect("tempdir");
    let result = registry(temp.path())
        .time_remaining("19990101-000000", Utc::now())
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn sub_tasks_get_sequential_ids_and_updates() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missions = registry(temp.path());
    let mission = missions
        .create("Ship", "", "x", Utc::now() + Duration::days(1))
        .await
        .expect("create");

    let added = missions
        .add_sub_tasks(
            &mission.id,
            vec![
                NewSubTask {
                    title: "Changelog".into(),
                    ..NewSubTask::default()
                },
                NewSubTask {
                    title: "Tag".into(),
                    dependencies: vec!["st-1".into()],
                    ..NewSubTask::default()
                },
            ],
        )
        .await
        .expect("add");
    assert_eq!(added.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), vec!["st-1", "st-2"]);

    let done = missions
        .update_sub_task(&mission.id, "st-1", SubTaskStatus::Completed, Some("written".into()))
        .await
        .expect("update");
    assert_eq!(done.status, SubTaskStatus::Completed);
    assert_eq!(done.result.as_deref(), Some("written"));

    let missing = missions
        .update_sub_task(&mission.id, "st-9", SubTaskStatus::Completed, None)
        .await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn infers_mission_from_backend_reply() {
    let temp = tempfile::tempdir().expect("tempdir");
    let reasoner = FakeReasoner::new(Behavior::Reply(
        r#"Sure. {"title": "Learn Go", "goal": "Finish the tour", "deadline": "2d", "reason": "explicit goal"}"#
            .into(),
    ));

    let before = Utc::now();
    let suggestion = registry(temp.path())
        .infer_from_text(reasoner.as_ref(), "I want to learn Go in two days")
        .await
        .expect("infer");

    assert_eq!(suggestion.title, "Learn Go");
    assert_eq!(suggestion.goal, "Finish the tour");
    assert!(suggestion.deadline >= before + Duration::days(2));
    assert!(suggestion.deadline <= Utc::now() + Duration::days(2));
    assert_eq!(reasoner.calls()[0].0, "ask");
}

#[tokio::test]
async fn inference_without_json_is_protocol_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let reasoner = FakeReasoner::new(Behavior::Reply("I am not sure what you mean.".into()));

    let result = registry(temp.path())
        .infer_from_text(reasoner.as_ref(), "hmm")
        .await;
    assert!(matches!(result, Err(AppError::Protocol(_))));
}

#[test]
fn deadline_parsing_accepts_timestamps_durations_and_seconds() {
    let now = Utc::now();
    assert_eq!(
        parse_deadline(&json!("2030-01-01T00:00:00Z"), now).map(|d| d.to_rfc3339()),
        Some("2030-01-01T00:00:00+00:00".to_owned())
    );
    assert_eq!(parse_deadline(&json!("12h"), now), Some(now + Duration::hours(12)));
    assert_eq!(parse_deadline(&json!(60), now), Some(now + Duration::seconds(60)));
    assert_eq!(parse_deadline(&json!("someday"), now), None);
}

#[test]
fn deadline_offsets_past_the_calendar_are_rejected() {
    let now = Utc::now();
    assert_eq!(parse_deadline(&json!(1_000_000_000_000_000_i64), now), None);
    assert_eq!(parse_deadline(&json!(i64::MAX), now), None);
    assert_eq!(parse_deadline(&json!("9999999999999999d"), now), None);
    assert_eq!(parse_deadline(&json!("2562047788015215h"), now), None);
}

#[test]
fn code_fences_are_stripped() {
    assert_eq!(strip_code_fence("```bash\necho hi\n```"), "echo hi");
    assert_eq!(strip_code_fence("echo plain"), "echo plain");
}
