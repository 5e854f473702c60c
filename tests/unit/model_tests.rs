use chrono::{Duration, Utc};

use steward::models::message::{Priority, QueuedMessage};
use steward::models::mission::{parse_duration, Mission, MissionStatus, SubTaskStatus};
use steward::models::schedule::ScheduledEntry;
use steward::models::task::{Task, TaskStatus};

fn task_in(status: TaskStatus) -> Task {
    let mut task = Task::new("task-1".into(), "do it".into());
    task.status = status;
    task
}

#[test]
fn new_task_is_pending() {
    let task = Task::new("task-1".into(), "summarize".into());
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.result.is_none());
    assert!(task.ended_at.is_none());
}

#[test]
fn task_status_only_moves_forward() {
    assert!(task_in(TaskStatus::Pending).can_transition_to(TaskStatus::Running));
    assert!(task_in(TaskStatus::Running).can_transition_to(TaskStatus::Completed));
    assert!(task_in(TaskStatus::Running).can_transition_to(TaskStatus::Failed));

    assert!(!task_in(TaskStatus::Pending).can_transition_to(TaskStatus::Completed));
    assert!(!task_in(TaskStatus::Running).can_transition_to(TaskStatus::Pending));
    assert!(!task_in(TaskStatus::Completed).can_transition_to(TaskStatus::Running));
    assert!(!task_in(TaskStatus::Failed).can_transition_to(TaskStatus::Completed));
    assert!(!task_in(TaskStatus::Completed).can_transition_to(TaskStatus::Completed));
}

#[test]
fn terminal_statuses() {
    assert!(TaskStatus::Completed.is_terminal());
    assert!(TaskStatus::Failed.is_terminal());
    assert!(!TaskStatus::Pending.is_terminal());
    assert!(!TaskStatus::Running.is_terminal());
}

#[test]
fn task_serializes_snake_case_status() {
    let json = serde_json::to_value(task_in(TaskStatus::Running)).expect("serialize");
    assert_eq!(json["status"], "running");
    assert!(json.get("result").is_none());
}

#[test]
fn reply_text_joins_logs() {
    let mut task = task_in(TaskStatus::Completed);
    task.logs = vec!["line one".into(), "line two".into()];
    assert_eq!(task.reply_text(), "line one\nline two");
}

#[test]
fn urgent_keywords_classify_high() {
    assert_eq!(Priority::classify("URGENT: server down"), Priority::High);
    assert_eq!(Priority::classify("this is critical"), Priority::High);
    assert_eq!(Priority::classify("what's the weather"), Priority::Normal);
}

#[test]
fn priority_ordering() {
    assert!(Priority::High > Priority::Normal);
    assert!(Priority::Normal > Priority::Low);
}

#[test]
fn queued_message_uses_classifier() {
    let msg = QueuedMessage::new("ipc", "ctl-1", "me", "urgent please");
    assert_eq!(msg.priority, Priority::High);

    let low = QueuedMessage::with_priority("ipc", "ctl-1", "me", "urgent please", Priority::Low);
    assert_eq!(low.priority, Priority::Low);
}

#[test]
fn parses_compound_durations() {
    assert_eq!(parse_duration("2h45m"), Some(Duration::minutes(165)));
    assert_eq!(parse_duration("1d"), Some(Duration::days(1)));
    assert_eq!(parse_duration("90"), Some(Duration::seconds(90)));
    assert_eq!(parse_duration("30s"), Some(Duration::seconds(30)));
}

#[test]
fn rejects_malformed_durations() {
    assert_eq!(parse_duration(""), None);
    assert_eq!(parse_duration("3w"), None);
    assert_eq!(parse_duration("12h5"), None);
    assert_eq!(parse_duration("h"), None);
}

#[test]
fn out_of_range_durations_are_rejected() {
    assert_eq!(parse_duration("9223372036854775807"), None);
    assert_eq!(parse_duration("9999999999999999d"), None);
    assert_eq!(parse_duration("99999999999999h99999999999999m"), None);

    let mut mission = Mission::new(
        "20260101-000000".into(),
        "Ship".into(),
        String::new(),
        "release v1".into(),
        Utc::now() + Duration::hours(3),
    );
    mission.estimated_ttc_seconds = Some(i64::MAX);
    assert_eq!(mission.estimated_ttc(), None);
}

#[test]
fn mission_time_remaining_and_close_readiness() {
    let now = Utc::now();
    let mut mission = Mission::new(
        "20260101-000000".into(),
        "Ship".into(),
        String::new(),
        "release v1".into(),
        now + Duration::hours(3),
    );
    assert_eq!(mission.status, MissionStatus::Active);
    assert_eq!(mission.time_remaining(now), Duration::hours(3));
    assert!(!mission.is_ready_to_close());

    mission.progress = 1.0;
    assert!(mission.is_ready_to_close());

    mission.estimated_ttc_seconds = Some(3600);
    assert_eq!(mission.estimated_ttc(), Some(Duration::hours(1)));
}

#[test]
fn sub_task_status_parses_loose_strings() {
    assert_eq!(SubTaskStatus::parse("In Progress"), Some(SubTaskStatus::InProgress));
    assert_eq!(SubTaskStatus::parse("done"), Some(SubTaskStatus::Completed));
    assert_eq!(SubTaskStatus::parse("todo"), Some(SubTaskStatus::Pending));
    assert_eq!(SubTaskStatus::parse("sideways"), None);
}

#[test]
fn scheduled_entry_due_after_interval() {
    let now = Utc::now();
    let mut entry = ScheduledEntry {
        id: "audit".into(),
        interval_seconds: 60,
        last_run: None,
    };
    assert!(entry.is_due(now));

    entry.last_run = Some(now - Duration::seconds(30));
    assert!(!entry.is_due(now));

    entry.last_run = Some(now - Duration::seconds(61));
    assert!(entry.is_due(now));
}
