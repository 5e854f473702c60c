use std::time::Duration;

use chrono::Utc;

use steward::config::HeartbeatConfig;
use steward::models::mission::Mission;
use steward::orchestrator::actions::{gate, GateDecision};
use steward::orchestrator::heartbeat::{next_interval, ResponsePacket};

fn mission_due_in(hours: i64, ttc_seconds: Option<i64>) -> Mission {
    let mut mission = Mission::new(
        "20260101-000000".into(),
        "Ship".into(),
        String::new(),
        "release".into(),
        Utc::now() + chrono::Duration::hours(hours),
    );
    mission.estimated_ttc_seconds = ttc_seconds;
    mission
}

#[test]
fn no_mission_uses_long_interval() {
    let config = HeartbeatConfig::default();
    assert_eq!(next_interval(None, Utc::now(), &config), Duration::from_secs(600));
}

#[test]
fn deadline_within_six_hours_is_short() {
    let config = HeartbeatConfig::default();
    let mission = mission_due_in(3, Some(3600));
    assert_eq!(
        next_interval(Some(&mission), Utc::now(), &config),
        Duration::from_secs(60)
    );
}

#[test]
fn estimate_beyond_deadline_is_short() {
    let config = HeartbeatConfig::default();
    let mission = mission_due_in(48, Some(72 * 3600));
    assert_eq!(
        next_interval(Some(&mission), Utc::now(), &config),
        Duration::from_secs(60)
    );
}

#[test]
fn deadline_within_a_day_is_medium() {
    let config = HeartbeatConfig::default();
    let mission = mission_due_in(12, None);
    assert_eq!(
        next_interval(Some(&mission), Utc::now(), &config),
        Duration::from_secs(300)
    );
}

#[test]
fn distant_deadline_is_long() {
    let config = HeartbeatConfig::default();
    let mission = mission_due_in(72, Some(3600));
    assert_eq!(
        next_interval(Some(&mission), Utc::now(), &config),
        Duration::from_secs(600)
    );
}

#[test]
fn gate_executes_at_threshold() {
    assert_eq!(gate(0.6, 0.6, 0.0, 0.8), GateDecision::Execute);
    assert_eq!(gate(0.95, 0.9, 0.0, 0.8), GateDecision::Execute);
}

#[test]
fn gate_explores_only_above_set_point() {
    assert_eq!(gate(0.3, 0.6, 0.85, 0.8), GateDecision::Explore);
    assert_eq!(gate(0.3, 0.6, 0.8, 0.8), GateDecision::Reject);
    assert_eq!(gate(0.3, 0.6, 0.7, 0.8), GateDecision::Reject);
}

#[test]
fn response_packet_tolerates_missing_fields() {
    let packet: ResponsePacket =
        serde_json::from_str(r#"{"casual_message": "on it"}"#).expect("parse");
    assert_eq!(packet.casual_message.as_deref(), Some("on it"));
    assert!(packet.actions.is_empty());
    assert!(!packet.finalize);
}
