//! Unit tests for permission descriptors and the agent kind table.

use std::time::Duration;

use qbit_gateway::models::agent::AgentKind;
use qbit_gateway::models::permission::{Action, PermissionDescriptor};
use qbit_gateway::models::task::Task;
use serde_json::json;

#[test]
fn every_kind_round_trips_through_its_wire_name() {
    for kind in AgentKind::ALL {
        assert_eq!(kind.as_str().parse::<AgentKind>().unwrap(), kind);
        assert_eq!(
            serde_json::to_value(kind).unwrap(),
            json!(kind.as_str())
        );
    }
}

#[test]
fn unknown_kind_is_not_found() {
    let err = "nonexistent_agent".parse::<AgentKind>().unwrap_err();
    assert_eq!(err.to_string(), "not found: agent type nonexistent_agent");
}

#[test]
fn message_type_table_has_no_fallback() {
    assert_eq!(
        AgentKind::for_message_type("claim_query"),
        Some(AgentKind::ClaimsProcessor)
    );
    assert_eq!(
        AgentKind::for_message_type("chat"),
        Some(AgentKind::GeneralAssistant)
    );
    assert_eq!(
        AgentKind::for_message_type("pattern_analysis"),
        Some(AgentKind::LeidenAnalyzer)
    );
    assert_eq!(AgentKind::for_message_type("tax_question"), None);
}

#[test]
fn has_permission_checks_the_right_set() {
    let perms = PermissionDescriptor::for_kind(AgentKind::MedicalReviewer);
    assert!(perms.has_permission(Action::Read, "medical_records"));
    assert!(!perms.has_permission(Action::Write, "medical_records"));
    assert!(perms.has_permission(Action::Write, "medical_opinions"));
    assert!(perms.has_permission(Action::Execute, "diagnosis_validator"));
    assert!(!perms.has_permission(Action::Execute, "rating_calculator"));
}

#[test]
fn task_inside_scope_is_allowed() {
    let perms = PermissionDescriptor::for_kind(AgentKind::ClaimsProcessor);
    let task = Task::new(["claims", "medical"], json!({}));
    assert_eq!(perms.first_denied_category(&task), None);
}

#[test]
fn first_out_of_scope_category_is_reported() {
    let perms = PermissionDescriptor::for_kind(AgentKind::GeneralAssistant);
    let task = Task::new(["public", "claims", "medical"], json!({}));
    assert_eq!(perms.first_denied_category(&task), Some("claims"));
}

#[test]
fn task_without_categories_is_allowed_everywhere() {
    let task = Task::new(Vec::<String>::new(), json!({"q": "hi"}));
    for kind in AgentKind::ALL {
        assert_eq!(
            PermissionDescriptor::for_kind(kind).first_denied_category(&task),
            None
        );
    }
}

#[test]
fn builders_override_limits() {
    let perms = PermissionDescriptor::new(&["a"], &[], &[], &["a"])
        .with_timeout(Duration::from_millis(30))
        .with_max_iterations(2);
    assert_eq!(perms.timeout(), Duration::from_millis(30));
    assert_eq!(perms.max_iterations(), 2);
    assert!(perms.data_access_scope().contains("a"));
}

#[test]
fn defaults_are_ten_iterations_and_thirty_seconds() {
    let perms = PermissionDescriptor::for_kind(AgentKind::DocumentAnalyzer);
    assert_eq!(perms.max_iterations(), 10);
    assert_eq!(perms.timeout(), Duration::from_secs(30));
}
