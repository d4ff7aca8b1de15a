#![allow(clippy::unwrap_used, clippy::expect_used)]

use grantflow_core::*;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// 1. Display output names the failing entity
// ---------------------------------------------------------------------------

#[test]
fn dependency_unresolved_display() {
    let task = Uuid::new_v4();
    let err = GrantflowError::DependencyUnresolved {
        task: Some(task),
        dependency: "missing-id".to_string(),
        reason: UnresolvedReason::Unknown,
    };
    let text = err.to_string();
    assert!(text.contains("missing-id"));
    assert!(text.contains("unknown task"));
    assert!(text.contains(&task.to_string()));
    assert!(err.is_dependency_unresolved());
    assert!(!err.is_timeout());
}

#[test]
fn workflow_timed_out_display() {
    let err = GrantflowError::WorkflowTimedOut {
        workflow: "grant-discovery".to_string(),
        stage: "research".to_string(),
        pending: 2,
    };
    let text = err.to_string();
    assert!(text.contains("grant-discovery"));
    assert!(text.contains("research"));
    assert!(text.contains("2 unfinished"));
    assert!(err.is_timeout());
}

// ---------------------------------------------------------------------------
// 2. Conversions from std and serde errors
// ---------------------------------------------------------------------------

#[test]
fn io_and_json_conversions() {
    fn read() -> GrantflowResult<()> {
        Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?;
        Ok(())
    }
    assert!(matches!(read(), Err(GrantflowError::Io(_))));

    fn parse() -> GrantflowResult<serde_json::Value> {
        Ok(serde_json::from_str("{not json")?)
    }
    assert!(matches!(parse(), Err(GrantflowError::Json(_))));
}

#[test]
fn unresolved_reason_serializes_snake_case() {
    let json = serde_json::to_string(&UnresolvedReason::UndeclaredKey).unwrap();
    assert_eq!(json, "\"undeclared_key\"");
    let parsed: UnresolvedReason = serde_json::from_str("\"failed\"").unwrap();
    assert_eq!(parsed, UnresolvedReason::Failed);
}
