// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::task::TaskSpec;

fn shell_def(command: &str, depends_on: &[&str]) -> TaskDef {
    TaskDef {
        spec: TaskSpec::Shell {
            command: command.into(),
            env: HashMap::new(),
            cwd: None,
        },
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        condition: None,
        priority: 0,
        constraints: None,
        retry: None,
    }
}

#[test]
fn definition_preserves_insertion_order() {
    let mut tasks = IndexMap::new();
    tasks.insert("c".to_string(), shell_def("echo c", &[]));
    tasks.insert("a".to_string(), shell_def("echo a", &["c"]));
    tasks.insert("b".to_string(), shell_def("echo b", &["a"]));

    let def = WorkflowDef { name: "ordered".into(), tasks, context: HashMap::new() };
    let keys: Vec<&String> = def.tasks.keys().collect();
    assert_eq!(keys, ["c", "a", "b"]);

    // Order survives a serde round trip
    let json = serde_json::to_string(&def).unwrap();
    let back: WorkflowDef = serde_json::from_str(&json).unwrap();
    let keys: Vec<&String> = back.tasks.keys().collect();
    assert_eq!(keys, ["c", "a", "b"]);
}

#[test]
fn workflow_state_terminality() {
    assert!(!WorkflowState::Running.is_terminal());
    assert!(WorkflowState::Completed.is_terminal());
    assert!(WorkflowState::Failed.is_terminal());
}

#[test]
fn edge_serde_skips_empty_condition() {
    let edge = DependencyEdge {
        workflow_id: WorkflowId::from_string("wkf-1"),
        task_key: "b".into(),
        depends_on_key: "a".into(),
        condition: None,
    };
    let json = serde_json::to_value(&edge).unwrap();
    assert!(json.get("condition").is_none());
}
