//! Shared fixtures for the engine integration tests
#![allow(dead_code)]

use cascade_bpmn::document::decode_json;
use cascade_bpmn::domain::repository::memory::MemoryCollaborators;
use cascade_bpmn::telemetry::init_test_tracing;
use cascade_bpmn::{
    BpmnEngine, ElementInstance, ElementInstanceKey, ElementInstanceTree, EngineConfig,
    ProcessDefinition, VariableStore,
};
use serde_json::{json, Value};

pub const PROCESS_ID: &str = "order_process";
pub const BODY_ID: &str = "ship_items";

/// A process whose only element is a multi-instance service task
pub fn body_process(loop_characteristics: Value, boundary_events: Value) -> ProcessDefinition {
    serde_json::from_value(json!({
        "id": PROCESS_ID,
        "name": "Order processing",
        "start_element": BODY_ID,
        "elements": [{
            "type": "multi_instance",
            "id": BODY_ID,
            "inner_activity": {"type": "service_task", "id": BODY_ID, "task_type": "shipping"},
            "loop_characteristics": loop_characteristics,
            "boundary_events": boundary_events
        }]
    }))
    .unwrap()
}

/// Loop characteristics mapping `items` to `results` through `item` and `result`
pub fn collecting(is_sequential: bool) -> Value {
    json!({
        "is_sequential": is_sequential,
        "input_collection": "items",
        "input_element": "item",
        "output_collection": "results",
        "output_element": "result"
    })
}

/// An engine with the given process deployed
pub fn engine_with(
    definition: ProcessDefinition,
    config: EngineConfig,
) -> (BpmnEngine, MemoryCollaborators) {
    init_test_tracing();
    let (engine, memory) = BpmnEngine::in_memory_recording(config);
    engine.deploy(definition).unwrap();
    (engine, memory)
}

/// Start a process instance and run it until it waits
pub async fn start(engine: &BpmnEngine, variables: Value) -> ElementInstanceKey {
    let key = engine
        .create_process_instance(PROCESS_ID, variables)
        .await
        .unwrap();
    engine.run_until_idle().await.unwrap();
    key
}

/// The multi-instance body below a process instance
pub async fn body_of(memory: &MemoryCollaborators, process_key: ElementInstanceKey) -> ElementInstance {
    let mut children = memory.tree.children(process_key).await.unwrap();
    assert_eq!(children.len(), 1, "expected a single body instance");
    children.remove(0)
}

/// Live inner instances of a body, ordered by key
pub async fn iterations_of(
    memory: &MemoryCollaborators,
    body_key: ElementInstanceKey,
) -> Vec<ElementInstance> {
    memory.tree.children(body_key).await.unwrap()
}

/// Local value of a variable, decoded as JSON
pub async fn local_json(
    memory: &MemoryCollaborators,
    scope_key: ElementInstanceKey,
    name: &str,
) -> Option<Value> {
    memory
        .variables
        .get_local(scope_key, name)
        .await
        .unwrap()
        .map(|bytes| decode_json(&bytes).unwrap())
}

/// Last value written to a variable, decoded as JSON, even after the scope is gone
pub async fn written_json(
    memory: &MemoryCollaborators,
    scope_key: ElementInstanceKey,
    name: &str,
) -> Option<Value> {
    memory
        .variables
        .last_written(scope_key, name)
        .await
        .map(|bytes| decode_json(&bytes).unwrap())
}

/// Complete an iteration and run the engine until it waits again
pub async fn complete(engine: &BpmnEngine, key: ElementInstanceKey, variables: Value) {
    engine.complete_activity(key, variables).await.unwrap();
    engine.run_until_idle().await.unwrap();
}
