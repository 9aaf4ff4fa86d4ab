//! Editor-shaped workflow JSON.

use serde_json::{json, Value};

/// `Start(url) -> click #btn -> extract .result`
pub fn chain_workflow(url: &str) -> Value {
    json!({
        "nodes": [
            {"id": "start", "type": "Start", "properties": {"url": url}},
            {"id": "click", "type": "Action", "properties": {"operationType": "click", "selector": "#btn"}},
            {"id": "read", "type": "Action", "properties": {"operationType": "extract", "selector": ".result"}}
        ],
        "connections": [
            {"fromNode": "start", "toNode": "click"},
            {"fromNode": "click", "toNode": "read"}
        ]
    })
}

/// Same chain using the editor's nested `operationUnit` layout.
pub fn operation_unit_workflow(url: &str) -> Value {
    json!({
        "nodes": [
            {"id": "start", "type": "Start", "properties": {"url": url}},
            {"id": "type", "type": "Action", "properties": {
                "operationUnit": {
                    "observation": {"target": {"primary": {"type": "css", "value": "#q"}}},
                    "action": {"type": "input", "parameters": {"text": "webloom"}}
                }
            }}
        ],
        "connections": [{"fromNode": "start", "toNode": "type"}]
    })
}

pub fn cyclic_workflow() -> Value {
    json!({
        "nodes": [
            {"id": "a", "type": "Action", "properties": {}},
            {"id": "b", "type": "Action", "properties": {}}
        ],
        "connections": [
            {"fromNode": "a", "toNode": "b"},
            {"fromNode": "b", "toNode": "a"}
        ]
    })
}

pub fn dangling_edge_workflow() -> Value {
    json!({
        "nodes": [{"id": "a", "type": "Start", "properties": {}}],
        "connections": [{"fromNode": "a", "toNode": "missing"}]
    })
}
