use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Step type of a workflow node. Kinds the engine does not know about are
/// kept verbatim so the editor can round-trip them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    Start,
    Action,
    Unknown(String),
}

impl From<String> for NodeKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Start" | "start" | "StartNode" => Self::Start,
            "Action" | "action" | "ActionNode" => Self::Action,
            _ => Self::Unknown(s),
        }
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Start => "Start".to_string(),
            NodeKind::Action => "Action".to_string(),
            NodeKind::Unknown(s) => s,
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => f.write_str("Start"),
            Self::Action => f.write_str("Action"),
            Self::Unknown(s) => f.write_str(s),
        }
    }
}

/// A node in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Editor-owned descriptor. Only Start and Action nodes are interpreted.
    #[serde(default)]
    pub properties: Value,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            properties: Value::Object(Default::default()),
        }
    }

    pub fn start(id: impl Into<String>, url: impl Into<String>) -> Self {
        let url: String = url.into();
        Self::new(id, NodeKind::Start).with_properties(serde_json::json!({ "url": url }))
    }

    pub fn action(
        id: impl Into<String>,
        operation: &str,
        selector: &str,
        value: Option<&str>,
    ) -> Self {
        let mut props = serde_json::json!({
            "operationType": operation,
            "selector": selector,
        });
        if let Some(v) = value {
            props["value"] = Value::String(v.to_string());
        }
        Self::new(id, NodeKind::Action).with_properties(props)
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    /// Navigation target of a Start node, if one is set.
    pub fn start_url(&self) -> Option<&str> {
        if self.kind != NodeKind::Start {
            return None;
        }
        ["url", "targetUrl"]
            .iter()
            .filter_map(|k| self.properties.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    /// Interpret the properties of an Action node.
    pub fn action_spec(&self) -> Option<ActionSpec> {
        (self.kind == NodeKind::Action).then(|| ActionSpec::from_properties(&self.properties))
    }
}

/// Supported browser operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationType {
    Click,
    Input,
    Extract,
    Unknown(String),
}

impl OperationType {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "click" => Self::Click,
            "input" => Self::Input,
            "extract" => Self::Extract,
            _ => Self::Unknown(s.to_string()),
        }
    }
}

/// Operation descriptor pulled out of an Action node's properties.
///
/// Two layouts are accepted: the flat form
/// `{operationType, selector, value}` and the editor's nested form
/// `{operationUnit: {action: {type, parameters}, observation: {target: {primary: {value}}}}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSpec {
    pub operation: Option<String>,
    pub selector: Option<String>,
    pub value: Option<String>,
}

/// What the engine should do with one Action node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionPlan {
    Click { selector: String },
    Input { selector: String, value: String },
    Extract { selector: String },
    /// A required field is missing; names the field.
    Incomplete(&'static str),
    Unsupported(String),
}

impl ActionSpec {
    pub fn from_properties(props: &Value) -> Self {
        let unit = props.get("operationUnit");
        let operation = str_at(props, &["operationType"])
            .or_else(|| unit.and_then(|u| str_at(u, &["action", "type"])));
        let selector = str_at(props, &["selector"]).or_else(|| {
            unit.and_then(|u| str_at(u, &["observation", "target", "primary", "value"]))
        });
        let value = str_at(props, &["value"]).or_else(|| {
            unit.and_then(|u| {
                str_at(u, &["action", "parameters", "text"])
                    .or_else(|| str_at(u, &["action", "parameters", "value"]))
            })
        });
        Self {
            operation,
            selector,
            value,
        }
    }

    pub fn plan(&self) -> ActionPlan {
        let Some(op) = self.operation.as_deref() else {
            return ActionPlan::Incomplete("operationType");
        };
        let Some(selector) = self.selector.clone() else {
            return ActionPlan::Incomplete("selector");
        };
        match OperationType::parse(op) {
            OperationType::Click => ActionPlan::Click { selector },
            OperationType::Input => ActionPlan::Input {
                selector,
                value: self.value.clone().unwrap_or_default(),
            },
            OperationType::Extract => ActionPlan::Extract { selector },
            OperationType::Unknown(other) => ActionPlan::Unsupported(other),
        }
    }
}

/// Non-empty string at a nested path.
fn str_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut cur = value;
    for key in path {
        cur = cur.get(*key)?;
    }
    let s = cur.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}
