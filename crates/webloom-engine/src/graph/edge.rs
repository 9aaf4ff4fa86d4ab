use serde::{Deserialize, Serialize};

/// A directed dependency between two nodes: `from` runs before `to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    #[serde(rename = "fromNode", alias = "from")]
    pub from: String,
    #[serde(rename = "toNode", alias = "to")]
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_editor_field_names() {
        let e: Edge = serde_json::from_str(r#"{"fromNode":"a","toNode":"b"}"#).unwrap();
        assert_eq!(e, Edge::new("a", "b"));

        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["fromNode"], "a");
        assert_eq!(json["toNode"], "b");
    }

    #[test]
    fn test_short_aliases_accepted() {
        let e: Edge = serde_json::from_str(r#"{"from":"x","to":"x"}"#).unwrap();
        assert!(e.is_self_loop());
    }
}
