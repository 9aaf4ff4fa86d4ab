use std::collections::HashSet;

use webloom_core::ValidationError;

use super::Graph;

/// Structural check run once before scheduling. Never looks at node
/// properties.
pub fn validate(graph: &Graph) -> Result<(), ValidationError> {
    let mut ids: HashSet<&str> = HashSet::with_capacity(graph.nodes.len());
    for node in &graph.nodes {
        if !ids.insert(node.id.as_str()) {
            return Err(ValidationError::DuplicateNodeId(node.id.clone()));
        }
    }

    let mut seen: HashSet<(&str, &str)> = HashSet::with_capacity(graph.edges.len());
    for edge in &graph.edges {
        for endpoint in [&edge.from, &edge.to] {
            if !ids.contains(endpoint.as_str()) {
                return Err(ValidationError::UnknownEndpoint {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
        if !seen.insert((edge.from.as_str(), edge.to.as_str())) {
            return Err(ValidationError::DuplicateEdge {
                from: edge.from.clone(),
                to: edge.to.clone(),
            });
        }
    }

    Ok(())
}
