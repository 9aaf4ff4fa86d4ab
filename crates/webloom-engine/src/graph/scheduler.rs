use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use webloom_core::WebloomError;

use super::{Graph, Node};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("cycle detected: only {scheduled} of {total} nodes could be ordered")]
    CycleDetected { scheduled: usize, total: usize },
}

impl From<ScheduleError> for WebloomError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::CycleDetected { scheduled, total } => {
                WebloomError::CycleDetected { scheduled, total }
            }
        }
    }
}

/// Linear run order for one workflow. Only produced for acyclic graphs, so
/// it always covers every node.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOrder {
    nodes: Vec<Node>,
}

impl ExecutionOrder {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    /// First Start node anywhere in the order that carries a URL.
    pub fn start_url(&self) -> Option<(&Node, &str)> {
        self.nodes
            .iter()
            .find_map(|n| n.start_url().map(|url| (n, url)))
    }
}

/// Kahn's algorithm.
///
/// Zero in-degree nodes are seeded in input order and successors are
/// visited in edge input order, so the same graph always yields the same
/// order. Each edge counts once toward its target's in-degree, duplicates
/// included. Edges naming unknown nodes are ignored; run `validate` first.
pub fn topological_order(graph: &Graph) -> Result<ExecutionOrder, ScheduleError> {
    let total = graph.nodes.len();
    let index: HashMap<&str, usize> = graph
        .nodes
        .iter()
        .enumerate()
        .rev()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; total];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); total];
    for edge in &graph.edges {
        let (Some(&from), Some(&to)) = (index.get(edge.from.as_str()), index.get(edge.to.as_str()))
        else {
            continue;
        };
        successors[from].push(to);
        in_degree[to] += 1;
    }

    let mut queue: VecDeque<usize> = (0..total).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(total);

    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &next in &successors[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() < total {
        return Err(ScheduleError::CycleDetected {
            scheduled: order.len(),
            total,
        });
    }

    Ok(ExecutionOrder {
        nodes: order.into_iter().map(|i| graph.nodes[i].clone()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, NodeKind};

    fn graph(ids: &[&str], edges: &[(&str, &str)]) -> Graph {
        Graph::new(
            ids.iter().map(|id| Node::new(*id, NodeKind::Action)).collect(),
            edges.iter().map(|(f, t)| Edge::new(*f, *t)).collect(),
        )
    }

    fn assert_respects_edges(g: &Graph, order: &ExecutionOrder) {
        let ids = order.ids();
        assert_eq!(ids.len(), g.nodes.len());
        let pos = |id: &str| ids.iter().position(|x| *x == id).unwrap();
        for e in &g.edges {
            assert!(pos(&e.from) < pos(&e.to), "{} must precede {}", e.from, e.to);
        }
    }

    #[test]
    fn test_chain() {
        let g = graph(&["c", "b", "a"], &[("a", "b"), ("b", "c")]);
        let order = topological_order(&g).unwrap();
        assert_eq!(order.ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_diamond() {
        let g = graph(
            &["start", "left", "right", "end"],
            &[
                ("start", "left"),
                ("start", "right"),
                ("left", "end"),
                ("right", "end"),
            ],
        );
        let order = topological_order(&g).unwrap();
        assert_eq!(order.ids(), vec!["start", "left", "right", "end"]);
        assert_respects_edges(&g, &order);
    }

    #[test]
    fn test_roots_seeded_in_input_order() {
        let g = graph(&["x", "y", "z"], &[]);
        assert_eq!(topological_order(&g).unwrap().ids(), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_successors_follow_edge_order() {
        let g = graph(&["r", "b", "a"], &[("r", "a"), ("r", "b")]);
        assert_eq!(topological_order(&g).unwrap().ids(), vec!["r", "a", "b"]);
    }

    #[test]
    fn test_deterministic() {
        let g = graph(
            &["a", "b", "c", "d", "e"],
            &[("a", "c"), ("b", "c"), ("c", "d"), ("b", "e")],
        );
        let first = topological_order(&g).unwrap().ids().join(",");
        for _ in 0..10 {
            assert_eq!(topological_order(&g).unwrap().ids().join(","), first);
        }
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let g = graph(&["a", "b"], &[("a", "b"), ("b", "b")]);
        assert_eq!(
            topological_order(&g).unwrap_err(),
            ScheduleError::CycleDetected {
                scheduled: 1,
                total: 2
            }
        );
    }

    #[test]
    fn test_larger_cycle() {
        let g = graph(&["s", "a", "b", "c"], &[("s", "a"), ("a", "b"), ("b", "c"), ("c", "a")]);
        assert!(matches!(
            topological_order(&g),
            Err(ScheduleError::CycleDetected { scheduled: 1, total: 4 })
        ));
    }

    #[test]
    fn test_duplicate_edges_count_twice() {
        let g = graph(&["a", "b"], &[("a", "b"), ("a", "b")]);
        assert_eq!(topological_order(&g).unwrap().ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_graph() {
        assert!(topological_order(&graph(&[], &[])).unwrap().is_empty());
    }

    #[test]
    fn test_start_url_found_anywhere() {
        let g = Graph::new(
            vec![
                Node::action("click", "click", "#go", None),
                Node::start("entry", "https://example.com"),
            ],
            vec![],
        );
        let order = topological_order(&g).unwrap();
        let (node, url) = order.start_url().unwrap();
        assert_eq!(node.id, "entry");
        assert_eq!(url, "https://example.com");
    }

    #[test]
    fn test_cycle_converts_to_core_error() {
        let err: WebloomError = ScheduleError::CycleDetected {
            scheduled: 0,
            total: 2,
        }
        .into();
        assert!(matches!(err, WebloomError::CycleDetected { total: 2, .. }));
    }
}
