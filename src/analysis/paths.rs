//! Path enumeration: every vertex-simple anchor → variable path over the
//! dependency edges, multiplexed across parallel edges.
//!
//! Adjacency is undirected (a path may walk a triple backwards) but each
//! [`Step`] remembers the direction so rendering keeps subject/object order.

use std::collections::HashMap;

use petgraph::algo::all_simple_paths;
use petgraph::graph::{NodeIndex, UnGraph};

use crate::error::{AnalysisError, AnalysisResult};

use super::context::ContextPath;
use super::walker::{DependencyEdge, Key};

/// One traversal of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Step {
    /// Index into the analysis edge list.
    pub edge: usize,
    /// `true` when walked subject → object.
    pub forward: bool,
}

impl Step {
    pub fn source<'e>(&self, edges: &'e [DependencyEdge]) -> &'e Key {
        let edge = &edges[self.edge];
        if self.forward { &edge.subject } else { &edge.object }
    }

    pub fn target<'e>(&self, edges: &'e [DependencyEdge]) -> &'e Key {
        let edge = &edges[self.edge];
        if self.forward { &edge.object } else { &edge.subject }
    }
}

/// Ordered steps from the anchor to a target, never revisiting a vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    steps: Vec<Step>,
}

impl Path {
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<&Step> {
        self.steps.last()
    }

    pub fn edge_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.steps.iter().map(|s| s.edge)
    }

    /// Every edge was observed in `context` or a scope enclosing it.
    pub fn within(&self, edges: &[DependencyEdge], context: &ContextPath) -> bool {
        self.steps
            .iter()
            .all(|s| edges[s.edge].context.is_prefix_of(context))
    }

    /// Whether `key` is an intermediate vertex of this path.
    pub fn passes_through(&self, edges: &[DependencyEdge], key: &Key) -> bool {
        let n = self.steps.len();
        self.steps
            .iter()
            .take(n.saturating_sub(1))
            .any(|s| s.target(edges) == key)
    }
}

/// Undirected adjacency over every key touched by an edge.
pub struct PathEnumerator<'a> {
    edges: &'a [DependencyEdge],
    graph: UnGraph<Key, ()>,
    nodes: HashMap<Key, NodeIndex>,
    max_paths: usize,
}

impl<'a> PathEnumerator<'a> {
    pub fn new(edges: &'a [DependencyEdge], max_paths: usize) -> Self {
        let mut graph = UnGraph::new_undirected();
        let mut nodes: HashMap<Key, NodeIndex> = HashMap::new();
        for edge in edges {
            let s = *nodes
                .entry(edge.subject.clone())
                .or_insert_with(|| graph.add_node(edge.subject.clone()));
            let o = *nodes
                .entry(edge.object.clone())
                .or_insert_with(|| graph.add_node(edge.object.clone()));
            // One adjacency edge per key pair; parallel predicates are
            // expanded when vertex paths become edge paths.
            if s != o {
                graph.update_edge(s, o, ());
            }
        }
        Self {
            edges,
            graph,
            nodes,
            max_paths,
        }
    }

    /// All simple paths from `anchor` to `target`, one per choice of
    /// parallel edge.
    pub fn paths(&self, anchor: &Key, target: &Key) -> AnalysisResult<Vec<Path>> {
        let (Some(&from), Some(&to)) = (self.nodes.get(anchor), self.nodes.get(target)) else {
            return Ok(Vec::new());
        };
        if from == to {
            return Ok(vec![Path { steps: Vec::new() }]);
        }

        let limit_error = || AnalysisError::PathLimitExceeded {
            variable: target.to_string().trim_start_matches('?').to_string(),
            limit: self.max_paths,
        };

        let mut paths = Vec::new();
        for vertices in all_simple_paths::<Vec<_>, _>(&self.graph, from, to, 0, None) {
            for steps in self.multiplex(&vertices) {
                paths.push(Path { steps });
                if paths.len() > self.max_paths {
                    return Err(limit_error());
                }
            }
        }
        tracing::trace!(%target, count = paths.len(), "enumerated anchor paths");
        Ok(paths)
    }

    fn multiplex(&self, vertices: &[NodeIndex]) -> Vec<Vec<Step>> {
        let mut live: Vec<Vec<Step>> = vec![Vec::new()];
        for pair in vertices.windows(2) {
            let (a, b) = (&self.graph[pair[0]], &self.graph[pair[1]]);
            let candidates: Vec<Step> = self
                .edges
                .iter()
                .enumerate()
                .filter_map(|(id, e)| {
                    if &e.subject == a && &e.object == b {
                        Some(Step { edge: id, forward: true })
                    } else if &e.subject == b && &e.object == a {
                        Some(Step { edge: id, forward: false })
                    } else {
                        None
                    }
                })
                .collect();

            live = match candidates.as_slice() {
                [only] => {
                    for path in &mut live {
                        path.push(*only);
                    }
                    live
                }
                many => live
                    .iter()
                    .flat_map(|path| {
                        many.iter().map(move |step| {
                            let mut forked = path.clone();
                            forked.push(*step);
                            forked
                        })
                    })
                    .collect(),
            };
            if live.len() > self.max_paths {
                break;
            }
        }
        live
    }
}
