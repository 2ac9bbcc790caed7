//! Read-query analysis: which variables are guaranteed, how each is reached
//! from the anchor, and which can be written as one direct triple.
//!
//! - [`walker`] turns the pattern into dependency edges and context facts
//! - [`paths`] enumerates anchor-rooted paths per variable
//! - [`QueryAnalysis`] checks bindings and reachability and classifies
//!   properties

pub mod context;
pub mod paths;
pub mod walker;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::algebra::ReadQuery;
use crate::error::{AnalysisError, AnalysisResult};

pub use context::{ContextMembership, ContextPath};
pub use paths::{Path, PathEnumerator, Step};
pub use walker::{DependencyEdge, Key, WalkOutput};

/// Tuning knobs for analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Maximum number of anchor paths enumerated per variable.
    #[serde(default = "default_max_paths")]
    pub max_paths: usize,
}

fn default_max_paths() -> usize {
    256
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            max_paths: default_max_paths(),
        }
    }
}

/// What analysis knows about one non-anchor variable.
#[derive(Debug, Clone)]
pub struct VariableInfo {
    pub name: String,
    /// Least-nested scope the variable occurs in.
    pub defining: ContextPath,
    /// Every anchor path, including ones leaving the defining context.
    pub paths: Vec<Path>,
    /// Whether the read query projects it.
    pub projected: bool,
}

/// The full structural analysis of one read query.
#[derive(Debug, Clone)]
pub struct QueryAnalysis {
    anchor: String,
    edges: Vec<DependencyEdge>,
    membership: ContextMembership,
    safe: BTreeSet<String>,
    variables: BTreeMap<String, VariableInfo>,
}

impl QueryAnalysis {
    /// Walk, enumerate and check a read query.
    pub fn analyze(query: &ReadQuery, options: &AnalysisOptions) -> AnalysisResult<Self> {
        let WalkOutput {
            edges,
            membership,
            safe,
        } = walker::walk(&query.pattern)?;

        if !membership.contains(&query.anchor) {
            return Err(AnalysisError::ConfigMismatch {
                message: format!("anchor ?{} does not occur in the pattern", query.anchor),
            });
        }
        if !safe.contains(&query.anchor) {
            return Err(AnalysisError::ConfigMismatch {
                message: format!(
                    "anchor ?{} is only bound inside OPTIONAL/UNION blocks",
                    query.anchor
                ),
            });
        }
        let missing: Vec<&str> = query
            .variables
            .iter()
            .map(String::as_str)
            .filter(|v| !membership.contains(v))
            .collect();
        if !missing.is_empty() {
            return Err(AnalysisError::ConfigMismatch {
                message: format!("result variables not bound by the pattern: {}", join_vars(&missing)),
            });
        }

        for name in membership.variables() {
            if safe.contains(name) {
                continue;
            }
            let bindings = membership.distinct_bindings(name);
            if bindings.len() > 1 {
                return Err(AnalysisError::AmbiguousBinding {
                    variable: name.to_string(),
                    count: bindings.len(),
                    contexts: bindings
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", "),
                });
            }
        }

        let enumerator = PathEnumerator::new(&edges, options.max_paths);
        let anchor_key = Key::Var(query.anchor.clone());
        let mut variables = BTreeMap::new();
        for name in membership.variables() {
            if name == query.anchor {
                continue;
            }
            let defining = membership
                .defining_context(name)
                .cloned()
                .unwrap_or_default();
            let paths = enumerator.paths(&anchor_key, &Key::Var(name.to_string()))?;
            if !paths.iter().any(|p| p.within(&edges, &defining)) {
                return Err(AnalysisError::UnreachableVariable {
                    variable: name.to_string(),
                    anchor: query.anchor.clone(),
                });
            }
            variables.insert(
                name.to_string(),
                VariableInfo {
                    name: name.to_string(),
                    defining,
                    paths,
                    projected: query.variables.iter().any(|v| v == name),
                },
            );
        }

        tracing::debug!(
            anchor = %query.anchor,
            edges = edges.len(),
            variables = variables.len(),
            "analyzed read query"
        );

        Ok(Self {
            anchor: query.anchor.clone(),
            edges,
            membership,
            safe,
            variables,
        })
    }

    pub fn anchor(&self) -> &str {
        &self.anchor
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn edge(&self, id: usize) -> &DependencyEdge {
        &self.edges[id]
    }

    pub fn membership(&self) -> &ContextMembership {
        &self.membership
    }

    /// Bound outside every OPTIONAL/UNION.
    pub fn is_safe(&self, variable: &str) -> bool {
        self.safe.contains(variable)
    }

    pub fn variable(&self, name: &str) -> Option<&VariableInfo> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = &VariableInfo> {
        self.variables.values()
    }

    pub fn is_projected(&self, name: &str) -> bool {
        self.variables.get(name).is_some_and(|v| v.projected)
    }

    /// The defining context; the anchor's is the root.
    pub fn defining_context(&self, name: &str) -> ContextPath {
        self.variables
            .get(name)
            .map(|v| v.defining.clone())
            .unwrap_or_default()
    }

    /// Paths to `name` whose edges all lie within its defining context.
    pub fn safe_paths<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Path> + 'a {
        let info = self.variables.get(name);
        info.into_iter()
            .flat_map(move |info| info.paths.iter().filter(move |p| p.within(&self.edges, &info.defining)))
    }

    /// A property is simple when it is one forward default-graph triple away
    /// from the anchor and nothing else in the query touches its value.
    pub fn is_simple(&self, name: &str) -> bool {
        let Some(info) = self.variables.get(name) else {
            return false;
        };
        let [path] = info.paths.as_slice() else {
            return false;
        };
        let [step] = path.steps() else {
            return false;
        };
        let edge = &self.edges[step.edge];
        step.forward
            && edge.graph.is_none()
            && self.edges.iter().filter(|e| e.touches(&edge.object)).count() == 1
    }

    /// The single edge of a simple property.
    pub fn simple_edge(&self, name: &str) -> Option<&DependencyEdge> {
        if !self.is_simple(name) {
            return None;
        }
        let step = self.variables.get(name)?.paths.first()?.steps().first()?;
        Some(&self.edges[step.edge])
    }
}

fn join_vars(vars: &[&str]) -> String {
    vars.iter()
        .map(|v| format!("?{v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::{GraphPattern, NamedNodePattern, TermPattern, TriplePattern};

    const EX: &str = "http://example.org/";

    fn t(s: &str, p: &str, o: &str) -> TriplePattern {
        TriplePattern::new(
            TermPattern::var(s),
            NamedNodePattern::iri(format!("{EX}{p}")),
            TermPattern::var(o),
        )
    }

    fn typed(s: &str) -> TriplePattern {
        TriplePattern::new(
            TermPattern::var(s),
            NamedNodePattern::iri("http://www.w3.org/1999/02/22-rdf-syntax-ns#type"),
            TermPattern::iri(format!("{EX}Thing")),
        )
    }

    fn query(vars: &[&str], pattern: GraphPattern) -> ReadQuery {
        ReadQuery::new("e", vars.iter().map(|v| v.to_string()).collect(), pattern)
    }

    fn analyze(q: &ReadQuery) -> AnalysisResult<QueryAnalysis> {
        QueryAnalysis::analyze(q, &AnalysisOptions::default())
    }

    #[test]
    fn direct_property_is_simple() {
        let q = query(&["n"], GraphPattern::bgp(vec![typed("e"), t("e", "name", "n")]));
        let a = analyze(&q).unwrap();
        assert!(a.is_simple("n"));
        assert!(a.is_safe("n"));
    }

    #[test]
    fn two_hop_property_is_complex() {
        let q = query(
            &["c"],
            GraphPattern::bgp(vec![typed("e"), t("e", "addr", "a"), t("a", "city", "c")]),
        );
        let a = analyze(&q).unwrap();
        assert!(!a.is_simple("c"));
        assert!(!a.is_projected("a"));
    }

    #[test]
    fn reverse_edge_is_complex() {
        let q = query(&["o"], GraphPattern::bgp(vec![typed("e"), t("o", "owns", "e")]));
        assert!(!analyze(&q).unwrap().is_simple("o"));
    }

    #[test]
    fn shared_target_is_complex() {
        let q = query(
            &["x"],
            GraphPattern::bgp(vec![typed("e"), t("e", "p", "x"), t("x", "label", "l")]),
        );
        assert!(!analyze(&q).unwrap().is_simple("x"));
    }

    #[test]
    fn named_graph_edge_is_complex() {
        let q = query(
            &["x"],
            GraphPattern::group(vec![
                GraphPattern::bgp(vec![typed("e")]),
                GraphPattern::graph(
                    NamedNodePattern::iri(format!("{EX}g")),
                    GraphPattern::bgp(vec![t("e", "p", "x")]),
                ),
            ]),
        );
        assert!(!analyze(&q).unwrap().is_simple("x"));
    }

    #[test]
    fn anchor_must_be_unconditional() {
        let q = query(
            &["x"],
            GraphPattern::optional(GraphPattern::bgp(vec![t("e", "p", "x")])),
        );
        assert!(matches!(analyze(&q), Err(AnalysisError::ConfigMismatch { .. })));
    }

    #[test]
    fn unknown_result_variable_is_a_mismatch() {
        let q = query(&["nope"], GraphPattern::bgp(vec![typed("e")]));
        assert!(matches!(analyze(&q), Err(AnalysisError::ConfigMismatch { .. })));
    }

    #[test]
    fn path_leaving_defining_context_does_not_count() {
        // ?x occurs in the root, but only an optional edge links it to ?e.
        let q = query(
            &["x"],
            GraphPattern::group(vec![
                GraphPattern::bgp(vec![typed("e"), t("x", "p", "y")]),
                GraphPattern::optional(GraphPattern::bgp(vec![t("e", "q", "x")])),
            ]),
        );
        assert!(matches!(
            analyze(&q),
            Err(AnalysisError::UnreachableVariable { .. })
        ));
    }

    #[test]
    fn nested_optionals_are_not_ambiguous() {
        let q = query(
            &["x", "y"],
            GraphPattern::group(vec![
                GraphPattern::bgp(vec![typed("e")]),
                GraphPattern::optional(GraphPattern::group(vec![
                    GraphPattern::bgp(vec![t("e", "p", "x")]),
                    GraphPattern::optional(GraphPattern::bgp(vec![t("x", "q", "y")])),
                ])),
            ]),
        );
        let a = analyze(&q).unwrap();
        assert_eq!(a.defining_context("y").depth(), 2);
        assert_eq!(a.safe_paths("y").count(), 1);
    }
}
