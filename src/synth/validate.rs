//! Integrity queries: each returns the anchors violating one constraint.

use crate::analysis::{DependencyEdge, Key, Path};
use crate::error::{AnalysisError, AnalysisResult};

use super::template::{Filter, SelectTemplate, Token, TripleTemplate};
use super::write::{Synthesizer, THIS};

impl Synthesizer<'_> {
    /// Root edges from the anchor to a constant, such as `?e a :Person`.
    fn typing_edges(&self) -> Vec<&DependencyEdge> {
        let anchor = self.analysis().anchor();
        self.analysis()
            .edges()
            .iter()
            .filter(|e| e.context.is_root() && e.subject.is_var(anchor))
            .filter(|e| matches!(e.object, Key::Const { .. }))
            .collect()
    }

    fn first_safe_path(&self, variable: &str) -> AnalysisResult<&Path> {
        self.analysis()
            .safe_paths(variable)
            .next()
            .ok_or_else(|| AnalysisError::UnreachableVariable {
                variable: variable.to_string(),
                anchor: self.analysis().anchor().to_string(),
            })
    }

    /// Render edges with the anchor as `?this` and every other variable
    /// suffixed.
    fn select_triples<'e>(
        &self,
        edges: impl IntoIterator<Item = &'e DependencyEdge>,
        suffix: &str,
    ) -> Vec<TripleTemplate> {
        let anchor = self.analysis().anchor();
        let token = |key: &Key| match key {
            Key::Const { term, .. } => Token::Term(term.clone()),
            Key::Var(name) if name == anchor => Token::Var(THIS.into()),
            Key::Var(name) => Token::Var(format!("{name}{suffix}")),
        };
        edges
            .into_iter()
            .map(|edge| TripleTemplate {
                subject: token(&edge.subject),
                predicate: edge.predicate.clone(),
                object: token(&edge.object),
                graph: edge.graph.clone(),
            })
            .collect()
    }

    fn path_edges<'s>(&'s self, path: &'s Path) -> impl Iterator<Item = &'s DependencyEdge> + 's {
        path.edge_ids().map(|id| self.analysis().edge(id))
    }

    /// Anchors with two distinct values of a single-valued property.
    pub fn functional_check(&self, variable: &str) -> AnalysisResult<SelectTemplate> {
        let path = self.first_safe_path(variable)?;
        let mut pattern = self.select_triples(self.typing_edges(), "");
        pattern.extend(self.select_triples(self.path_edges(path), "_1"));
        pattern.extend(self.select_triples(self.path_edges(path), "_2"));
        Ok(SelectTemplate {
            projection: vec![THIS.into()],
            pattern,
            filters: vec![Filter::NotEqual(
                format!("{variable}_1"),
                format!("{variable}_2"),
            )],
            absent: Vec::new(),
        })
    }

    /// Typed anchors lacking a required property, or `None` when the anchor
    /// has no constant typing edge to select candidates by.
    pub fn required_check(&self, variable: &str) -> AnalysisResult<Option<SelectTemplate>> {
        let typing = self.typing_edges();
        if typing.is_empty() {
            return Ok(None);
        }
        let path = self.first_safe_path(variable)?;
        Ok(Some(SelectTemplate {
            projection: vec![THIS.into()],
            pattern: self.select_triples(typing, ""),
            filters: Vec::new(),
            absent: self.select_triples(self.path_edges(path), ""),
        }))
    }
}
