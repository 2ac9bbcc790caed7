//! Write-side synthesis: inverting the read pattern into creation,
//! initializer and change/add/remove updates.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::analysis::{DependencyEdge, Key, Path, QueryAnalysis};
use crate::error::{AnalysisError, AnalysisResult};
use crate::model::PropertyPlan;

use super::template::{Token, TripleTemplate, UpdateTemplate};

/// Parameter bound to the entity IRI.
pub const THIS: &str = "this";
/// Parameter bound to the value being removed or replaced.
pub const OLD: &str = "old";
/// Parameter bound to the value being added or set.
pub const NEW: &str = "new";

/// Blank node labels memoized per anonymous key for one synthesis call.
///
/// Labels derive from the variable name, so templates synthesized for the
/// same class agree on them and can be merged into one `INSERT DATA`.
#[derive(Default)]
struct BlankLabels {
    labels: HashMap<String, String>,
}

impl BlankLabels {
    fn label(&mut self, var: &str) -> Token {
        let label = self
            .labels
            .entry(var.to_string())
            .or_insert_with(|| format!("n_{}", var.trim_start_matches('_')));
        Token::Blank(label.clone())
    }
}

/// Synthesizes updates for one analyzed read query.
pub struct Synthesizer<'a> {
    analysis: &'a QueryAnalysis,
    plans: &'a [PropertyPlan],
}

impl<'a> Synthesizer<'a> {
    pub fn new(analysis: &'a QueryAnalysis, plans: &'a [PropertyPlan]) -> Self {
        Self { analysis, plans }
    }

    pub fn analysis(&self) -> &'a QueryAnalysis {
        self.analysis
    }

    pub fn plans(&self) -> &'a [PropertyPlan] {
        self.plans
    }

    pub fn plan(&self, variable: &str) -> Option<&'a PropertyPlan> {
        self.plans.iter().find(|p| p.variable == variable)
    }

    fn edges(&self) -> &'a [DependencyEdge] {
        self.analysis.edges()
    }

    /// Required exactly when bound outside every OPTIONAL/UNION.
    pub fn check_contract(&self) -> AnalysisResult<()> {
        for plan in self.plans {
            let safe = self.analysis.is_safe(&plan.variable);
            if safe && plan.nullable {
                return Err(AnalysisError::CardinalityContractViolation {
                    variable: plan.variable.clone(),
                    message: format!(
                        "declared {} but the read query always binds it",
                        plan.cardinality_name()
                    ),
                });
            }
            if !safe && !plan.nullable {
                return Err(AnalysisError::CardinalityContractViolation {
                    variable: plan.variable.clone(),
                    message: format!(
                        "declared exactly-one but only bound inside context {}",
                        self.analysis.defining_context(&plan.variable)
                    ),
                });
            }
        }
        Ok(())
    }

    /// Edges reachable from the anchor through admitted edges, in query order.
    fn closure(&self, admit: impl Fn(&DependencyEdge) -> bool) -> Vec<usize> {
        let edges = self.edges();
        let mut reached: HashSet<Key> = HashSet::new();
        let mut taken: BTreeSet<usize> = BTreeSet::new();
        let mut queue = VecDeque::new();
        let anchor = Key::Var(self.analysis.anchor().to_string());
        reached.insert(anchor.clone());
        queue.push_back(anchor);

        while let Some(key) = queue.pop_front() {
            for (id, edge) in edges.iter().enumerate() {
                if taken.contains(&id) || !admit(edge) || !edge.touches(&key) {
                    continue;
                }
                taken.insert(id);
                for next in [&edge.subject, &edge.object] {
                    if reached.insert(next.clone()) {
                        queue.push_back(next.clone());
                    }
                }
            }
        }
        taken.into_iter().collect()
    }

    /// Token for a key in `INSERT DATA`: anchor and supplied variables become
    /// parameters, everything else anonymous becomes a blank node.
    fn data_token(&self, key: &Key, params: &BTreeSet<&str>, blanks: &mut BlankLabels) -> Token {
        match key {
            Key::Const { term, .. } => Token::Term(term.clone()),
            Key::Var(name) if name == self.analysis.anchor() => Token::Param(THIS.into()),
            Key::Var(name) if params.contains(name.as_str()) => Token::Param(name.clone()),
            Key::Var(name) => blanks.label(name),
        }
    }

    fn data_triple(&self, id: usize, params: &BTreeSet<&str>, blanks: &mut BlankLabels) -> TripleTemplate {
        let edge = &self.edges()[id];
        TripleTemplate {
            subject: self.data_token(&edge.subject, params, blanks),
            predicate: edge.predicate.clone(),
            object: self.data_token(&edge.object, params, blanks),
            graph: edge.graph.clone(),
        }
    }

    /// `INSERT DATA` for the unconditional structure of a new entity.
    pub fn creation(&self) -> AnalysisResult<UpdateTemplate> {
        self.check_contract()?;
        let assignable: BTreeSet<&str> = self
            .plans
            .iter()
            .filter(|p| p.functional && !p.nullable)
            .map(|p| p.variable.as_str())
            .collect();
        let mut blanks = BlankLabels::default();
        let triples = self
            .closure(|e| e.context.is_root())
            .into_iter()
            .map(|id| self.data_triple(id, &assignable, &mut blanks))
            .collect();
        let update = UpdateTemplate::insert_data(triples);
        tracing::debug!(triples = update.insert.len(), "synthesized creation");
        Ok(update)
    }

    /// The structure a nullable single-valued property adds on top of an
    /// existing entity.
    ///
    /// Single-valued properties of the block are parameters. Edges reaching
    /// multi-valued properties are left out; their add templates attach the
    /// values once the block exists. Unconditional variables the block hangs
    /// off are matched in the WHERE clause, making this an `INSERT ... WHERE`;
    /// without any it stays `INSERT DATA`.
    pub fn initializer(&self, variable: &str) -> AnalysisResult<UpdateTemplate> {
        let edges = self.edges();
        let anchor = self.analysis.anchor();
        let defining = self.analysis.defining_context(variable);
        let params: BTreeSet<&str> = self
            .plans
            .iter()
            .filter(|p| p.functional)
            .map(|p| p.variable.as_str())
            .collect();
        let deferred: Vec<Key> = self
            .plans
            .iter()
            .filter(|p| !p.functional)
            .map(|p| Key::Var(p.variable.clone()))
            .collect();

        let ids: Vec<usize> = self
            .closure(|e| e.context.is_prefix_of(&defining) && !deferred.iter().any(|k| e.touches(k)))
            .into_iter()
            .filter(|&id| !edges[id].context.is_root())
            .collect();
        let spent: HashSet<usize> = ids.iter().copied().collect();
        let target = Key::Var(variable.to_string());

        let mut bound: BTreeSet<&str> = BTreeSet::new();
        let mut pattern_ids: BTreeSet<usize> = BTreeSet::new();
        for &id in &ids {
            for key in [&edges[id].subject, &edges[id].object] {
                let Some(name) = key.as_var() else { continue };
                if name == anchor || params.contains(name) || !self.analysis.is_safe(name) {
                    continue;
                }
                if bound.insert(name) {
                    let path = self.derivation(name, &target, &spent).ok_or_else(|| {
                        AnalysisError::UnreachableVariable {
                            variable: name.to_string(),
                            anchor: anchor.to_string(),
                        }
                    })?;
                    pattern_ids.extend(path.edge_ids());
                }
            }
        }

        let mut blanks = BlankLabels::default();
        let mut token = |key: &Key| match key {
            Key::Var(name) if bound.contains(name.as_str()) => Token::Var(name.clone()),
            other => self.data_token(other, &params, &mut blanks),
        };
        let mut render = |id: usize| {
            let edge = &edges[id];
            TripleTemplate {
                subject: token(&edge.subject),
                predicate: edge.predicate.clone(),
                object: token(&edge.object),
                graph: edge.graph.clone(),
            }
        };
        let insert: Vec<TripleTemplate> = ids.iter().map(|&id| render(id)).collect();
        let pattern: Vec<TripleTemplate> = pattern_ids.iter().map(|&id| render(id)).collect();

        tracing::debug!(variable, insert = insert.len(), pattern = pattern.len(), "synthesized initializer");
        if pattern.is_empty() {
            Ok(UpdateTemplate::insert_data(insert))
        } else {
            Ok(UpdateTemplate::modify(Vec::new(), insert, pattern))
        }
    }

    /// The generic value update for `variable`.
    ///
    /// `delete && insert` replaces `${old}` with `${new}`, `insert` alone adds
    /// `${new}`, `delete` alone removes `${old}`.
    pub fn modify(&self, variable: &str, delete: bool, insert: bool) -> AnalysisResult<UpdateTemplate> {
        let edges = self.edges();
        let target = Key::Var(variable.to_string());
        let info = self.analysis.variable(variable).ok_or_else(|| {
            AnalysisError::UnreachableVariable {
                variable: variable.to_string(),
                anchor: self.analysis.anchor().to_string(),
            }
        })?;

        let neighborhood: Vec<usize> = edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.touches(&target))
            .map(|(id, _)| id)
            .collect();
        // Only the edge that actually binds the value is deleted; other
        // structure around the neighbor stays.
        let last_edges: HashSet<usize> = info.paths.iter().filter_map(|p| p.last()).map(|s| s.edge).collect();

        let delete_ids: Vec<usize> = if delete {
            neighborhood.iter().copied().filter(|id| last_edges.contains(id)).collect()
        } else {
            Vec::new()
        };
        let insert_ids: Vec<usize> = if insert { neighborhood.clone() } else { Vec::new() };
        let pure_insert = insert && !delete;
        let spent: HashSet<usize> = if pure_insert {
            insert_ids.iter().copied().collect()
        } else {
            HashSet::new()
        };

        let anchor = self.analysis.anchor();
        let mut referenced: BTreeSet<String> = BTreeSet::new();
        for &id in delete_ids.iter().chain(&insert_ids) {
            let edge = &edges[id];
            for key in [&edge.subject, &edge.object] {
                if let Some(name) = key.as_var() {
                    if name != variable && name != anchor {
                        referenced.insert(name.to_string());
                    }
                }
            }
        }

        let mut pattern_ids: BTreeSet<usize> = BTreeSet::new();
        let mut fresh: BTreeSet<String> = BTreeSet::new();
        for name in &referenced {
            match self.derivation(name, &target, &spent) {
                Some(path) => pattern_ids.extend(path.edge_ids()),
                None if pure_insert => {
                    fresh.insert(name.clone());
                }
                None => {
                    return Err(AnalysisError::UnreachableVariable {
                        variable: name.clone(),
                        anchor: anchor.to_string(),
                    });
                }
            }
        }

        let mut blanks = BlankLabels::default();
        let mut token = |key: &Key, value_param: &str| -> Token {
            match key {
                Key::Const { term, .. } => Token::Term(term.clone()),
                Key::Var(name) if name == anchor => Token::Param(THIS.into()),
                Key::Var(name) if name == variable => Token::Param(value_param.into()),
                Key::Var(name) if fresh.contains(name) => blanks.label(name),
                Key::Var(name) => Token::Var(name.clone()),
            }
        };
        let mut render = |id: usize, value_param: &str| {
            let edge = &edges[id];
            TripleTemplate {
                subject: token(&edge.subject, value_param),
                predicate: edge.predicate.clone(),
                object: token(&edge.object, value_param),
                graph: edge.graph.clone(),
            }
        };

        let delete_triples: Vec<TripleTemplate> = delete_ids.iter().map(|&id| render(id, OLD)).collect();
        let insert_triples: Vec<TripleTemplate> = insert_ids.iter().map(|&id| render(id, NEW)).collect();
        let pattern: Vec<TripleTemplate> = pattern_ids.iter().map(|&id| render(id, OLD)).collect();

        tracing::debug!(
            variable,
            delete = delete_triples.len(),
            insert = insert_triples.len(),
            pattern = pattern.len(),
            "synthesized value update"
        );
        Ok(UpdateTemplate::modify(delete_triples, insert_triples, pattern))
    }

    /// Pick a path re-deriving `name` inside its defining context.
    ///
    /// Paths avoiding the updated variable and the spent edges are preferred;
    /// when spent edges are excluded there is no fallback.
    fn derivation(&self, name: &str, updated: &Key, spent: &HashSet<usize>) -> Option<&'a Path> {
        let edges = self.edges();
        let admissible: Vec<&'a Path> = self
            .analysis
            .safe_paths(name)
            .filter(|p| p.edge_ids().all(|id| !spent.contains(&id)))
            .collect();
        admissible
            .iter()
            .copied()
            .find(|p| !p.passes_through(edges, updated))
            .or_else(|| admissible.first().copied())
    }
}
