//! AST walker: graph pattern → dependency edges + context membership.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use oxigraph::model::{NamedNode, Term};

use crate::algebra::{GraphPattern, NamedNodePattern, TermPattern, TriplePattern};
use crate::error::{AnalysisError, AnalysisResult};

use super::context::{ContextMembership, ContextPath};

/// An edge endpoint: a variable, or one opaque constant occurrence.
///
/// Constants compare by occurrence id, never by value, so two edges to the
/// same IRI are not joined through it.
#[derive(Debug, Clone)]
pub enum Key {
    Var(String),
    Const { id: usize, term: Term },
}

impl Key {
    pub fn as_var(&self) -> Option<&str> {
        match self {
            Key::Var(name) => Some(name),
            Key::Const { .. } => None,
        }
    }

    pub fn is_var(&self, name: &str) -> bool {
        self.as_var() == Some(name)
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Key::Var(a), Key::Var(b)) => a == b,
            (Key::Const { id: a, .. }, Key::Const { id: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Key::Var(name) => {
                0u8.hash(state);
                name.hash(state);
            }
            Key::Const { id, .. } => {
                1u8.hash(state);
                id.hash(state);
            }
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Var(name) => write!(f, "?{name}"),
            Key::Const { term, .. } => write!(f, "{term}"),
        }
    }
}

/// One observed triple pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyEdge {
    pub subject: Key,
    pub predicate: NamedNode,
    pub object: Key,
    pub context: ContextPath,
    pub graph: Option<NamedNode>,
}

impl DependencyEdge {
    pub fn touches(&self, key: &Key) -> bool {
        &self.subject == key || &self.object == key
    }

    pub fn touches_var(&self, name: &str) -> bool {
        self.subject.is_var(name) || self.object.is_var(name)
    }
}

impl fmt::Display for DependencyEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} [{}]", self.subject, self.predicate, self.object, self.context)?;
        if let Some(graph) = &self.graph {
            write!(f, " in {graph}")?;
        }
        Ok(())
    }
}

/// Everything the walker learns from one pattern.
#[derive(Debug, Clone, Default)]
pub struct WalkOutput {
    pub edges: Vec<DependencyEdge>,
    pub membership: ContextMembership,
    /// Variables bound outside every OPTIONAL/UNION.
    pub safe: BTreeSet<String>,
}

// Constants by value, for deduplication only.
#[derive(PartialEq, Eq, Hash)]
enum Signature {
    Var(String),
    Const(Term),
}

impl From<&Key> for Signature {
    fn from(key: &Key) -> Self {
        match key {
            Key::Var(name) => Signature::Var(name.clone()),
            Key::Const { term, .. } => Signature::Const(term.clone()),
        }
    }
}

type EdgeIdentity = (Signature, NamedNode, Signature, bool, Option<NamedNode>);

struct Walker {
    next_context: u32,
    next_const: usize,
    contexts: Vec<u32>,
    graphs: Vec<NamedNode>,
    seen: HashSet<EdgeIdentity>,
    out: WalkOutput,
}

/// Walk a graph pattern, rejecting constructs synthesis cannot reverse.
pub fn walk(pattern: &GraphPattern) -> AnalysisResult<WalkOutput> {
    let mut walker = Walker {
        next_context: 1,
        next_const: 0,
        contexts: Vec::new(),
        graphs: Vec::new(),
        seen: HashSet::new(),
        out: WalkOutput::default(),
    };
    walker.visit(pattern)?;
    tracing::debug!(
        edges = walker.out.edges.len(),
        safe = walker.out.safe.len(),
        "walked read pattern"
    );
    Ok(walker.out)
}

impl Walker {
    fn visit(&mut self, pattern: &GraphPattern) -> AnalysisResult<()> {
        match pattern {
            GraphPattern::Group { patterns } => {
                for child in patterns {
                    self.visit(child)?;
                }
            }
            GraphPattern::Bgp { triples } => {
                for triple in triples {
                    self.triple(triple)?;
                }
            }
            GraphPattern::Optional { pattern } => {
                self.push_context();
                let result = self.visit(pattern);
                self.contexts.pop();
                result?;
            }
            // Each branch is its own optional scope: at write time there is no
            // way to know which branch will apply.
            GraphPattern::Union { branches } => {
                for branch in branches {
                    self.push_context();
                    let result = self.visit(branch);
                    self.contexts.pop();
                    result?;
                }
            }
            GraphPattern::Graph { name, pattern } => {
                let name = match name {
                    NamedNodePattern::Iri { value } => NamedNode::new_unchecked(value.as_str()),
                    NamedNodePattern::Variable { name } => {
                        return Err(AnalysisError::UnsupportedConstruct {
                            construct: format!("GRAPH ?{name} (graph names must be IRIs)"),
                        });
                    }
                };
                self.graphs.push(name);
                let result = self.visit(pattern);
                self.graphs.pop();
                result?;
            }
        }
        Ok(())
    }

    fn push_context(&mut self) {
        self.contexts.push(self.next_context);
        self.next_context += 1;
    }

    fn current_context(&self) -> ContextPath {
        ContextPath::from(self.contexts.clone())
    }

    fn triple(&mut self, triple: &TriplePattern) -> AnalysisResult<()> {
        let predicate = match &triple.predicate {
            NamedNodePattern::Iri { value } => NamedNode::new_unchecked(value.as_str()),
            NamedNodePattern::Variable { name } => {
                return Err(AnalysisError::UnsupportedConstruct {
                    construct: format!("variable predicate ?{name} in `{triple}`"),
                });
            }
        };

        let subject = self.key(&triple.subject);
        let object = self.key(&triple.object);
        if subject.as_var().is_none() && object.as_var().is_none() {
            tracing::debug!(%triple, "skipping constant-only triple");
            return Ok(());
        }

        let context = self.current_context();
        for key in [&subject, &object] {
            if let Some(name) = key.as_var() {
                self.out.membership.record(name, &context);
                if context.is_root() {
                    self.out.safe.insert(name.to_string());
                }
            }
        }

        let graph = self.graphs.last().cloned();
        let identity = (
            Signature::from(&subject),
            predicate.clone(),
            Signature::from(&object),
            !context.is_root(),
            graph.clone(),
        );
        if self.seen.insert(identity) {
            self.out.edges.push(DependencyEdge {
                subject,
                predicate,
                object,
                context,
                graph,
            });
        }
        Ok(())
    }

    fn key(&mut self, term: &TermPattern) -> Key {
        match (term.variable_name(), term.to_term()) {
            (Some(name), _) => Key::Var(name),
            (None, Some(term)) => {
                let id = self.next_const;
                self.next_const += 1;
                Key::Const { id, term }
            }
            (None, None) => unreachable!("term patterns are variables or constants"),
        }
    }
}
