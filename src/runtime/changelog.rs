//! Queued changes, rendered into one update request at commit.

use oxigraph::model::{NamedNode, Term};

/// One value-level edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueChange {
    /// A simple property: one triple in the default graph.
    Direct {
        subject: NamedNode,
        predicate: NamedNode,
        old: Option<Term>,
        new: Option<Term>,
    },
    /// A complex property: an update rendered from a synthesized template.
    Rendered(String),
}

impl ValueChange {
    fn write(&self, out: &mut Vec<String>) {
        match self {
            ValueChange::Direct {
                subject,
                predicate,
                old,
                new,
            } => {
                if let Some(old) = old {
                    out.push(delete_value(subject, predicate, old));
                }
                if let Some(new) = new {
                    out.push(format!("INSERT DATA {{ {subject} {predicate} {new} }}"));
                }
            }
            ValueChange::Rendered(text) => out.push(text.clone()),
        }
    }
}

// Blank nodes are not allowed in DELETE DATA.
fn delete_value(subject: &NamedNode, predicate: &NamedNode, old: &Term) -> String {
    match old {
        Term::BlankNode(_) => format!(
            "DELETE {{ {subject} {predicate} ?old }} WHERE {{ {subject} {predicate} ?old . FILTER(isBlank(?old)) }}"
        ),
        _ => format!("DELETE DATA {{ {subject} {predicate} {old} }}"),
    }
}

/// A queued change, in enqueue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDescriptor {
    CreateEntity { uri: NamedNode, update: String },
    AddValue(ValueChange),
    RemoveValue(ValueChange),
    ChangeValue(ValueChange),
    DeleteEntity { uri: NamedNode },
    /// Delete `uri`, pointing its incoming references at `target`.
    DeleteAndRedirect { uri: NamedNode, target: NamedNode },
}

impl ChangeDescriptor {
    /// The update operations this change expands to.
    pub fn operations(&self) -> Vec<String> {
        let mut out = Vec::new();
        match self {
            ChangeDescriptor::CreateEntity { update, .. } => out.push(update.clone()),
            ChangeDescriptor::AddValue(change)
            | ChangeDescriptor::RemoveValue(change)
            | ChangeDescriptor::ChangeValue(change) => change.write(&mut out),
            ChangeDescriptor::DeleteEntity { uri } => delete_entity(uri, &mut out),
            ChangeDescriptor::DeleteAndRedirect { uri, target } => {
                out.push(format!(
                    "DELETE {{ ?s ?p {uri} }} INSERT {{ ?s ?p {target} }} WHERE {{ ?s ?p {uri} }}"
                ));
                out.push(format!(
                    "DELETE {{ GRAPH ?g {{ ?s ?p {uri} }} }} INSERT {{ GRAPH ?g {{ ?s ?p {target} }} }} WHERE {{ GRAPH ?g {{ ?s ?p {uri} }} }}"
                ));
                delete_entity(uri, &mut out);
            }
        }
        out
    }
}

/// Blank-node structure first, then every triple naming the entity, in the
/// default graph and in named graphs.
fn delete_entity(uri: &NamedNode, out: &mut Vec<String>) {
    out.push(format!(
        "DELETE {{ ?b ?bp ?bo }} WHERE {{ {uri} ?p ?b . ?b ?bp ?bo . FILTER(isBlank(?b)) }}"
    ));
    out.push(format!(
        "DELETE {{ GRAPH ?g {{ ?b ?bp ?bo }} }} WHERE {{ GRAPH ?g {{ {uri} ?p ?b . ?b ?bp ?bo . FILTER(isBlank(?b)) }} }}"
    ));
    out.push(format!("DELETE WHERE {{ {uri} ?p ?o }}"));
    out.push(format!("DELETE WHERE {{ ?s ?p {uri} }}"));
    out.push(format!("DELETE WHERE {{ GRAPH ?g {{ {uri} ?p ?o }} }}"));
    out.push(format!("DELETE WHERE {{ GRAPH ?g {{ ?s ?p {uri} }} }}"));
}

/// Append-only until a successful commit clears it or a failed compound
/// mutation rolls back to a checkpoint.
#[derive(Debug, Clone, Default)]
pub struct Changelog {
    entries: Vec<ChangeDescriptor>,
}

impl Changelog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: ChangeDescriptor) {
        self.entries.push(change);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ChangeDescriptor] {
        &self.entries
    }

    /// Every entry as one update request, operations separated by `;`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for op in self.entries.iter().flat_map(ChangeDescriptor::operations) {
            if !out.is_empty() {
                out.push_str(" ;\n");
            }
            out.push_str(&op);
        }
        out
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop every entry queued after `len`.
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }
}
