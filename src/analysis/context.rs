//! Optional/union nesting contexts.
//!
//! Every OPTIONAL block and every UNION branch opens a fresh context whose path
//! extends the enclosing one, so "is nested inside" is a prefix test.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A sequence of branch ids from the outermost scope inwards. The empty path
/// is the unconditional root scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ContextPath(Vec<u32>);

impl ContextPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn child(&self, id: u32) -> Self {
        let mut ids = self.0.clone();
        ids.push(id);
        Self(ids)
    }

    /// Whether `self` encloses or equals `other`.
    pub fn is_prefix_of(&self, other: &ContextPath) -> bool {
        other.0.starts_with(&self.0)
    }

    pub fn ids(&self) -> &[u32] {
        &self.0
    }
}

impl From<Vec<u32>> for ContextPath {
    fn from(ids: Vec<u32>) -> Self {
        Self(ids)
    }
}

// Least nested first, then by branch ids.
impl Ord for ContextPath {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for ContextPath {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ContextPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("root");
        }
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

/// Variable name → every context it syntactically occurs in.
#[derive(Debug, Clone, Default)]
pub struct ContextMembership {
    occurrences: BTreeMap<String, BTreeSet<ContextPath>>,
}

impl ContextMembership {
    pub fn record(&mut self, variable: &str, context: &ContextPath) {
        self.occurrences
            .entry(variable.to_string())
            .or_default()
            .insert(context.clone());
    }

    pub fn contains(&self, variable: &str) -> bool {
        self.occurrences.contains_key(variable)
    }

    pub fn contexts(&self, variable: &str) -> Option<&BTreeSet<ContextPath>> {
        self.occurrences.get(variable)
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.occurrences.keys().map(String::as_str)
    }

    /// The least-nested context the variable occurs in.
    pub fn defining_context(&self, variable: &str) -> Option<&ContextPath> {
        self.occurrences.get(variable).and_then(|set| set.first())
    }

    /// Reduce the variable's occurrences to its distinct bindings.
    ///
    /// Shortest first, a context is dropped when an already selected one
    /// encloses it.
    pub fn distinct_bindings(&self, variable: &str) -> Vec<ContextPath> {
        let mut selected: Vec<ContextPath> = Vec::new();
        if let Some(contexts) = self.occurrences.get(variable) {
            for context in contexts {
                if !selected.iter().any(|s| s.is_prefix_of(context)) {
                    selected.push(context.clone());
                }
            }
        }
        selected
    }
}
