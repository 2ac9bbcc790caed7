//! Read-query algebra: the closed subset of SPARQL graph patterns that can be
//! inverted into write operations.
//!
//! The external parser hands us one [`ReadQuery`] per entity type. Only group,
//! basic triple block, OPTIONAL, UNION and named GRAPH nodes exist here, so
//! property paths, BIND, MINUS, subqueries, FILTER EXISTS and SERVICE cannot
//! even be expressed. The walker still rejects the two shapes this type admits
//! but synthesis cannot reverse: a variable predicate and a variable graph name.

use std::fmt::{self, Write as _};

use oxigraph::model::{Literal, NamedNode, Term};
use serde::{Deserialize, Serialize};

/// A subject or object position in a triple pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TermPattern {
    Variable {
        name: String,
    },
    /// A blank node label in the pattern; treated as an anonymous variable.
    BlankNode {
        id: String,
    },
    Iri {
        value: String,
    },
    Literal {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        datatype: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
}

impl TermPattern {
    pub fn var(name: impl Into<String>) -> Self {
        Self::Variable { name: name.into() }
    }

    pub fn iri(value: impl Into<String>) -> Self {
        Self::Iri {
            value: value.into(),
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
            datatype: None,
            language: None,
        }
    }

    /// The variable name this position binds, if any.
    ///
    /// Blank nodes bind a synthetic `_<id>` variable so they stay anonymous
    /// and never collide with a projected name.
    pub fn variable_name(&self) -> Option<String> {
        match self {
            Self::Variable { name } => Some(name.clone()),
            Self::BlankNode { id } => Some(format!("_{id}")),
            Self::Iri { .. } | Self::Literal { .. } => None,
        }
    }

    /// The constant RDF term of this position, if it is not a variable.
    pub fn to_term(&self) -> Option<Term> {
        match self {
            Self::Iri { value } => Some(NamedNode::new_unchecked(value.as_str()).into()),
            Self::Literal {
                value,
                datatype,
                language,
            } => Some(literal_term(value, datatype.as_deref(), language.as_deref())),
            Self::Variable { .. } | Self::BlankNode { .. } => None,
        }
    }
}

fn literal_term(value: &str, datatype: Option<&str>, language: Option<&str>) -> Term {
    let literal = match (language, datatype) {
        (Some(lang), _) => Literal::new_language_tagged_literal_unchecked(value, lang),
        (None, Some(dt)) => Literal::new_typed_literal(value, NamedNode::new_unchecked(dt)),
        (None, None) => Literal::new_simple_literal(value),
    };
    literal.into()
}

impl fmt::Display for TermPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Variable { name } => write!(f, "?{name}"),
            Self::BlankNode { id } => write!(f, "_:{id}"),
            other => match other.to_term() {
                Some(term) => write!(f, "{term}"),
                None => Ok(()),
            },
        }
    }
}

/// A predicate or graph-name position: an IRI or a variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NamedNodePattern {
    Iri { value: String },
    Variable { name: String },
}

impl NamedNodePattern {
    pub fn iri(value: impl Into<String>) -> Self {
        Self::Iri {
            value: value.into(),
        }
    }

    pub fn var(name: impl Into<String>) -> Self {
        Self::Variable { name: name.into() }
    }
}

impl fmt::Display for NamedNodePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iri { value } => write!(f, "<{value}>"),
            Self::Variable { name } => write!(f, "?{name}"),
        }
    }
}

/// One `subject predicate object` pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriplePattern {
    pub subject: TermPattern,
    pub predicate: NamedNodePattern,
    pub object: TermPattern,
}

impl TriplePattern {
    pub fn new(subject: TermPattern, predicate: NamedNodePattern, object: TermPattern) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }
}

impl fmt::Display for TriplePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}

/// The supported graph-pattern node kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GraphPattern {
    Group { patterns: Vec<GraphPattern> },
    Bgp { triples: Vec<TriplePattern> },
    Optional { pattern: Box<GraphPattern> },
    Union { branches: Vec<GraphPattern> },
    Graph {
        name: NamedNodePattern,
        pattern: Box<GraphPattern>,
    },
}

impl GraphPattern {
    pub fn group(patterns: Vec<GraphPattern>) -> Self {
        Self::Group { patterns }
    }

    pub fn bgp(triples: Vec<TriplePattern>) -> Self {
        Self::Bgp { triples }
    }

    pub fn optional(pattern: GraphPattern) -> Self {
        Self::Optional {
            pattern: Box::new(pattern),
        }
    }

    pub fn union(branches: Vec<GraphPattern>) -> Self {
        Self::Union { branches }
    }

    pub fn graph(name: NamedNodePattern, pattern: GraphPattern) -> Self {
        Self::Graph {
            name,
            pattern: Box::new(pattern),
        }
    }

    /// Write this pattern as the body of a `{ ... }` group.
    fn write_body(&self, out: &mut String, indent: usize) {
        match self {
            Self::Group { patterns } => {
                for pattern in patterns {
                    match pattern {
                        Self::Group { .. } => {
                            pad(out, indent);
                            out.push_str("{\n");
                            pattern.write_body(out, indent + 1);
                            pad(out, indent);
                            out.push_str("}\n");
                        }
                        other => other.write_body(out, indent),
                    }
                }
            }
            Self::Bgp { triples } => {
                for triple in triples {
                    pad(out, indent);
                    let _ = writeln!(out, "{triple}");
                }
            }
            Self::Optional { pattern } => {
                pad(out, indent);
                out.push_str("OPTIONAL {\n");
                pattern.write_body(out, indent + 1);
                pad(out, indent);
                out.push_str("}\n");
            }
            Self::Union { branches } => {
                for (i, branch) in branches.iter().enumerate() {
                    pad(out, indent);
                    if i > 0 {
                        out.push_str("UNION ");
                    }
                    out.push_str("{\n");
                    branch.write_body(out, indent + 1);
                    pad(out, indent);
                    out.push_str("}\n");
                }
            }
            Self::Graph { name, pattern } => {
                pad(out, indent);
                let _ = writeln!(out, "GRAPH {name} {{");
                pattern.write_body(out, indent + 1);
                pad(out, indent);
                out.push_str("}\n");
            }
        }
    }
}

fn pad(out: &mut String, indent: usize) {
    for _ in 0..indent {
        out.push_str("  ");
    }
}

/// The canonical read query of one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadQuery {
    /// The entity-identity variable.
    pub anchor: String,
    /// Result variables other than the anchor.
    pub variables: Vec<String>,
    pub pattern: GraphPattern,
}

impl ReadQuery {
    pub fn new(anchor: impl Into<String>, variables: Vec<String>, pattern: GraphPattern) -> Self {
        Self {
            anchor: anchor.into(),
            variables,
            pattern,
        }
    }

    /// Render the query as SPARQL text.
    ///
    /// `anchor_value` pins the anchor through `VALUES`; `filter` is a caller
    /// supplied SPARQL expression conjoined with `FILTER(...)`.
    pub fn to_sparql(&self, anchor_value: Option<&NamedNode>, filter: Option<&str>) -> String {
        let mut out = String::from("SELECT ");
        let _ = write!(out, "?{}", self.anchor);
        for var in &self.variables {
            let _ = write!(out, " ?{var}");
        }
        out.push_str(" WHERE {\n");
        if let Some(value) = anchor_value {
            let _ = writeln!(out, "  VALUES ?{} {{ {value} }}", self.anchor);
        }
        self.pattern.write_body(&mut out, 1);
        if let Some(expr) = filter {
            let _ = writeln!(out, "  FILTER({expr})");
        }
        out.push('}');
        out
    }
}

impl fmt::Display for ReadQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sparql(None, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person_query() -> ReadQuery {
        ReadQuery::new(
            "p",
            vec!["name".into(), "mail".into()],
            GraphPattern::group(vec![
                GraphPattern::bgp(vec![TriplePattern::new(
                    TermPattern::var("p"),
                    NamedNodePattern::iri("http://xmlns.com/foaf/0.1/name"),
                    TermPattern::var("name"),
                )]),
                GraphPattern::optional(GraphPattern::bgp(vec![TriplePattern::new(
                    TermPattern::var("p"),
                    NamedNodePattern::iri("http://xmlns.com/foaf/0.1/mbox"),
                    TermPattern::var("mail"),
                )])),
            ]),
        )
    }

    #[test]
    fn renders_select_with_optional() {
        let text = person_query().to_sparql(None, None);
        assert!(text.starts_with("SELECT ?p ?name ?mail WHERE {"));
        assert!(text.contains("?p <http://xmlns.com/foaf/0.1/name> ?name ."));
        assert!(text.contains("OPTIONAL {"));
        assert!(text.ends_with('}'));
    }

    #[test]
    fn renders_values_and_filter() {
        let uri = NamedNode::new("http://example.org/alice").unwrap();
        let text = person_query().to_sparql(Some(&uri), Some("?name != \"x\""));
        assert!(text.contains("VALUES ?p { <http://example.org/alice> }"));
        assert!(text.contains("FILTER(?name != \"x\")"));
    }

    #[test]
    fn literal_constants_are_escaped() {
        let term = TermPattern::literal("say \"hi\"");
        assert_eq!(term.to_string(), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn blank_nodes_become_anonymous_variables() {
        let term = TermPattern::BlankNode { id: "a1".into() };
        assert_eq!(term.variable_name().as_deref(), Some("_a1"));
        assert!(term.to_term().is_none());
    }

    #[test]
    fn patterns_deserialize_from_tagged_json() {
        let json = r#"{
            "type": "optional",
            "pattern": { "type": "bgp", "triples": [{
                "subject": { "type": "variable", "name": "p" },
                "predicate": { "type": "iri", "value": "http://ex.org/p" },
                "object": { "type": "literal", "value": "1", "datatype": "http://www.w3.org/2001/XMLSchema#integer" }
            }]}
        }"#;
        let pattern: GraphPattern = serde_json::from_str(json).unwrap();
        assert!(matches!(pattern, GraphPattern::Optional { .. }));
    }
}
