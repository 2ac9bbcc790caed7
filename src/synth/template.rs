//! Structured query templates.
//!
//! Templates are synthesized once per entity class and bound many times.
//! Each position is a [`Token`], so bound values are always rendered through
//! the RDF term serializer and never spliced in as raw text. The same
//! template can also be written out as parameterized text (`${name}`
//! placeholders) for the override table; [`Template::Text`] holds such text
//! when a caller overrides a synthesized entry.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use oxigraph::model::{NamedNode, Term};

use crate::error::{RuntimeError, RuntimeResult};

/// One position of a triple template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    /// Bound at render time (`${name}` in text form).
    Param(String),
    /// A SPARQL variable, bound by the WHERE clause.
    Var(String),
    /// A blank node label.
    Blank(String),
    /// A constant from the read query.
    Term(Term),
}

impl Token {
    fn write(&self, out: &mut String, bindings: Option<&Bindings>) -> RuntimeResult<()> {
        match self {
            Token::Param(name) => match bindings {
                Some(b) => {
                    let term = b.get(name).ok_or_else(|| RuntimeError::MissingValue {
                        name: format!("template parameter {name}"),
                    })?;
                    let _ = write!(out, "{term}");
                }
                None => {
                    let _ = write!(out, "${{{name}}}");
                }
            },
            Token::Var(name) => {
                let _ = write!(out, "?{name}");
            }
            Token::Blank(label) => {
                let _ = write!(out, "_:{label}");
            }
            Token::Term(term) => {
                let _ = write!(out, "{term}");
            }
        }
        Ok(())
    }
}

/// `subject predicate object`, optionally inside a named graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TripleTemplate {
    pub subject: Token,
    pub predicate: NamedNode,
    pub object: Token,
    pub graph: Option<NamedNode>,
}

impl TripleTemplate {
    fn write(&self, out: &mut String, bindings: Option<&Bindings>) -> RuntimeResult<()> {
        self.subject.write(out, bindings)?;
        let _ = write!(out, " {} ", self.predicate);
        self.object.write(out, bindings)?;
        out.push_str(" .");
        Ok(())
    }

    pub fn mentions(&self, token: &Token) -> bool {
        &self.subject == token || &self.object == token
    }
}

/// Write triples grouped by graph, default graph first.
fn write_block(
    out: &mut String,
    triples: &[TripleTemplate],
    bindings: Option<&Bindings>,
    indent: &str,
) -> RuntimeResult<()> {
    let mut graphs: BTreeMap<Option<&str>, Vec<&TripleTemplate>> = BTreeMap::new();
    for triple in triples {
        graphs
            .entry(triple.graph.as_ref().map(|g| g.as_str()))
            .or_default()
            .push(triple);
    }
    for (graph, group) in graphs {
        let inner = match graph {
            Some(name) => {
                let _ = writeln!(out, "{indent}GRAPH <{name}> {{");
                format!("{indent}  ")
            }
            None => indent.to_string(),
        };
        for triple in group {
            out.push_str(&inner);
            triple.write(out, bindings)?;
            out.push('\n');
        }
        if graph.is_some() {
            let _ = writeln!(out, "{indent}}}");
        }
    }
    Ok(())
}

fn push_unique(target: &mut Vec<TripleTemplate>, triple: TripleTemplate) {
    if !target.contains(&triple) {
        target.push(triple);
    }
}

/// A SPARQL update: `INSERT DATA` or `DELETE/INSERT ... WHERE`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateTemplate {
    pub delete: Vec<TripleTemplate>,
    pub insert: Vec<TripleTemplate>,
    pub pattern: Vec<TripleTemplate>,
    /// Render as `INSERT DATA` (no WHERE clause, no variables).
    pub data: bool,
}

impl UpdateTemplate {
    pub fn insert_data(triples: Vec<TripleTemplate>) -> Self {
        let mut insert = Vec::new();
        for triple in triples {
            push_unique(&mut insert, triple);
        }
        Self {
            insert,
            data: true,
            ..Default::default()
        }
    }

    pub fn modify(
        delete: Vec<TripleTemplate>,
        insert: Vec<TripleTemplate>,
        pattern: Vec<TripleTemplate>,
    ) -> Self {
        Self {
            delete,
            insert,
            pattern,
            data: false,
        }
    }

    /// Fold several `INSERT DATA` templates into one, so blank node labels
    /// shared between them denote the same node.
    pub fn merge_data<'a>(parts: impl IntoIterator<Item = &'a UpdateTemplate>) -> Self {
        let mut merged = Self {
            data: true,
            ..Default::default()
        };
        for part in parts {
            for triple in &part.insert {
                push_unique(&mut merged.insert, triple.clone());
            }
        }
        merged
    }

    /// Parameters referenced anywhere in the template.
    pub fn params(&self) -> BTreeSet<&str> {
        self.delete
            .iter()
            .chain(&self.insert)
            .chain(&self.pattern)
            .flat_map(|t| [&t.subject, &t.object])
            .filter_map(|token| match token {
                Token::Param(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    fn write(&self, out: &mut String, bindings: Option<&Bindings>) -> RuntimeResult<()> {
        if self.data {
            out.push_str("INSERT DATA {\n");
            write_block(out, &self.insert, bindings, "  ")?;
            out.push('}');
            return Ok(());
        }
        if !self.delete.is_empty() {
            out.push_str("DELETE {\n");
            write_block(out, &self.delete, bindings, "  ")?;
            out.push_str("}\n");
        }
        if !self.insert.is_empty() {
            out.push_str("INSERT {\n");
            write_block(out, &self.insert, bindings, "  ")?;
            out.push_str("}\n");
        }
        out.push_str("WHERE {\n");
        write_block(out, &self.pattern, bindings, "  ")?;
        out.push('}');
        Ok(())
    }
}

/// A row filter of a select template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    NotEqual(String, String),
    IsBlank(String),
}

/// A `SELECT DISTINCT` query used for integrity checks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectTemplate {
    pub projection: Vec<String>,
    pub pattern: Vec<TripleTemplate>,
    pub filters: Vec<Filter>,
    /// Rendered as `FILTER NOT EXISTS { ... }`.
    pub absent: Vec<TripleTemplate>,
}

impl SelectTemplate {
    fn write(&self, out: &mut String, bindings: Option<&Bindings>) -> RuntimeResult<()> {
        out.push_str("SELECT DISTINCT");
        for var in &self.projection {
            let _ = write!(out, " ?{var}");
        }
        out.push_str(" WHERE {\n");
        write_block(out, &self.pattern, bindings, "  ")?;
        for filter in &self.filters {
            match filter {
                Filter::NotEqual(a, b) => {
                    let _ = writeln!(out, "  FILTER(?{a} != ?{b})");
                }
                Filter::IsBlank(v) => {
                    let _ = writeln!(out, "  FILTER(isBlank(?{v}))");
                }
            }
        }
        if !self.absent.is_empty() {
            out.push_str("  FILTER NOT EXISTS {\n");
            write_block(out, &self.absent, bindings, "    ")?;
            out.push_str("  }\n");
        }
        out.push('}');
        Ok(())
    }
}

/// A memoized synthesis result, or the caller's replacement text for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Template {
    Update(UpdateTemplate),
    Select(SelectTemplate),
    Text(String),
}

impl Template {
    /// Parameterized text, as persisted in the override table.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        // Unbound rendering cannot fail.
        let _ = match self {
            Template::Update(update) => update.write(&mut out, None),
            Template::Select(select) => select.write(&mut out, None),
            Template::Text(text) => {
                out.push_str(text);
                Ok(())
            }
        };
        out
    }

    /// Render with every `${name}` parameter bound.
    pub fn render(&self, bindings: &Bindings) -> RuntimeResult<String> {
        let mut out = String::new();
        match self {
            Template::Update(update) => update.write(&mut out, Some(bindings))?,
            Template::Select(select) => select.write(&mut out, Some(bindings))?,
            Template::Text(text) => substitute(text, bindings, &mut out)?,
        }
        Ok(out)
    }

    pub fn as_update(&self) -> Option<&UpdateTemplate> {
        match self {
            Template::Update(update) => Some(update),
            _ => None,
        }
    }

    pub fn is_override(&self) -> bool {
        matches!(self, Template::Text(_))
    }
}

/// Replace `${name}` placeholders in override text with serialized terms.
fn substitute(text: &str, bindings: &Bindings, out: &mut String) -> RuntimeResult<()> {
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(());
        };
        let name = &after[..end];
        let term = bindings.get(name).ok_or_else(|| RuntimeError::MissingValue {
            name: format!("template parameter {name}"),
        })?;
        let _ = write!(out, "{term}");
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(())
}

/// Parameter values for one rendering.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: BTreeMap<String, Term>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Term>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Term>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Term> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxigraph::model::Literal;

    fn iri(s: &str) -> NamedNode {
        NamedNode::new(s).unwrap()
    }

    fn name_triple(object: Token) -> TripleTemplate {
        TripleTemplate {
            subject: Token::Param("this".into()),
            predicate: iri("http://xmlns.com/foaf/0.1/name"),
            object,
            graph: None,
        }
    }

    #[test]
    fn insert_data_text_uses_placeholders() {
        let template = Template::Update(UpdateTemplate::insert_data(vec![name_triple(
            Token::Param("name".into()),
        )]));
        let text = template.to_text();
        assert!(text.starts_with("INSERT DATA {"));
        assert!(text.contains("${this} <http://xmlns.com/foaf/0.1/name> ${name} ."));
    }

    #[test]
    fn rendering_escapes_bound_literals() {
        let template = Template::Update(UpdateTemplate::insert_data(vec![name_triple(
            Token::Param("name".into()),
        )]));
        let bindings = Bindings::new()
            .with("this", iri("http://example.org/a"))
            .with("name", Literal::new_simple_literal("a\" } ; DROP ALL"));
        let text = template.render(&bindings).unwrap();
        assert!(text.contains("<http://example.org/a>"));
        assert!(text.contains("\"a\\\" } ; DROP ALL\""));
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let template = Template::Update(UpdateTemplate::insert_data(vec![name_triple(
            Token::Param("name".into()),
        )]));
        let bindings = Bindings::new().with("this", iri("http://example.org/a"));
        assert!(matches!(
            template.render(&bindings),
            Err(RuntimeError::MissingValue { .. })
        ));
    }

    #[test]
    fn override_text_substitutes_placeholders() {
        let template = Template::Text("DELETE DATA { ${this} <http://p> ${old} }".into());
        let bindings = Bindings::new()
            .with("this", iri("http://example.org/a"))
            .with("old", Literal::from(3_i64));
        let text = template.render(&bindings).unwrap();
        assert_eq!(
            text,
            "DELETE DATA { <http://example.org/a> <http://p> \"3\"^^<http://www.w3.org/2001/XMLSchema#integer> }"
        );
    }

    #[test]
    fn modify_groups_named_graph_triples() {
        let mut graphed = name_triple(Token::Var("n".into()));
        graphed.graph = Some(iri("http://example.org/g"));
        let update = UpdateTemplate::modify(
            vec![graphed.clone()],
            vec![],
            vec![graphed],
        );
        let text = Template::Update(update).to_text();
        assert!(text.starts_with("DELETE {\n  GRAPH <http://example.org/g> {"));
        assert!(text.contains("WHERE {\n  GRAPH <http://example.org/g> {"));
        assert!(!text.contains("INSERT"));
    }

    #[test]
    fn merged_data_dedupes_triples() {
        let a = UpdateTemplate::insert_data(vec![name_triple(Token::Blank("b".into()))]);
        let b = UpdateTemplate::insert_data(vec![
            name_triple(Token::Blank("b".into())),
            name_triple(Token::Param("x".into())),
        ]);
        let merged = UpdateTemplate::merge_data([&a, &b]);
        assert_eq!(merged.insert.len(), 2);
        assert!(merged.params().contains("x"));
    }

    #[test]
    fn select_renders_filters() {
        let select = SelectTemplate {
            projection: vec!["this".into()],
            pattern: vec![],
            filters: vec![Filter::NotEqual("v_1".into(), "v_2".into())],
            absent: vec![],
        };
        let text = Template::Select(select).to_text();
        assert!(text.starts_with("SELECT DISTINCT ?this WHERE {"));
        assert!(text.contains("FILTER(?v_1 != ?v_2)"));
    }
}
