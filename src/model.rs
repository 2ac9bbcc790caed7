//! Entity definitions and the property plans derived from them.
//!
//! An [`EntityDefinition`] is what the outer tooling supplies: the canonical
//! read query plus one [`PropertySpec`] per result variable. Building the
//! plans cross-checks those declarations against what analysis found.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use oxigraph::model::vocab::{rdf, xsd};
use oxigraph::model::Term;
use serde::{Deserialize, Serialize};

use crate::algebra::ReadQuery;
use crate::analysis::QueryAnalysis;
use crate::error::{AnalysisError, AnalysisResult, ConfigError, ConfigResult};

/// How many values a property holds per entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cardinality {
    ExactlyOne,
    ZeroOrOne,
    Many,
}

impl Cardinality {
    pub fn nullable(self) -> bool {
        !matches!(self, Cardinality::ExactlyOne)
    }

    pub fn functional(self) -> bool {
        !matches!(self, Cardinality::Many)
    }
}

/// Declared value type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueType {
    Iri,
    String,
    LangString,
    Integer,
    Decimal,
    Double,
    Boolean,
    Date,
    DateTime,
    #[default]
    Any,
}

impl ValueType {
    /// Whether a term is an acceptable value.
    pub fn accepts(self, term: &Term) -> bool {
        let literal = match (self, term) {
            (ValueType::Any, _) => return true,
            (ValueType::Iri, Term::NamedNode(_)) => return true,
            (_, Term::Literal(literal)) => literal,
            _ => return false,
        };
        let datatype = literal.datatype();
        match self {
            ValueType::String => datatype == xsd::STRING,
            ValueType::LangString => datatype == rdf::LANG_STRING,
            ValueType::Integer => [
                xsd::INTEGER,
                xsd::INT,
                xsd::LONG,
                xsd::SHORT,
                xsd::BYTE,
                xsd::NON_NEGATIVE_INTEGER,
                xsd::POSITIVE_INTEGER,
                xsd::NEGATIVE_INTEGER,
                xsd::NON_POSITIVE_INTEGER,
            ]
            .contains(&datatype),
            ValueType::Decimal => datatype == xsd::DECIMAL,
            ValueType::Double => datatype == xsd::DOUBLE || datatype == xsd::FLOAT,
            ValueType::Boolean => datatype == xsd::BOOLEAN,
            ValueType::Date => datatype == xsd::DATE,
            ValueType::DateTime => datatype == xsd::DATE_TIME,
            ValueType::Iri | ValueType::Any => false,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Iri => "iri",
            ValueType::String => "string",
            ValueType::LangString => "lang-string",
            ValueType::Integer => "integer",
            ValueType::Decimal => "decimal",
            ValueType::Double => "double",
            ValueType::Boolean => "boolean",
            ValueType::Date => "date",
            ValueType::DateTime => "date-time",
            ValueType::Any => "any",
        }
    }
}

/// One declared property of an entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySpec {
    /// Result variable name, without `?`.
    pub variable: String,
    /// Field name exposed on the entity.
    pub field: String,
    pub cardinality: Cardinality,
    #[serde(default)]
    pub value_type: ValueType,
    /// Values are IRIs of other entities.
    #[serde(default)]
    pub entity_ref: bool,
    /// Class of referenced entities; the declaring class when absent.
    #[serde(default)]
    pub target_class: Option<String>,
}

impl PropertySpec {
    pub fn new(
        variable: impl Into<String>,
        field: impl Into<String>,
        cardinality: Cardinality,
        value_type: ValueType,
    ) -> Self {
        Self {
            variable: variable.into(),
            field: field.into(),
            cardinality,
            value_type,
            entity_ref: false,
            target_class: None,
        }
    }

    pub fn reference(mut self) -> Self {
        self.entity_ref = true;
        self.value_type = ValueType::Iri;
        self
    }

    pub fn reference_to(mut self, class: impl Into<String>) -> Self {
        self.target_class = Some(class.into());
        self.reference()
    }
}

/// Everything needed to build an entity class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    pub query: ReadQuery,
    pub properties: Vec<PropertySpec>,
    /// Literal update text replacing a synthesized template, by key.
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

impl EntityDefinition {
    /// Read a definition from a `.toml` or `.json` file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let parse_err = |message: String| ConfigError::Parse {
            path: path.display().to_string(),
            message,
        };
        if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&text).map_err(|e| parse_err(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| parse_err(e.to_string()))
        }
    }
}

/// A declared property reconciled with analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyPlan {
    pub variable: String,
    pub field: String,
    pub nullable: bool,
    pub functional: bool,
    pub value_type: ValueType,
    pub entity_ref: bool,
    pub target_class: Option<String>,
    /// Readable and writable as one direct triple.
    pub simple: bool,
}

impl PropertyPlan {
    pub fn cardinality_name(&self) -> &'static str {
        match (self.functional, self.nullable) {
            (true, false) => "exactly-one",
            (true, true) => "zero-or-one",
            (false, _) => "many",
        }
    }
}

/// Cross-check declarations against the projected variables, one to one.
pub fn build_plans(
    analysis: &QueryAnalysis,
    query: &ReadQuery,
    specs: &[PropertySpec],
) -> AnalysisResult<Vec<PropertyPlan>> {
    let declared: BTreeSet<&str> = specs.iter().map(|s| s.variable.as_str()).collect();
    let projected: BTreeSet<&str> = query.variables.iter().map(String::as_str).collect();

    if declared.len() != specs.len() {
        return Err(AnalysisError::ConfigMismatch {
            message: "a variable is declared more than once".into(),
        });
    }
    let extra: Vec<&str> = declared.difference(&projected).copied().collect();
    let missing: Vec<&str> = projected.difference(&declared).copied().collect();
    if !extra.is_empty() || !missing.is_empty() {
        return Err(AnalysisError::ConfigMismatch {
            message: format!(
                "declared but not found: [{}]; found but not declared: [{}]",
                extra.join(", "),
                missing.join(", ")
            ),
        });
    }
    if let Some(spec) = specs.iter().find(|s| s.variable == query.anchor) {
        return Err(AnalysisError::ConfigMismatch {
            message: format!("the anchor ?{} cannot be a property", spec.variable),
        });
    }

    Ok(specs
        .iter()
        .map(|spec| PropertyPlan {
            variable: spec.variable.clone(),
            field: spec.field.clone(),
            nullable: spec.cardinality.nullable(),
            functional: spec.cardinality.functional(),
            value_type: if spec.entity_ref {
                ValueType::Iri
            } else {
                spec.value_type
            },
            entity_ref: spec.entity_ref,
            target_class: spec.target_class.clone(),
            simple: analysis.is_simple(&spec.variable),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxigraph::model::{Literal, NamedNode};

    #[test]
    fn cardinality_flags() {
        assert!(!Cardinality::ExactlyOne.nullable());
        assert!(Cardinality::ZeroOrOne.functional());
        assert!(!Cardinality::Many.functional());
    }

    #[test]
    fn value_types_check_datatypes() {
        let int: Term = Literal::from(42_i64).into();
        let text: Term = Literal::new_simple_literal("x").into();
        let iri: Term = NamedNode::new("http://example.org/a").unwrap().into();
        assert!(ValueType::Integer.accepts(&int));
        assert!(!ValueType::Integer.accepts(&text));
        assert!(ValueType::String.accepts(&text));
        assert!(ValueType::Iri.accepts(&iri));
        assert!(!ValueType::Iri.accepts(&text));
        assert!(ValueType::Any.accepts(&iri));
    }

    #[test]
    fn property_specs_deserialize() {
        let spec: PropertySpec = serde_json::from_str(
            r#"{"variable":"friend","field":"friends","cardinality":"many","entity_ref":true}"#,
        )
        .unwrap();
        assert_eq!(spec.cardinality, Cardinality::Many);
        assert!(spec.entity_ref);
        assert_eq!(spec.value_type, ValueType::Any);
    }
}
