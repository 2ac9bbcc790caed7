//! Entity classes: a read query with its plans, templates and checks.

use std::collections::BTreeMap;

use oxigraph::model::{NamedNode, Term};

use crate::algebra::ReadQuery;
use crate::analysis::{AnalysisOptions, QueryAnalysis};
use crate::error::{AnalysisResult, RuntimeError, RuntimeResult};
use crate::model::{build_plans, EntityDefinition, PropertyPlan};
use crate::synth::{SynthesisCache, Synthesizer, Template, TemplateKey};

use super::endpoint::Solution;
use super::entity::FieldValue;
use super::integrity::{CheckKind, IntegrityCheck};

/// Everything the session needs to load and write one kind of entity.
#[derive(Debug)]
pub struct EntityClass {
    name: String,
    query: ReadQuery,
    analysis: QueryAnalysis,
    plans: Vec<PropertyPlan>,
    cache: SynthesisCache,
    checks: Vec<IntegrityCheck>,
}

impl EntityClass {
    /// Analyze, plan and synthesize. Any failure aborts with no partial class.
    pub fn build(definition: EntityDefinition, options: &AnalysisOptions) -> AnalysisResult<Self> {
        let EntityDefinition {
            name,
            query,
            properties,
            overrides,
        } = definition;

        let analysis = QueryAnalysis::analyze(&query, options)?;
        let plans = build_plans(&analysis, &query, &properties)?;
        let mut cache = SynthesisCache::with_overrides(&overrides)?;
        Synthesizer::new(&analysis, &plans).synthesize_all(&mut cache)?;

        let checks = cache
            .keys()
            .filter_map(|key| {
                let kind = match key {
                    TemplateKey::Validate(_) => CheckKind::Functional,
                    TemplateKey::Required(_) => CheckKind::Required,
                    _ => return None,
                };
                let plan = plans.iter().find(|p| Some(p.variable.as_str()) == key.variable())?;
                Some(IntegrityCheck {
                    key: key.clone(),
                    kind,
                    field: plan.field.clone(),
                    template: cache.get(key)?.clone(),
                })
            })
            .collect::<Vec<_>>();

        tracing::info!(
            class = %name,
            properties = plans.len(),
            simple = plans.iter().filter(|p| p.simple).count(),
            templates = cache.len(),
            checks = checks.len(),
            "built entity class"
        );

        Ok(Self {
            name,
            query,
            analysis,
            plans,
            cache,
            checks,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn query(&self) -> &ReadQuery {
        &self.query
    }

    pub fn analysis(&self) -> &QueryAnalysis {
        &self.analysis
    }

    pub fn plans(&self) -> &[PropertyPlan] {
        &self.plans
    }

    pub fn checks(&self) -> &[IntegrityCheck] {
        &self.checks
    }

    pub fn plan(&self, field: &str) -> RuntimeResult<&PropertyPlan> {
        self.plans
            .iter()
            .find(|p| p.field == field)
            .ok_or_else(|| RuntimeError::UnknownProperty {
                class: self.name.clone(),
                field: field.to_string(),
            })
    }

    pub fn template(&self, key: &TemplateKey) -> RuntimeResult<&Template> {
        self.cache.get(key).ok_or_else(|| RuntimeError::MissingTemplate {
            key: key.to_string(),
        })
    }

    pub fn has_template(&self, key: &TemplateKey) -> bool {
        self.cache.get(key).is_some()
    }

    /// Every template as parameterized text, by key.
    pub fn synthesis_table(&self) -> BTreeMap<String, String> {
        self.cache.table()
    }

    pub fn synthesis_cache(&self) -> &SynthesisCache {
        &self.cache
    }

    /// The read query, optionally pinned to one entity and filtered.
    pub fn canonical_query(&self, uri: Option<&NamedNode>, filter: Option<&str>) -> String {
        self.query.to_sparql(uri, filter)
    }

    /// The predicate of a simple property's single triple.
    pub(crate) fn simple_predicate(&self, plan: &PropertyPlan) -> Option<NamedNode> {
        self.analysis
            .simple_edge(&plan.variable)
            .map(|edge| edge.predicate.clone())
    }

    /// Split result rows by anchor, in first-seen order.
    pub(crate) fn group_rows(&self, rows: Vec<Solution>) -> Vec<(NamedNode, Vec<Solution>)> {
        let mut groups: Vec<(NamedNode, Vec<Solution>)> = Vec::new();
        for row in rows {
            let anchor = match row.get(self.query.anchor.as_str()) {
                Some(Term::NamedNode(uri)) => uri.clone(),
                other => {
                    tracing::warn!(class = %self.name, anchor = ?other, "skipping row without an IRI anchor");
                    continue;
                }
            };
            match groups.iter_mut().find(|(uri, _)| *uri == anchor) {
                Some((_, group)) => group.push(row),
                None => groups.push((anchor, vec![row])),
            }
        }
        groups
    }

    /// Fold the rows of one entity into field values.
    ///
    /// Multi-valued properties collect every distinct value across rows.
    pub(crate) fn materialize(&self, uri: &NamedNode, rows: &[Solution]) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        for plan in &self.plans {
            let mut values: Vec<Term> = Vec::new();
            for term in rows.iter().filter_map(|row| row.get(&plan.variable)) {
                if !values.contains(term) {
                    values.push(term.clone());
                }
            }
            let value = if plan.functional {
                if values.len() > 1 {
                    tracing::warn!(
                        class = %self.name,
                        entity = %uri,
                        field = %plan.field,
                        count = values.len(),
                        "single-valued property has several values, keeping the first"
                    );
                }
                FieldValue::Single(values.into_iter().next())
            } else {
                FieldValue::Many(values)
            };
            fields.insert(plan.field.clone(), value);
        }
        fields
    }
}
