//! Integrity checks: stored data the read query cannot represent faithfully.

use oxigraph::model::Term;

use crate::error::RuntimeResult;
use crate::synth::{Bindings, Template, TemplateKey, THIS};

use super::endpoint::SparqlEndpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    /// A required property has no value.
    Required,
    /// A single-valued property has more than one value.
    Functional,
}

/// One prepared integrity query.
#[derive(Debug, Clone)]
pub struct IntegrityCheck {
    pub key: TemplateKey,
    pub kind: CheckKind,
    pub field: String,
    pub template: Template,
}

impl IntegrityCheck {
    /// Anchors offending this check.
    pub fn run(&self, endpoint: &dyn SparqlEndpoint) -> RuntimeResult<Vec<Term>> {
        let query = self.template.render(&Bindings::new())?;
        let rows = endpoint.select(&query)?;
        Ok(rows.into_iter().filter_map(|mut row| row.remove(THIS)).collect())
    }
}

/// A failed check with the entities that fail it.
#[derive(Debug, Clone)]
pub struct IntegrityViolation {
    pub class: String,
    pub check: String,
    pub kind: CheckKind,
    pub field: String,
    pub offenders: Vec<Term>,
}

/// Receives violations found by on-demand revalidation.
pub trait IntegrityListener {
    fn on_violation(&mut self, violation: &IntegrityViolation);
}

impl<F: FnMut(&IntegrityViolation)> IntegrityListener for F {
    fn on_violation(&mut self, violation: &IntegrityViolation) {
        self(violation)
    }
}

/// Reports violations as warnings.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogListener;

impl IntegrityListener for LogListener {
    fn on_violation(&mut self, violation: &IntegrityViolation) {
        tracing::warn!(
            class = %violation.class,
            check = %violation.check,
            field = %violation.field,
            offenders = violation.offenders.len(),
            "integrity violation"
        );
    }
}

/// Run every check, collecting the failing ones.
pub fn run_checks(
    class: &str,
    checks: &[IntegrityCheck],
    endpoint: &dyn SparqlEndpoint,
) -> RuntimeResult<Vec<IntegrityViolation>> {
    let mut violations = Vec::new();
    for check in checks {
        let offenders = check.run(endpoint)?;
        tracing::debug!(class, check = %check.key, offenders = offenders.len(), "ran integrity check");
        if !offenders.is_empty() {
            violations.push(IntegrityViolation {
                class: class.to_string(),
                check: check.key.to_string(),
                kind: check.kind,
                field: check.field.clone(),
                offenders,
            });
        }
    }
    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::endpoint::LocalEndpoint;

    #[test]
    fn check_returns_offending_anchors() {
        let endpoint = LocalEndpoint::in_memory().unwrap();
        endpoint
            .update(
                "INSERT DATA { <http://example.org/a> a <http://example.org/T> . \
                 <http://example.org/b> a <http://example.org/T> . \
                 <http://example.org/b> <http://example.org/name> \"B\" }",
            )
            .unwrap();
        let check = IntegrityCheck {
            key: TemplateKey::Required("name".into()),
            kind: CheckKind::Required,
            field: "name".into(),
            template: Template::Text(
                "SELECT ?this WHERE { ?this a <http://example.org/T> \
                 FILTER NOT EXISTS { ?this <http://example.org/name> ?n } }"
                    .into(),
            ),
        };
        let violations = run_checks("Thing", &[check], &endpoint).unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].check, "required-name");
        assert_eq!(violations[0].offenders.len(), 1);
    }

    #[test]
    fn closures_are_listeners() {
        let mut seen = Vec::new();
        let mut listener = |v: &IntegrityViolation| seen.push(v.field.clone());
        listener.on_violation(&IntegrityViolation {
            class: "Thing".into(),
            check: "validate-x".into(),
            kind: CheckKind::Functional,
            field: "x".into(),
            offenders: Vec::new(),
        });
        assert_eq!(seen, vec!["x".to_string()]);
    }
}
