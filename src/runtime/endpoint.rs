//! SPARQL endpoints: the one seam through which the session talks to a store.
//!
//! [`HttpEndpoint`] speaks the SPARQL 1.1 protocol over a blocking `ureq`
//! agent; [`LocalEndpoint`] runs against an in-process oxigraph store.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use oxigraph::model::{BlankNode, Literal, NamedNode, Term};
use oxigraph::sparql::QueryResults;
use oxigraph::store::Store;
use serde::Deserialize;

use crate::config::EndpointConfig;
use crate::error::{RuntimeError, RuntimeResult};

/// One result row: variable name (without `?`) → bound term.
pub type Solution = BTreeMap<String, Term>;

/// A store that answers SELECT queries and applies updates.
pub trait SparqlEndpoint {
    fn select(&self, query: &str) -> RuntimeResult<Vec<Solution>>;

    fn update(&self, update: &str) -> RuntimeResult<()>;
}

impl<E: SparqlEndpoint + ?Sized> SparqlEndpoint for Box<E> {
    fn select(&self, query: &str) -> RuntimeResult<Vec<Solution>> {
        (**self).select(query)
    }

    fn update(&self, update: &str) -> RuntimeResult<()> {
        (**self).update(update)
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// A remote endpoint reached over HTTP.
pub struct HttpEndpoint {
    agent: ureq::Agent,
    query_url: String,
    update_url: String,
}

impl HttpEndpoint {
    pub fn new(config: &EndpointConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self {
            agent,
            query_url: config.query_url.clone(),
            update_url: config
                .update_url
                .clone()
                .unwrap_or_else(|| config.query_url.clone()),
        }
    }

    fn post(&self, url: &str, content_type: &str, body: &str) -> RuntimeResult<ureq::Response> {
        match self
            .agent
            .post(url)
            .set("Content-Type", content_type)
            .set("Accept", "application/sparql-results+json")
            .send_string(body)
        {
            Ok(response) => Ok(response),
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                let preview: String = body.chars().take(500).collect();
                Err(RuntimeError::Endpoint {
                    message: format!("HTTP {code} from {url}: {preview}"),
                })
            }
            Err(ureq::Error::Transport(transport)) => Err(RuntimeError::Endpoint {
                message: format!("transport error reaching {url}: {transport}"),
            }),
        }
    }
}

impl SparqlEndpoint for HttpEndpoint {
    fn select(&self, query: &str) -> RuntimeResult<Vec<Solution>> {
        tracing::debug!(url = %self.query_url, "POST query");
        let response = self.post(&self.query_url, "application/sparql-query", query)?;
        let body = response.into_string().map_err(|e| RuntimeError::Endpoint {
            message: format!("failed to read response body: {e}"),
        })?;
        parse_results_json(&body)
    }

    fn update(&self, update: &str) -> RuntimeResult<()> {
        tracing::debug!(url = %self.update_url, "POST update");
        self.post(&self.update_url, "application/sparql-update", update)?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct ResultsDocument {
    results: ResultsBody,
}

#[derive(Deserialize)]
struct ResultsBody {
    bindings: Vec<HashMap<String, JsonTerm>>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum JsonTerm {
    Uri {
        value: String,
    },
    Literal {
        value: String,
        #[serde(rename = "xml:lang")]
        lang: Option<String>,
        datatype: Option<String>,
    },
    // SPARQL 1.0 JSON results, still emitted by some stores.
    TypedLiteral {
        value: String,
        datatype: String,
    },
    Bnode {
        value: String,
    },
}

impl JsonTerm {
    fn into_term(self) -> RuntimeResult<Term> {
        let bad = |e: &dyn std::fmt::Display| RuntimeError::Results {
            message: e.to_string(),
        };
        Ok(match self {
            JsonTerm::Uri { value } => NamedNode::new(value).map_err(|e| bad(&e))?.into(),
            JsonTerm::Bnode { value } => BlankNode::new(value).map_err(|e| bad(&e))?.into(),
            JsonTerm::Literal {
                value,
                lang: Some(lang),
                ..
            } => Literal::new_language_tagged_literal(value, lang)
                .map_err(|e| bad(&e))?
                .into(),
            JsonTerm::Literal {
                value,
                datatype: Some(datatype),
                ..
            }
            | JsonTerm::TypedLiteral { value, datatype } => {
                let datatype = NamedNode::new(datatype).map_err(|e| bad(&e))?;
                Literal::new_typed_literal(value, datatype).into()
            }
            JsonTerm::Literal { value, .. } => Literal::new_simple_literal(value).into(),
        })
    }
}

/// Parse an `application/sparql-results+json` SELECT document.
pub fn parse_results_json(body: &str) -> RuntimeResult<Vec<Solution>> {
    let document: ResultsDocument = serde_json::from_str(body).map_err(|e| RuntimeError::Results {
        message: e.to_string(),
    })?;
    document
        .results
        .bindings
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(var, term)| Ok((var, term.into_term()?)))
                .collect()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// In-process
// ---------------------------------------------------------------------------

/// An endpoint backed by an oxigraph store in this process.
pub struct LocalEndpoint {
    store: Store,
}

impl LocalEndpoint {
    pub fn in_memory() -> RuntimeResult<Self> {
        let store = Store::new().map_err(|e| RuntimeError::Endpoint {
            message: format!("failed to open in-memory store: {e}"),
        })?;
        Ok(Self { store })
    }

    pub fn from_store(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

impl SparqlEndpoint for LocalEndpoint {
    fn select(&self, query: &str) -> RuntimeResult<Vec<Solution>> {
        let results = self.store.query(query).map_err(|e| RuntimeError::Endpoint {
            message: format!("SPARQL query failed: {e}"),
        })?;
        match results {
            QueryResults::Solutions(solutions) => {
                let mut rows = Vec::new();
                for solution in solutions {
                    let solution = solution.map_err(|e| RuntimeError::Endpoint {
                        message: format!("solution error: {e}"),
                    })?;
                    rows.push(
                        solution
                            .iter()
                            .map(|(var, term)| (var.as_str().to_string(), term.clone()))
                            .collect(),
                    );
                }
                Ok(rows)
            }
            _ => Err(RuntimeError::Results {
                message: "expected SELECT solutions".into(),
            }),
        }
    }

    fn update(&self, update: &str) -> RuntimeResult<()> {
        self.store.update(update).map_err(|e| RuntimeError::Endpoint {
            message: format!("SPARQL update failed: {e}"),
        })
    }
}
