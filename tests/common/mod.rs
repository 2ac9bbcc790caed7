//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use oxigraph::model::{Literal, NamedNode, Term};
use oxigraph::store::Store;

use sparql_entity::algebra::{GraphPattern, NamedNodePattern, ReadQuery, TermPattern, TriplePattern};
use sparql_entity::config::SessionConfig;
use sparql_entity::error::{RuntimeError, RuntimeResult};
use sparql_entity::model::{Cardinality, EntityDefinition, PropertySpec, ValueType};
use sparql_entity::runtime::{LocalEndpoint, Session, Solution, SparqlEndpoint};

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const FOAF: &str = "http://xmlns.com/foaf/0.1/";
pub const EX: &str = "http://example.org/";

pub fn triple(s: &str, p: &str, o: TermPattern) -> TriplePattern {
    TriplePattern::new(TermPattern::var(s), NamedNodePattern::iri(p), o)
}

/// `?person a foaf:Person ; foaf:name ?name`, optional mailbox, friends and
/// a city reached through an address node.
pub fn person_definition() -> EntityDefinition {
    let pattern = GraphPattern::group(vec![
        GraphPattern::bgp(vec![
            triple("person", RDF_TYPE, TermPattern::iri(format!("{FOAF}Person"))),
            triple("person", &format!("{FOAF}name"), TermPattern::var("name")),
        ]),
        GraphPattern::optional(GraphPattern::bgp(vec![triple(
            "person",
            &format!("{FOAF}mbox"),
            TermPattern::var("email"),
        )])),
        GraphPattern::optional(GraphPattern::bgp(vec![triple(
            "person",
            &format!("{FOAF}knows"),
            TermPattern::var("friend"),
        )])),
        GraphPattern::optional(GraphPattern::bgp(vec![
            triple("person", &format!("{EX}address"), TermPattern::var("addr")),
            triple("addr", &format!("{EX}city"), TermPattern::var("city")),
        ])),
    ]);
    EntityDefinition {
        name: "Person".into(),
        query: ReadQuery::new(
            "person",
            vec!["name".into(), "email".into(), "friend".into(), "city".into()],
            pattern,
        ),
        properties: vec![
            PropertySpec::new("name", "name", Cardinality::ExactlyOne, ValueType::String),
            PropertySpec::new("email", "email", Cardinality::ZeroOrOne, ValueType::Iri),
            PropertySpec::new("friend", "friends", Cardinality::Many, ValueType::Iri).reference(),
            PropertySpec::new("city", "city", Cardinality::ZeroOrOne, ValueType::String),
        ],
        overrides: BTreeMap::new(),
    }
}

/// An office always has an address node; its city is optional.
pub fn office_definition() -> EntityDefinition {
    let pattern = GraphPattern::group(vec![
        GraphPattern::bgp(vec![
            triple("office", RDF_TYPE, TermPattern::iri(format!("{EX}Office"))),
            triple("office", &format!("{EX}name"), TermPattern::var("name")),
            triple("office", &format!("{EX}address"), TermPattern::var("a")),
        ]),
        GraphPattern::optional(GraphPattern::bgp(vec![triple(
            "a",
            &format!("{EX}city"),
            TermPattern::var("city"),
        )])),
    ]);
    EntityDefinition {
        name: "Office".into(),
        query: ReadQuery::new("office", vec!["name".into(), "city".into()], pattern),
        properties: vec![
            PropertySpec::new("name", "name", Cardinality::ExactlyOne, ValueType::String),
            PropertySpec::new("city", "city", Cardinality::ZeroOrOne, ValueType::String),
        ],
        overrides: BTreeMap::new(),
    }
}

/// A shop whose optional address block holds one city and many phones.
pub fn shop_definition() -> EntityDefinition {
    let pattern = GraphPattern::group(vec![
        GraphPattern::bgp(vec![
            triple("shop", RDF_TYPE, TermPattern::iri(format!("{EX}Shop"))),
            triple("shop", &format!("{EX}name"), TermPattern::var("name")),
        ]),
        GraphPattern::optional(GraphPattern::bgp(vec![
            triple("shop", &format!("{EX}addr"), TermPattern::var("a")),
            triple("a", &format!("{EX}city"), TermPattern::var("city")),
            triple("a", &format!("{EX}phone"), TermPattern::var("phone")),
        ])),
    ]);
    EntityDefinition {
        name: "Shop".into(),
        query: ReadQuery::new(
            "shop",
            vec!["name".into(), "city".into(), "phone".into()],
            pattern,
        ),
        properties: vec![
            PropertySpec::new("name", "name", Cardinality::ExactlyOne, ValueType::String),
            PropertySpec::new("city", "city", Cardinality::ZeroOrOne, ValueType::String),
            PropertySpec::new("phone", "phones", Cardinality::Many, ValueType::String),
        ],
        overrides: BTreeMap::new(),
    }
}

pub fn thing(path: &str) -> NamedNode {
    NamedNode::new(format!("{EX}{path}")).unwrap()
}

pub fn person(name: &str) -> NamedNode {
    NamedNode::new(format!("{EX}people/{name}")).unwrap()
}

pub fn text(value: &str) -> Term {
    Literal::new_simple_literal(value).into()
}

pub fn iri(value: &str) -> Term {
    NamedNode::new(value).unwrap().into()
}

pub fn store() -> Store {
    Store::new().unwrap()
}

/// A session over `store` with the person class registered.
pub fn session(store: &Store) -> Session {
    session_with(store, person_definition())
}

pub fn session_with(store: &Store, definition: EntityDefinition) -> Session {
    let mut session = Session::new(SessionConfig::default(), LocalEndpoint::from_store(store.clone()));
    session.register(definition).unwrap();
    session
}

pub fn seed(store: &Store, data: &str) {
    store
        .update(
            format!(
                "PREFIX foaf: <{FOAF}> PREFIX ex: <{EX}> PREFIX p: <{EX}people/> INSERT DATA {{ {data} }}"
            )
            .as_str(),
        )
        .unwrap();
}

/// Records every update request before passing it on.
pub struct RecordingEndpoint {
    pub inner: LocalEndpoint,
    pub updates: Rc<RefCell<Vec<String>>>,
}

impl SparqlEndpoint for RecordingEndpoint {
    fn select(&self, query: &str) -> RuntimeResult<Vec<Solution>> {
        self.inner.select(query)
    }

    fn update(&self, update: &str) -> RuntimeResult<()> {
        self.updates.borrow_mut().push(update.to_string());
        self.inner.update(update)
    }
}

/// Answers queries but refuses every update.
pub struct ReadOnlyEndpoint {
    pub inner: LocalEndpoint,
}

impl SparqlEndpoint for ReadOnlyEndpoint {
    fn select(&self, query: &str) -> RuntimeResult<Vec<Solution>> {
        self.inner.select(query)
    }

    fn update(&self, _update: &str) -> RuntimeResult<()> {
        Err(RuntimeError::Endpoint {
            message: "HTTP 403 from test endpoint".into(),
        })
    }
}
