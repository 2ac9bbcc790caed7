// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # sparql-entity
//!
//! Entity-level read/write access to a SPARQL store, driven by one read query
//! per entity type.
//!
//! ## Architecture
//!
//! - **Algebra** (`algebra`): the closed graph-pattern type read queries are given in
//! - **Analysis** (`analysis`): dependency edges, optional contexts and anchor paths
//! - **Model** (`model`): entity definitions and the property plans checked against analysis
//! - **Synthesis** (`synth`): creation, change/add/remove and integrity queries as templates
//! - **Runtime** (`runtime`): session, identity cache, changelog and SPARQL endpoints
//!
//! ## Library usage
//!
//! ```no_run
//! use sparql_entity::config::SessionConfig;
//! use sparql_entity::model::EntityDefinition;
//! use sparql_entity::runtime::Session;
//! use oxigraph::model::{Literal, NamedNode};
//!
//! let definition = EntityDefinition::load("person.toml".as_ref()).unwrap();
//! let mut session = Session::connect(SessionConfig::default());
//! session.register(definition).unwrap();
//!
//! let uri = NamedNode::new("http://example.org/alice").unwrap();
//! let alice = session.load("Person", &uri).unwrap();
//! session
//!     .set(&alice, "name", Some(Literal::new_simple_literal("Alice").into()))
//!     .unwrap();
//! session.commit().unwrap();
//! ```

pub mod algebra;
pub mod analysis;
pub mod config;
pub mod error;
pub mod model;
pub mod runtime;
pub mod synth;
