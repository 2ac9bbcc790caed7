//! Runtime entity protocol.
//!
//! - [`endpoint`]: the SPARQL store seam (HTTP and in-process)
//! - [`class`]: a built entity type with its templates and checks
//! - [`entity`]: identity-cached handles
//! - [`changelog`]: queued changes flushed in one request
//! - [`integrity`]: store validation against a class
//! - [`session`]: the unit of work tying them together

pub mod changelog;
pub mod class;
pub mod endpoint;
pub mod entity;
pub mod integrity;
pub mod session;

pub use changelog::{ChangeDescriptor, Changelog, ValueChange};
pub use class::EntityClass;
pub use endpoint::{HttpEndpoint, LocalEndpoint, Solution, SparqlEndpoint};
pub use entity::{EntityHandle, FieldValue};
pub use integrity::{CheckKind, IntegrityCheck, IntegrityListener, IntegrityViolation, LogListener};
pub use session::Session;
