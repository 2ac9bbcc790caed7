//! Rich diagnostic error types for sparql-entity.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. Analysis errors are raised while an
//! entity class is built and abort it with no partial output; runtime errors
//! are raised synchronously at the call site.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type.
#[derive(Debug, Error, Diagnostic)]
pub enum EntityError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Analysis errors (build time)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum AnalysisError {
    #[error("declared properties do not match the read query: {message}")]
    #[diagnostic(
        code(entity::analysis::config_mismatch),
        help(
            "Every result variable of the read query needs exactly one property \
             declaration and every declaration must name a result variable."
        )
    )]
    ConfigMismatch { message: String },

    #[error("unsupported construct in read query: {construct}")]
    #[diagnostic(
        code(entity::analysis::unsupported),
        help(
            "Only groups, triple blocks, OPTIONAL, UNION and statically named GRAPH \
             blocks can be inverted into updates. Predicates must be IRIs."
        )
    )]
    UnsupportedConstruct { construct: String },

    #[error("variable ?{variable} is not reachable from the anchor ?{anchor}")]
    #[diagnostic(
        code(entity::analysis::unreachable),
        help(
            "No chain of triple patterns inside the variable's own optional scope \
             connects it to the anchor, so no write could reproduce its binding."
        )
    )]
    UnreachableVariable { variable: String, anchor: String },

    #[error("variable ?{variable} has {count} conflicting bindings: {contexts}")]
    #[diagnostic(
        code(entity::analysis::ambiguous_binding),
        help(
            "The variable is bound in separate OPTIONAL or UNION branches, so its \
             value depends on which branch matched. Bind it in one scope only."
        )
    )]
    AmbiguousBinding {
        variable: String,
        count: usize,
        contexts: String,
    },

    #[error("cardinality contract violated for ?{variable}: {message}")]
    #[diagnostic(
        code(entity::analysis::cardinality),
        help(
            "A property is required exactly when the read query binds it outside \
             every OPTIONAL/UNION. Fix the declared cardinality or the query."
        )
    )]
    CardinalityContractViolation { variable: String, message: String },

    #[error("more than {limit} anchor paths reach ?{variable}")]
    #[diagnostic(
        code(entity::analysis::path_limit),
        help("Raise `analysis.max_paths` in the configuration or simplify the read query.")
    )]
    PathLimitExceeded { variable: String, limit: usize },
}

/// Result type for analysis and synthesis.
pub type AnalysisResult<T> = std::result::Result<T, AnalysisError>;

// ---------------------------------------------------------------------------
// Runtime errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RuntimeError {
    #[error("integrity check {check} failed for {class}: {count} offending entities")]
    #[diagnostic(
        code(entity::runtime::integrity),
        help(
            "The store holds data the read query cannot represent faithfully, \
             usually from writes made outside this session."
        )
    )]
    IntegrityViolation {
        class: String,
        check: String,
        count: usize,
    },

    #[error("entity {uri} has been deleted")]
    #[diagnostic(
        code(entity::runtime::deleted),
        help("Deleted handles are terminal. Load or create a new entity instead.")
    )]
    MutationOnDeleted { uri: String },

    #[error("no {class} found for {uri}")]
    #[diagnostic(
        code(entity::runtime::load_miss),
        help("The canonical read query returned no rows for this URI.")
    )]
    LoadMiss { class: String, uri: String },

    #[error("no entity class named \"{name}\" is registered")]
    #[diagnostic(
        code(entity::runtime::unknown_class),
        help("Register the class definition with the session before using it.")
    )]
    UnknownClass { name: String },

    #[error("entity {uri} already exists in this session")]
    #[diagnostic(code(entity::runtime::exists))]
    AlreadyExists { uri: String },

    #[error("{class} has no property \"{field}\"")]
    #[diagnostic(code(entity::runtime::unknown_property))]
    UnknownProperty { class: String, field: String },

    #[error("property \"{field}\" is {actual}, operation needs {expected}")]
    #[diagnostic(
        code(entity::runtime::cardinality),
        help("Use set() for single-valued properties and add()/remove() for multi-valued ones.")
    )]
    CardinalityMismatch {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("value {value} does not match the declared type {expected} of \"{field}\"")]
    #[diagnostic(code(entity::runtime::type_mismatch))]
    TypeMismatch {
        field: String,
        expected: String,
        value: String,
    },

    #[error("required value missing: {name}")]
    #[diagnostic(
        code(entity::runtime::missing_value),
        help("Supply every required property, and every property sharing an optional block with a supplied one.")
    )]
    MissingValue { name: String },

    #[error("cannot merge {left} ({left_class}) with {right} ({right_class})")]
    #[diagnostic(code(entity::runtime::class_mismatch))]
    ClassMismatch {
        left: String,
        left_class: String,
        right: String,
        right_class: String,
    },

    #[error("no synthesized template for {key}")]
    #[diagnostic(code(entity::runtime::missing_template))]
    MissingTemplate { key: String },

    #[error("SPARQL endpoint error: {message}")]
    #[diagnostic(
        code(entity::runtime::endpoint),
        help("Check the endpoint URL, that the store is reachable, and the request text in the debug log.")
    )]
    Endpoint { message: String },

    #[error("malformed query results: {message}")]
    #[diagnostic(code(entity::runtime::results))]
    Results { message: String },
}

/// Result type for session operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    #[diagnostic(
        code(entity::config::read),
        help("Ensure the file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    #[diagnostic(
        code(entity::config::parse),
        help("Check the TOML/JSON syntax and field names.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write {path}")]
    #[diagnostic(code(entity::config::write))]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Convenience alias for functions crossing subsystems.
pub type EntityResult<T> = std::result::Result<T, EntityError>;
