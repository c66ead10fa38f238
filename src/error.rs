//! Error types for the configuration compiler

use std::fmt;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the compiler
///
/// Fatal errors carry enough context (upstream id, type or field name, source
/// position when the parser reports one) to locate the offending fragment.
#[derive(Error, Debug)]
pub enum Error {
    /// Two upstreams define the same type with incompatible shapes
    #[error(
        "schema collision on type `{type_name}`: {reason}; add a namespace to the conflicting APIs"
    )]
    SchemaCollision { type_name: String, reason: String },

    /// An upstream description could not be translated
    #[error("failed to translate upstream `{upstream}`: {message}")]
    Translation { upstream: String, message: String },

    /// An upstream could not be introspected
    #[error("introspection of upstream `{upstream}` failed: {message}")]
    Introspection { upstream: String, message: String },

    /// GraphQL schema errors
    #[error("GraphQL schema error: {0}")]
    Schema(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Protobuf descriptor errors
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] prost_reflect::DescriptorError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn translation(upstream: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Translation {
            upstream: upstream.into(),
            message: message.to_string(),
        }
    }

    pub fn introspection(upstream: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Introspection {
            upstream: upstream.into(),
            message: message.to_string(),
        }
    }

    /// Tag an error raised while processing a single upstream with that upstream's id.
    ///
    /// Collisions and already-tagged errors pass through unchanged.
    pub fn for_upstream(self, upstream: &str) -> Self {
        match self {
            Error::Schema(message) => Error::translation(upstream, message),
            Error::Yaml(e) => Error::translation(upstream, e),
            Error::Serialization(e) => Error::translation(upstream, e),
            Error::Descriptor(e) => Error::translation(upstream, e),
            Error::Http(e) => Error::introspection(upstream, e),
            Error::Io(e) => Error::introspection(upstream, e),
            other => other,
        }
    }

    /// Only introspection failures may be retried or served from cache.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Introspection { .. } | Error::Http(_))
    }

    /// Stable machine-readable code for the error
    pub fn code(&self) -> &'static str {
        match self {
            Error::SchemaCollision { .. } => "SCHEMA_COLLISION",
            Error::Translation { .. } => "TRANSLATION_ERROR",
            Error::Introspection { .. } => "INTROSPECTION_FAILURE",
            Error::Schema(_) => "SCHEMA_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Yaml(_) => "YAML_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Descriptor(_) => "DESCRIPTOR_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Other(_) => "UNKNOWN_ERROR",
        }
    }
}

/// A construct the compiler degrades gracefully instead of failing on.
///
/// These are logged, never returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsupportedConstruct {
    /// `oneOf`/`anyOf` with several branches outside status-code-union mode
    MultiBranchOneOf { branches: usize },
    /// `@key(fields: ...)` whose argument is not a parsable selection set
    MalformedKeySelection { type_name: String },
    /// A JSON-Schema keyword outside the supported subset
    UnknownSchemaKeyword { keyword: String },
    /// A JSON-Schema construct that could not be mapped at all
    UnmappableSchema { reason: String },
    /// An HTTP verb without a GraphQL root type
    UnsupportedHttpMethod { method: String },
    /// A parameter location the REST engine cannot render
    UnsupportedParameterLocation { name: String, location: String },
    /// A status-code response that is not an object type
    NonObjectStatusResponse { status_code: String },
    /// Client-streaming or bidirectional gRPC method
    StreamingMethod { method: String },
}

impl UnsupportedConstruct {
    /// Log this degradation with the location it was found at.
    pub fn warn(&self, context: &str) {
        tracing::warn!(context = context, "{}", self);
    }
}

impl fmt::Display for UnsupportedConstruct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsupportedConstruct::MultiBranchOneOf { branches } => write!(
                f,
                "oneOf with {branches} branches is only supported with status code unions; using the first inlinable branch"
            ),
            UnsupportedConstruct::MalformedKeySelection { type_name } => write!(
                f,
                "malformed @key selection on `{type_name}`; no key fields recorded"
            ),
            UnsupportedConstruct::UnknownSchemaKeyword { keyword } => {
                write!(f, "JSON schema keyword `{keyword}` is ignored")
            }
            UnsupportedConstruct::UnmappableSchema { reason } => {
                write!(f, "schema cannot be mapped: {reason}")
            }
            UnsupportedConstruct::UnsupportedHttpMethod { method } => {
                write!(f, "HTTP method {method} is not exposed")
            }
            UnsupportedConstruct::UnsupportedParameterLocation { name, location } => {
                write!(f, "parameter `{name}` in {location} is not supported")
            }
            UnsupportedConstruct::NonObjectStatusResponse { status_code } => write!(
                f,
                "response for status {status_code} is not an object and cannot join the status code union"
            ),
            UnsupportedConstruct::StreamingMethod { method } => {
                write!(f, "streaming method {method} is not exposed")
            }
        }
    }
}
