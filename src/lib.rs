//! # graphql-gateway-compiler
//!
//! Configuration compiler for a multi-source GraphQL gateway. Heterogeneous
//! upstreams (GraphQL services and federation subgraphs, OpenAPI/Swagger
//! REST APIs, gRPC descriptor sets, databases, key-value buckets) are
//! translated into one namespace-isolated GraphQL schema plus the routing
//! table an execution engine uses to resolve it.
//!
//! ## Pipeline
//!
//! - **Translate**: each upstream becomes an [`Api`] ([`openapi`], [`graphql`],
//!   [`grpc`], [`database`], [`kv`]).
//! - **Classify**: [`classifier`] decides which fields are root nodes and which
//!   are child nodes, and derives per-field metadata such as federation keys.
//! - **Namespace**: [`namespace_api`] prefixes types, root fields and custom
//!   directives so independent APIs cannot collide.
//! - **Merge**: [`merge_apis`] folds the APIs into one, adds the gateway's base
//!   directives and makes every type reachable from `Query`.
//! - **Emit**: [`ApiConfiguration`] is the artifact handed to the engine.
//!
//! [`Compiler`] drives the whole pipeline, with concurrent introspection,
//! retries and an introspection cache.
//!
//! ## Example
//!
//! ```rust,no_run
//! use graphql_gateway_compiler::{Compiler, CompilerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     graphql_gateway_compiler::init_tracing();
//!
//!     let config = CompilerConfig::from_file("gateway.yaml")?;
//!     let compilation = Compiler::from_config(config)?.compile().await?;
//!     println!("{}", compilation.configuration.to_json()?);
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod classifier;
pub mod compiler;
pub mod database;
pub mod engine;
pub mod error;
pub mod federation;
pub mod graphql;
pub mod grpc;
pub mod introspection;
pub mod jsonschema;
pub mod kv;
pub mod merge;
pub mod namespace;
pub mod openapi;
pub mod sdl;
pub mod types;

pub use cache::{FileCache, IntrospectionCache, MemoryCache};
pub use classifier::{classify, classify_sdl, Classification};
pub use compiler::{Compilation, Compiler, CompilerBuilder, CompilerConfig};
pub use engine::{ApiConfiguration, EngineConfiguration};
pub use error::{Error, Result, UnsupportedConstruct};
pub use federation::{EntityConfig, FederationConfig};
pub use introspection::{Introspector, UpstreamConfig, UpstreamSource};
pub use merge::merge_apis;
pub use namespace::{namespace_api, namespace_sdl};
pub use types::{
    Api, ArgumentConfiguration, DataSource, DataSourceCustom, DataSourceKind, FieldConfiguration,
    FieldConfigurations, TypeConfiguration, TypeField,
};

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Does nothing when a global subscriber is already set.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
