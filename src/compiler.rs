//! Compiler builder and main orchestration

use crate::cache::{FileCache, IntrospectionCache, MemoryCache};
use crate::engine::ApiConfiguration;
use crate::error::{Error, Result};
use crate::introspection::{Introspector, UpstreamConfig};
use crate::merge::merge_apis;
use crate::types::Api;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

fn default_path_prefix() -> String {
    "/graphql".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    10
}

/// Everything needed to compile one gateway API, as loaded from YAML or JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Merged in this order; earlier upstreams win field metadata ties
    pub upstreams: Vec<UpstreamConfig>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub custom_claims: Vec<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    /// Defaults to an in-memory cache
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub offline: bool,
    #[serde(default = "default_request_timeout_seconds")]
    pub default_request_timeout_seconds: u64,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            upstreams: Vec::new(),
            roles: Vec::new(),
            custom_claims: Vec::new(),
            hosts: Vec::new(),
            path_prefix: default_path_prefix(),
            cache_dir: None,
            offline: false,
            default_request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl CompilerConfig {
    /// Parse a configuration document. JSON is accepted as a subset of YAML.
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&source)
    }

    fn validate(&self) -> Result<()> {
        if self.upstreams.is_empty() {
            return Err(anyhow::anyhow!("no upstreams configured").into());
        }
        let mut ids = HashSet::new();
        for upstream in &self.upstreams {
            if !ids.insert(upstream.id.as_str()) {
                return Err(Error::translation(&upstream.id, "upstream id is used twice"));
            }
        }
        Ok(())
    }
}

/// The compiled gateway API.
#[derive(Debug, Clone)]
pub struct Compilation {
    /// Per-upstream APIs, in configuration order
    pub upstreams: Vec<Api>,
    /// The merged API
    pub api: Api,
    pub configuration: ApiConfiguration,
}

/// Main compiler struct - entry point for the library
pub struct Compiler {
    config: CompilerConfig,
    introspector: Introspector,
}

impl Compiler {
    /// Create a new compiler builder
    pub fn builder() -> CompilerBuilder {
        CompilerBuilder::new()
    }

    pub fn from_config(config: CompilerConfig) -> Result<Self> {
        CompilerBuilder::from_config(config).build()
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn introspector(&self) -> &Introspector {
        &self.introspector
    }

    /// Introspect every upstream, merge them and project the engine configuration.
    pub async fn compile(&self) -> Result<Compilation> {
        let upstreams = self.introspector.introspect_all(&self.config.upstreams).await?;
        let api = merge_apis(&upstreams, &self.config.roles, &self.config.custom_claims)?;
        let configuration = ApiConfiguration::new(
            &api,
            self.config.hosts.clone(),
            self.config.path_prefix.clone(),
            self.config.default_request_timeout_seconds,
        );
        info!(
            upstreams = upstreams.len(),
            fields = api.fields.len(),
            "compiled gateway configuration"
        );
        Ok(Compilation {
            upstreams,
            api,
            configuration,
        })
    }
}

/// Builder for creating a Compiler
pub struct CompilerBuilder {
    config: CompilerConfig,
    cache: Option<Arc<dyn IntrospectionCache>>,
    client: Option<reqwest::Client>,
}

impl Default for CompilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CompilerBuilder {
    pub fn new() -> Self {
        Self::from_config(CompilerConfig::default())
    }

    pub fn from_config(config: CompilerConfig) -> Self {
        Self {
            config,
            cache: None,
            client: None,
        }
    }

    /// Add an upstream. Upstreams are merged in the order they are added.
    pub fn add_upstream(mut self, upstream: UpstreamConfig) -> Self {
        self.config.upstreams.push(upstream);
        self
    }

    pub fn add_upstreams<I>(mut self, upstreams: I) -> Self
    where
        I: IntoIterator<Item = UpstreamConfig>,
    {
        self.config.upstreams.extend(upstreams);
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_custom_claims<I, S>(mut self, claims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.custom_claims = claims.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.path_prefix = prefix.into();
        self
    }

    /// Cache introspection results as files under `dir`.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    /// Provide a custom introspection cache. Takes precedence over `cache_dir`.
    pub fn with_cache(mut self, cache: Arc<dyn IntrospectionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Provide the HTTP client used for introspection.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Build from cached introspection results only.
    pub fn offline(mut self, offline: bool) -> Self {
        self.config.offline = offline;
        self
    }

    pub fn default_request_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.default_request_timeout_seconds = seconds;
        self
    }

    /// Build the compiler
    pub fn build(self) -> Result<Compiler> {
        self.config.validate()?;
        let cache: Arc<dyn IntrospectionCache> = match (self.cache, &self.config.cache_dir) {
            (Some(cache), _) => cache,
            (None, Some(dir)) => Arc::new(FileCache::new(dir.clone())),
            (None, None) => Arc::new(MemoryCache::new()),
        };
        let mut introspector = Introspector::new(cache).offline(self.config.offline);
        if let Some(client) = self.client {
            introspector = introspector.with_client(client);
        }
        Ok(Compiler {
            config: self.config,
            introspector,
        })
    }
}
