//! Introspection cache
//!
//! Translated [`Api`]s are cached under a key derived from the upstream's
//! configuration and the contents of any local files it reads. A cached
//! entry lets a build survive an unreachable upstream and makes offline
//! builds possible.

use crate::error::Result;
use crate::types::Api;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Storage for translated upstreams.
///
/// # Example
///
/// ```rust
/// use graphql_gateway_compiler::cache::IntrospectionCache;
/// use graphql_gateway_compiler::{Api, Result};
///
/// struct NoCache;
///
/// #[async_trait::async_trait]
/// impl IntrospectionCache for NoCache {
///     async fn get(&self, _key: &str) -> Result<Option<Api>> {
///         Ok(None)
///     }
///
///     async fn set(&self, _key: &str, _api: &Api) -> Result<()> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait IntrospectionCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Api>>;

    async fn set(&self, key: &str, api: &Api) -> Result<()>;
}

/// Hex SHA-256 over the upstream configuration and a content fingerprint.
pub fn cache_key<T: Serialize>(config: &T, fingerprint: &[u8]) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(config)?);
    hasher.update(fingerprint);
    let digest = hasher.finalize();
    Ok(digest.iter().map(|byte| format!("{byte:02x}")).collect())
}

/// Process-local cache.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, Api>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl IntrospectionCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Api>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, api: &Api) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), api.clone());
        Ok(())
    }
}

/// One JSON file per key under a directory.
///
/// Unreadable or corrupt entries are treated as misses.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait::async_trait]
impl IntrospectionCache for FileCache {
    async fn get(&self, key: &str) -> Result<Option<Api>> {
        let path = self.path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(api) => {
                debug!(path = %path.display(), "introspection cache hit");
                Ok(Some(api))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt cache entry");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, api: &Api) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(api)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "stored introspection result");
        Ok(())
    }
}
