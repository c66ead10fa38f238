//! Upstream introspection
//!
//! Each configured upstream is fetched (or read from disk), translated into
//! an [`Api`], namespaced and cached. Network failures are retried with a
//! linear backoff; when retries run out, a stale cache entry is used instead.
//! Several upstreams are introspected concurrently, and a single upstream can
//! be re-introspected on an interval until shutdown.

use crate::cache::{cache_key, IntrospectionCache, MemoryCache};
use crate::database::{self, DatabaseIntrospection, DatabaseOptions};
use crate::error::{Error, Result};
use crate::graphql::{self, GraphqlOptions, INTROSPECTION_QUERY, SERVICE_SDL_QUERY};
use crate::grpc::{self, GrpcOptions};
use crate::kv::{self, KvOptions};
use crate::namespace::namespace_api;
use crate::openapi::{self, OpenApiDocument, OpenApiOptions};
use crate::types::Api;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

static HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// The process-wide HTTP client used for every introspection request.
pub fn http_client() -> &'static reqwest::Client {
    HTTP_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .user_agent(concat!("graphql-gateway-compiler/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            })
    })
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

/// How hard to try reaching an upstream, and how often to refresh it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionPolicy {
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Delay before the first retry; later retries wait proportionally longer
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub polling_interval_seconds: Option<u64>,
    #[serde(default)]
    pub disable_cache: bool,
}

impl Default for IntrospectionPolicy {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            polling_interval_seconds: None,
            disable_cache: false,
        }
    }
}

/// One configured upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub id: String,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Root fields that keep their name when namespacing
    #[serde(default)]
    pub skip_rename_root_fields: Vec<String>,
    #[serde(default)]
    pub request_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub introspection: IntrospectionPolicy,
    #[serde(flatten)]
    pub source: UpstreamSource,
}

/// Where an upstream's description comes from, by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UpstreamSource {
    Graphql(GraphqlUpstream),
    Openapi(OpenApiUpstream),
    Grpc(GrpcUpstream),
    Database(DatabaseUpstream),
    Kv(KvOptions),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphqlUpstream {
    /// Read the SDL from this file instead of introspecting `url`
    #[serde(default)]
    pub schema_file: Option<PathBuf>,
    #[serde(flatten)]
    pub options: GraphqlOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenApiUpstream {
    #[serde(default)]
    pub spec_file: Option<PathBuf>,
    #[serde(default)]
    pub spec_url: Option<String>,
    #[serde(flatten)]
    pub options: OpenApiOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrpcUpstream {
    /// Encoded `FileDescriptorSet`, as written by `protoc --descriptor_set_out`
    pub descriptor_set_file: PathBuf,
    #[serde(flatten)]
    pub options: GrpcOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseUpstream {
    /// JSON written by the database introspection tool
    pub introspection_file: PathBuf,
    #[serde(flatten)]
    pub options: DatabaseOptions,
}

impl UpstreamConfig {
    /// Local files whose contents are part of the cache key.
    pub fn local_files(&self) -> Vec<&Path> {
        match &self.source {
            UpstreamSource::Graphql(graphql) => graphql.schema_file.as_deref().into_iter().collect(),
            UpstreamSource::Openapi(openapi) => openapi.spec_file.as_deref().into_iter().collect(),
            UpstreamSource::Grpc(grpc) => vec![grpc.descriptor_set_file.as_path()],
            UpstreamSource::Database(db) => vec![db.introspection_file.as_path()],
            UpstreamSource::Kv(_) => Vec::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or_default()
    }
}

/// Drives upstream introspection against a shared HTTP client and cache.
#[derive(Clone)]
pub struct Introspector {
    client: reqwest::Client,
    cache: Arc<dyn IntrospectionCache>,
    offline: bool,
}

impl Default for Introspector {
    fn default() -> Self {
        Self::new(Arc::new(MemoryCache::new()))
    }
}

impl Introspector {
    pub fn new(cache: Arc<dyn IntrospectionCache>) -> Self {
        Self {
            client: http_client().clone(),
            cache,
            offline: false,
        }
    }

    /// Only consult the cache; a miss is fatal.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Introspect one upstream, falling back to the cache as configured.
    pub async fn introspect(&self, upstream: &UpstreamConfig) -> Result<Api> {
        let id = upstream.id.as_str();
        let key = cache_key(upstream, &fingerprint(upstream).await)?;

        if self.offline {
            return match self.cache.get(&key).await.map_err(|e| e.for_upstream(id))? {
                Some(api) => {
                    debug!(upstream = id, "using cached introspection (offline)");
                    Ok(api)
                }
                None => Err(Error::introspection(
                    id,
                    "offline mode is enabled and no cached introspection exists",
                )),
            };
        }

        let policy = &upstream.introspection;
        let mut attempt = 0;
        let failure = loop {
            match self.load(upstream).await {
                Ok(api) => {
                    if !policy.disable_cache {
                        if let Err(e) = self.cache.set(&key, &api).await {
                            warn!(upstream = id, error = %e, "failed to cache introspection result");
                        }
                    }
                    return Ok(api);
                }
                Err(e) if e.is_recoverable() && attempt < policy.retries => {
                    attempt += 1;
                    let delay = Duration::from_millis(policy.retry_delay_ms * u64::from(attempt));
                    warn!(upstream = id, attempt, error = %e, "introspection failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break e,
            }
        };

        if failure.is_recoverable() && !policy.disable_cache {
            if let Some(api) = self.cache.get(&key).await.map_err(|e| e.for_upstream(id))? {
                warn!(upstream = id, error = %failure, "introspection failed, using cached result");
                return Ok(api);
            }
        }
        Err(failure)
    }

    /// Introspect every upstream concurrently. Results keep the input order.
    pub async fn introspect_all(&self, upstreams: &[UpstreamConfig]) -> Result<Vec<Api>> {
        try_join_all(upstreams.iter().map(|upstream| self.introspect(upstream))).await
    }

    /// Re-introspect `upstream` every `polling_interval_seconds` until `shutdown` flips to true.
    ///
    /// Each iteration, `on_update` included, finishes before the next sleep starts.
    pub async fn poll<F, Fut>(
        &self,
        upstream: &UpstreamConfig,
        mut shutdown: watch::Receiver<bool>,
        mut on_update: F,
    ) -> Result<()>
    where
        F: FnMut(Api) -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
    {
        let Some(seconds) = upstream.introspection.polling_interval_seconds else {
            debug!(upstream = %upstream.id, "polling disabled");
            return Ok(());
        };
        let interval = Duration::from_secs(seconds.max(1));
        info!(upstream = %upstream.id, interval_seconds = seconds, "polling upstream");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            match self.introspect(upstream).await {
                Ok(api) => {
                    if let Err(e) = on_update(api).await {
                        warn!(upstream = %upstream.id, error = %e, "polling update handler failed");
                    }
                }
                Err(e) => warn!(upstream = %upstream.id, error = %e, "polling introspection failed"),
            }
        }
        info!(upstream = %upstream.id, "stopped polling");
        Ok(())
    }

    /// Translate and namespace one upstream, without the cache.
    async fn load(&self, upstream: &UpstreamConfig) -> Result<Api> {
        let id = upstream.id.as_str();
        let mut api = self.translate(upstream).await.map_err(|e| e.for_upstream(id))?;
        if let Some(seconds) = upstream.request_timeout_seconds {
            for data_source in &mut api.data_sources {
                data_source.request_timeout_seconds.get_or_insert(seconds);
            }
        }
        let api = namespace_api(&api, upstream.namespace(), &upstream.skip_rename_root_fields)
            .map_err(|e| e.for_upstream(id))?;
        info!(
            upstream = id,
            namespace = upstream.namespace(),
            data_sources = api.data_sources.len(),
            "introspected upstream"
        );
        Ok(api)
    }

    async fn translate(&self, upstream: &UpstreamConfig) -> Result<Api> {
        let id = upstream.id.as_str();
        match &upstream.source {
            UpstreamSource::Graphql(graphql) => self.graphql(upstream, graphql).await,
            UpstreamSource::Openapi(openapi) => {
                let source = match (&openapi.spec_file, &openapi.spec_url) {
                    (Some(path), _) => tokio::fs::read_to_string(path).await?,
                    (None, Some(url)) => self.fetch_text(id, url, upstream.request_timeout_seconds).await?,
                    (None, None) => {
                        return Err(Error::translation(id, "OpenAPI upstream needs spec_file or spec_url"))
                    }
                };
                let document = OpenApiDocument::parse(&source)?;
                let mut options = openapi.options.clone();
                if options.request_timeout_seconds.is_none() {
                    options.request_timeout_seconds = upstream.request_timeout_seconds;
                }
                openapi::translate(id, &document, &options)
            }
            UpstreamSource::Grpc(grpc) => {
                let descriptor_set = tokio::fs::read(&grpc.descriptor_set_file).await?;
                grpc::translate(id, &descriptor_set, &grpc.options)
            }
            UpstreamSource::Database(db) => {
                let bytes = tokio::fs::read(&db.introspection_file).await?;
                let introspection: DatabaseIntrospection = serde_json::from_slice(&bytes)?;
                database::translate(id, &introspection, &db.options)
            }
            UpstreamSource::Kv(options) => kv::translate(id, options),
        }
    }

    async fn graphql(&self, upstream: &UpstreamConfig, graphql: &GraphqlUpstream) -> Result<Api> {
        let id = upstream.id.as_str();
        let options = &graphql.options;
        if let Some(path) = &graphql.schema_file {
            let sdl = tokio::fs::read_to_string(path).await?;
            let service_sdl = options.federation.then_some(sdl.as_str());
            return graphql::api_from_sdl(id, &sdl, service_sdl, options);
        }
        if options.url.is_empty() {
            return Err(Error::translation(id, "GraphQL upstream needs url or schema_file"));
        }

        if options.federation {
            let response = self
                .graphql_request(id, options, SERVICE_SDL_QUERY, upstream.request_timeout_seconds)
                .await?;
            let sdl = response
                .pointer("/data/_service/sdl")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::introspection(id, "subgraph returned no `_service.sdl`"))?;
            return graphql::api_from_sdl(id, sdl, Some(sdl), options);
        }

        let response = self
            .graphql_request(id, options, INTROSPECTION_QUERY, upstream.request_timeout_seconds)
            .await?;
        let sdl = graphql::introspection_to_sdl(&response)?;
        graphql::api_from_sdl(id, &sdl, None, options)
    }

    async fn graphql_request(
        &self,
        id: &str,
        options: &GraphqlOptions,
        query: &str,
        timeout_seconds: Option<u64>,
    ) -> Result<Value> {
        let mut request = self.client.post(&options.url).json(&json!({ "query": query }));
        for (name, values) in &options.headers {
            for value in values {
                request = request.header(name.as_str(), value.as_str());
            }
        }
        if let Some(seconds) = timeout_seconds {
            request = request.timeout(Duration::from_secs(seconds));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::introspection(id, format!("upstream answered {status}")));
        }
        let body: Value = response.json().await?;
        if body.get("data").map_or(true, Value::is_null) {
            let errors = body.get("errors").cloned().unwrap_or(Value::Null);
            return Err(Error::introspection(id, format!("upstream returned no data: {errors}")));
        }
        Ok(body)
    }

    async fn fetch_text(&self, id: &str, url: &str, timeout_seconds: Option<u64>) -> Result<String> {
        let mut request = self.client.get(url);
        if let Some(seconds) = timeout_seconds {
            request = request.timeout(Duration::from_secs(seconds));
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::introspection(id, format!("{url} answered {status}")));
        }
        Ok(response.text().await?)
    }
}

/// Concatenated contents of the upstream's local files.
///
/// Unreadable files contribute nothing; translation reports them.
async fn fingerprint(upstream: &UpstreamConfig) -> Vec<u8> {
    let mut fingerprint = Vec::new();
    for path in upstream.local_files() {
        match tokio::fs::read(path).await {
            Ok(bytes) => fingerprint.extend(bytes),
            Err(e) => debug!(path = %path.display(), error = %e, "file not fingerprinted"),
        }
    }
    fingerprint
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    const ACCOUNTS: &str = "type Query { me: User } type User { id: ID! name: String }";

    fn sdl_upstream(dir: &Path, id: &str, sdl: &str) -> UpstreamConfig {
        let path = dir.join(format!("{id}.graphql"));
        std::fs::write(&path, sdl).unwrap();
        serde_yaml::from_str(&format!(
            "id: {id}\nkind: graphql\nurl: http://{id}.local/graphql\nschema_file: {}\nnamespace: {id}\n",
            path.display()
        ))
        .unwrap()
    }

    fn unreachable_upstream() -> UpstreamConfig {
        serde_yaml::from_str(
            "id: down\nkind: graphql\nurl: http://127.0.0.1:9/graphql\nintrospection:\n  retries: 1\n  retry_delay_ms: 0\n",
        )
        .unwrap()
    }

    #[test]
    fn upstream_kinds_deserialize() {
        let upstreams: Vec<UpstreamConfig> = serde_yaml::from_str(
            r#"
- id: pets
  kind: openapi
  spec_url: https://pets.example/openapi.json
  status_code_unions: true
- id: catalog
  kind: grpc
  descriptor_set_file: catalog.pb
  endpoint: http://catalog:50051
- id: db
  kind: database
  introspection_file: db.json
  database: postgresql
  database_url: postgresql://localhost/app
- id: profiles
  kind: kv
  server_url: nats://localhost:4222
  bucket: profiles
  schema: { type: object }
  request_timeout_seconds: 5
"#,
        )
        .unwrap();

        let UpstreamSource::Openapi(openapi) = &upstreams[0].source else {
            panic!("expected openapi");
        };
        assert!(openapi.options.status_code_unions);
        assert_eq!(upstreams[0].introspection, IntrospectionPolicy::default());
        let UpstreamSource::Grpc(grpc) = &upstreams[1].source else {
            panic!("expected grpc");
        };
        assert_eq!(grpc.options.endpoint, "http://catalog:50051");
        assert_eq!(upstreams[1].local_files(), vec![Path::new("catalog.pb")]);
        assert!(matches!(upstreams[2].source, UpstreamSource::Database(_)));
        let UpstreamSource::Kv(kv) = &upstreams[3].source else {
            panic!("expected kv");
        };
        assert_eq!(kv.history, 1);
        assert_eq!(upstreams[3].request_timeout_seconds, Some(5));
    }

    #[tokio::test]
    async fn local_schema_is_translated_namespaced_and_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(MemoryCache::new());
        let introspector = Introspector::new(cache.clone());
        let upstream = sdl_upstream(dir.path(), "accounts", ACCOUNTS);

        let api = introspector.introspect(&upstream).await.unwrap();
        assert_eq!(api.namespace, "accounts");
        assert!(api.schema.contains("accounts_me: accounts_User"));
        assert_eq!(cache.len().await, 1);

        let offline = Introspector::new(cache.clone()).offline(true);
        assert_eq!(offline.introspect(&upstream).await.unwrap(), api);

        std::fs::write(upstream.local_files()[0], "type Query { changed: Int }").unwrap();
        let err = offline.introspect(&upstream).await.unwrap_err();
        assert_eq!(err.code(), "INTROSPECTION_FAILURE");
    }

    #[tokio::test]
    async fn unreachable_upstream_falls_back_to_cache() {
        let cache = Arc::new(MemoryCache::new());
        let introspector = Introspector::new(cache.clone());
        let upstream = unreachable_upstream();

        let err = introspector.introspect(&upstream).await.unwrap_err();
        assert!(err.is_recoverable(), "{err}");

        let stale = Api::new("type Query { stale: Int }");
        cache
            .set(&cache_key(&upstream, b"").unwrap(), &stale)
            .await
            .unwrap();
        assert_eq!(introspector.introspect(&upstream).await.unwrap(), stale);
    }

    #[tokio::test]
    async fn missing_schema_file_is_tagged_and_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut upstream = sdl_upstream(dir.path(), "accounts", ACCOUNTS);
        upstream.introspection.retries = 0;
        std::fs::remove_file(dir.path().join("accounts.graphql")).unwrap();

        let cache = Arc::new(MemoryCache::new());
        let introspector = Introspector::new(cache.clone());
        let err = introspector.introspect(&upstream).await.unwrap_err();
        assert_eq!(err.code(), "INTROSPECTION_FAILURE");
        assert!(err.to_string().contains("`accounts`"), "{err}");

        let stale = Api::new(ACCOUNTS);
        cache
            .set(&cache_key(&upstream, &fingerprint(&upstream).await).unwrap(), &stale)
            .await
            .unwrap();
        assert_eq!(introspector.introspect(&upstream).await.unwrap(), stale);
    }

    #[tokio::test]
    async fn translation_errors_are_not_retried_or_masked() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = sdl_upstream(dir.path(), "broken", "type Query {");
        let cache = Arc::new(MemoryCache::new());
        cache
            .set(
                &cache_key(&upstream, &fingerprint(&upstream).await).unwrap(),
                &Api::new("type Query { stale: Int }"),
            )
            .await
            .unwrap();
        let err = Introspector::new(cache).introspect(&upstream).await.unwrap_err();
        assert_eq!(err.code(), "TRANSLATION_ERROR");
        assert!(err.to_string().contains("broken"));
    }

    #[tokio::test]
    async fn introspect_all_keeps_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let upstreams = vec![
            sdl_upstream(dir.path(), "b", "type Query { b: Int }"),
            sdl_upstream(dir.path(), "a", "type Query { a: Int }"),
        ];
        let apis = Introspector::default().introspect_all(&upstreams).await.unwrap();
        let namespaces: Vec<_> = apis.iter().map(|api| api.namespace.as_str()).collect();
        assert_eq!(namespaces, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn polling_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut upstream = sdl_upstream(dir.path(), "accounts", ACCOUNTS);
        upstream.introspection.polling_interval_seconds = Some(1);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (updates_tx, mut updates_rx) = mpsc::channel(4);
        let introspector = Introspector::default();
        let task = tokio::spawn(async move {
            introspector
                .poll(&upstream, shutdown_rx, move |api| {
                    let updates_tx = updates_tx.clone();
                    async move {
                        let _ = updates_tx.send(api).await;
                        Ok(())
                    }
                })
                .await
        });

        let api = updates_rx.recv().await.unwrap();
        assert_eq!(api.namespace, "accounts");
        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn polling_is_a_no_op_without_interval() {
        let (_tx, rx) = watch::channel(false);
        let upstream = unreachable_upstream();
        Introspector::default()
            .poll(&upstream, rx, |_| async { Ok(()) })
            .await
            .unwrap();
    }
}
