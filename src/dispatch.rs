//! Backend selection and cache-first render dispatch.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::{
    EngineLoader, InProcessEngineBackend, LocalProcessBackend, RemoteServerBackend,
    RenderBackend,
};
use crate::cache::{ArtifactCache, EvictionReport};
use crate::config::{ConfigHandle, RenderConfig};
use crate::debounce::Fired;
use crate::error::{RenderError, Result};
use crate::host::PathResolver;
use crate::types::{ArtifactKind, DiagramKey, RenderRequest, RenderedDiagram};
use crate::{encoder, source};

/// Runtime environment class of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Can spawn processes and load engine modules.
    Desktop,
    /// Sandboxed; only the remote server is usable.
    Mobile,
}

impl Environment {
    /// Environment of the current build target.
    pub fn detect() -> Self {
        if cfg!(any(target_os = "android", target_os = "ios")) {
            Self::Mobile
        } else {
            Self::Desktop
        }
    }
}

/// Which backend serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    /// HTTP PlantUML server.
    RemoteServer,
    /// Locally spawned PlantUML process.
    LocalProcess,
    /// Host-provided in-process engine.
    InProcessEngine,
}

/// Picks the backend for `kind` from the current settings.
///
/// Mobile always uses the remote server. On desktop a configured engine
/// serves PNG requests, a configured local executable serves everything
/// else it is given, and the remote server is the default.
pub fn select_backend(
    environment: Environment,
    config: &RenderConfig,
    kind: ArtifactKind,
) -> BackendChoice {
    if environment == Environment::Mobile {
        return BackendChoice::RemoteServer;
    }
    if config.has_engine() && kind == ArtifactKind::Raster {
        return BackendChoice::InProcessEngine;
    }
    if config.has_local_renderer() {
        return BackendChoice::LocalProcess;
    }
    BackendChoice::RemoteServer
}

/// Outcome of a debounced render, tagged with the target it was triggered for.
#[derive(Debug)]
pub struct RenderOutcome {
    /// Debounce target.
    pub target: String,
    /// Render result.
    pub result: Result<RenderedDiagram>,
}

type FlightMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// A caller's claim on the single-flight lock for one artifact.
///
/// The map entry is removed when the last claimant drops, including a
/// caller whose future is cancelled while still waiting.
struct InFlight<'a> {
    map: &'a FlightMap,
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> InFlight<'a> {
    fn join(map: &'a FlightMap, key: String) -> Self {
        let lock = {
            let mut in_flight = map.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(in_flight.entry(key.clone()).or_default())
        };
        Self { map, key, lock }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.map.lock().unwrap_or_else(|e| e.into_inner());
        // One reference is the map's, one is ours.
        if Arc::strong_count(&self.lock) <= 2 {
            in_flight.remove(&self.key);
        }
    }
}

/// Cache-first render entry point shared by every caller in the process.
pub struct Dispatcher {
    config: ConfigHandle,
    cache: ArtifactCache,
    environment: Environment,
    remote: Arc<dyn RenderBackend>,
    local: Option<Arc<dyn RenderBackend>>,
    engine: Option<Arc<dyn RenderBackend>>,
    in_flight: FlightMap,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("environment", &self.environment)
            .field("local", &self.local.is_some())
            .field("engine", &self.engine.is_some())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher with the built-in remote and local backends.
    ///
    /// The local backend is only wired up on [`Environment::Desktop`]. No
    /// engine is available until [`with_engine_loader`](Self::with_engine_loader)
    /// or [`with_engine`](Self::with_engine) is called.
    pub fn new(
        config: ConfigHandle,
        cache: ArtifactCache,
        environment: Environment,
        resolver: Arc<dyn PathResolver>,
    ) -> Self {
        let remote: Arc<dyn RenderBackend> = Arc::new(RemoteServerBackend::new(config.clone()));
        let local: Option<Arc<dyn RenderBackend>> = match environment {
            Environment::Desktop => {
                Some(Arc::new(LocalProcessBackend::new(config.clone(), resolver)))
            }
            Environment::Mobile => None,
        };
        Self {
            config,
            cache,
            environment,
            remote,
            local,
            engine: None,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the remote backend.
    pub fn with_remote(mut self, backend: Arc<dyn RenderBackend>) -> Self {
        self.remote = backend;
        self
    }

    /// Replaces the local process backend.
    pub fn with_local(mut self, backend: Arc<dyn RenderBackend>) -> Self {
        self.local = Some(backend);
        self
    }

    /// Installs an in-process engine backend.
    pub fn with_engine(mut self, backend: Arc<dyn RenderBackend>) -> Self {
        self.engine = Some(backend);
        self
    }

    /// Installs the in-process engine using a host-provided loader.
    pub fn with_engine_loader(self, loader: Arc<dyn EngineLoader>) -> Self {
        let backend = Arc::new(InProcessEngineBackend::new(self.config.clone(), loader));
        self.with_engine(backend)
    }

    /// The shared artifact cache.
    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// The configuration handle renders read from.
    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// The environment backend selection runs under.
    pub fn environment(&self) -> Environment {
        self.environment
    }

    fn backend(&self, choice: BackendChoice) -> Result<Arc<dyn RenderBackend>> {
        match choice {
            BackendChoice::RemoteServer => Ok(Arc::clone(&self.remote)),
            BackendChoice::LocalProcess => self.local.clone().ok_or_else(|| {
                RenderError::InvalidConfiguration(
                    "local rendering is not available on this platform".to_owned(),
                )
            }),
            BackendChoice::InProcessEngine => self.engine.clone().ok_or_else(|| {
                RenderError::EngineUnavailable("no engine loader registered".to_owned())
            }),
        }
    }

    /// Renders `source` as `kind`, preferring the cache.
    ///
    /// # Errors
    ///
    /// See [`render_with_cache`](Self::render_with_cache).
    pub async fn render(
        &self,
        source: &str,
        kind: ArtifactKind,
        working_dir: &Path,
    ) -> Result<RenderedDiagram> {
        let request = RenderRequest::new(source, kind).with_working_dir(working_dir);
        self.render_with_cache(&request).await
    }

    /// Serves `request` from the cache, rendering and storing it on a miss.
    ///
    /// A hit refreshes the diagram's last-access time and never reaches a
    /// backend. Concurrent misses for the same artifact render once.
    ///
    /// # Errors
    ///
    /// Propagates cache failures and the selected backend's error unchanged.
    pub async fn render_with_cache(&self, request: &RenderRequest) -> Result<RenderedDiagram> {
        let config = self.config.snapshot();
        let prepared = source::prepare(&config.header, &request.source);
        let key = encoder::encode(&prepared);

        if let Some(hit) = self.lookup(request.kind, &key).await? {
            return Ok(hit);
        }

        let flight_key = format!("{}-{}", request.kind.cache_prefix(), key.as_str());
        let flight = InFlight::join(&self.in_flight, flight_key);
        let _guard = flight.lock.lock().await;
        self.render_miss(request, &config, &prepared, key).await
    }

    async fn render_miss(
        &self,
        request: &RenderRequest,
        config: &RenderConfig,
        prepared: &str,
        key: DiagramKey,
    ) -> Result<RenderedDiagram> {
        // Another caller may have filled the entry while we waited.
        if let Some(hit) = self.lookup(request.kind, &key).await? {
            return Ok(hit);
        }

        config.validate()?;
        let choice = select_backend(self.environment, config, request.kind);
        let backend = self.backend(choice)?;
        info!(backend = backend.name(), kind = %request.kind, %key, "rendering diagram");

        let artifact = backend
            .render(prepared, request.kind, &request.working_dir)
            .await?;

        self.cache
            .put(request.kind, &key, artifact.body.clone())
            .await?;
        if request.kind == ArtifactKind::Raster
            && let Some(map) = &artifact.click_map
        {
            self.cache.put(ArtifactKind::ClickMap, &key, map.clone()).await?;
        }
        self.cache.touch(&key).await?;

        Ok(RenderedDiagram {
            key,
            kind: request.kind,
            body: artifact.body,
            click_map: artifact.click_map,
            from_cache: false,
        })
    }

    async fn lookup(&self, kind: ArtifactKind, key: &DiagramKey) -> Result<Option<RenderedDiagram>> {
        let Some(body) = self.cache.get(kind, key).await? else {
            return Ok(None);
        };
        let click_map = if kind == ArtifactKind::Raster {
            self.cache
                .get(ArtifactKind::ClickMap, key)
                .await?
                .filter(|map| !map.trim().is_empty())
        } else {
            None
        };
        self.cache.touch(key).await?;
        debug!(%kind, %key, "cache hit");
        Ok(Some(RenderedDiagram {
            key: key.clone(),
            kind,
            body,
            click_map,
            from_cache: true,
        }))
    }

    /// Evicts artifacts older than the configured retention.
    ///
    /// Runs once at startup; failures are logged and never block rendering.
    pub async fn startup_maintenance(&self) -> EvictionReport {
        let retention = self.config.snapshot().cache_retention();
        match self.cache.evict_older_than(retention).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "startup cache eviction failed");
                EvictionReport::default()
            }
        }
    }

    /// Renders every request the debouncer fires, concurrently.
    ///
    /// Returns a receiver of outcomes tagged with their target. The worker
    /// stops when the debouncer's sender is dropped.
    pub fn serve(
        self: Arc<Self>,
        mut fired: mpsc::UnboundedReceiver<Fired<RenderRequest>>,
    ) -> mpsc::UnboundedReceiver<RenderOutcome> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(Fired { target, input }) = fired.recv().await {
                let dispatcher = Arc::clone(&self);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let result = dispatcher.render_with_cache(&input).await;
                    if tx.send(RenderOutcome { target, result }).is_err() {
                        debug!("render outcome receiver dropped");
                    }
                });
            }
        });
        rx
    }
}
