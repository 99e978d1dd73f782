//! In-process rendering engine backend.
//!
//! The engine itself is host-provided: an [`EngineLoader`] turns the
//! configured `engine_path` into a [`DiagramEngine`]. The module is loaded at
//! most once per backend; initialization is awaited under a timeout. Only
//! PNG output is supported.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use super::{RenderBackend, encode_raster};
use crate::config::ConfigHandle;
use crate::error::{RenderError, Result};
use crate::types::{Artifact, ArtifactKind};

/// Error type returned by host engine implementations.
pub type EngineError = Box<dyn std::error::Error + Send + Sync>;

/// A loaded rendering engine.
#[async_trait]
pub trait DiagramEngine: Send + Sync {
    /// Whether the engine has finished initializing.
    fn is_initialized(&self) -> bool;

    /// Starts (or waits for) engine initialization.
    async fn initialize(&self) -> std::result::Result<(), EngineError>;

    /// Renders `source` to PNG bytes.
    async fn render_png(&self, source: &str) -> std::result::Result<Vec<u8>, EngineError>;
}

/// Loads an engine module from disk.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    /// Loads the engine at `path`.
    async fn load(&self, path: &Path) -> std::result::Result<Arc<dyn DiagramEngine>, EngineError>;
}

/// Renders PNGs through a host-provided in-process engine.
pub struct InProcessEngineBackend {
    config: ConfigHandle,
    loader: Arc<dyn EngineLoader>,
    engine: OnceCell<std::result::Result<Arc<dyn DiagramEngine>, String>>,
    init_lock: Mutex<()>,
}

impl std::fmt::Debug for InProcessEngineBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessEngineBackend")
            .field("loaded", &self.engine.initialized())
            .finish_non_exhaustive()
    }
}

impl InProcessEngineBackend {
    /// Creates a backend that loads its engine lazily through `loader`.
    pub fn new(config: ConfigHandle, loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            config,
            loader,
            engine: OnceCell::new(),
            init_lock: Mutex::new(()),
        }
    }

    async fn loaded_engine(&self) -> Result<Arc<dyn DiagramEngine>> {
        let path = self.config.snapshot().engine_path.trim().to_owned();
        if path.is_empty() && !self.engine.initialized() {
            return Err(RenderError::EngineUnavailable(
                "no engine path configured".to_owned(),
            ));
        }

        let loaded = self
            .engine
            .get_or_init(|| async {
                info!(path = %path, "loading in-process PlantUML engine");
                self.loader
                    .load(Path::new(&path))
                    .await
                    .map_err(|e| format!("failed to load {path}: {e}"))
            })
            .await;

        loaded
            .as_ref()
            .map(Arc::clone)
            .map_err(|e| RenderError::EngineUnavailable(e.clone()))
    }

    async fn ensure_initialized(&self, engine: &Arc<dyn DiagramEngine>) -> Result<()> {
        if engine.is_initialized() {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if engine.is_initialized() {
            return Ok(());
        }

        let timeout = Duration::from_secs(self.config.snapshot().engine_init_timeout_secs.max(1));
        debug!(?timeout, "waiting for engine initialization");
        match tokio::time::timeout(timeout, engine.initialize()).await {
            Err(_) => Err(RenderError::EngineNotInitialized(format!(
                "engine did not initialize within {}s",
                timeout.as_secs()
            ))),
            Ok(Err(e)) => Err(RenderError::EngineNotInitialized(e.to_string())),
            Ok(Ok(())) if engine.is_initialized() => Ok(()),
            Ok(Ok(())) => Err(RenderError::EngineNotInitialized(
                "engine reported ready but is not initialized".to_owned(),
            )),
        }
    }
}

#[async_trait]
impl RenderBackend for InProcessEngineBackend {
    fn name(&self) -> &'static str {
        "engine"
    }

    fn supports(&self, kind: ArtifactKind) -> bool {
        kind == ArtifactKind::Raster
    }

    async fn render(
        &self,
        source: &str,
        kind: ArtifactKind,
        _working_dir: &Path,
    ) -> Result<Artifact> {
        if !self.supports(kind) {
            return Err(RenderError::UnsupportedOutputKind {
                backend: self.name(),
                kind,
                message: "the in-process engine only produces PNG".to_owned(),
            });
        }

        let engine = self.loaded_engine().await?;
        self.ensure_initialized(&engine).await?;
        let png = engine
            .render_png(source)
            .await
            .map_err(|e| RenderError::EngineUnavailable(format!("engine render failed: {e}")))?;

        Ok(Artifact {
            body: encode_raster(&png),
            click_map: None,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::config::RenderConfig;

    struct FakeEngine {
        ready: AtomicBool,
        init_delay: Duration,
    }

    #[async_trait]
    impl DiagramEngine for FakeEngine {
        fn is_initialized(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn initialize(&self) -> std::result::Result<(), EngineError> {
            tokio::time::sleep(self.init_delay).await;
            self.ready.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn render_png(&self, source: &str) -> std::result::Result<Vec<u8>, EngineError> {
            Ok(source.as_bytes().to_vec())
        }
    }

    struct FakeLoader {
        loads: AtomicUsize,
        fail: bool,
        init_delay: Duration,
    }

    impl FakeLoader {
        fn new(init_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                loads: AtomicUsize::new(0),
                fail: false,
                init_delay,
            })
        }
    }

    #[async_trait]
    impl EngineLoader for FakeLoader {
        async fn load(
            &self,
            _path: &Path,
        ) -> std::result::Result<Arc<dyn DiagramEngine>, EngineError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err("module not found".into());
            }
            Ok(Arc::new(FakeEngine {
                ready: AtomicBool::new(false),
                init_delay: self.init_delay,
            }))
        }
    }

    fn handle(timeout_secs: u64) -> ConfigHandle {
        ConfigHandle::new(RenderConfig {
            engine_path: "/opt/plantuml-engine".into(),
            engine_init_timeout_secs: timeout_secs,
            ..RenderConfig::default()
        })
    }

    #[tokio::test]
    async fn renders_png_and_loads_once() {
        let loader = FakeLoader::new(Duration::ZERO);
        let backend = InProcessEngineBackend::new(handle(5), loader.clone());

        let first = backend
            .render("A -> B", ArtifactKind::Raster, Path::new(""))
            .await
            .unwrap();
        backend
            .render("B -> C", ArtifactKind::Raster, Path::new(""))
            .await
            .unwrap();

        assert_eq!(first.body, encode_raster(b"A -> B"));
        assert_eq!(first.click_map, None);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn svg_is_unsupported() {
        let backend = InProcessEngineBackend::new(handle(5), FakeLoader::new(Duration::ZERO));
        let err = backend
            .render("A -> B", ArtifactKind::Vector, Path::new(""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_OUTPUT_KIND");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_initialization_times_out() {
        let backend = InProcessEngineBackend::new(handle(1), FakeLoader::new(Duration::from_secs(60)));
        let err = backend
            .render("A -> B", ArtifactKind::Raster, Path::new(""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ENGINE_NOT_INITIALIZED");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_still_allows_quick_initialization() {
        let backend = InProcessEngineBackend::new(
            handle(0),
            FakeLoader::new(Duration::from_millis(100)),
        );
        let rendered = backend
            .render("A -> B", ArtifactKind::Raster, Path::new(""))
            .await
            .unwrap();
        assert_eq!(rendered.body, encode_raster(b"A -> B"));
    }

    #[tokio::test]
    async fn load_failure_is_engine_unavailable() {
        let loader = Arc::new(FakeLoader {
            loads: AtomicUsize::new(0),
            fail: true,
            init_delay: Duration::ZERO,
        });
        let backend = InProcessEngineBackend::new(handle(5), loader);
        let err = backend
            .render("A -> B", ArtifactKind::Raster, Path::new(""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ENGINE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn missing_path_is_engine_unavailable() {
        let backend = InProcessEngineBackend::new(
            ConfigHandle::new(RenderConfig::default()),
            FakeLoader::new(Duration::ZERO),
        );
        let err = backend
            .render("A -> B", ArtifactKind::Raster, Path::new(""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ENGINE_UNAVAILABLE");
    }
}
