//! Render settings and the process-wide configuration handle.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, Result};
use crate::types::OutputFormat;

/// Public PlantUML server used when no server URL is configured.
pub const DEFAULT_SERVER_URL: &str = "https://www.plantuml.com/plantuml";

/// Longest accepted debounce interval.
pub const MAX_DEBOUNCE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Backend and cache settings.
///
/// Field names follow Rust conventions; the camelCase names used by older
/// settings files are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Base URL of the remote PlantUML server (no trailing path segment).
    pub server_url: String,
    /// Local PlantUML executable or `.jar`. Empty disables local rendering.
    ///
    /// Supports absolute paths, `~/` paths and paths relative to the
    /// document root.
    #[serde(alias = "localJar")]
    pub local_jar: String,
    /// Java launcher used when `local_jar` is a `.jar`.
    #[serde(alias = "javaPath")]
    pub java_path: String,
    /// Graphviz `dot` executable passed to the local renderer.
    #[serde(alias = "dotPath")]
    pub dot_path: String,
    /// Location of an in-process rendering engine module. Empty disables it.
    #[serde(alias = "engineJsPath", alias = "plantumlJsPath")]
    pub engine_path: String,
    /// Text prepended to every diagram (e.g. a shared `!theme`).
    pub header: String,
    /// Retention window for cached artifacts, in days.
    #[serde(alias = "cache")]
    pub cache_days: u32,
    /// Quiet period before a live-edited diagram is re-rendered, in seconds.
    #[serde(alias = "debounce")]
    pub debounce_secs: f64,
    /// Format used for diagrams included by reference.
    #[serde(alias = "defaultProcessor")]
    pub default_processor: OutputFormat,
    /// Directory exported diagrams are written to. Empty means next to the source.
    #[serde(alias = "exportPath")]
    pub export_path: String,
    /// How long to wait for the in-process engine to initialize.
    pub engine_init_timeout_secs: u64,
    /// Timeout for each request to the remote server.
    pub request_timeout_secs: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_owned(),
            local_jar: String::new(),
            java_path: "java".to_owned(),
            dot_path: "dot".to_owned(),
            engine_path: String::new(),
            header: String::new(),
            cache_days: 60,
            debounce_secs: 3.0,
            default_processor: OutputFormat::Png,
            export_path: String::new(),
            engine_init_timeout_secs: 30,
            request_timeout_secs: 30,
        }
    }
}

impl RenderConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidConfiguration`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RenderError::InvalidConfiguration(format!("cannot read {}: {e}", path.display()))
        })?;
        toml::from_str(&content).map_err(|e| RenderError::InvalidConfiguration(e.to_string()))
    }

    /// Like [`from_file`](Self::from_file), but a missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RenderError::InvalidConfiguration(e.to_string()))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| RenderError::InvalidConfiguration(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| RenderError::InvalidConfiguration(e.to_string()))
    }

    /// Server URL to use, falling back to [`DEFAULT_SERVER_URL`] when blank.
    pub fn effective_server_url(&self) -> &str {
        let url = self.server_url.trim().trim_end_matches('/');
        if url.is_empty() { DEFAULT_SERVER_URL } else { url }
    }

    /// Whether a local executable is configured.
    pub fn has_local_renderer(&self) -> bool {
        !self.local_jar.trim().is_empty()
    }

    /// Whether an in-process engine is configured.
    pub fn has_engine(&self) -> bool {
        !self.engine_path.trim().is_empty()
    }

    /// Retention window for cached artifacts.
    pub fn cache_retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.cache_days) * 24 * 60 * 60)
    }

    /// Debounce interval; negative or non-finite values count as zero and
    /// anything above [`MAX_DEBOUNCE_INTERVAL`] is clamped to it.
    pub fn debounce_interval(&self) -> Duration {
        if !(self.debounce_secs.is_finite() && self.debounce_secs > 0.0) {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(self.debounce_secs)
            .map_or(MAX_DEBOUNCE_INTERVAL, |d| d.min(MAX_DEBOUNCE_INTERVAL))
    }

    /// Rejects contradictory settings.
    ///
    /// A local executable and an in-process engine are mutually exclusive:
    /// both can render PNG and neither should silently win.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidConfiguration`] describing the conflict.
    pub fn validate(&self) -> Result<()> {
        if self.has_local_renderer() && self.has_engine() {
            return Err(RenderError::InvalidConfiguration(
                "local_jar and engine_path are mutually exclusive; clear one of them".to_owned(),
            ));
        }
        if self.cache_days == 0 {
            return Err(RenderError::InvalidConfiguration(
                "cache_days must be at least 1".to_owned(),
            ));
        }
        if self.debounce_secs > MAX_DEBOUNCE_INTERVAL.as_secs_f64() {
            return Err(RenderError::InvalidConfiguration(format!(
                "debounce must not exceed {} seconds",
                MAX_DEBOUNCE_INTERVAL.as_secs()
            )));
        }
        if self.engine_init_timeout_secs == 0 {
            return Err(RenderError::InvalidConfiguration(
                "engine_init_timeout_secs must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> PathBuf {
        crate::puml_dirs::config_file()
    }
}

/// Process-wide, live-reloadable configuration.
///
/// Cloning shares the underlying settings. Every render reads a fresh
/// [`snapshot`](Self::snapshot), so a [`replace`](Self::replace) takes
/// effect on the next call without restarting anything.
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<RenderConfig>>>,
}

impl ConfigHandle {
    /// Wraps an initial configuration.
    pub fn new(config: RenderConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Current settings.
    pub fn snapshot(&self) -> Arc<RenderConfig> {
        Arc::clone(&self.inner.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Installs new settings after validating them.
    ///
    /// # Errors
    ///
    /// Returns the validation error and keeps the previous settings.
    pub fn replace(&self, config: RenderConfig) -> Result<()> {
        config.validate()?;
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(config);
        tracing::debug!("render configuration replaced");
        Ok(())
    }

    /// Re-reads settings from `path` (the external settings-save hook).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or fails validation.
    pub fn reload_from(&self, path: &Path) -> Result<()> {
        let config = RenderConfig::load_or_default(path)?;
        self.replace(config)
    }
}
