//! Rendering backends.
//!
//! Every backend satisfies [`RenderBackend`]: given diagram source and an
//! artifact kind it returns the rendered [`Artifact`] or a classified
//! [`RenderError`](crate::error::RenderError). Backends read the shared
//! [`ConfigHandle`](crate::config::ConfigHandle) on each call and never
//! fall back to one another.

pub mod engine;
pub mod local;
pub mod server;

use std::path::Path;

use async_trait::async_trait;
use base64::Engine as _;

use crate::error::Result;
use crate::types::{Artifact, ArtifactKind};

pub use engine::{DiagramEngine, EngineLoader, InProcessEngineBackend};
pub use local::{LocalCommand, LocalProcessBackend};
pub use server::RemoteServerBackend;

/// A diagram rendering strategy.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Whether this backend can produce `kind` at all.
    fn supports(&self, kind: ArtifactKind) -> bool;

    /// Render `source` as `kind`.
    ///
    /// Raster renders carry their click map in [`Artifact::click_map`] when
    /// the backend can produce one. `working_dir` is only meaningful to
    /// backends that run external processes.
    async fn render(&self, source: &str, kind: ArtifactKind, working_dir: &Path)
    -> Result<Artifact>;
}

/// Base64-encodes raster bytes for the text-oriented cache.
pub(crate) fn encode_raster(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Treats an empty or whitespace-only click map as "no click regions".
pub(crate) fn non_empty_map(map: String) -> Option<String> {
    if map.trim().is_empty() { None } else { Some(map) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_encoding_is_standard_base64() {
        assert_eq!(encode_raster(b"\x89PNG"), "iVBORw==");
    }

    #[test]
    fn blank_maps_mean_no_regions() {
        assert_eq!(non_empty_map(String::new()), None);
        assert_eq!(non_empty_map(" \n".into()), None);
        assert_eq!(
            non_empty_map("<map id=\"x\"></map>".into()).as_deref(),
            Some("<map id=\"x\"></map>")
        );
    }
}
