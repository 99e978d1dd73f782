//! puml-render: PlantUML render dispatch with a persistent artifact cache.
//!
//! Diagram source is turned into a compact, URL-safe key and rendered
//! through one of three backends:
//! - **Remote server**: HTTP `GET` against a PlantUML server
//! - **Local process**: a PlantUML executable or `.jar` fed over stdin
//! - **In-process engine**: a host-provided engine module (PNG only)
//!
//! # Architecture
//!
//! - [`encoder`] derives the [`DiagramKey`] that addresses every artifact
//! - [`cache::ArtifactCache`] stores artifacts in SQLite with TTL eviction
//! - [`dispatch::Dispatcher`] picks a backend and serves cache hits first
//! - [`debounce::Debouncer`] coalesces live-edit re-renders per target
//! - [`watch::SourceWatcher`] reports edits to a diagram file

pub mod backend;
pub mod cache;
pub mod config;
pub mod debounce;
pub mod dispatch;
pub mod encoder;
pub mod error;
pub mod host;
pub mod puml_dirs;
pub mod source;
pub mod types;
pub mod watch;

pub use cache::{ArtifactCache, EvictionReport};
pub use config::{ConfigHandle, RenderConfig};
pub use debounce::{Debouncer, Fired};
pub use dispatch::{BackendChoice, Dispatcher, Environment, RenderOutcome, select_backend};
pub use error::{RenderError, Result};
pub use host::{DirectoryResolver, PathResolver};
pub use types::{
    Artifact, ArtifactKind, DiagramKey, OutputFormat, RenderRequest, RenderedDiagram,
};
pub use watch::SourceWatcher;
