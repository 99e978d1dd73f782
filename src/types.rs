//! Core value types shared by the cache, backends and dispatcher.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Kind of rendered artifact stored in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// PNG image, stored base64-encoded.
    Raster,
    /// SVG document.
    Vector,
    /// Text-art rendering.
    AsciiArt,
    /// Clickable-region `<map>` markup produced alongside a raster render.
    ClickMap,
}

impl ArtifactKind {
    /// Every kind, in the order the cache deletes them during eviction.
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Raster,
        ArtifactKind::Vector,
        ArtifactKind::AsciiArt,
        ArtifactKind::ClickMap,
    ];

    /// Storage key prefix (`png-<key>`, `svg-<key>`, ...).
    pub fn cache_prefix(self) -> &'static str {
        match self {
            Self::Raster => "png",
            Self::Vector => "svg",
            Self::AsciiArt => "ascii",
            Self::ClickMap => "map",
        }
    }

    /// Path segment on the remote PlantUML server.
    pub fn server_segment(self) -> &'static str {
        match self {
            Self::Raster => "png",
            Self::Vector => "svg",
            Self::AsciiArt => "txt",
            Self::ClickMap => "map",
        }
    }

    /// Value of the local renderer's `-t<type>` flag, if the kind is renderable
    /// through it.
    pub fn process_type(self) -> Option<&'static str> {
        match self {
            Self::Raster => Some("png"),
            Self::Vector => Some("svg"),
            Self::AsciiArt => Some("txt"),
            Self::ClickMap => None,
        }
    }

    /// Whether payloads of this kind are binary and stored base64-encoded.
    pub fn is_binary(self) -> bool {
        matches!(self, Self::Raster)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Raster => "png",
            Self::Vector => "svg",
            Self::AsciiArt => "ascii",
            Self::ClickMap => "map",
        };
        f.write_str(label)
    }
}

/// User-facing output formats (the kinds a caller can request directly).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG with click map.
    #[default]
    Png,
    /// SVG.
    Svg,
    /// ASCII art.
    #[serde(alias = "ascii")]
    Txt,
}

impl OutputFormat {
    /// The artifact kind produced for this format.
    pub fn artifact_kind(self) -> ArtifactKind {
        match self {
            Self::Png => ArtifactKind::Raster,
            Self::Svg => ArtifactKind::Vector,
            Self::Txt => ArtifactKind::AsciiArt,
        }
    }

    /// File extension used when writing the artifact to disk.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Svg => "svg",
            Self::Txt => "txt",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "svg" => Ok(Self::Svg),
            "txt" | "ascii" => Ok(Self::Txt),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// Cache partition key derived from diagram source by [`crate::encoder::encode`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiagramKey(String);

impl DiagramKey {
    /// Wraps an already-encoded key.
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// The encoded key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiagramKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single render call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// Diagram source text, already link-resolved by the host.
    pub source: String,
    /// Requested artifact kind.
    pub kind: ArtifactKind,
    /// Directory the local renderer runs in (for relative `!include`s).
    /// Empty means inherit the current directory.
    pub working_dir: PathBuf,
}

impl RenderRequest {
    /// Creates a request without a working directory.
    pub fn new(source: impl Into<String>, kind: ArtifactKind) -> Self {
        Self {
            source: source.into(),
            kind,
            working_dir: PathBuf::new(),
        }
    }

    /// Sets the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }
}

/// Output of a backend render, before it is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Payload (base64 for raster kinds).
    pub body: String,
    /// Click-region markup for raster renders, when the backend produced one.
    pub click_map: Option<String>,
}

/// Result returned to the caller of the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDiagram {
    /// Key the artifact is cached under.
    pub key: DiagramKey,
    /// Artifact kind.
    pub kind: ArtifactKind,
    /// Payload (base64 for [`ArtifactKind::Raster`]).
    pub body: String,
    /// Click map accompanying a raster artifact; `None` means no click regions.
    pub click_map: Option<String>,
    /// Whether the artifact was served from the cache.
    pub from_cache: bool,
}
