//! Interfaces the host application provides to the render core.

use std::path::{Path, PathBuf};

/// Maps document-relative paths to absolute filesystem paths.
///
/// The local renderer uses it to locate a relatively configured executable
/// and to pick the working directory for `!include` resolution.
pub trait PathResolver: Send + Sync {
    /// Absolute path of `relative` inside the host's document root.
    /// An empty `relative` yields the root itself.
    fn absolute_path_of(&self, relative: &str) -> PathBuf;
}

/// Resolves paths against a fixed root directory.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    /// Creates a resolver rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolver rooted at the process's current directory.
    pub fn current_dir() -> Self {
        Self::new(std::env::current_dir().unwrap_or_default())
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl PathResolver for DirectoryResolver {
    fn absolute_path_of(&self, relative: &str) -> PathBuf {
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }
}
