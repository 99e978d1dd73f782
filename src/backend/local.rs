//! Local PlantUML process backend.
//!
//! Runs the configured executable (or `.jar` through a Java launcher) with
//! the diagram on stdin and `-pipe`, collecting the artifact from stdout.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{RenderBackend, encode_raster, non_empty_map};
use crate::config::{ConfigHandle, RenderConfig};
use crate::error::{RenderError, Result};
use crate::host::PathResolver;
use crate::types::{Artifact, ArtifactKind};

const HEADLESS_FLAG: &str = "-Djava.awt.headless=true";

/// Program and leading arguments for one renderer invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCommand {
    /// Executable to spawn.
    pub program: String,
    /// Arguments preceding the per-request `-t<type>` and pipe flags.
    pub args: Vec<String>,
}

impl LocalCommand {
    /// Builds the command for the configured executable.
    ///
    /// `local_jar` may start with `~` (home directory), be absolute, or be
    /// relative to `root`. A `.jar` is launched through `java_path`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidConfiguration`] if no executable is
    /// configured or `~` is used without a known home directory.
    pub fn resolve(config: &RenderConfig, root: &Path, home: Option<&Path>) -> Result<Self> {
        let configured = config.local_jar.trim();
        if configured.is_empty() {
            return Err(RenderError::InvalidConfiguration(
                "no local PlantUML executable configured".to_owned(),
            ));
        }
        let executable = resolve_path(configured, root, home)?;
        let executable = executable.to_string_lossy().into_owned();

        let mut args = Vec::new();
        let program = if configured.to_ascii_lowercase().ends_with(".jar") {
            let java = config.java_path.trim();
            args.extend([HEADLESS_FLAG.to_owned(), "-jar".to_owned(), executable]);
            if java.is_empty() { "java".to_owned() } else { java.to_owned() }
        } else {
            args.push(HEADLESS_FLAG.to_owned());
            executable
        };

        args.extend(["-charset".to_owned(), "utf-8".to_owned()]);
        let dot = config.dot_path.trim();
        if !dot.is_empty() {
            args.extend(["-graphvizdot".to_owned(), dot.to_owned()]);
        }

        Ok(Self { program, args })
    }
}

fn resolve_path(configured: &str, root: &Path, home: Option<&Path>) -> Result<PathBuf> {
    if let Some(rest) = configured.strip_prefix('~') {
        let home = home.ok_or_else(|| {
            RenderError::InvalidConfiguration(format!(
                "cannot expand {configured}: home directory unknown"
            ))
        })?;
        let rest = rest.trim_start_matches(['/', '\\']);
        return Ok(if rest.is_empty() {
            home.to_path_buf()
        } else {
            home.join(rest)
        });
    }
    let path = Path::new(configured);
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(root.join(path))
    }
}

struct ProcessOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: String,
}

impl ProcessOutput {
    fn failure(&self) -> RenderError {
        RenderError::RenderProcessFailed {
            exit_code: self.status.code(),
            stderr: self.stderr.clone(),
        }
    }
}

/// Renders by spawning a local PlantUML process per artifact.
pub struct LocalProcessBackend {
    config: ConfigHandle,
    resolver: Arc<dyn PathResolver>,
}

impl std::fmt::Debug for LocalProcessBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProcessBackend").finish_non_exhaustive()
    }
}

impl LocalProcessBackend {
    /// Creates a backend resolving relative executables through `resolver`.
    pub fn new(config: ConfigHandle, resolver: Arc<dyn PathResolver>) -> Self {
        Self { config, resolver }
    }

    fn command(&self) -> Result<LocalCommand> {
        let config = self.config.snapshot();
        let root = self.resolver.absolute_path_of("");
        let home = crate::puml_dirs::home_dir();
        LocalCommand::resolve(&config, &root, home.as_deref())
    }

    /// Renders the clickable-region map for `source` (`-pipemap`).
    ///
    /// An empty map means the diagram has no links.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::SpawnFailed`] or [`RenderError::RenderProcessFailed`].
    pub async fn render_click_map(&self, source: &str, working_dir: &Path) -> Result<Option<String>> {
        let command = self.command()?;
        let output = run(&command, &["-pipemap"], source, working_dir).await?;
        if !output.status.success() {
            return Err(output.failure());
        }
        Ok(non_empty_map(
            String::from_utf8_lossy(&output.stdout).into_owned(),
        ))
    }

    async fn render_image(
        &self,
        source: &str,
        process_type: &str,
        working_dir: &Path,
    ) -> Result<Vec<u8>> {
        let command = self.command()?;
        let type_flag = format!("-t{process_type}");
        let output = run(&command, &[type_flag.as_str(), "-pipe"], source, working_dir).await?;
        accept_image_output(output)
    }
}

/// Interprets the exit status of an image render.
///
/// PlantUML exits non-zero yet still writes an error image for some syntax
/// errors; that image is what the user should see. Exit code 1 and empty
/// output are always failures.
fn accept_image_output(output: ProcessOutput) -> Result<Vec<u8>> {
    if output.stdout.is_empty() {
        return Err(output.failure());
    }
    if output.status.success() {
        return Ok(output.stdout);
    }
    match output.status.code() {
        Some(1) => Err(output.failure()),
        code => {
            warn!(
                ?code,
                stderr = %output.stderr.trim(),
                "renderer exited non-zero but produced output"
            );
            Ok(output.stdout)
        }
    }
}

async fn run(
    command: &LocalCommand,
    extra_args: &[&str],
    source: &str,
    working_dir: &Path,
) -> Result<ProcessOutput> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .args(extra_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if !working_dir.as_os_str().is_empty() {
        cmd.current_dir(working_dir);
    }

    debug!(program = %command.program, ?extra_args, "spawning local renderer");
    let mut child = cmd.spawn().map_err(|source| RenderError::SpawnFailed {
        program: command.program.clone(),
        source,
    })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| RenderError::RenderProcessFailed {
            exit_code: None,
            stderr: "renderer stdin was not piped".to_owned(),
        })?;
    let input = source.as_bytes().to_vec();
    let writer = async move {
        stdin.write_all(&input).await?;
        stdin.shutdown().await
    };

    let (written, output) = tokio::join!(writer, child.wait_with_output());
    if let Err(e) = written {
        // The process may exit before reading all input; its status decides.
        debug!(error = %e, "renderer closed stdin early");
    }
    let output = output.map_err(|e| RenderError::RenderProcessFailed {
        exit_code: None,
        stderr: e.to_string(),
    })?;

    Ok(ProcessOutput {
        status: output.status,
        stdout: output.stdout,
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[async_trait]
impl RenderBackend for LocalProcessBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn supports(&self, _kind: ArtifactKind) -> bool {
        true
    }

    async fn render(
        &self,
        source: &str,
        kind: ArtifactKind,
        working_dir: &Path,
    ) -> Result<Artifact> {
        match kind {
            ArtifactKind::Raster => {
                let (image, click_map) = tokio::try_join!(
                    self.render_image(source, "png", working_dir),
                    self.render_click_map(source, working_dir)
                )?;
                Ok(Artifact {
                    body: encode_raster(&image),
                    click_map,
                })
            }
            ArtifactKind::ClickMap => Ok(Artifact {
                body: self
                    .render_click_map(source, working_dir)
                    .await?
                    .unwrap_or_default(),
                click_map: None,
            }),
            ArtifactKind::Vector | ArtifactKind::AsciiArt => {
                let process_type = kind.process_type().unwrap_or("svg");
                let bytes = self.render_image(source, process_type, working_dir).await?;
                Ok(Artifact {
                    body: String::from_utf8_lossy(&bytes).into_owned(),
                    click_map: None,
                })
            }
        }
    }
}
