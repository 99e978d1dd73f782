//! Remote PlantUML server backend.
//!
//! Issues `GET <server>/<segment>/<key>` where `<key>` is the encoded diagram
//! source. Raster renders fetch `/png/` and `/map/` concurrently.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::{RenderBackend, encode_raster, non_empty_map};
use crate::config::ConfigHandle;
use crate::encoder;
use crate::error::{RenderError, Result};
use crate::types::{Artifact, ArtifactKind, DiagramKey};

/// PNG file signature. Servers without text-art support answer `/txt/` with a PNG.
const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Renders by calling a PlantUML server over HTTP.
#[derive(Debug, Clone)]
pub struct RemoteServerBackend {
    config: ConfigHandle,
    client: reqwest::Client,
}

impl RemoteServerBackend {
    /// Creates a backend reading the server URL and timeout from `config`.
    pub fn new(config: ConfigHandle) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Uses a caller-supplied HTTP client (proxies, custom TLS roots).
    pub fn with_client(config: ConfigHandle, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// URL of `kind` for `key` on the server at `base`.
    pub fn url_for(base: &str, kind: ArtifactKind, key: &DiagramKey) -> String {
        format!(
            "{}/{}/{}",
            base.trim_end_matches('/'),
            kind.server_segment(),
            key.as_str()
        )
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Bytes> {
        debug!(url, "requesting diagram from server");
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| RenderError::NetworkFailure(format!("GET {url}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(RenderError::NetworkFailure(format!(
                "GET {url} returned {status}"
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| RenderError::NetworkFailure(format!("reading body of {url}: {e}")))
    }
}

fn into_text(bytes: &Bytes) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[async_trait]
impl RenderBackend for RemoteServerBackend {
    fn name(&self) -> &'static str {
        "server"
    }

    fn supports(&self, _kind: ArtifactKind) -> bool {
        true
    }

    async fn render(
        &self,
        source: &str,
        kind: ArtifactKind,
        _working_dir: &Path,
    ) -> Result<Artifact> {
        let config = self.config.snapshot();
        let base = config.effective_server_url();
        let timeout = Duration::from_secs(config.request_timeout_secs.max(1));
        let key = encoder::encode(source);
        let url = Self::url_for(base, kind, &key);

        match kind {
            ArtifactKind::Raster => {
                let map_url = Self::url_for(base, ArtifactKind::ClickMap, &key);
                let (image, map) =
                    tokio::try_join!(self.fetch(&url, timeout), self.fetch(&map_url, timeout))?;
                Ok(Artifact {
                    body: encode_raster(&image),
                    click_map: non_empty_map(into_text(&map)),
                })
            }
            ArtifactKind::AsciiArt => {
                let body = self.fetch(&url, timeout).await?;
                if body.starts_with(&PNG_SIGNATURE) {
                    return Err(RenderError::UnsupportedOutputKind {
                        backend: self.name(),
                        kind,
                        message: format!("{base} answered /txt/ with a PNG image"),
                    });
                }
                Ok(Artifact {
                    body: into_text(&body),
                    click_map: None,
                })
            }
            ArtifactKind::Vector | ArtifactKind::ClickMap => {
                let body = self.fetch(&url, timeout).await?;
                Ok(Artifact {
                    body: into_text(&body),
                    click_map: None,
                })
            }
        }
    }
}
