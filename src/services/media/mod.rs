//! Video extraction: provider fallback chain and media artifacts.
//!
//! Video platforms and extraction services fail individually (rate limits,
//! geo-blocks, format changes), so resilience comes from route diversity:
//! an ordered list of interchangeable strategies is tried until one yields
//! an artifact. The chain holds no per-job state and is reused across jobs.

pub mod cobalt;
pub mod ytdlp;

use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::{info, warn};

use crate::config::AppConfig;
use cobalt::CobaltProvider;
use ytdlp::{YtDlpAudioProvider, YtDlpCaptionProvider, YtDlpRunner};

/// A temporary media file owned by exactly one worker. The backing file is
/// deleted when the value drops, on every exit path.
#[derive(Debug)]
pub struct TempMedia {
    path: TempPath,
}

impl TempMedia {
    pub fn from_path(path: PathBuf) -> Self {
        Self {
            path: TempPath::from_path(path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// What a provider extracted from the reference.
#[derive(Debug)]
pub enum ExtractionArtifact {
    /// Ready-to-analyze text, e.g. captions.
    Text(String),
    /// Downloaded audio awaiting transcription.
    Audio(TempMedia),
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("failed to start extractor process: {0}")]
    Spawn(String),

    #[error("extractor timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("extractor exited with code {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },

    #[error("video is {seconds}s long; only videos up to {limit}s are checked")]
    TooLong { seconds: u64, limit: u64 },

    #[error("extraction service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("media file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("provider produced no usable media")]
    Empty,

    #[error("all extraction providers failed; last cause: {last}")]
    AllProvidersFailed { last: String },
}

/// Closed set of extraction strategies behind one capability interface.
/// Adding a provider means adding a variant here.
pub enum Provider {
    Captions(YtDlpCaptionProvider),
    Audio(YtDlpAudioProvider),
    Cobalt(CobaltProvider),
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Captions(_) => "yt-dlp captions",
            Provider::Audio(_) => "yt-dlp audio",
            Provider::Cobalt(_) => "cobalt",
        }
    }

    pub async fn process(&self, url: &str) -> Result<ExtractionArtifact, MediaError> {
        match self {
            Provider::Captions(p) => p.process(url).await,
            Provider::Audio(p) => p.process(url).await,
            Provider::Cobalt(p) => p.process(url).await,
        }
    }
}

/// Ordered provider list tried in fixed priority order.
pub struct ProviderChain {
    providers: Vec<Provider>,
}

impl ProviderChain {
    pub fn from_config(config: &AppConfig) -> Result<Self, MediaError> {
        let scratch_dir = PathBuf::from(&config.scratch_dir);
        std::fs::create_dir_all(&scratch_dir)?;

        let runner = YtDlpRunner::new(
            scratch_dir.clone(),
            config.cookies_path.as_ref().map(PathBuf::from),
            config.proxy_url.clone(),
        );

        Ok(Self {
            providers: vec![
                Provider::Captions(YtDlpCaptionProvider::new(runner.clone())),
                Provider::Audio(YtDlpAudioProvider::new(runner)),
                Provider::Cobalt(CobaltProvider::new(config.cobalt_url.clone(), scratch_dir)),
            ],
        })
    }

    #[cfg(test)]
    pub fn with_providers(providers: Vec<Provider>) -> Self {
        Self { providers }
    }

    /// Try each provider in order; log and continue past failures; surface a
    /// single aggregated error naming the last cause when every provider
    /// fails.
    pub async fn process(&self, url: &str) -> Result<ExtractionArtifact, MediaError> {
        let mut last_error: Option<MediaError> = None;

        for provider in &self.providers {
            info!(provider = provider.name(), "trying extraction provider");
            match provider.process(url).await {
                Ok(artifact) => {
                    info!(provider = provider.name(), "extraction succeeded");
                    return Ok(artifact);
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "extraction provider failed");
                    last_error = Some(e);
                }
            }
        }

        Err(MediaError::AllProvidersFailed {
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no providers configured".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_media_deletes_file_on_drop() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("claimspect-test-{}.wav", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"fake audio").unwrap();
        assert!(path.exists());
        {
            let _media = TempMedia::from_path(path.clone());
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn empty_chain_reports_aggregated_failure() {
        let chain = ProviderChain::with_providers(vec![]);
        let err = chain.process("https://example.com/v").await.unwrap_err();
        assert!(matches!(err, MediaError::AllProvidersFailed { .. }));
    }

    #[tokio::test]
    async fn aggregated_error_names_last_cause() {
        // Providers that always fail: cobalt against a closed port fails fast
        // with an HTTP error, which must surface as the last cause.
        let scratch = std::env::temp_dir();
        let chain = ProviderChain::with_providers(vec![Provider::Cobalt(CobaltProvider::new(
            "http://127.0.0.1:9/api/json".to_string(),
            scratch,
        ))]);
        let err = chain.process("https://example.com/v").await.unwrap_err();
        match err {
            MediaError::AllProvidersFailed { last } => assert!(!last.is_empty()),
            other => panic!("expected aggregated failure, got {other}"),
        }
    }
}
