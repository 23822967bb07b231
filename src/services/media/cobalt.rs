//! Cobalt extraction API provider: the external fallback route for platforms
//! yt-dlp cannot reach (TikTok, Instagram, some shorts).

use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{ExtractionArtifact, MediaError, TempMedia};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub struct CobaltProvider {
    http: reqwest::Client,
    api_url: String,
    scratch_dir: PathBuf,
}

#[derive(Deserialize)]
struct CobaltResponse {
    status: String,
    url: Option<String>,
    picker: Option<Vec<PickerItem>>,
}

#[derive(Deserialize)]
struct PickerItem {
    url: String,
}

impl CobaltProvider {
    pub fn new(api_url: String, scratch_dir: PathBuf) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_url,
            scratch_dir,
        }
    }

    pub async fn process(&self, url: &str) -> Result<ExtractionArtifact, MediaError> {
        let response = self
            .http
            .post(&self.api_url)
            .header("Accept", "application/json")
            .json(&serde_json::json!({
                "url": url,
                "isAudioOnly": true,
                "aFormat": "mp3",
                "filenamePattern": "classic",
            }))
            .send()
            .await?
            .error_for_status()?;

        let body: CobaltResponse = response.json().await?;

        let download_url = match body.status.as_str() {
            "stream" | "redirect" => body.url.ok_or(MediaError::Empty)?,
            // Several variants offered: take the first.
            "picker" => body
                .picker
                .and_then(|p| p.into_iter().next())
                .map(|item| item.url)
                .ok_or(MediaError::Empty)?,
            _ => return Err(MediaError::Empty),
        };

        self.download(&download_url).await
    }

    /// Stream the media to a scratch file. The `TempMedia` wrapper is created
    /// before the first byte is written, so a partial download is deleted on
    /// any failure path.
    async fn download(&self, download_url: &str) -> Result<ExtractionArtifact, MediaError> {
        let path = self.scratch_dir.join(format!("{}.mp3", Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&path).await?;
        let media = TempMedia::from_path(path);

        let response = self
            .http
            .get(download_url)
            .send()
            .await?
            .error_for_status()?;

        let mut stream = response.bytes_stream();
        let mut written = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        if written == 0 {
            return Err(MediaError::Empty);
        }
        Ok(ExtractionArtifact::Audio(media))
    }
}
