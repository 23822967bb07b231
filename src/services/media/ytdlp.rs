//! yt-dlp backed extraction: caption grab first, audio segment download as
//! the heavier fallback.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use uuid::Uuid;

use super::{ExtractionArtifact, MediaError, TempMedia};

/// Hard cap on checkable video length (shorts/reels territory).
const MAX_VIDEO_SECONDS: u64 = 600;

/// How much audio to download for transcription.
const AUDIO_SEGMENT_SECONDS: u64 = 180;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const CAPTION_TIMEOUT: Duration = Duration::from_secs(60);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(210);

/// Shared subprocess runner: common anti-block arguments, cookies/proxy
/// wiring, and timeout enforcement (the child is killed when the timeout
/// drops the future).
#[derive(Clone)]
pub struct YtDlpRunner {
    scratch_dir: PathBuf,
    cookies_path: Option<PathBuf>,
    proxy_url: Option<String>,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    duration: f64,
}

impl YtDlpRunner {
    pub fn new(
        scratch_dir: PathBuf,
        cookies_path: Option<PathBuf>,
        proxy_url: Option<String>,
    ) -> Self {
        Self {
            scratch_dir,
            cookies_path,
            proxy_url,
        }
    }

    pub fn scratch_dir(&self) -> &PathBuf {
        &self.scratch_dir
    }

    /// Arguments that keep yt-dlp stable against platform countermeasures on
    /// cloud hosts: mobile player client, matching iOS user agent, IPv4, and
    /// internal retries.
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--extractor-args".to_string(),
            "youtube:player_client=ios,mweb;player_skip=webpage".to_string(),
            "--user-agent".to_string(),
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 \
             (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1"
                .to_string(),
            "--force-ipv4".to_string(),
            "--retries".to_string(),
            "3".to_string(),
            "--fragment-retries".to_string(),
            "3".to_string(),
            "--retry-sleep".to_string(),
            "1".to_string(),
            "--quiet".to_string(),
            "--no-warnings".to_string(),
        ];
        if let Some(cookies) = &self.cookies_path {
            if cookies.exists() {
                args.push("--cookies".to_string());
                args.push(cookies.to_string_lossy().into_owned());
            }
        }
        if let Some(proxy) = &self.proxy_url {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }
        args
    }

    async fn run(&self, args: Vec<String>, timeout: Duration) -> Result<String, MediaError> {
        let mut cmd = Command::new("yt-dlp");
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| MediaError::Timeout {
                seconds: timeout.as_secs(),
            })?
            .map_err(|e| MediaError::Spawn(e.to_string()))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.chars().take(500).collect();
            Err(MediaError::CommandFailed {
                code: output.status.code().unwrap_or(-1),
                stderr,
            })
        }
    }

    /// Metadata probe for fail-fast duration enforcement.
    pub async fn probe_duration(&self, url: &str) -> Result<u64, MediaError> {
        let mut args = vec![
            "--dump-json".to_string(),
            "--skip-download".to_string(),
        ];
        args.extend(self.common_args());
        args.push(url.to_string());

        let stdout = self.run(args, PROBE_TIMEOUT).await?;
        let probe: ProbeOutput = serde_json::from_str(&stdout).unwrap_or(ProbeOutput { duration: 0.0 });
        Ok(probe.duration.max(0.0) as u64)
    }
}

/// Take ownership of everything a yt-dlp run wrote under `prefix` in the
/// scratch dir. yt-dlp may produce more files than asked for (a caption per
/// matched language, `.part` leftovers from an interrupted download); every
/// one of them must end up owned by a `TempMedia` so dropping the returned
/// vec deletes them all.
fn sweep_scratch(dir: &Path, prefix: &str) -> Vec<TempMedia> {
    let mut owned = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return owned;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(prefix) {
            owned.push(TempMedia::from_path(entry.path()));
        }
    }
    owned
}

/// Strategy 1: pull existing captions; no media download at all.
pub struct YtDlpCaptionProvider {
    runner: YtDlpRunner,
}

impl YtDlpCaptionProvider {
    pub fn new(runner: YtDlpRunner) -> Self {
        Self { runner }
    }

    pub async fn process(&self, url: &str) -> Result<ExtractionArtifact, MediaError> {
        let file_id = Uuid::new_v4();
        let template = self
            .runner
            .scratch_dir()
            .join(format!("{file_id}.%(ext)s"));

        let mut args = vec![
            "--skip-download".to_string(),
            "--write-subs".to_string(),
            "--write-auto-subs".to_string(),
            "--sub-format".to_string(),
            "vtt".to_string(),
            "--sub-langs".to_string(),
            "en.*,ru.*".to_string(),
            "-o".to_string(),
            template.to_string_lossy().into_owned(),
        ];
        args.extend(self.runner.common_args());
        args.push(url.to_string());

        let prefix = file_id.to_string();
        let run_outcome = self.runner.run(args, CAPTION_TIMEOUT).await;
        // Own every file this run wrote before inspecting the outcome, so a
        // failed run leaves nothing behind either.
        let written = sweep_scratch(self.runner.scratch_dir(), &prefix);
        run_outcome?;

        // yt-dlp names captions <id>.<lang>.vtt and may write one per
        // matched language; read the first, drop (delete) the rest.
        let caption = written
            .iter()
            .find(|media| {
                media
                    .path()
                    .extension()
                    .map_or(false, |ext| ext == "vtt")
            })
            .ok_or(MediaError::Empty)?;

        let raw = tokio::fs::read_to_string(caption.path()).await?;
        let text = strip_vtt(&raw);
        if text.chars().count() < 10 {
            return Err(MediaError::Empty);
        }
        Ok(ExtractionArtifact::Text(text))
    }
}

/// Drop WEBVTT headers, cue timings and repeated rolling-caption lines,
/// keeping the spoken text once.
fn strip_vtt(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty()
            || line.starts_with("WEBVTT")
            || line.starts_with("Kind:")
            || line.starts_with("Language:")
            || line.starts_with("NOTE")
            || line.contains("-->")
            || line.chars().all(|c| c.is_ascii_digit())
        {
            continue;
        }
        // Strip inline cue tags like <00:00:01.000><c>word</c>.
        let mut cleaned = String::with_capacity(line.len());
        let mut in_tag = false;
        for c in line.chars() {
            match c {
                '<' => in_tag = true,
                '>' => in_tag = false,
                c if !in_tag => cleaned.push(c),
                _ => {}
            }
        }
        let cleaned = cleaned.trim().to_string();
        if cleaned.is_empty() {
            continue;
        }
        if lines.last().map(String::as_str) != Some(cleaned.as_str()) {
            lines.push(cleaned);
        }
    }
    lines.join(" ")
}

/// Strategy 2: download a bounded audio segment (wav, 16kHz mono) for
/// transcription. Tries bestaudio first, then the generic best format.
pub struct YtDlpAudioProvider {
    runner: YtDlpRunner,
}

impl YtDlpAudioProvider {
    pub fn new(runner: YtDlpRunner) -> Self {
        Self { runner }
    }

    pub async fn process(&self, url: &str) -> Result<ExtractionArtifact, MediaError> {
        // Fail fast on long videos before paying for a download.
        let duration = self.runner.probe_duration(url).await.unwrap_or(0);
        if duration > MAX_VIDEO_SECONDS {
            return Err(MediaError::TooLong {
                seconds: duration,
                limit: MAX_VIDEO_SECONDS,
            });
        }

        let file_id = Uuid::new_v4();
        let prefix = file_id.to_string();
        let output_path = self.runner.scratch_dir().join(format!("{file_id}.wav"));

        let minutes = AUDIO_SEGMENT_SECONDS / 60;
        let seconds = AUDIO_SEGMENT_SECONDS % 60;
        let section = format!("*00:00-00:{minutes:02}:{seconds:02}");

        let mut base_args = vec![
            "--download-sections".to_string(),
            section,
            "--force-overwrites".to_string(),
            "-x".to_string(),
            "--audio-format".to_string(),
            "wav".to_string(),
            "--postprocessor-args".to_string(),
            "ffmpeg:-ar 16000 -ac 1".to_string(),
        ];
        base_args.extend(self.runner.common_args());
        base_args.push("-o".to_string());
        base_args.push(output_path.to_string_lossy().into_owned());
        base_args.push(url.to_string());

        for format in ["bestaudio/best", "best"] {
            let mut args = vec!["-f".to_string(), format.to_string()];
            args.extend(base_args.clone());
            let outcome = self.runner.run(args, DOWNLOAD_TIMEOUT).await;

            // A failed or interrupted run can leave `.part` files next to the
            // target; own everything written under this job's prefix and keep
            // only the finished wav (the rest is deleted on drop).
            let mut finished = None;
            for media in sweep_scratch(self.runner.scratch_dir(), &prefix) {
                if media.path() == output_path {
                    finished = Some(media);
                }
            }

            match (outcome, finished) {
                (Ok(_), Some(media)) => {
                    return Ok(ExtractionArtifact::Audio(media));
                }
                (Ok(_), None) => {
                    tracing::warn!(format, "yt-dlp reported success but wrote no file");
                }
                (Err(e), _) => {
                    tracing::warn!(format, error = %e, "yt-dlp download attempt failed");
                    if matches!(e, MediaError::Timeout { .. }) {
                        return Err(e);
                    }
                }
            }
        }

        Err(MediaError::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_vtt_removes_cues_and_duplicates() {
        let raw = "WEBVTT\nKind: captions\nLanguage: en\n\n\
                   00:00:00.000 --> 00:00:02.000\nHello world\n\n\
                   00:00:02.000 --> 00:00:04.000\nHello world\n\n\
                   00:00:04.000 --> 00:00:06.000\n<00:00:04.500><c>this</c> is a claim\n";
        let text = strip_vtt(raw);
        assert_eq!(text, "Hello world this is a claim");
    }

    #[test]
    fn strip_vtt_empty_input() {
        assert_eq!(strip_vtt("WEBVTT\n\n"), "");
    }

    #[test]
    fn sweep_owns_every_prefixed_file() {
        let dir = std::env::temp_dir();
        let prefix = Uuid::new_v4().to_string();
        // Two caption languages plus an interrupted download leftover.
        let caption_en = dir.join(format!("{prefix}.en.vtt"));
        let caption_ru = dir.join(format!("{prefix}.ru.vtt"));
        let partial = dir.join(format!("{prefix}.wav.part"));
        let unrelated = dir.join(format!("keepme-{}.vtt", Uuid::new_v4()));
        for path in [&caption_en, &caption_ru, &partial, &unrelated] {
            std::fs::write(path, b"x").unwrap();
        }

        {
            let owned = sweep_scratch(&dir, &prefix);
            assert_eq!(owned.len(), 3);
        }
        // Dropping the sweep deletes everything it owned, nothing else.
        assert!(!caption_en.exists());
        assert!(!caption_ru.exists());
        assert!(!partial.exists());
        assert!(unrelated.exists());
        std::fs::remove_file(unrelated).unwrap();
    }
}
