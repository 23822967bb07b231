//! External analysis dependencies: transcription, content-type gatekeeping,
//! evidence search and fact-check generation. Every network call goes through
//! the resilient executor in `services::retry`.

use std::time::Duration;

use once_cell::sync::Lazy;
use redis::AsyncCommands;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::models::verdict::{BreakdownItem, Source, Verdict, VerificationResult, PIPELINE_VERSION};
use crate::services::retry::{call_with_retry, CallError};

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const GROQ_TRANSCRIPTION_URL: &str = "https://api.groq.com/openai/v1/audio/transcriptions";
const TAVILY_URL: &str = "https://api.tavily.com/search";

const GATEKEEPER_MODEL: &str = "openai/gpt-4o-mini";
const FACTCHECK_MODEL: &str = "deepseek/deepseek-r1";
const WHISPER_MODEL: &str = "whisper-large-v3-turbo";

const SEARCH_CACHE_PREFIX: &str = "verify:search:";
const SEARCH_CACHE_TTL_SECS: u64 = 86_400;
const SEARCH_QUERY_MAX_CHARS: usize = 400;
const EXCERPT_MAX_CHARS: usize = 350;

/// Content labels the gatekeeper may assign. Anything but `Claims`
/// short-circuits the pipeline before the expensive fact-check call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ContentLabel {
    Movie,
    Series,
    Anime,
    Song,
    Entertainment,
    Claims,
    Noise,
}

/// Gatekeeper classification of extracted text.
#[derive(Debug, Clone)]
pub struct Classification {
    pub label: ContentLabel,
    pub title: Option<String>,
    pub summary: String,
}

pub struct AiClient {
    http: reqwest::Client,
    redis: Option<redis::Client>,
    openrouter_api_key: String,
    groq_api_key: Option<String>,
    tavily_api_key: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

impl AiClient {
    pub fn new(config: &AppConfig, redis: Option<redis::Client>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_default();
        Self {
            http,
            redis,
            openrouter_api_key: config.openrouter_api_key.clone(),
            groq_api_key: config.groq_api_key.clone(),
            tavily_api_key: config.tavily_api_key.clone(),
        }
    }

    async fn chat(
        &self,
        model: &str,
        prompt: String,
        json_mode: bool,
        max_attempts: u32,
        base_delay: Duration,
    ) -> Result<String, CallError> {
        let mut body = serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.1,
        });
        if json_mode {
            body["temperature"] = serde_json::json!(0.0);
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        call_with_retry(
            || async {
                let response = self
                    .http
                    .post(OPENROUTER_URL)
                    .bearer_auth(&self.openrouter_api_key)
                    .header("X-Title", "claimspect")
                    .json(&body)
                    .send()
                    .await
                    .map_err(CallError::from)?;

                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    let snippet: String = text.chars().take(300).collect();
                    return Err(CallError::from_status(
                        status,
                        format!("chat completion failed ({status}): {snippet}"),
                    ));
                }

                let parsed: ChatResponse = response
                    .json()
                    .await
                    .map_err(|e| CallError::Transient(format!("malformed chat response: {e}")))?;
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .ok_or_else(|| CallError::Transient("chat response had no choices".into()))
            },
            max_attempts,
            base_delay,
        )
        .await
    }

    /// Transcribe an audio file with Whisper. An unusable transcript is not a
    /// hard failure: the pipeline turns empty text into an UNCERTAIN result
    /// that explains the likely cause, so errors here yield an empty string.
    pub async fn transcribe(&self, path: &std::path::Path) -> Result<String, CallError> {
        let Some(api_key) = &self.groq_api_key else {
            warn!("no transcription key configured, returning empty transcript");
            return Ok(String::new());
        };

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CallError::Transient(format!("failed to read audio file: {e}")))?;

        let outcome = call_with_retry(
            || async {
                let part = reqwest::multipart::Part::bytes(bytes.clone())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| CallError::Transient(e.to_string()))?;
                let form = reqwest::multipart::Form::new()
                    .part("file", part)
                    .text("model", WHISPER_MODEL)
                    .text("response_format", "json");

                let response = self
                    .http
                    .post(GROQ_TRANSCRIPTION_URL)
                    .bearer_auth(api_key)
                    .multipart(form)
                    .send()
                    .await
                    .map_err(CallError::from)?;

                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    let snippet: String = text.chars().take(300).collect();
                    return Err(CallError::from_status(
                        status,
                        format!("transcription failed ({status}): {snippet}"),
                    ));
                }
                let parsed: TranscriptionResponse = response
                    .json()
                    .await
                    .map_err(|e| CallError::Transient(format!("malformed transcript: {e}")))?;
                Ok(parsed.text)
            },
            3,
            Duration::from_millis(1000),
        )
        .await;

        match outcome {
            Ok(text) => Ok(text),
            Err(e) if e.is_critical() => Err(e),
            Err(e) => {
                warn!(error = %e, "transcription unavailable, continuing with empty transcript");
                Ok(String::new())
            }
        }
    }

    /// Stage A gatekeeper: classify text into the fixed label set. Transient
    /// model failures fall back to `Claims` (verification proceeds); critical
    /// failures propagate.
    pub async fn classify_content(&self, text: &str) -> Result<Classification, CallError> {
        if text.trim().chars().count() < 10 {
            return Ok(Classification {
                label: ContentLabel::Noise,
                title: None,
                summary: "No usable speech detected.".to_string(),
            });
        }

        let safe_text = smart_trim(text, 1500);
        let prompt = format!(
            "You are a highly accurate MEDIA-TYPE CLASSIFIER.\n\
             INPUT: \"\"\"{safe_text}\"\"\"\n\
             Determine type: \"movie\", \"series\", \"anime\", \"song\", \
             \"entertainment\", \"claims\", \"noise\".\n\
             EXAMPLES:\n\
             1. \"Harry used magic...\" -> {{\"type\": \"movie\"}}\n\
             2. \"Inflation is 5%...\" -> {{\"type\": \"claims\"}}\n\
             OUTPUT STRICT JSON:\n\
             {{ \"type\": \"...\", \"title\": null, \"summary\": \"max 10 words\" }}"
        );

        let raw = match self
            .chat(GATEKEEPER_MODEL, prompt, true, 3, Duration::from_millis(1000))
            .await
        {
            Ok(raw) => raw,
            Err(e) if e.is_critical() => return Err(e),
            Err(e) => {
                warn!(error = %e, "gatekeeper unavailable, assuming claims");
                return Ok(Classification {
                    label: ContentLabel::Claims,
                    title: None,
                    summary: "Classification unavailable.".to_string(),
                });
            }
        };

        let parsed = extract_json_lenient(&raw).unwrap_or_default();
        let mut label = parsed["type"]
            .as_str()
            .unwrap_or("")
            .trim()
            .to_lowercase()
            .parse::<ContentLabel>()
            // Unknown labels must not suppress verification.
            .unwrap_or(ContentLabel::Claims);

        // Lyrics heuristic: caption tracks for music routinely carry note
        // glyphs the classifier misses.
        if label == ContentLabel::Claims && safe_text.contains('♪') {
            label = ContentLabel::Song;
        }

        Ok(Classification {
            label,
            title: parsed["title"].as_str().map(str::to_string),
            summary: truncate_chars(
                parsed["summary"].as_str().unwrap_or("No description available."),
                150,
            ),
        })
    }

    /// Evidence search with its own response cache keyed by a digest of the
    /// trimmed, truncated query. Search failure is never fatal: it returns an
    /// empty source list and the trust rule handles the consequences.
    pub async fn search_evidence(&self, query: &str) -> Vec<Source> {
        let Some(api_key) = &self.tavily_api_key else {
            debug!("no search key configured, skipping evidence search");
            return Vec::new();
        };

        let safe_query = smart_trim(query, SEARCH_QUERY_MAX_CHARS);
        let cache_key = {
            let mut hasher = Sha256::new();
            hasher.update(safe_query.to_lowercase().trim().as_bytes());
            format!("{SEARCH_CACHE_PREFIX}{}", hex::encode(hasher.finalize()))
        };

        if let Some(cached) = self.search_cache_get(&cache_key).await {
            debug!("evidence search cache hit");
            return cached;
        }

        let outcome = call_with_retry(
            || async {
                let response = self
                    .http
                    .post(TAVILY_URL)
                    .timeout(Duration::from_secs(10))
                    .json(&serde_json::json!({
                        "api_key": api_key,
                        "query": safe_query,
                        "search_depth": "basic",
                        "include_answer": false,
                        "max_results": 5,
                    }))
                    .send()
                    .await
                    .map_err(CallError::from)?;

                let status = response.status();
                if !status.is_success() {
                    return Err(CallError::from_status(
                        status,
                        format!("evidence search failed ({status})"),
                    ));
                }
                response
                    .json::<TavilyResponse>()
                    .await
                    .map_err(|e| CallError::Transient(format!("malformed search response: {e}")))
            },
            2,
            Duration::from_millis(500),
        )
        .await;

        let results = match outcome {
            Ok(body) => body.results,
            Err(e) => {
                warn!(error = %e, "evidence search unavailable");
                return Vec::new();
            }
        };

        let sources: Vec<Source> = results
            .into_iter()
            .filter(|r| r.content.chars().count() > 50)
            .map(|r| Source {
                title: r.title,
                url: r.url,
                excerpt: truncate_chars(&r.content, EXCERPT_MAX_CHARS),
            })
            .collect();

        if !sources.is_empty() {
            self.search_cache_set(&cache_key, &sources).await;
        }
        sources
    }

    async fn search_cache_get(&self, key: &str) -> Option<Vec<Source>> {
        let client = self.redis.as_ref()?;
        let mut conn = client.get_multiplexed_async_connection().await.ok()?;
        let raw: Option<String> = conn.get(key).await.ok()?;
        raw.and_then(|s| serde_json::from_str(&s).ok())
    }

    async fn search_cache_set(&self, key: &str, sources: &[Source]) {
        let Some(client) = &self.redis else { return };
        let Ok(payload) = serde_json::to_string(sources) else {
            return;
        };
        let Ok(mut conn) = client.get_multiplexed_async_connection().await else {
            return;
        };
        if let Err(e) = conn
            .set_ex::<_, _, ()>(key, payload, SEARCH_CACHE_TTL_SECS)
            .await
        {
            warn!(error = %e, "search cache write failed");
        }
    }

    /// Stage B: request a structured verdict with evidence attribution.
    /// Exhausted transient retries degrade to an UNCERTAIN fallback result;
    /// critical errors propagate and fail the job.
    pub async fn verify_claim(&self, text: &str) -> Result<VerificationResult, CallError> {
        info!(claim = %truncate_chars(text, 60), "fact-checking claim");

        let sources = self.search_evidence(text).await;
        let evidence = if sources.is_empty() {
            "No external evidence found.".to_string()
        } else {
            sources
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    format!(
                        "[SOURCE ID: {}]\nTITLE: {}\nURL: {}\nCONTENT: {}",
                        i + 1,
                        s.title,
                        s.url,
                        s.excerpt
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        let prompt = format!(
            "ROLE: Professional Fact-Checker AI.\n\
             INPUT: \"{text}\"\n\
             EVIDENCE:\n{evidence}\n\n\
             CONSTRAINTS:\n\
             - If FICTION (movie/game) -> Verdict \"INFO\".\n\
             - Analyze distinct factual claims.\n\
             - Be concise.\n\n\
             IMPORTANT: For each breakdown item, specify \"source_id\" (number) \
             from EVIDENCE that best proves/disproves it. If no source, use 0.\n\n\
             OUTPUT JSON ONLY:\n\
             {{\n\
               \"verdict\": \"CONFIRMED\" | \"CONTRADICTED\" | \"DISPUTED\" | \"UNCERTAIN\" | \"INFO\",\n\
               \"summary\": \"Headline (max 15 words).\",\n\
               \"confidence\": 0.0,\n\
               \"breakdown\": [\n\
                 {{ \"claim\": \"Atomic claim\", \"status\": \"TRUE\"|\"FALSE\"|\"UNPROVEN\", \
                    \"reason\": \"Reasoning\", \"source_id\": 1 }}\n\
               ]\n\
             }}"
        );

        let raw = match self
            .chat(FACTCHECK_MODEL, prompt, false, 3, Duration::from_millis(2000))
            .await
        {
            Ok(raw) => raw,
            Err(e) if e.is_critical() => return Err(e),
            Err(e) => {
                warn!(error = %e, "fact-check model unavailable, degrading");
                return Ok(fallback_result());
            }
        };

        let Some(json) = extract_json_lenient(&raw) else {
            warn!("fact-check response was unparseable, degrading");
            return Ok(fallback_result());
        };

        let breakdown = json["breakdown"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .take(6)
                    .map(|b| BreakdownItem {
                        claim: truncate_chars(b["claim"].as_str().unwrap_or(""), 120),
                        status: b["status"].as_str().unwrap_or("UNPROVEN").to_uppercase(),
                        reason: truncate_chars(b["reason"].as_str().unwrap_or(""), 150),
                        source_id: b["source_id"].as_u64().unwrap_or(0) as u32,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(VerificationResult {
            verdict: Verdict::normalize(json["verdict"].as_str().unwrap_or("")),
            confidence: json["confidence"].as_f64().unwrap_or(0.0).clamp(0.0, 1.0),
            summary: truncate_chars(
                json["summary"].as_str().unwrap_or("Analysis complete."),
                200,
            ),
            key_claim: None,
            sources,
            breakdown,
            model_used: FACTCHECK_MODEL.to_string(),
            pipeline_version: PIPELINE_VERSION.to_string(),
            check_id: None,
        })
    }
}

fn fallback_result() -> VerificationResult {
    VerificationResult {
        verdict: Verdict::Uncertain,
        confidence: 0.0,
        summary: "Verification service is temporarily overloaded.".to_string(),
        key_claim: None,
        sources: Vec::new(),
        breakdown: Vec::new(),
        model_used: "fallback".to_string(),
        pipeline_version: PIPELINE_VERSION.to_string(),
        check_id: None,
    }
}

/// Cut `text` to at most `max` characters, preferring the last full sentence
/// when one ends past the halfway point.
pub fn smart_trim(text: &str, max: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max {
        return text.to_string();
    }
    let slice: String = chars[..max].iter().collect();
    let last_end = slice
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .last();
    match last_end {
        Some(end) if slice[..end].chars().count() > max / 2 => slice[..end].to_string(),
        _ => slice,
    }
}

/// Character-safe truncation.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("think pattern"));
static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)```(?:json)?").expect("fence pattern"));
static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("comma pattern"));

/// Tolerant JSON extraction from free-form model output: strips reasoning
/// tags, code fences and trailing commas, then parses the outermost object.
/// Returns `None` as the well-defined "unparseable" signal.
pub fn extract_json_lenient(text: &str) -> Option<serde_json::Value> {
    if text.trim().is_empty() {
        return None;
    }
    let cleaned = THINK_BLOCK.replace_all(text, "");
    let cleaned = CODE_FENCE.replace_all(&cleaned, "");
    let cleaned = cleaned.replace('\r', "");

    let first = cleaned.find('{')?;
    let last = cleaned.rfind('}')?;
    if last <= first {
        return None;
    }
    let candidate = &cleaned[first..=last];
    let candidate = TRAILING_COMMA.replace_all(candidate, "$1");
    let candidate: String = candidate
        .chars()
        .map(|c| if c.is_control() && c != '\n' && c != '\t' { ' ' } else { c })
        .collect();

    serde_json::from_str(&candidate).ok()
}
