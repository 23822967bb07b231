use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string. Optional: without it the queue is offline and
    /// caching, deduplication and live events degrade instead of crashing.
    pub redis_url: Option<String>,

    /// Groq API key (Whisper transcription). Optional: video audio cannot be
    /// transcribed without it.
    pub groq_api_key: Option<String>,

    /// OpenRouter API key (classification + fact-check generation)
    pub openrouter_api_key: String,

    /// Tavily API key (web evidence search). Optional: verdicts degrade to
    /// unsupported (and are downgraded by the trust rule) without it.
    pub tavily_api_key: Option<String>,

    /// Cobalt extraction API endpoint
    #[serde(default = "default_cobalt_url")]
    pub cobalt_url: String,

    /// Outbound proxy for the media extractors
    pub proxy_url: Option<String>,

    /// Path to a cookies.txt consumed by yt-dlp
    pub cookies_path: Option<String>,

    /// Scratch directory for temporary media artifacts
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,

    /// Number of concurrent workers in the worker process
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_cobalt_url() -> String {
    "https://api.cobalt.tools/api/json".to_string()
}

fn default_scratch_dir() -> String {
    std::env::temp_dir()
        .join("claimspect")
        .to_string_lossy()
        .into_owned()
}

fn default_worker_concurrency() -> usize {
    2
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
