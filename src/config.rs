//! Process configuration, resolved from the environment: a
//! `dotenvy::dotenv()` bootstrap followed by `std::env::var` reads with
//! sane fallbacks, so the service runs out of the box for local development
//! but is fully operator-tunable in production.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub sqlite_db_name: String,
    pub bind_addr: String,
    pub max_payload_len: usize,
    pub default_approval_timeout: Duration,
    pub llm: LlmConfig,
    pub recovery: RecoveryTickConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: String,
    pub model_name: String,
    pub temperature: f32,
}

#[derive(Clone, Debug)]
pub struct RecoveryTickConfig {
    pub approved_resume_interval: Duration,
    pub stalled_scan_interval: Duration,
    pub timeout_scan_interval: Duration,
    pub stalled_threshold: Duration,
    pub approval_timeout_threshold: Duration,
}

impl Default for RecoveryTickConfig {
    fn default() -> Self {
        Self {
            approved_resume_interval: Duration::from_secs(30),
            stalled_scan_interval: Duration::from_secs(5 * 60),
            timeout_scan_interval: Duration::from_secs(10 * 60),
            stalled_threshold: Duration::from_secs(30 * 60),
            approval_timeout_threshold: Duration::from_secs(60 * 60),
        }
    }
}

impl EngineConfig {
    /// Load configuration, bootstrapping a `.env.local`/`.env` file if present.
    /// Missing env vars fall back to development-friendly defaults rather than
    /// failing startup — only the LLM adapter actually requires a real key.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let sqlite_db_name =
            std::env::var("WAYGATE_SQLITE_DB_NAME").unwrap_or_else(|_| "waygate.db".to_string());
        let bind_addr =
            std::env::var("WAYGATE_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let max_payload_len = std::env::var("WAYGATE_MAX_PAYLOAD_LEN")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50_000);
        let default_approval_timeout_minutes: f64 = std::env::var("WAYGATE_APPROVAL_TIMEOUT_MIN")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60.0);

        Self {
            sqlite_db_name,
            bind_addr,
            max_payload_len,
            default_approval_timeout: Duration::from_secs_f64(
                default_approval_timeout_minutes * 60.0,
            ),
            llm: LlmConfig {
                api_key: std::env::var("GEMINI_API_KEY").unwrap_or_default(),
                model_name: std::env::var("GEMINI_MODEL_NAME")
                    .unwrap_or_else(|_| "gemini-1.5-flash".to_string()),
                temperature: std::env::var("GEMINI_MODEL_TEMPERATURE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0.7),
            },
            recovery: RecoveryTickConfig::default(),
        }
    }

    pub fn sqlite_url(&self) -> String {
        format!("sqlite://{}", self.sqlite_db_name)
    }
}
