//! Runtime settings loaded from the environment.
//!
//! Deployment variants raise the upload ceilings through the same variables
//! (e.g. `MAX_FILES=100`, `MAX_FILE_SIZE_MB=50` on higher-capacity hosts).

use std::time::Duration;

/// Service-wide settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    /// Upper bound on files per upload batch.
    pub max_files: usize,
    /// Upper bound on a single file's size, in bytes.
    pub max_file_size: usize,
    /// How long a stored consolidation result stays retrievable.
    pub session_ttl: Duration,
    /// Timeout applied to each provider call.
    pub provider_timeout: Duration,
    /// Languages passed to the OCR engine (`tesseract -l`).
    pub ocr_languages: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:5000"),
            max_files: env_parse("MAX_FILES", 50),
            max_file_size: env_parse("MAX_FILE_SIZE_MB", 10) * 1024 * 1024,
            session_ttl: Duration::from_secs(env_parse("SESSION_TTL_SECS", 3600)),
            provider_timeout: Duration::from_secs(env_parse("PROVIDER_TIMEOUT_SECS", 120)),
            ocr_languages: env_or("OCR_LANGUAGES", "por+eng"),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
