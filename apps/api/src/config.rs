use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Context, Result};

/// Application configuration loaded from environment variables.
/// Only numeric values are validated; every variable has a default.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unset disables semantic matching and generative fallback.
    pub gemini_api_key: Option<String>,
    pub constants_path: PathBuf,
    pub company_info_path: PathBuf,
    pub job_description_path: PathBuf,
    pub responses_dir: PathBuf,
    /// Holds the browser client scripts served at `/script.js` and `/autofill.user.js`.
    pub public_dir: PathBuf,
    pub semantic_threshold: f64,
    pub provider_timeout: Duration,
    pub llm_concurrency: usize,
    /// Host the browser client should call back to.
    pub ip: String,
    pub port: u16,
    /// Origin injected into the client scripts. Defaults to `http://{ip}:{port}`.
    pub public_url: Option<String>,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let semantic_threshold: f64 = parse_env("SEMANTIC_THRESHOLD", "0.5")?;
        ensure!(
            (0.0..=1.0).contains(&semantic_threshold),
            "SEMANTIC_THRESHOLD must be between 0 and 1, got {semantic_threshold}"
        );

        Ok(Config {
            gemini_api_key: optional_env("GEMINI_API_KEY"),
            constants_path: env_or("CONSTANTS_PATH", "constants.json").into(),
            company_info_path: env_or("COMPANY_INFO_PATH", "company-info.txt").into(),
            job_description_path: env_or("JOB_DESCRIPTION_PATH", "job-description.txt").into(),
            responses_dir: env_or("RESPONSES_DIR", "responses").into(),
            public_dir: env_or("PUBLIC_DIR", "public").into(),
            semantic_threshold,
            provider_timeout: Duration::from_secs(parse_env("PROVIDER_TIMEOUT_SECS", "30")?),
            llm_concurrency: parse_env("LLM_CONCURRENCY", "4")?,
            ip: env_or("IP", "localhost"),
            port: parse_env("PORT", "8000")?,
            public_url: optional_env("PUBLIC_URL"),
            rust_log: env_or("RUST_LOG", "info"),
        })
    }

    /// Origin the browser client reaches this service at, without a trailing slash.
    pub fn public_origin(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.ip, self.port),
        }
    }

    pub fn fill_endpoint(&self) -> String {
        format!("{}/api/fill", self.public_origin())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_or(key, default)
        .trim()
        .parse::<T>()
        .with_context(|| format!("{key} must be a valid {}", std::any::type_name::<T>()))
}
