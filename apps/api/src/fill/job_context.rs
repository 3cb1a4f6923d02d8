//! Job context — which role and company the current application is for.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_JOB_TITLE: &str = "Software Engineer";
pub const DEFAULT_COMPANY: &str = "Default Company";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobContext {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub url: String,
}

impl Default for JobContext {
    fn default() -> Self {
        Self {
            title: DEFAULT_JOB_TITLE.to_string(),
            company: DEFAULT_COMPANY.to_string(),
            url: String::new(),
        }
    }
}

impl JobContext {
    /// Fills blank title/company from `fallback`.
    pub fn or(mut self, fallback: &JobContext) -> Self {
        if self.title.trim().is_empty() {
            self.title = fallback.title.clone();
        }
        if self.company.trim().is_empty() {
            self.company = fallback.company.clone();
        }
        self
    }
}

/// Line 1 is the company, line 2 the job title. Missing or blank lines keep the defaults.
pub fn parse_job_description(text: &str) -> JobContext {
    let mut lines = text.lines().map(str::trim);
    let mut context = JobContext::default();

    if let Some(company) = lines.next().filter(|l| !l.is_empty()) {
        context.company = company.to_string();
    }
    if let Some(title) = lines.next().filter(|l| !l.is_empty()) {
        context.title = title.to_string();
    }
    context
}

/// Reads the job description file. A missing or unreadable file yields the defaults.
pub async fn load_job_context(path: &Path) -> JobContext {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => {
            let context = parse_job_description(&text);
            info!(
                "Loaded job context: {} at {}",
                context.title, context.company
            );
            context
        }
        Err(e) => {
            warn!(
                "Could not read {} ({e}); using default job context",
                path.display()
            );
            JobContext::default()
        }
    }
}

/// Free-text company notes for prompts. Empty when the file is absent.
pub async fn load_company_info(path: &Path) -> String {
    tokio::fs::read_to_string(path).await.unwrap_or_default()
}
