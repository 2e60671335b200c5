//! Session enrichment through an external analyzer.
//!
//! The analyzer receives only [`SessionSignals`] (never image data) and
//! returns a summary, score, tips and insights. [`enrich`] bounds every call
//! with a timeout and substitutes [`fallback_analysis`] on any failure, so
//! enrichment can never abort session creation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use worktrace_core::analytics::{fallback_analysis, SessionSignals};
use worktrace_core::session::AiAnalysis;

/// Default per-call timeout.
pub const DEFAULT_ANALYZER_TIMEOUT_SECS: u64 = 10;

/// Errors from an analyzer call.
#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The analyzer returned a non-2xx status code.
    #[error("Analyzer error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Analyzer did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Invalid analyzer response: {0}")]
    InvalidResponse(String),
}

/// Contract satisfied by any enrichment backend.
#[async_trait]
pub trait SessionAnalyzer: Send + Sync {
    async fn analyze(&self, signals: &SessionSignals) -> Result<AiAnalysis, AnalyzerError>;
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Analyzer connection settings.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Endpoint receiving `POST` requests with session signals. `None`
    /// disables remote enrichment.
    pub url: Option<String>,
    pub timeout: Duration,
}

impl AnalyzerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                 | Default  |
    /// |-------------------------|----------|
    /// | `ANALYZER_URL`          | *(unset)*|
    /// | `ANALYZER_TIMEOUT_SECS` | `10`     |
    pub fn from_env() -> Self {
        let url = std::env::var("ANALYZER_URL")
            .ok()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());

        let timeout_secs: u64 = std::env::var("ANALYZER_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_ANALYZER_TIMEOUT_SECS.to_string())
            .parse()
            .expect("ANALYZER_TIMEOUT_SECS must be a valid u64");

        Self {
            url,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Implementations
// ---------------------------------------------------------------------------

/// Raw analyzer reply before validation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzerReply {
    summary: String,
    score: f64,
    #[serde(default)]
    tips: Vec<String>,
    #[serde(default)]
    insights: Vec<String>,
}

impl AnalyzerReply {
    fn into_analysis(self) -> Result<AiAnalysis, AnalyzerError> {
        if self.summary.trim().is_empty() {
            return Err(AnalyzerError::InvalidResponse("empty summary".into()));
        }
        if !self.score.is_finite() {
            return Err(AnalyzerError::InvalidResponse(format!(
                "non-finite score {}",
                self.score
            )));
        }
        Ok(AiAnalysis {
            summary: self.summary,
            score: self.score.clamp(0.0, 100.0),
            tips: self.tips,
            insights: self.insights,
        })
    }
}

/// HTTP client for a remote analyzer.
pub struct HttpAnalyzer {
    client: reqwest::Client,
    url: String,
}

impl HttpAnalyzer {
    pub fn new(url: String, timeout: Duration) -> Result<Self, AnalyzerError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl SessionAnalyzer for HttpAnalyzer {
    async fn analyze(&self, signals: &SessionSignals) -> Result<AiAnalysis, AnalyzerError> {
        let response = self.client.post(&self.url).json(signals).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyzerError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let reply: AnalyzerReply = response
            .json()
            .await
            .map_err(|e| AnalyzerError::InvalidResponse(e.to_string()))?;
        reply.into_analysis()
    }
}

/// Analyzer used when no remote endpoint is configured: always answers with
/// the deterministic local analysis.
pub struct LocalAnalyzer;

#[async_trait]
impl SessionAnalyzer for LocalAnalyzer {
    async fn analyze(&self, signals: &SessionSignals) -> Result<AiAnalysis, AnalyzerError> {
        Ok(fallback_analysis(signals))
    }
}

/// Build the analyzer described by `config`.
pub fn from_config(config: &AnalyzerConfig) -> Result<Arc<dyn SessionAnalyzer>, AnalyzerError> {
    match &config.url {
        Some(url) => {
            tracing::info!(url = %url, timeout_secs = config.timeout.as_secs(), "Remote analyzer enabled");
            Ok(Arc::new(HttpAnalyzer::new(url.clone(), config.timeout)?))
        }
        None => {
            tracing::info!("ANALYZER_URL not set, using local analysis only");
            Ok(Arc::new(LocalAnalyzer))
        }
    }
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

/// Outcome of enriching one session.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub analysis: AiAnalysis,
    /// `true` when the fallback replaced a failed analyzer call.
    pub degraded: bool,
}

/// Call the analyzer with a bounded timeout, falling back on any failure.
pub async fn enrich(
    analyzer: &dyn SessionAnalyzer,
    signals: &SessionSignals,
    timeout: Duration,
) -> Enrichment {
    let result = match tokio::time::timeout(timeout, analyzer.analyze(signals)).await {
        Ok(result) => result,
        Err(_) => Err(AnalyzerError::Timeout(timeout)),
    };

    match result {
        Ok(analysis) => Enrichment {
            analysis,
            degraded: false,
        },
        Err(e) => {
            tracing::warn!(
                employee_id = signals.employee_id,
                error = %e,
                "Analyzer unavailable, using fallback analysis"
            );
            Enrichment {
                analysis: fallback_analysis(signals),
                degraded: true,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
