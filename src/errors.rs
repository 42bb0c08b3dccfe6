use thiserror::Error;

use cdp_session::SessionError;

/// Failures that abort an analysis run.
///
/// Only a browser that never came up and a navigation that never settled
/// are fatal. Everything downstream (interactions, behaviors, idle waits)
/// degrades the result instead of aborting it.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("browser launch failed: {0}")]
    Launch(#[source] SessionError),

    #[error("navigation to {url} failed: {source}")]
    Navigation {
        url: String,
        #[source]
        source: SessionError,
    },

    #[error("cache backend failed: {0}")]
    Cache(String),
}

impl AnalysisError {
    /// Whether retrying the whole run could plausibly succeed.
    pub fn retriable(&self) -> bool {
        match self {
            AnalysisError::Launch(err) => err.retriable,
            AnalysisError::Navigation { .. } => true,
            AnalysisError::Cache(_) => false,
        }
    }
}
