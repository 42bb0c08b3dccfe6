//! Result shapes produced by an analysis run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use behavior_sim::BehaviorReport;
use pagecarbon_core_types::duration_ms;
use resource_ledger::ResourceTally;

/// Aggregate of every interaction attempted during the run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InteractionSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub timed_out: usize,
    pub failed: usize,
    /// How many successful interactions were followed by observable
    /// network activity.
    pub triggered_network: usize,
    pub behaviors: BehaviorReport,
}

impl InteractionSummary {
    pub fn record_success(&mut self, triggered_network: bool) {
        self.attempted += 1;
        self.succeeded += 1;
        if triggered_network {
            self.triggered_network += 1;
        }
    }

    pub fn record_timeout(&mut self) {
        self.attempted += 1;
        self.timed_out += 1;
    }

    pub fn record_failure(&mut self) {
        self.attempted += 1;
        self.failed += 1;
    }
}

/// The complete outcome of one page analysis, suitable for JSON output
/// and for cache storage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub url: String,
    pub fingerprint: String,
    pub tally: ResourceTally,
    /// Number of distinct transfers observed, billable or not.
    pub resource_count: usize,
    pub interactions: InteractionSummary,
    /// Estimated grams of CO2e for one load of this page.
    pub emissions_grams: f64,
    pub green_hosting: bool,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    #[serde(default)]
    pub from_cache: bool,
}

impl AnalysisResult {
    /// Skeleton result carrying nothing but identity. Callers fill the
    /// rest in as the run progresses.
    pub fn empty(url: &str) -> Self {
        Self {
            url: url.to_string(),
            fingerprint: String::new(),
            tally: ResourceTally::default(),
            resource_count: 0,
            interactions: InteractionSummary::default(),
            emissions_grams: 0.0,
            green_hosting: false,
            started_at: Utc::now(),
            duration: Duration::ZERO,
            from_cache: false,
        }
    }
}
