//! The analysis pipeline: session, navigation, interaction, metering.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};
use url::Url;

use action_engine::invoke;
use behavior_sim::{
    simulate_focus, simulate_hover, simulate_scrolling, simulate_typing,
    simulate_viewport_changes, BehaviorConfig, BehaviorReport,
};
use cdp_session::{DeviceProfile, PageOps, SessionManager};
use network_tap::{NetworkMonitor, TapConfig};
use pagecarbon_core_types::{options_fingerprint, AnalysisOptions, InteractionLevel};
use perceiver_interactive::{DiscoveryConfig, ElementKind, Perceiver};

use crate::cache::AnalysisCache;
use crate::emissions::{EmissionsModel, GreenHostingCheck};
use crate::errors::AnalysisError;
use crate::report::{AnalysisResult, InteractionSummary};

/// Per-element interaction deadline. Generous enough for a slow handler,
/// small enough that one stuck element cannot eat the run budget.
const INTERACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a run needs besides the cache: how to get a browser, how to
/// meter it, and the boundaries that turn bytes into grams.
pub struct AnalysisRuntime {
    pub sessions: SessionManager,
    pub tap: TapConfig,
    pub emissions: Box<dyn EmissionsModel>,
    pub green_hosting: Box<dyn GreenHostingCheck>,
}

/// Run one full analysis of `url`.
///
/// The cache is consulted before any browser work starts and written once
/// a run completes. Launch failures (after the manager's own retries) and
/// navigation failures abort the run; everything after a successful
/// navigation is best effort and only shapes the result. The session is
/// torn down on every path.
pub async fn run_analysis(
    runtime: &AnalysisRuntime,
    cache: &dyn AnalysisCache,
    url: &str,
    options: &AnalysisOptions,
) -> Result<AnalysisResult, AnalysisError> {
    let fingerprint = options_fingerprint(url, options);
    if let Some(mut hit) = cache.lookup(&fingerprint) {
        info!(target: "pagecarbon", url, "serving cached analysis");
        hit.from_cache = true;
        return Ok(hit);
    }

    let started_at = Utc::now();
    let started = Instant::now();

    let profile = DeviceProfile::for_device(options.device);
    let session = runtime
        .sessions
        .launch(&profile)
        .await
        .map_err(AnalysisError::Launch)?;
    let viewport = session.profile.viewport;
    let page: Arc<dyn PageOps> = Arc::new(session);

    let monitor = NetworkMonitor::new(runtime.tap.clone());
    let feed = monitor.attach(page.network_events());

    if let Err(source) = page.navigate(url, options.navigation_timeout).await {
        warn!(target: "pagecarbon", url, %source, "navigation failed, aborting run");
        close_page(&page).await;
        feed.abort();
        return Err(AnalysisError::Navigation {
            url: url.to_string(),
            source,
        });
    }

    // The whole post-navigation activity shares one budget. Running out
    // of it degrades the result rather than failing the run.
    let mut interactions = InteractionSummary::default();
    let active = tokio::time::timeout(options.overall_timeout, async {
        let settle = monitor.wait_idle_default().await;
        debug!(
            target: "pagecarbon",
            reached_idle = settle.reached_idle,
            elapsed_ms = settle.elapsed.as_millis() as u64,
            "initial load settled"
        );

        interaction_phase(&page, &monitor, options, &mut interactions).await;
        interactions.behaviors = behavior_phase(&page, &viewport, options).await;

        monitor.wait_idle_default().await;
    })
    .await;
    if active.is_err() {
        warn!(
            target: "pagecarbon",
            url,
            budget_ms = options.overall_timeout.as_millis() as u64,
            "overall budget exhausted, classifying what was captured"
        );
    }

    let records = monitor.resources();
    let tally = resource_ledger::classify(&records);
    let green_hosting = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .map(|host| runtime.green_hosting.is_green(&host))
        .unwrap_or(false);
    let emissions_grams = runtime.emissions.estimate(tally.total_bytes, green_hosting);

    close_page(&page).await;
    feed.abort();

    let result = AnalysisResult {
        url: url.to_string(),
        fingerprint,
        resource_count: records.len(),
        tally,
        interactions,
        emissions_grams,
        green_hosting,
        started_at,
        duration: started.elapsed(),
        from_cache: false,
    };
    cache.store(&result);
    info!(
        target: "pagecarbon",
        url,
        bytes = result.tally.total_bytes,
        resources = result.resource_count,
        grams = result.emissions_grams,
        "analysis complete"
    );
    Ok(result)
}

async fn close_page(page: &Arc<dyn PageOps>) {
    if let Err(err) = page.close().await {
        warn!(target: "pagecarbon", %err, "session teardown reported an error");
    }
}

/// Discover and invoke interactive elements, re-discovering between
/// rounds so content revealed by earlier clicks gets its turn. Every
/// failure is absorbed into the summary.
async fn interaction_phase(
    page: &Arc<dyn PageOps>,
    monitor: &NetworkMonitor,
    options: &AnalysisOptions,
    summary: &mut InteractionSummary,
) {
    let rounds = options.interaction_level.interaction_rounds();
    let mut remaining = options.effective_max_interactions();
    if rounds == 0 || remaining == 0 {
        return;
    }

    let perceiver = Perceiver::new(Arc::clone(page));
    let discovery = DiscoveryConfig::default();

    for round in 1..=rounds {
        if remaining == 0 {
            break;
        }

        let elements = match perceiver.find_smart(&discovery).await {
            Ok(elements) => elements,
            Err(err) => {
                warn!(target: "pagecarbon", round, %err, "discovery failed, ending interactions");
                break;
            }
        };
        if elements.is_empty() {
            debug!(target: "pagecarbon", round, "nothing interactive discovered");
            break;
        }

        for descriptor in elements.iter().take(remaining) {
            let outcome = invoke(
                Arc::clone(page),
                monitor,
                descriptor,
                INTERACTION_TIMEOUT,
            )
            .await;
            remaining -= 1;

            if outcome.success {
                summary.record_success(outcome.network_activity);
            } else if outcome.is_timeout() {
                summary.record_timeout();
            } else {
                summary.record_failure();
            }
        }
    }
}

/// Scroll on every level above minimal; hover, typing and viewport cycles
/// only on thorough runs.
async fn behavior_phase(
    page: &Arc<dyn PageOps>,
    original_viewport: &cdp_session::Viewport,
    options: &AnalysisOptions,
) -> BehaviorReport {
    let mut report = BehaviorReport::default();
    if options.interaction_level == InteractionLevel::Minimal {
        return report;
    }

    let config = BehaviorConfig {
        max_scroll_steps: options.effective_max_scroll_steps(),
        ..BehaviorConfig::default()
    };
    report.merge(simulate_scrolling(page, &config).await);

    if options.interaction_level == InteractionLevel::Thorough {
        let perceiver = Perceiver::new(Arc::clone(page));
        let discovery = DiscoveryConfig::default();

        match perceiver.find_by_type(ElementKind::Hoverable, &discovery).await {
            Ok(hoverables) => report.merge(simulate_hover(page, &hoverables, &config).await),
            Err(err) => {
                warn!(target: "pagecarbon", %err, "hoverable discovery failed");
            }
        }
        match perceiver.find_by_type(ElementKind::Input, &discovery).await {
            Ok(inputs) => {
                // Focus handlers sometimes fetch on their own; exercise
                // them before typing takes the focus.
                report.merge(simulate_focus(page, &inputs, &config).await);
                report.merge(simulate_typing(page, &inputs, &config).await);
            }
            Err(err) => {
                warn!(target: "pagecarbon", %err, "input discovery failed");
            }
        }

        report.merge(simulate_viewport_changes(page, original_viewport, &config).await);
    }

    report
}
