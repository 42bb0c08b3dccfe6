//! Strategy execution: ordered attempts, deadline race and settle wait.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use cdp_session::PageOps;
use network_tap::NetworkMonitor;
use perceiver_interactive::ElementDescriptor;

use crate::strategy::{strategy_order, Strategy};
use crate::{InteractionOutcome, StrategyError};

const MIN_SETTLE: Duration = Duration::from_millis(50);

/// Common interactive selectors searched by the text re-resolution
/// strategy.
const TEXT_SEARCH_SCOPE: &str =
    "button, [role=button], input[type=submit], input[type=button], [onclick], [data-action]";

/// Attempt one interaction against `descriptor`, bounded by `timeout`.
///
/// Strategies run strictly in the order [`strategy_order`] decides; the
/// first success short-circuits. Always resolves to exactly one outcome:
/// success, a distinct timed-out failure, or an aggregated
/// all-strategies-failed reason. Exhausting every strategy is recoverable
/// by design; the caller moves on to the next element.
pub async fn invoke(
    page: Arc<dyn PageOps>,
    monitor: &NetworkMonitor,
    descriptor: &ElementDescriptor,
    timeout: Duration,
) -> InteractionOutcome {
    let started = Instant::now();
    let deadline = started + timeout;
    let order = strategy_order(descriptor);

    let attempts = tokio::time::timeout(timeout, run_strategies(&page, descriptor, &order)).await;

    match attempts {
        Err(_) => {
            warn!(
                target: "action-engine",
                selector = %descriptor.selector,
                timeout_ms = timeout.as_millis() as u64,
                "interaction timed out"
            );
            InteractionOutcome::timed_out(started.elapsed())
        }
        Ok(Ok(strategy)) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let network_activity = settle(monitor, remaining).await;
            debug!(
                target: "action-engine",
                selector = %descriptor.selector,
                strategy = strategy.name(),
                network_activity,
                "interaction succeeded"
            );
            InteractionOutcome::success(strategy, started.elapsed(), network_activity)
        }
        Ok(Err(failures)) => {
            let reason = failures
                .iter()
                .map(|(s, err)| format!("{}: {}", s.name(), err))
                .collect::<Vec<_>>()
                .join("; ");
            debug!(
                target: "action-engine",
                selector = %descriptor.selector,
                %reason,
                "all strategies exhausted"
            );
            InteractionOutcome::failed(reason, started.elapsed())
        }
    }
}

async fn run_strategies(
    page: &Arc<dyn PageOps>,
    descriptor: &ElementDescriptor,
    order: &[Strategy],
) -> Result<Strategy, Vec<(Strategy, StrategyError)>> {
    let mut failures = Vec::new();

    for strategy in order {
        let result = match strategy {
            Strategy::Native => native_click(page, descriptor).await,
            Strategy::ScriptDispatch => script_dispatch(page, &descriptor.selector).await,
            Strategy::TextSearch => text_search_click(page, &descriptor.text).await,
            Strategy::Coordinate => coordinate_click(page, descriptor).await,
        };

        match result {
            Ok(()) => return Ok(*strategy),
            Err(err) => failures.push((*strategy, err)),
        }
    }

    Err(failures)
}

/// Bounded wait for any network activity the interaction may have
/// triggered. Best effort: a fraction of the remaining budget, never less
/// than a token window. Returns whether new transfers were observed.
async fn settle(monitor: &NetworkMonitor, remaining: Duration) -> bool {
    let budget = (remaining / 4)
        .max(MIN_SETTLE)
        .min(monitor.config().quiet_window);
    let before = monitor.resources().len();
    tokio::time::sleep(budget).await;
    monitor.resources().len() > before || monitor.inflight_count() > 0
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Resolve the selector in-page and click the element's center through
/// the input pipeline.
async fn native_click(
    page: &Arc<dyn PageOps>,
    descriptor: &ElementDescriptor,
) -> Result<(), StrategyError> {
    let expression = format!(
        r#"(() => {{
    const el = document.querySelector({selector});
    if (!el) return null;
    el.scrollIntoView({{ block: "center", inline: "center" }});
    const rect = el.getBoundingClientRect();
    if (rect.width <= 0 || rect.height <= 0) return null;
    return {{ x: rect.left + rect.width / 2, y: rect.top + rect.height / 2 }};
}})()"#,
        selector = js_string(&descriptor.selector),
    );

    let point = page.evaluate(&expression).await?;
    let (x, y) = match (
        point.get("x").and_then(Value::as_f64),
        point.get("y").and_then(Value::as_f64),
    ) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(StrategyError::NotFound(format!(
                "selector '{}' resolved to nothing clickable",
                descriptor.selector
            )))
        }
    };

    page.dispatch_click(x, y).await?;
    Ok(())
}

/// Synthetic event sequence plus a direct `.click()` fallback, all inside
/// the page.
async fn script_dispatch(page: &Arc<dyn PageOps>, selector: &str) -> Result<(), StrategyError> {
    let expression = format!(
        r#"(() => {{
    const el = document.querySelector({selector});
    if (!el) return false;
    el.focus && el.focus();
    for (const type of ["mouseenter", "mouseover", "mousedown", "mouseup", "click"]) {{
        el.dispatchEvent(new MouseEvent(type, {{ bubbles: true, cancelable: true, view: window }}));
    }}
    if (typeof el.click === "function") el.click();
    return true;
}})()"#,
        selector = js_string(selector),
    );

    match page.evaluate(&expression).await?.as_bool() {
        Some(true) => Ok(()),
        _ => Err(StrategyError::NotFound(format!(
            "selector '{selector}' not present for script dispatch"
        ))),
    }
}

/// Re-resolve by visible text over common interactive selectors, then
/// dispatch the same synthetic sequence.
async fn text_search_click(page: &Arc<dyn PageOps>, text: &str) -> Result<(), StrategyError> {
    let needle = text.trim();
    if needle.is_empty() {
        return Err(StrategyError::NotFound(
            "descriptor has no text to search by".to_string(),
        ));
    }

    let expression = format!(
        r#"(() => {{
    const needle = {needle}.toLowerCase();
    for (const el of document.querySelectorAll({scope})) {{
        const label = (el.innerText || el.value || "").trim().toLowerCase();
        if (label !== needle) continue;
        const rect = el.getBoundingClientRect();
        if (rect.width <= 0 || rect.height <= 0) continue;
        for (const type of ["mouseenter", "mouseover", "mousedown", "mouseup", "click"]) {{
            el.dispatchEvent(new MouseEvent(type, {{ bubbles: true, cancelable: true, view: window }}));
        }}
        if (typeof el.click === "function") el.click();
        return true;
    }}
    return false;
}})()"#,
        needle = js_string(needle),
        scope = js_string(TEXT_SEARCH_SCOPE),
    );

    match page.evaluate(&expression).await?.as_bool() {
        Some(true) => Ok(()),
        _ => Err(StrategyError::NotFound(format!(
            "no interactive element with text '{needle}'"
        ))),
    }
}

/// Pointer click at the recorded center. Only reached when the descriptor
/// was discovered visible with usable geometry.
async fn coordinate_click(
    page: &Arc<dyn PageOps>,
    descriptor: &ElementDescriptor,
) -> Result<(), StrategyError> {
    if !descriptor.has_valid_point() {
        return Err(StrategyError::NotFound(
            "descriptor geometry unusable for coordinate click".to_string(),
        ));
    }
    let (x, y) = descriptor.rect.center();
    page.dispatch_click(x, y).await?;
    Ok(())
}
