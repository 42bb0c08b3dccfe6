//! Timing contract tests for `wait_idle`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use network_tap::{NetworkEvent, NetworkMonitor, TapConfig};
use pagecarbon_core_types::RequestId;

fn small_config() -> TapConfig {
    TapConfig {
        quiet_window: Duration::from_millis(40),
        max_wait: Duration::from_millis(200),
        poll_interval: Duration::from_millis(10),
    }
}

fn request(n: u32) -> NetworkEvent {
    NetworkEvent::RequestWillBeSent {
        request_id: RequestId(format!("req-{n}")),
        url: format!("https://example.com/{n}"),
    }
}

fn finished(n: u32, bytes: u64) -> NetworkEvent {
    NetworkEvent::LoadingFinished {
        request_id: RequestId(format!("req-{n}")),
        encoded_byte_len: bytes,
    }
}

#[tokio::test]
async fn quiet_page_reports_idle_after_quiet_window() {
    let monitor = NetworkMonitor::new(small_config());
    monitor.ingest(request(1));
    monitor.ingest(finished(1, 100));

    let outcome = monitor
        .wait_idle(Duration::from_millis(40), Duration::from_millis(500))
        .await;
    assert!(outcome.reached_idle);
    assert!(outcome.elapsed >= Duration::from_millis(40));
}

#[tokio::test]
async fn adversarial_stream_never_blocks_past_max_wait() {
    let monitor = NetworkMonitor::new(small_config());

    // Keep a request permanently in flight and keep stamping activity.
    let churn = {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(async move {
            let mut n = 0u32;
            loop {
                monitor.ingest(request(n));
                n += 1;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    let started = Instant::now();
    let outcome = monitor
        .wait_idle(Duration::from_millis(40), Duration::from_millis(150))
        .await;
    churn.abort();

    assert!(!outcome.reached_idle);
    // Bounded by max_wait plus one poll tick and scheduling slack.
    assert!(started.elapsed() < Duration::from_millis(150 + 100));
}

#[tokio::test]
async fn burst_during_quiet_window_resets_the_clock() {
    let monitor = NetworkMonitor::new(small_config());
    monitor.ingest(request(1));
    monitor.ingest(finished(1, 10));

    let waiter = {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(async move {
            monitor
                .wait_idle(Duration::from_millis(60), Duration::from_millis(400))
                .await
        })
    };

    // Interrupt the quiet window with a short burst.
    tokio::time::sleep(Duration::from_millis(30)).await;
    monitor.ingest(request(2));
    monitor.ingest(NetworkEvent::ResponseReceived {
        request_id: RequestId("req-2".to_string()),
        status: 200,
        mime_type: "text/css".to_string(),
        headers: HashMap::new(),
    });
    monitor.ingest(finished(2, 20));
    let burst_at = Instant::now();

    let outcome = waiter.await.expect("waiter task");
    assert!(outcome.reached_idle);
    // Idle can only have been declared a full quiet window after the burst.
    assert!(burst_at.elapsed() >= Duration::from_millis(55));
}

#[tokio::test]
async fn attach_consumes_broadcast_events() {
    let (tx, rx) = tokio::sync::broadcast::channel(32);
    let monitor = NetworkMonitor::new(small_config());
    let task = monitor.attach(rx);

    tx.send(request(1)).unwrap();
    tx.send(finished(1, 321)).unwrap();
    drop(tx);
    task.await.expect("ingest task");

    assert_eq!(monitor.total_bytes(), 321);
    assert_eq!(monitor.inflight_count(), 0);
}
