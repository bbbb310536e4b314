mod common;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bifrost::error::BifrostError;
use bifrost::fallback::Fallback;
use bifrost::plugin::Executable;

use common::{Responder, a_query, first_a, qctx_for};

const THRESHOLD: Duration = Duration::from_millis(500);

fn fallback(primary: Responder, secondary: Responder, always_standby: bool) -> (Fallback, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let primary_hits = primary.hits.clone();
    let secondary_hits = secondary.hits.clone();
    let fallback = Fallback::new(
        Arc::new(primary),
        Arc::new(secondary),
        THRESHOLD,
        always_standby,
    );
    (fallback, primary_hits, secondary_hits)
}

#[tokio::test(start_paused = true)]
async fn slow_primary_loses_to_triggered_secondary() {
    // S4: primary at 800 ms, threshold 500 ms, secondary finishes at
    // 700 ms and wins.
    let primary = Responder::new("example.com", Ipv4Addr::new(10, 0, 0, 1), Duration::from_millis(800));
    let secondary = Responder::new("example.com", Ipv4Addr::new(10, 0, 0, 2), Duration::from_millis(200));
    let (fallback, primary_hits, secondary_hits) = fallback(primary, secondary, false);

    let mut qctx = qctx_for(a_query("example.com"));
    fallback.execute(&mut qctx).await.unwrap();

    assert_eq!(first_a(qctx.response().unwrap()), Some(Ipv4Addr::new(10, 0, 0, 2)));
    assert_eq!(primary_hits.load(Ordering::SeqCst), 1);
    assert_eq!(secondary_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn fast_primary_keeps_secondary_parked() {
    let primary = Responder::new("example.com", Ipv4Addr::new(10, 0, 0, 1), Duration::from_millis(50));
    let secondary = Responder::new("example.com", Ipv4Addr::new(10, 0, 0, 2), Duration::from_millis(10));
    let (fallback, _primary_hits, secondary_hits) = fallback(primary, secondary, false);

    let mut qctx = qctx_for(a_query("example.com"));
    fallback.execute(&mut qctx).await.unwrap();

    assert_eq!(first_a(qctx.response().unwrap()), Some(Ipv4Addr::new(10, 0, 0, 1)));
    assert_eq!(secondary_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_primary_releases_secondary_before_threshold() {
    let primary = Responder::failing(Duration::from_millis(50));
    let secondary = Responder::new("example.com", Ipv4Addr::new(10, 0, 0, 2), Duration::from_millis(100));
    let (fallback, _primary_hits, _secondary_hits) = fallback(primary, secondary, false);

    let started = tokio::time::Instant::now();
    let mut qctx = qctx_for(a_query("example.com"));
    fallback.execute(&mut qctx).await.unwrap();

    assert_eq!(first_a(qctx.response().unwrap()), Some(Ipv4Addr::new(10, 0, 0, 2)));
    // Released by the failure signal at ~50 ms, not the 500 ms timer.
    assert!(started.elapsed() < Duration::from_millis(400));
}

#[tokio::test(start_paused = true)]
async fn both_branches_failing_is_an_error() {
    let primary = Responder::failing(Duration::from_millis(20));
    let secondary = Responder::failing(Duration::from_millis(20));
    let (fallback, _, _) = fallback(primary, secondary, false);

    let mut qctx = qctx_for(a_query("example.com"));
    let err = fallback.execute(&mut qctx).await.unwrap_err();
    assert!(matches!(err, BifrostError::FallbackFailed));
    assert!(qctx.response().is_none());
}

#[tokio::test(start_paused = true)]
async fn standby_secondary_runs_early_but_withholds() {
    let primary = Responder::failing(Duration::from_millis(600));
    let secondary = Responder::new("example.com", Ipv4Addr::new(10, 0, 0, 2), Duration::from_millis(100));
    let (fallback, _primary_hits, secondary_hits) = fallback(primary, secondary, true);

    let started = tokio::time::Instant::now();
    let mut qctx = qctx_for(a_query("example.com"));
    fallback.execute(&mut qctx).await.unwrap();

    assert_eq!(first_a(qctx.response().unwrap()), Some(Ipv4Addr::new(10, 0, 0, 2)));
    assert_eq!(secondary_hits.load(Ordering::SeqCst), 1);
    // Ready at 100 ms but held until the 500 ms threshold.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(500), "released at {elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "released at {elapsed:?}");
}
