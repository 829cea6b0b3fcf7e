//! Integration tests for signal-driven reloadable artifacts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use responsive::{BoxError, RebuildStrategy, ResponsiveBuilder, ResponsiveConfig, SignalProducer};
use tokio::time::sleep;

const QUIET: Duration = Duration::from_millis(100);

fn counter() -> (
    Arc<AtomicU32>,
    impl Fn() -> futures::future::Ready<Result<u32, BoxError>> + Send + Sync + 'static,
) {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    (calls, move || {
        futures::future::ready(Ok(c.fetch_add(1, Ordering::SeqCst) + 1))
    })
}

// ============================================================================
// Strategies
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_on_demand_rebuilds_on_next_get_after_signal() {
    let (producer, trigger) = SignalProducer::manual();
    let (calls, builder) = counter();
    let reloadable = ResponsiveBuilder::new()
        .on_signal(producer)
        .debounce(QUIET)
        .strategy(RebuildStrategy::OnDemand)
        .build_reloadable(builder)
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(*reloadable.get().await.unwrap(), 1);

    trigger.fire();
    trigger.fire();
    sleep(QUIET * 2).await;
    // Invalidated, but nothing built until read.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*reloadable.get().await.unwrap(), 2);
    assert_eq!(*reloadable.get().await.unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_on_invalidate_rebuilds_in_background() {
    let (producer, trigger) = SignalProducer::manual();
    let (calls, builder) = counter();
    let reloadable = ResponsiveBuilder::new()
        .on_signal(producer)
        .with_config(
            ResponsiveConfig::default()
                .with_debounce(QUIET)
                .with_strategy(RebuildStrategy::OnInvalidate),
        )
        .build_reloadable(builder)
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    trigger.fire();
    assert!(reloadable.is_pending());
    assert_eq!(*reloadable.get().await.unwrap(), 1);

    sleep(QUIET * 2).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(*reloadable.get().await.unwrap(), 2);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_dispose_stops_reloading() {
    let (producer, trigger) = SignalProducer::manual();
    let (calls, builder) = counter();
    let reloadable = ResponsiveBuilder::new()
        .on_signal(producer)
        .debounce(QUIET)
        .build_reloadable(builder)
        .await
        .unwrap();

    reloadable.dispose();
    trigger.fire();
    sleep(QUIET * 2).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*reloadable.get().await.unwrap(), 1);
}

#[tokio::test]
async fn test_manual_invalidate() {
    let (calls, builder) = counter();
    let reloadable = ResponsiveBuilder::new()
        .build_reloadable(builder)
        .await
        .unwrap();

    reloadable.invalidate().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(reloadable.coordinator().builds(), 2);
}
