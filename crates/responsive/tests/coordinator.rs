//! Integration tests for the rebuild coordinators.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use responsive::{AsyncRebuildCoordinator, BoxError, Error, RebuildCoordinator, RebuildStrategy};

fn counting_builder(
    calls: Arc<AtomicU32>,
) -> impl Fn() -> Result<u32, BoxError> + Send + Sync + 'static {
    move || Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
}

fn slow_async_builder(
    calls: Arc<AtomicU32>,
) -> impl Fn() -> futures::future::BoxFuture<'static, Result<u32, BoxError>> + Send + Sync + 'static
{
    move || {
        let calls = calls.clone();
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
        })
    }
}

// ============================================================================
// Counter Scenario
// ============================================================================

#[test]
fn test_counter_scenario_both_strategies() {
    for strategy in [RebuildStrategy::OnDemand, RebuildStrategy::OnInvalidate] {
        let calls = Arc::new(AtomicU32::new(0));
        let c = RebuildCoordinator::initialise(strategy, counting_builder(calls.clone())).unwrap();

        assert_eq!(*c.get().unwrap(), 1, "{strategy}");
        assert_eq!(*c.get().unwrap(), 1, "{strategy}");
        assert_eq!(*c.get().unwrap(), 1, "{strategy}");

        c.invalidate().unwrap();
        assert_eq!(*c.get().unwrap(), 2, "{strategy}");
        assert_eq!(calls.load(Ordering::SeqCst), 2, "{strategy}");
    }
}

#[tokio::test]
async fn test_async_counter_scenario_both_strategies() {
    for strategy in [RebuildStrategy::OnDemand, RebuildStrategy::OnInvalidate] {
        let calls = Arc::new(AtomicU32::new(0));
        let c = AsyncRebuildCoordinator::initialise(strategy, slow_async_builder(calls.clone()))
            .await
            .unwrap();

        for _ in 0..3 {
            assert_eq!(*c.get().await.unwrap(), 1, "{strategy}");
        }
        c.invalidate().await.unwrap();
        assert_eq!(*c.get().await.unwrap(), 2, "{strategy}");
    }
}

// ============================================================================
// Single Build Under Contention
// ============================================================================

#[test]
fn test_concurrent_cold_gets_build_once() {
    const READERS: usize = 16;
    let calls = Arc::new(AtomicU32::new(0));
    let builder_calls = calls.clone();
    let coordinator = Arc::new(
        RebuildCoordinator::initialise(RebuildStrategy::OnDemand, move || {
            thread::sleep(Duration::from_millis(20));
            Ok::<_, BoxError>(builder_calls.fetch_add(1, Ordering::SeqCst) + 1)
        })
        .unwrap(),
    );

    let barrier = Arc::new(Barrier::new(READERS));
    let handles: Vec<_> = (0..READERS)
        .map(|_| {
            let coordinator = coordinator.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                coordinator.get().unwrap()
            })
        })
        .collect();

    let results: Vec<Arc<u32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_async_gets_share_one_build() {
    let calls = Arc::new(AtomicU32::new(0));
    let coordinator = Arc::new(
        AsyncRebuildCoordinator::initialise(
            RebuildStrategy::OnDemand,
            slow_async_builder(calls.clone()),
        )
        .await
        .unwrap(),
    );
    coordinator.get().await.unwrap();
    coordinator.invalidate().await.unwrap();

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.get().await.unwrap() })
        })
        .collect();

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(results.iter().all(|r| **r == 2));
    assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_get_after_invalidate_sees_new_artifact() {
    let calls = Arc::new(AtomicU32::new(0));
    let coordinator = Arc::new(
        RebuildCoordinator::initialise(
            RebuildStrategy::OnInvalidate,
            counting_builder(calls.clone()),
        )
        .unwrap(),
    );

    let reader = {
        let coordinator = coordinator.clone();
        thread::spawn(move || {
            let mut last = 0;
            for _ in 0..1_000 {
                let seen = *coordinator.get().unwrap();
                assert!(seen >= last, "artifact went backwards");
                last = seen;
            }
        })
    };

    for expected in 2..=50 {
        coordinator.invalidate().unwrap();
        assert_eq!(*coordinator.get().unwrap(), expected);
    }
    reader.join().unwrap();
}

#[tokio::test]
async fn test_concurrent_invalidations_each_build() {
    let calls = Arc::new(AtomicU32::new(0));
    let coordinator = Arc::new(
        AsyncRebuildCoordinator::initialise(
            RebuildStrategy::OnInvalidate,
            slow_async_builder(calls.clone()),
        )
        .await
        .unwrap(),
    );

    let (a, b) = tokio::join!(coordinator.invalidate(), coordinator.invalidate());
    a.unwrap();
    b.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(*coordinator.get().await.unwrap(), 3);
}

// ============================================================================
// Failure Handling
// ============================================================================

#[test]
fn test_failed_build_is_not_cached() {
    let fail = Arc::new(AtomicBool::new(true));
    let calls = Arc::new(AtomicU32::new(0));
    let (f, c) = (fail.clone(), calls.clone());
    let coordinator = RebuildCoordinator::initialise(RebuildStrategy::OnDemand, move || {
        c.fetch_add(1, Ordering::SeqCst);
        if f.load(Ordering::SeqCst) {
            Err("config unreadable".into())
        } else {
            Ok("pipeline")
        }
    })
    .unwrap();

    assert!(coordinator.get().unwrap_err().is_build_failure());
    assert!(coordinator.get().is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    fail.store(false, Ordering::SeqCst);
    assert_eq!(*coordinator.get().unwrap(), "pipeline");
}

#[tokio::test]
async fn test_async_failure_reaches_awaiters_then_retries() {
    let fail = Arc::new(AtomicBool::new(true));
    let calls = Arc::new(AtomicU32::new(0));
    let (f, c) = (fail.clone(), calls.clone());
    let coordinator = AsyncRebuildCoordinator::initialise(RebuildStrategy::OnDemand, move || {
        let (f, c) = (f.clone(), c.clone());
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if f.load(Ordering::SeqCst) {
                Err::<u32, BoxError>("upstream down".into())
            } else {
                Ok(7)
            }
        }
    })
    .await
    .unwrap();

    let (a, b) = tokio::join!(coordinator.get(), coordinator.get());
    assert!(matches!(a, Err(Error::BuildFailed { .. })));
    assert!(matches!(b, Err(Error::BuildFailed { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    fail.store(false, Ordering::SeqCst);
    assert_eq!(*coordinator.get().await.unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_async_initialise_failure_on_invalidate() {
    let result = AsyncRebuildCoordinator::initialise(RebuildStrategy::OnInvalidate, || async {
        Err::<u32, BoxError>("no config".into())
    })
    .await;
    assert!(matches!(result, Err(Error::BuildFailed { .. })));
}
