//! A reloadable artifact and a managed worker driven by one change signal.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=responsive=debug cargo run --example reloadable_worker
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use futures::FutureExt;
use responsive::{
    BoxError, BoxFuture, CancellationToken, ManagedProcess, RebuildStrategy, ResponsiveBuilder,
    SignalProducer,
};
use tracing_subscriber::EnvFilter;

/// Stand-in for a settings file: bumped on every "edit".
#[derive(Default)]
struct Settings {
    revision: AtomicU32,
    worker_enabled: AtomicBool,
}

#[derive(Debug)]
struct Pipeline {
    revision: u32,
}

struct Worker;

impl ManagedProcess for Worker {
    fn start<'a>(&'a self, _: &'a CancellationToken) -> BoxFuture<'a, Result<(), BoxError>> {
        async {
            println!("  worker: started");
            Ok(())
        }
        .boxed()
    }

    fn stop<'a>(&'a self, _: &'a CancellationToken) -> BoxFuture<'a, Result<(), BoxError>> {
        async {
            println!("  worker: stopped");
            Ok(())
        }
        .boxed()
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = Arc::new(Settings::default());
    let (producer, trigger) = SignalProducer::manual();
    let debounce = Duration::from_millis(100);

    let s = settings.clone();
    let pipeline = ResponsiveBuilder::new()
        .on_signal(producer.clone())
        .debounce(debounce)
        .strategy(RebuildStrategy::OnInvalidate)
        .build_reloadable(move || {
            let revision = s.revision.load(Ordering::SeqCst);
            async move { Ok::<_, BoxError>(Pipeline { revision }) }
        })
        .await?;

    let s = settings.clone();
    let worker = ResponsiveBuilder::new()
        .on_signal(producer)
        .debounce(debounce)
        .require_fn("worker-enabled", move || {
            s.worker_enabled.load(Ordering::SeqCst)
        })
        .build_reconciler(Worker)?;

    println!("initial state: {:?}", worker.start().await?);
    println!("pipeline: {:?}", pipeline.get().await?);

    for enabled in [true, true, false] {
        println!("\nediting settings (worker enabled = {enabled})");
        settings.revision.fetch_add(1, Ordering::SeqCst);
        settings.worker_enabled.store(enabled, Ordering::SeqCst);

        // A burst of edits collapses into one rebuild.
        for _ in 0..3 {
            trigger.fire();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(debounce * 3).await;

        println!("pipeline: {:?}", pipeline.get().await?);
        println!("worker:   {:?}", worker.state());
    }

    println!("\nbuilds: {}", pipeline.coordinator().builds());
    worker.stop().await?;
    worker.dispose()?;
    Ok(())
}
