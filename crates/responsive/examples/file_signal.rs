//! Rebuild a parsed config whenever its file changes.
//!
//! # Running
//!
//! ```bash
//! echo 'port = 8080' > /tmp/responsive.toml
//! cargo run --example file_signal --features watch -- /tmp/responsive.toml
//!
//! # In another terminal
//! echo 'port = 9090' > /tmp/responsive.toml
//! ```

use std::path::PathBuf;
use std::time::Duration;

use responsive::{BoxError, RebuildStrategy, ResponsiveBuilder};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let path: PathBuf = std::env::args()
        .nth(1)
        .map_or_else(|| std::env::temp_dir().join("responsive.toml"), PathBuf::from);
    println!("watching {}", path.display());

    let source = path.clone();
    let config = ResponsiveBuilder::new()
        .watch_file(&path)
        .debounce(Duration::from_millis(250))
        .strategy(RebuildStrategy::OnInvalidate)
        .build_reloadable(move || {
            let source = source.clone();
            async move {
                let text = tokio::fs::read_to_string(&source).await?;
                Ok::<_, BoxError>(text.parse::<toml::Table>()?)
            }
        })
        .await?;

    let mut last = config.get().await?;
    println!("loaded: {last:?}");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            () = tokio::time::sleep(Duration::from_millis(200)) => {}
        }
        let current = config.get().await?;
        if !std::sync::Arc::ptr_eq(&current, &last) {
            println!("reloaded: {current:?}");
            last = current;
        }
    }

    config.dispose();
    Ok(())
}
