//! File-change signals via [`notify`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, trace, warn};

use super::{SignalProducer, Subscription, Trigger};
use crate::error::{BoxError, Error, Result};

/// A producer whose signals fire when any of `paths` is created, modified or
/// removed.
///
/// The watcher is created lazily on the first signal request and lives until
/// the producer is closed. Files that do not exist yet are picked up by
/// watching their parent directory.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if `paths` is empty.
///
/// # Example
///
/// ```rust,ignore
/// let producer = responsive::signal::watch_files(["config.toml"])?;
/// let reloadable = ResponsiveBuilder::new()
///     .on_signal(producer)
///     .build_reloadable(|| async { load_config().await })
///     .await?;
/// ```
pub fn watch_files<I, P>(paths: I) -> Result<SignalProducer>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let paths: Vec<PathBuf> = paths.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
    if paths.is_empty() {
        return Err(Error::invalid_config(
            "paths",
            "no files specified to watch",
            Some("Pass at least one file path".to_string()),
        ));
    }

    let watched = Arc::new(watched_set(&paths));
    Ok(SignalProducer::from_subscription(move |trigger| {
        subscribe(&paths, watched.clone(), trigger)
    }))
}

/// Each path as given plus its canonical form.
fn watched_set(paths: &[PathBuf]) -> HashSet<PathBuf> {
    let mut set = HashSet::new();
    for path in paths {
        set.insert(path.clone());
        if let Ok(canonical) = path.canonicalize() {
            set.insert(canonical);
        } else if let (Some(parent), Some(name)) = (path.parent(), path.file_name())
            && let Ok(parent) = parent.canonicalize()
        {
            set.insert(parent.join(name));
        }
    }
    set
}

fn subscribe(
    paths: &[PathBuf],
    watched: Arc<HashSet<PathBuf>>,
    trigger: Trigger,
) -> std::result::Result<Subscription, BoxError> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if is_relevant(&event, &watched) {
                trace!(kind = ?event.kind, paths = ?event.paths, "watched file changed");
                trigger.fire();
            }
        }
        Err(e) => warn!(error = %e, "file watcher error"),
    })?;

    for path in paths {
        watch_path(&mut watcher, path)?;
    }
    debug!(count = paths.len(), "watching files for changes");

    Ok(Subscription::new(move || drop::<RecommendedWatcher>(watcher)))
}

fn watch_path(watcher: &mut RecommendedWatcher, path: &Path) -> std::result::Result<(), BoxError> {
    let target = if path.exists() {
        path
    } else {
        match path.parent() {
            Some(parent) if parent.as_os_str().is_empty() => Path::new("."),
            Some(parent) if parent.exists() => parent,
            _ => {
                return Err(format!(
                    "cannot watch {}: neither file nor parent directory exists",
                    path.display()
                )
                .into());
            }
        }
    };
    watcher.watch(target, RecursiveMode::NonRecursive)?;
    Ok(())
}

fn is_relevant(event: &Event, watched: &HashSet<PathBuf>) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }
    event.paths.iter().any(|path| {
        watched.contains(path) || path.canonicalize().is_ok_and(|c| watched.contains(&c))
    })
}
