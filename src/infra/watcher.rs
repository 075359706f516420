//! Debounced file-system watching of a document directory.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::Duration,
};

use metrics::counter;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};

use super::{
    error::InfraError,
    store::{is_document_config, item_uid},
};

/// What a batch of file changes means for the rendered page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Only item files changed; a partial render is enough.
    ItemsChanged(Vec<PathBuf>),
    /// The document settings changed; everything has to be rendered again.
    Rebuild,
}

/// Keeps the underlying watcher alive; dropping it stops the events.
pub struct DocumentWatcher {
    dir: PathBuf,
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl DocumentWatcher {
    pub fn start(
        dir: &Path,
        debounce: Duration,
    ) -> Result<(Self, UnboundedReceiver<ChangeEvent>), InfraError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let Some(change) = classify(events.iter().map(|event| event.path.as_path()))
                    else {
                        return;
                    };
                    counter!("reqview_watch_events_total").increment(1);
                    debug!(
                        target = "reqview::infra::watcher",
                        change = ?change,
                        "Document changed"
                    );
                    if tx.send(change).is_err() {
                        debug!(
                            target = "reqview::infra::watcher",
                            "Change receiver dropped; discarding event"
                        );
                    }
                }
                Err(err) => warn!(
                    target = "reqview::infra::watcher",
                    error = %err,
                    "File watcher reported an error"
                ),
            }
        })?;
        debouncer.watcher().watch(dir, RecursiveMode::Recursive)?;

        info!(
            target = "reqview::infra::watcher",
            dir = %dir.display(),
            debounce_ms = debounce.as_millis() as u64,
            "Watching document directory"
        );

        let watcher = Self {
            dir: dir.to_path_buf(),
            _debouncer: debouncer,
        };
        Ok((watcher, rx))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Reduce a batch of changed paths to one change event. Paths that are
/// neither item files nor the document settings are ignored.
pub fn classify<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Option<ChangeEvent> {
    let mut items = BTreeSet::new();
    for path in paths {
        if is_document_config(path) {
            return Some(ChangeEvent::Rebuild);
        }
        if item_uid(path).is_some() {
            items.insert(path.to_path_buf());
        }
    }
    if items.is_empty() {
        None
    } else {
        Some(ChangeEvent::ItemsChanged(items.into_iter().collect()))
    }
}
