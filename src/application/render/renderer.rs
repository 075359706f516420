//! Incremental item rendering with per-item timestamp and definition caches.

use std::{
    collections::{HashMap, HashSet},
    iter::Zip,
    panic::{AssertUnwindSafe, catch_unwind},
    path::{Path, PathBuf},
    slice,
    sync::Arc,
    time::{Instant, SystemTime},
    vec,
};

use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};

use super::{
    fragments::FragmentStore,
    item_html::{PreparedItem, error_placeholder, prepare_item, render_prepared},
    postprocess::{PostProcessor, build_chain},
    progress::ProgressTracker,
    types::{FOOTER_ID, RenderError, RenderOptions, RenderedItem},
};
use crate::domain::ItemRevision;

/// Receives sampled progress percentages while a pass runs.
pub type ProgressSink<'a> = Box<dyn FnMut(u8) + 'a>;

/// Builds the post-processor chain of a fresh fragment store for a render root.
pub type ChainFactory =
    Arc<dyn Fn(&RenderOptions, &Path) -> Vec<Box<dyn PostProcessor>> + Send + Sync>;

/// Renders ordered item lists, reusing work from earlier passes.
///
/// The renderer owns the fragment store and both caches for one document
/// session. A partial pass skips items whose timestamp matches the cache; any
/// change to the set of reference definitions an item declares turns the pass
/// into a full one, because definitions are shared by the whole document.
pub struct ItemRenderer {
    options: RenderOptions,
    chain: ChainFactory,
    root: Option<PathBuf>,
    store: Option<FragmentStore>,
    timestamps: HashMap<String, SystemTime>,
    definitions: HashMap<String, Vec<String>>,
}

enum Slot {
    Unchanged,
    Prepared(PreparedItem),
    Failed(RenderError),
}

/// Why a partial pass had to start over as a full one.
struct DefinitionsChanged {
    uid: String,
    prepared: usize,
}

impl ItemRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self::with_chain(options, Arc::new(build_chain))
    }

    /// Like [`new`](Self::new), with the post-processor chain supplied by
    /// `chain` instead of derived from the options alone.
    pub fn with_chain(options: RenderOptions, chain: ChainFactory) -> Self {
        Self {
            options,
            chain,
            root: None,
            store: None,
            timestamps: HashMap::new(),
            definitions: HashMap::new(),
        }
    }

    /// Prepare every item of `items`, then return a pass that renders them
    /// one by one. Skipped items produce nothing; a full pass ends with the
    /// footer block.
    pub fn process<'a>(
        &'a mut self,
        root: &Path,
        partial: bool,
        items: &'a [ItemRevision],
        progress: impl FnMut(u8) + 'a,
    ) -> RenderPass<'a> {
        let started = Instant::now();
        let mut progress: ProgressSink<'a> = Box::new(progress);
        let mut tracker = ProgressTracker::new(
            2 * items.len() as u64,
            self.options.progress_interval,
        );

        if self.root.as_deref() != Some(root) {
            if let Some(previous) = &self.root {
                debug!(
                    target = "reqview::render::renderer",
                    previous = %previous.display(),
                    root = %root.display(),
                    "Render root changed; starting a fresh store"
                );
            }
            self.store = None;
            self.root = Some(root.to_path_buf());
        }
        let mut full = !partial || self.store.is_none();

        let Self {
            options,
            chain,
            store,
            timestamps,
            definitions,
            ..
        } = self;
        let store = store.get_or_insert_with(|| FragmentStore::new(chain(&*options, root)));

        let mut slots = loop {
            if full {
                timestamps.clear();
                definitions.clear();
                store.reset();
            } else {
                store.begin_batch();
            }

            match prepare_items(
                store,
                timestamps,
                definitions,
                items,
                !full,
                &mut tracker,
                &mut progress,
            ) {
                Ok(slots) => break slots,
                Err(changed) => {
                    // Definitions are only compared on partial passes, so
                    // this branch runs at most once.
                    info!(
                        target = "reqview::render::renderer",
                        uid = %changed.uid,
                        "Reference definitions changed; restarting as a full render"
                    );
                    counter!("reqview_render_full_restart_total").increment(1);
                    tracker.extend(changed.prepared as u64);
                    full = true;
                }
            }
        };

        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| store.resolve_all())) {
            error!(
                target = "reqview::render::renderer",
                "Reference resolution panicked; failing the prepared items"
            );
            // The tables may be half updated; the next pass starts from scratch.
            timestamps.clear();
            definitions.clear();
            store.reset();
            for (revision, slot) in items.iter().zip(slots.iter_mut()) {
                if matches!(slot, Slot::Prepared(_)) {
                    *slot = Slot::Failed(RenderError::panicked(revision.uid(), payload.as_ref()));
                }
            }
        }

        debug!(
            target = "reqview::render::renderer",
            items = items.len(),
            full,
            "Prepared render pass"
        );

        RenderPass {
            store,
            timestamps,
            pending: items.iter().zip(slots),
            footer_pending: full,
            finished: false,
            tracker,
            progress,
            started,
        }
    }
}

fn prepare_items(
    store: &mut FragmentStore,
    timestamps: &HashMap<String, SystemTime>,
    definitions: &mut HashMap<String, Vec<String>>,
    items: &[ItemRevision],
    compare: bool,
    tracker: &mut ProgressTracker,
    progress: &mut ProgressSink<'_>,
) -> Result<Vec<Slot>, DefinitionsChanged> {
    if compare {
        let present: HashSet<&str> = items.iter().map(ItemRevision::uid).collect();
        if let Some((uid, _)) = definitions
            .iter()
            .find(|(uid, declared)| !declared.is_empty() && !present.contains(uid.as_str()))
        {
            return Err(DefinitionsChanged {
                uid: uid.clone(),
                prepared: 0,
            });
        }
    }

    let mut slots = Vec::with_capacity(items.len());
    for (index, revision) in items.iter().enumerate() {
        let uid = revision.uid();

        if compare && timestamps.get(uid) == Some(&revision.modified) {
            slots.push(Slot::Unchanged);
        } else {
            match catch_unwind(AssertUnwindSafe(|| prepare_item(store, &revision.item))) {
                Ok(prepared) => {
                    if compare {
                        let previous = definitions.get(uid).map(Vec::as_slice).unwrap_or_default();
                        if previous != prepared.definitions() {
                            return Err(DefinitionsChanged {
                                uid: uid.to_string(),
                                prepared: index + 1,
                            });
                        }
                    }
                    definitions.insert(uid.to_string(), prepared.definitions().to_vec());
                    slots.push(Slot::Prepared(prepared));
                }
                Err(payload) => {
                    let error = RenderError::panicked(uid, payload.as_ref());
                    warn!(
                        target = "reqview::render::renderer",
                        uid,
                        error = %error,
                        "Item preparation failed"
                    );
                    slots.push(Slot::Failed(error));
                }
            }
        }

        if let Some(value) = tracker.advance(1) {
            progress(value);
        }
    }

    Ok(slots)
}

/// Lazily renders the items of one prepared pass.
pub struct RenderPass<'a> {
    store: &'a mut FragmentStore,
    timestamps: &'a mut HashMap<String, SystemTime>,
    pending: Zip<slice::Iter<'a, ItemRevision>, vec::IntoIter<Slot>>,
    footer_pending: bool,
    finished: bool,
    tracker: ProgressTracker,
    progress: ProgressSink<'a>,
    started: Instant,
}

impl RenderPass<'_> {
    fn render_slot(&mut self, revision: &ItemRevision, slot: Slot) -> Option<String> {
        let uid = revision.uid();
        let result = match slot {
            Slot::Unchanged => {
                counter!("reqview_render_items_skipped_total").increment(1);
                return None;
            }
            Slot::Failed(error) => Err(error),
            Slot::Prepared(prepared) => {
                let store = &mut *self.store;
                catch_unwind(AssertUnwindSafe(|| render_prepared(store, prepared)))
                    .unwrap_or_else(|payload| Err(RenderError::panicked(uid, payload.as_ref())))
            }
        };

        match result {
            Ok(html) => {
                self.timestamps.insert(uid.to_string(), revision.modified);
                counter!("reqview_render_items_rendered_total").increment(1);
                Some(html)
            }
            Err(error) => {
                warn!(
                    target = "reqview::render::renderer",
                    uid,
                    error = %error,
                    "Item rendering failed; emitting placeholder"
                );
                counter!("reqview_render_item_failures_total").increment(1);
                Some(error_placeholder(uid, &error))
            }
        }
    }

    fn report(&mut self) {
        if let Some(value) = self.tracker.advance(1) {
            (self.progress)(value);
        }
    }
}

impl Iterator for RenderPass<'_> {
    type Item = RenderedItem;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((revision, slot)) = self.pending.next() {
            let rendered = self.render_slot(revision, slot);
            self.report();
            if let Some(html) = rendered {
                return Some(RenderedItem::new(revision.uid(), html));
            }
        }

        if self.footer_pending {
            self.footer_pending = false;
            let store = &mut *self.store;
            let html = catch_unwind(AssertUnwindSafe(|| store.render_footer()))
                .unwrap_or_else(|payload| Err(RenderError::panicked(FOOTER_ID, payload.as_ref())))
                .unwrap_or_else(|error| {
                    warn!(
                        target = "reqview::render::renderer",
                        error = %error,
                        "Footer rendering failed"
                    );
                    counter!("reqview_render_item_failures_total").increment(1);
                    error_placeholder(FOOTER_ID, &error)
                });
            return Some(RenderedItem::new(FOOTER_ID, html));
        }

        if !self.finished {
            self.finished = true;
            let value = self.tracker.finish();
            (self.progress)(value);
            let elapsed = self.started.elapsed();
            histogram!("reqview_render_batch_ms").record(elapsed.as_secs_f64() * 1000.0);
            debug!(
                target = "reqview::render::renderer",
                elapsed_ms = elapsed.as_millis() as u64,
                "Render pass finished"
            );
        }
        None
    }
}
