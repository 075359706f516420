//! Single-flight background rendering.
//!
//! `render` only records the request and wakes the worker thread; the thread
//! snapshots the latest request under the same lock and renders it. Requests
//! that arrive while a batch is running replace each other, so only the
//! newest one is rendered next.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use super::{
    renderer::ItemRenderer,
    types::{RenderOptions, RenderRequest, RenderedItem},
};
use crate::util::lock::mutex_lock;

const LOCK_TARGET: &str = "application::render::worker";

/// Receiving ends of a worker's output streams.
#[derive(Debug)]
pub struct RenderOutputs {
    pub results: UnboundedReceiver<RenderedItem>,
    pub progress: UnboundedReceiver<u8>,
}

#[derive(Debug, Default)]
struct RequestSlot {
    request: Option<RenderRequest>,
    generation: u64,
    changed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    slot: Mutex<RequestSlot>,
    wake: Condvar,
    shutdown: AtomicBool,
}

#[derive(Debug, Clone)]
struct Outputs {
    results: UnboundedSender<RenderedItem>,
    progress: UnboundedSender<u8>,
}

pub struct RenderWorker {
    options: RenderOptions,
    shared: Arc<Shared>,
    outputs: Outputs,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RenderWorker {
    pub fn new(options: RenderOptions) -> (Self, RenderOutputs) {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();

        let worker = Self {
            options,
            shared: Arc::new(Shared::default()),
            outputs: Outputs {
                results: results_tx,
                progress: progress_tx,
            },
            thread: Mutex::new(None),
        };
        let outputs = RenderOutputs {
            results: results_rx,
            progress: progress_rx,
        };
        (worker, outputs)
    }

    /// Replace any pending request with `request` and wake the worker.
    /// Returns the generation stamped on the results of this request.
    pub fn render(&self, request: RenderRequest) -> u64 {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            warn!(
                target = "reqview::render::worker",
                items = request.items.len(),
                "Render requested after the worker was destroyed; ignoring"
            );
            return mutex_lock(&self.shared.slot, LOCK_TARGET, "render").generation;
        }

        let generation = {
            let mut slot = mutex_lock(&self.shared.slot, LOCK_TARGET, "render");
            if slot.changed {
                debug!(
                    target = "reqview::render::worker",
                    superseded = slot.generation,
                    "Replacing unconsumed render request"
                );
            }
            slot.generation += 1;
            slot.request = Some(request);
            slot.changed = true;
            slot.generation
        };
        self.shared.wake.notify_one();
        self.ensure_thread();
        generation
    }

    /// Stop the worker thread and wait for it to exit. Safe to call more than
    /// once and while a batch is being rendered.
    pub fn destroy(&self) {
        {
            let _slot = mutex_lock(&self.shared.slot, LOCK_TARGET, "destroy");
            self.shared.shutdown.store(true, Ordering::SeqCst);
        }
        self.shared.wake.notify_all();

        let handle = mutex_lock(&self.thread, LOCK_TARGET, "destroy.join").take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(
                    target = "reqview::render::worker",
                    "Render thread exited with a panic"
                );
            } else {
                debug!(target = "reqview::render::worker", "Render thread stopped");
            }
        }
    }

    fn ensure_thread(&self) {
        let mut thread = mutex_lock(&self.thread, LOCK_TARGET, "spawn");
        if thread.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        if let Some(finished) = thread.take()
            && finished.join().is_err()
        {
            warn!(
                target = "reqview::render::worker",
                "Render thread died; starting a new one"
            );
        }

        let shared = Arc::clone(&self.shared);
        let outputs = self.outputs.clone();
        let options = self.options.clone();
        match thread::Builder::new()
            .name("reqview-render".to_string())
            .spawn(move || run_loop(shared, options, outputs))
        {
            Ok(handle) => *thread = Some(handle),
            Err(err) => error!(
                target = "reqview::render::worker",
                error = %err,
                "Failed to spawn render thread"
            ),
        }
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Wait for the next request; `None` once shutdown was signalled.
fn next_request(shared: &Shared) -> Option<(RenderRequest, u64)> {
    let mut slot = mutex_lock(&shared.slot, LOCK_TARGET, "wait");
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            return None;
        }
        if slot.changed {
            slot.changed = false;
            if let Some(request) = slot.request.take() {
                return Some((request, slot.generation));
            }
        }
        slot = match shared.wake.wait(slot) {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    target = "reqview::render::worker",
                    "Recovered from poisoned render request lock"
                );
                poisoned.into_inner()
            }
        };
    }
}

fn run_loop(shared: Arc<Shared>, options: RenderOptions, outputs: Outputs) {
    let mut renderer = ItemRenderer::new(options.clone());
    info!(target = "reqview::render::worker", "Render thread started");

    while let Some((request, generation)) = next_request(&shared) {
        debug!(
            target = "reqview::render::worker",
            generation,
            items = request.items.len(),
            partial = request.partial,
            root = %request.root.display(),
            "Rendering request"
        );

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            render_request(&mut renderer, &shared, &outputs, &request, generation);
        }));
        if outcome.is_err() {
            error!(
                target = "reqview::render::worker",
                generation,
                "Render pass panicked; resetting renderer state"
            );
            renderer = ItemRenderer::new(options.clone());
            let _ = outputs.progress.send(100);
        }
    }

    debug!(target = "reqview::render::worker", "Render loop exiting");
}

fn render_request(
    renderer: &mut ItemRenderer,
    shared: &Shared,
    outputs: &Outputs,
    request: &RenderRequest,
    generation: u64,
) {
    let progress = &outputs.progress;
    let pass = renderer.process(&request.root, request.partial, &request.items, |value| {
        let _ = progress.send(value);
    });

    for mut rendered in pass {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        rendered.generation = generation;
        if outputs.results.send(rendered).is_err() {
            debug!(
                target = "reqview::render::worker",
                "Result receiver dropped; discarding output"
            );
        }
    }
}
