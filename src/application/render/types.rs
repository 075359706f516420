use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::domain::ItemRevision;

/// Reserved result id carrying the collected footnote and reference block.
pub const FOOTER_ID: &str = "footer";

/// One render request. Only the most recent request handed to the worker is
/// ever processed.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Items in the order their blocks should be emitted.
    pub items: Vec<ItemRevision>,
    /// Directory relative resource links are resolved against.
    pub root: PathBuf,
    /// Reuse cached results for items whose timestamp did not change.
    pub partial: bool,
}

impl RenderRequest {
    pub fn full(items: Vec<ItemRevision>, root: impl Into<PathBuf>) -> Self {
        Self {
            items,
            root: root.into(),
            partial: false,
        }
    }

    pub fn partial(items: Vec<ItemRevision>, root: impl Into<PathBuf>) -> Self {
        Self {
            items,
            root: root.into(),
            partial: true,
        }
    }

    /// Move the item with `uid` to the front so the selected item shows up first.
    pub fn focus_first(mut self, uid: &str) -> Self {
        if let Some(position) = self.items.iter().position(|rev| rev.uid() == uid) {
            let focused = self.items.remove(position);
            self.items.insert(0, focused);
        }
        self
    }
}

/// One rendered block: "this item's current rendering is now `html`".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedItem {
    pub item_id: String,
    pub html: String,
    /// Worker generation the block was produced for; zero outside the worker.
    pub generation: u64,
}

impl RenderedItem {
    pub fn new(item_id: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            html: html.into(),
            generation: 0,
        }
    }

    pub fn is_footer(&self) -> bool {
        self.item_id == FOOTER_ID
    }
}

/// Keeps a submitted full render in force until its footer comes back.
///
/// The worker only renders the newest request, so a partial request submitted
/// right after a full one would otherwise replace it and leave unchanged items
/// stale.
#[derive(Debug, Default)]
pub struct FullRenderLatch {
    pending: Option<u64>,
}

impl FullRenderLatch {
    /// Whether the next request may reuse cached results.
    pub fn allows_partial(&self) -> bool {
        self.pending.is_none()
    }

    pub fn submitted(&mut self, generation: u64, partial: bool) {
        if !partial {
            self.pending = Some(generation);
        }
    }

    /// Release the latch once a footer of the pending generation, or a later
    /// one, arrives.
    pub fn observe(&mut self, rendered: &RenderedItem) {
        if rendered.is_footer()
            && self.pending.is_some_and(|pending| rendered.generation >= pending)
        {
            self.pending = None;
        }
    }
}

/// Knobs for the post-processing chain and progress sampling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub sanitize: bool,
    pub resolve_resources: bool,
    pub progress_interval: std::time::Duration,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            sanitize: false,
            resolve_resources: true,
            progress_interval: std::time::Duration::from_millis(100),
        }
    }
}

/// Structured errors raised while rendering one fragment or item. They never
/// escape the worker; the renderer turns them into inline placeholders.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("fragment rendered before references were resolved")]
    Unresolved,
    #[error("post-processing step `{step}` failed: {message}")]
    PostProcess { step: &'static str, message: String },
    #[error("item `{uid}` panicked while rendering: {message}")]
    Panicked { uid: String, message: String },
}

impl RenderError {
    pub fn post_process(step: &'static str, message: impl Into<String>) -> Self {
        Self::PostProcess {
            step,
            message: message.into(),
        }
    }

    pub fn panicked(uid: impl Into<String>, payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|msg| (*msg).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::Panicked {
            uid: uid.into(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::SystemTime};

    use super::*;
    use crate::domain::{DocumentInfo, Item};

    fn revision(uid: &str, level: &str) -> ItemRevision {
        let document = Arc::new(DocumentInfo::new("REQ", "/docs"));
        let item = Item::new(uid, level.parse().expect("level"), "text", document);
        ItemRevision::new(item, SystemTime::UNIX_EPOCH)
    }

    #[test]
    fn focus_first_moves_selected_item_to_front() {
        let request = RenderRequest::full(
            vec![revision("A", "1"), revision("B", "2"), revision("C", "3")],
            "/docs",
        )
        .focus_first("C");

        let order: Vec<&str> = request.items.iter().map(ItemRevision::uid).collect();
        assert_eq!(order, ["C", "A", "B"]);
    }

    #[test]
    fn focus_first_ignores_unknown_uid() {
        let request =
            RenderRequest::partial(vec![revision("A", "1"), revision("B", "2")], "/docs")
                .focus_first("Z");
        let order: Vec<&str> = request.items.iter().map(ItemRevision::uid).collect();
        assert_eq!(order, ["A", "B"]);
        assert!(request.partial);
    }

    fn footer(generation: u64) -> RenderedItem {
        RenderedItem {
            generation,
            ..RenderedItem::new(FOOTER_ID, "")
        }
    }

    #[test]
    fn full_render_latch_holds_until_its_footer_arrives() {
        let mut latch = FullRenderLatch::default();
        assert!(latch.allows_partial());

        latch.submitted(3, false);
        assert!(!latch.allows_partial());

        latch.observe(&footer(2));
        latch.observe(&RenderedItem {
            generation: 3,
            ..RenderedItem::new("A", "<p>a</p>")
        });
        assert!(!latch.allows_partial());

        latch.observe(&footer(3));
        assert!(latch.allows_partial());

        latch.submitted(4, true);
        assert!(latch.allows_partial());
    }

    #[test]
    fn panic_payloads_are_described() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("boom"));
        let error = RenderError::panicked("REQ-1", payload.as_ref());
        assert_eq!(error.to_string(), "item `REQ-1` panicked while rendering: boom");
    }
}
