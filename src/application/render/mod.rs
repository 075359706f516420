//! Incremental HTML rendering of requirement documents.
//!
//! Items are rendered into standalone HTML blocks on a background worker.
//! Reference-style links and footnotes may be defined in any item and used in
//! any other, so every pass first registers all fragments with a shared
//! [`FragmentStore`], resolves the document-wide tables, and only then emits
//! blocks. A full pass ends with a synthetic `footer` block holding the
//! collected footnotes and references.

mod fragments;
mod item_html;
mod page;
mod postprocess;
mod progress;
mod renderer;
mod types;
mod worker;

pub use fragments::{FragmentHandle, FragmentStore};
pub use page::{DocumentPage, ViewFilter, ViewMode};
pub use postprocess::{PostProcessor, ResourceLinks, Sanitizer, build_chain};
pub use progress::ProgressTracker;
pub use renderer::{ChainFactory, ItemRenderer, ProgressSink, RenderPass};
pub use types::{
    FOOTER_ID, FullRenderLatch, RenderError, RenderOptions, RenderRequest, RenderedItem,
};
pub use worker::{RenderOutputs, RenderWorker};
