use std::{
    collections::HashSet,
    path::Path,
    sync::Arc,
    time::{Duration, UNIX_EPOCH},
};

use metrics_util::debugging::DebuggingRecorder;
use reqview::{
    application::render::{ItemRenderer, RenderOptions},
    domain::{DocumentInfo, Item, ItemRevision},
};

fn revision(uid: &str, level: &str, text: &str, secs: u64) -> ItemRevision {
    let document = Arc::new(DocumentInfo::new("REQ", "/docs"));
    let item = Item::new(uid, level.parse().expect("level"), text, document);
    ItemRevision::new(item, UNIX_EPOCH + Duration::from_secs(secs))
}

#[test]
fn render_passes_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let root = Path::new("/docs");
    let mut renderer = ItemRenderer::new(RenderOptions::default());

    // Full pass renders everything.
    let first = [
        revision("A", "1", "[foo]: http://x", 1),
        revision("B", "2", "Uses [foo].", 1),
    ];
    assert_eq!(renderer.process(root, false, &first, |_| {}).count(), 3);

    // Unchanged items are skipped.
    let unchanged = renderer.process(root, true, &first, |_| {}).count();
    assert_eq!(unchanged, 0);

    // A changed definition restarts the pass.
    let second = [
        revision("A", "1", "[foo]: http://y", 2),
        revision("B", "2", "Uses [foo].", 1),
    ];
    assert_eq!(renderer.process(root, true, &second, |_| {}).count(), 3);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "reqview_render_items_rendered_total",
        "reqview_render_items_skipped_total",
        "reqview_render_full_restart_total",
        "reqview_render_batch_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
