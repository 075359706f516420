use std::{
    fs::{self, File},
    path::Path,
    time::{Duration, SystemTime},
};

use reqview::{
    application::render::{DocumentPage, ItemRenderer, RenderOptions, ViewFilter, ViewMode},
    infra::store::{LoadedDocument, load_document},
};
use tempfile::TempDir;

fn write(dir: &Path, name: &str, contents: &str) {
    fs::write(dir.join(name), contents).expect("write fixture");
}

fn fixture() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();
    write(
        root,
        ".doorstop.yml",
        "settings:\n  prefix: REQ\nattributes:\n  publish:\n    - owner\n",
    );
    write(
        root,
        "REQ001.yml",
        "level: '1.0'\nnormative: false\ntext: |\n  # Overview\n  Scope of the system.\n",
    );
    write(
        root,
        "REQ002.yml",
        concat!(
            "level: '1.1'\n",
            "header: Login\n",
            "owner: '*ops*'\n",
            "links:\n  - REQ001: abc123\n",
            "text: |\n  Users sign in with [SSO].\n\n  [SSO]: https://sso.test\n",
        ),
    );
    write(
        root,
        "REQ003.yml",
        "level: '1.2'\nactive: false\ntext: Sessions expire.\n",
    );
    write(
        root,
        "REQ004.yml",
        "level: '2.0'\nnormative: false\ntext: '# Reporting'\n",
    );
    write(
        root,
        "REQ005.yml",
        "level: '2.1'\ntext: |\n  Reports are exported[^csv].\n\n  [^csv]: As CSV.\n",
    );
    dir
}

fn render_into(
    renderer: &mut ItemRenderer,
    page: &mut DocumentPage,
    root: &Path,
    partial: bool,
    document: &LoadedDocument,
) -> Vec<String> {
    let mut ids = Vec::new();
    for rendered in renderer.process(root, partial, &document.items, |_| {}) {
        ids.push(rendered.item_id.clone());
        page.apply(rendered);
    }
    ids
}

fn rendered_page(root: &Path, filter: ViewFilter) -> (LoadedDocument, DocumentPage) {
    let document = load_document(root).expect("document loads");
    let mut page = DocumentPage::new(document.title(), &document.items);
    page.set_filter(filter);
    let mut renderer = ItemRenderer::new(RenderOptions::default());
    render_into(&mut renderer, &mut page, root, false, &document);
    (document, page)
}

#[test]
fn document_directory_renders_to_a_complete_page() {
    let dir = fixture();
    let (document, page) = rendered_page(dir.path(), ViewFilter::default());
    assert_eq!(document.title(), "REQ");

    let html = page.render();
    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains("<title>REQ</title>"));
    assert!(html.contains("<body id=\"markdown-body\" class=\"markdown-body\">"));

    let heading = page.block_html("REQ001").expect("heading block");
    assert!(heading.contains("<h1 class=\"item-heading\">Overview</h1>"));
    assert!(heading.contains("data-uid=\"REQ002\""));

    let login = page.block_html("REQ002").expect("login block");
    assert!(login.contains("<p class=\"item-heading\">Login</p>"));
    assert!(login.contains("<a href=\"https://sso.test\">SSO</a>"));
    assert!(login.contains("<tr><th>owner</th><td><p><em>ops</em></p></td></tr>"));
    assert!(login.contains("data-uid=\"REQ001\""));

    assert!(html.contains("<div id=\"REQ003\" class=\"item\" style=\"display:none\">"));
    assert!(html.contains("<div id=\"footer\">"));
    assert!(page.footer().contains("As CSV."));

    let order: Vec<usize> = ["REQ001", "REQ002", "REQ003", "REQ004", "REQ005", "id=\"footer\""]
        .iter()
        .map(|needle| html.find(needle).expect("block present"))
        .collect();
    assert!(order.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn view_modes_filter_blocks_around_the_selection() {
    let dir = fixture();
    let selected = Some("REQ002".to_string());

    let (_, section) = rendered_page(
        dir.path(),
        ViewFilter::new(ViewMode::Section, selected.clone()),
    );
    assert_eq!(section.visible_ids(), ["REQ001", "REQ002"]);
    assert!(section.render().contains("<div id=\"REQ002\" class=\"item selected\">"));

    let (_, item) = rendered_page(dir.path(), ViewFilter::new(ViewMode::Item, selected));
    assert_eq!(item.visible_ids(), ["REQ002"]);

    let (_, inactive) = rendered_page(
        dir.path(),
        ViewFilter::new(ViewMode::Document, Some("REQ003".to_string())),
    );
    assert_eq!(
        inactive.visible_ids(),
        ["REQ001", "REQ002", "REQ003", "REQ004", "REQ005"]
    );
}

#[test]
fn edited_item_file_triggers_a_partial_update() {
    let dir = fixture();
    let root = dir.path();
    let document = load_document(root).expect("document loads");
    let mut page = DocumentPage::new(document.title(), &document.items);
    let mut renderer = ItemRenderer::new(RenderOptions::default());
    render_into(&mut renderer, &mut page, root, false, &document);
    let heading_before = page.block_html("REQ001").map(str::to_string);

    let edited = root.join("REQ005.yml");
    write(
        root,
        "REQ005.yml",
        "level: '2.1'\ntext: |\n  Reports are exported nightly[^csv].\n\n  [^csv]: As CSV.\n",
    );
    File::options()
        .write(true)
        .open(&edited)
        .and_then(|file| file.set_modified(SystemTime::now() + Duration::from_secs(60)))
        .expect("bump mtime");

    let reloaded = load_document(root).expect("document reloads");
    page.set_items(&reloaded.items);
    let ids = render_into(&mut renderer, &mut page, root, true, &reloaded);

    assert_eq!(ids, ["REQ005"]);
    assert!(page.block_html("REQ005").expect("block").contains("exported nightly"));
    assert_eq!(page.block_html("REQ001").map(str::to_string), heading_before);
}

#[test]
fn removed_item_file_drops_its_block() {
    let dir = fixture();
    let root = dir.path();
    let document = load_document(root).expect("document loads");
    let mut page = DocumentPage::new(document.title(), &document.items);
    let mut renderer = ItemRenderer::new(RenderOptions::default());
    render_into(&mut renderer, &mut page, root, false, &document);

    fs::remove_file(root.join("REQ004.yml")).expect("remove item");
    let reloaded = load_document(root).expect("document reloads");
    page.set_items(&reloaded.items);
    render_into(&mut renderer, &mut page, root, true, &reloaded);

    assert!(page.block_html("REQ004").is_none());
    assert!(!page.render().contains("id=\"REQ004\""));
    assert!(page.block_html("REQ005").is_some_and(|html| !html.is_empty()));
}
