//! Assembles rendered item blocks into one standalone HTML page.

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use crate::{
    domain::{Item, ItemRevision},
    util::html::escape_html,
};

use super::types::RenderedItem;

const STYLESHEET: &str = include_str!("../../../static/document.css");

const SCRIPT: &str = r#"
document.addEventListener("click", function (event) {
    var link = event.target.closest("a.item-link");
    if (!link) {
        return;
    }
    event.preventDefault();
    open_item(link.dataset.uid);
});

function open_item(uid) {
    if (window.reqview && typeof window.reqview.open_item === "function") {
        window.reqview.open_item(uid);
        return;
    }
    var target = document.getElementById(uid);
    if (target) {
        target.style.display = "block";
        target.scrollIntoView({ behavior: "smooth", block: "center" });
    }
}

document.querySelector(".item.selected")?.scrollIntoView({ block: "center" });
"#;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ViewMode {
    /// Every active item.
    #[default]
    Document,
    /// The selected item, its siblings and its parent heading.
    Section,
    /// Only the selected item.
    Item,
}

impl FromStr for ViewMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" => Ok(Self::Document),
            "section" => Ok(Self::Section),
            "item" => Ok(Self::Item),
            other => Err(format!(
                "unknown view mode `{other}` (expected document, section or item)"
            )),
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Document => "document",
            Self::Section => "section",
            Self::Item => "item",
        })
    }
}

/// Decides which item blocks are visible for a view mode and selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewFilter {
    pub mode: ViewMode,
    pub selected: Option<String>,
}

impl ViewFilter {
    pub fn new(mode: ViewMode, selected: Option<String>) -> Self {
        Self { mode, selected }
    }

    /// Inactive items stay hidden unless selected. Without a selection every
    /// active item is shown regardless of mode.
    pub fn is_visible(&self, item: &Item, selected: Option<&Item>) -> bool {
        let Some(selected) = selected else {
            return item.active;
        };
        if item.uid == selected.uid {
            return true;
        }
        if !item.active {
            return false;
        }
        match self.mode {
            ViewMode::Document => true,
            ViewMode::Section => item.level.shares_section(&selected.level),
            ViewMode::Item => false,
        }
    }
}

#[derive(Debug, Clone)]
struct Block {
    uid: String,
    item: Option<Arc<Item>>,
    html: String,
}

/// Live page state: one block per item id, patched by render results.
#[derive(Debug, Clone, Default)]
pub struct DocumentPage {
    title: String,
    blocks: Vec<Block>,
    index: HashMap<String, usize>,
    footer: String,
    filter: ViewFilter,
}

impl DocumentPage {
    pub fn new(title: impl Into<String>, items: &[ItemRevision]) -> Self {
        let mut page = Self {
            title: title.into(),
            ..Self::default()
        };
        page.set_items(items);
        page
    }

    /// Replace the block list with `items` in order, keeping the rendered
    /// HTML of ids that are still present.
    pub fn set_items(&mut self, items: &[ItemRevision]) {
        let mut previous: HashMap<String, String> = self
            .blocks
            .drain(..)
            .map(|block| (block.uid, block.html))
            .collect();
        self.index.clear();

        for revision in items {
            let uid = revision.uid().to_string();
            if self.index.contains_key(&uid) {
                continue;
            }
            self.index.insert(uid.clone(), self.blocks.len());
            self.blocks.push(Block {
                html: previous.remove(&uid).unwrap_or_default(),
                item: Some(Arc::clone(&revision.item)),
                uid,
            });
        }
    }

    pub fn set_filter(&mut self, filter: ViewFilter) {
        self.filter = filter;
    }

    /// Upsert one rendered block. Unknown ids are appended at the end.
    pub fn apply(&mut self, rendered: RenderedItem) {
        if rendered.is_footer() {
            self.footer = rendered.html;
            return;
        }
        match self.index.get(&rendered.item_id) {
            Some(&position) => self.blocks[position].html = rendered.html,
            None => {
                self.index
                    .insert(rendered.item_id.clone(), self.blocks.len());
                self.blocks.push(Block {
                    uid: rendered.item_id,
                    item: None,
                    html: rendered.html,
                });
            }
        }
    }

    pub fn block_html(&self, uid: &str) -> Option<&str> {
        self.index
            .get(uid)
            .map(|&position| self.blocks[position].html.as_str())
    }

    pub fn footer(&self) -> &str {
        &self.footer
    }

    /// Ids whose blocks are shown under the current filter, in page order.
    pub fn visible_ids(&self) -> Vec<&str> {
        let selected = self.selected_item();
        self.blocks
            .iter()
            .filter(|block| self.block_visible(block, selected))
            .map(|block| block.uid.as_str())
            .collect()
    }

    /// The complete standalone HTML page.
    pub fn render(&self) -> String {
        let selected = self.selected_item();
        let mut body = String::new();

        for block in &self.blocks {
            let mut classes = String::from("item");
            if self.filter.selected.as_deref() == Some(block.uid.as_str()) {
                classes.push_str(" selected");
            }
            let style = if self.block_visible(block, selected) {
                ""
            } else {
                " style=\"display:none\""
            };
            body.push_str(&format!(
                "<div id=\"{}\" class=\"{classes}\"{style}>\n{}</div>\n",
                escape_html(&block.uid),
                block.html
            ));
        }

        if !self.footer.is_empty() {
            body.push_str(&format!("<div id=\"footer\">\n{}</div>\n", self.footer));
        }

        format!(
            concat!(
                "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n",
                "<title>{title}</title>\n<style type=\"text/css\">\n{style}</style>\n",
                "</head>\n<body id=\"markdown-body\" class=\"markdown-body\">\n",
                "{body}<script>{script}</script>\n</body>\n</html>\n"
            ),
            title = escape_html(&self.title),
            style = STYLESHEET,
            body = body,
            script = SCRIPT,
        )
    }

    fn selected_item(&self) -> Option<&Item> {
        let uid = self.filter.selected.as_deref()?;
        let position = *self.index.get(uid)?;
        self.blocks[position].item.as_deref()
    }

    fn block_visible(&self, block: &Block, selected: Option<&Item>) -> bool {
        match &block.item {
            Some(item) => self.filter.is_visible(item, selected),
            None => true,
        }
    }
}
