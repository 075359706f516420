//! Fixed HTML layout of one item block: heading, then an attribute table
//! holding the body, published attributes and link lists.

use tracing::debug;

use super::{
    fragments::{FragmentHandle, FragmentStore},
    types::RenderError,
};
use crate::{
    domain::{AttributeValue, Item, ItemLink},
    util::html::escape_html,
};

/// Field names that already have a place in the block layout.
const BUILT_IN_FIELDS: &[&str] = &[
    "text",
    "header",
    "level",
    "links",
    "parents",
    "children",
    "active",
    "normative",
    "derived",
    "reviewed",
    "ref",
];

#[derive(Debug)]
enum RowValue {
    Markdown(Option<FragmentHandle>),
    Html(String),
}

#[derive(Debug)]
struct Row {
    name: String,
    value: RowValue,
}

/// An item whose text fields are registered with the store but not yet
/// rendered.
#[derive(Debug)]
pub(crate) struct PreparedItem {
    heading: String,
    rows: Vec<Row>,
    definitions: Vec<String>,
}

impl PreparedItem {
    /// Definition lines declared by the item's fields, sorted and deduplicated.
    pub(crate) fn definitions(&self) -> &[String] {
        &self.definitions
    }
}

pub(crate) fn prepare_item(store: &mut FragmentStore, item: &Item) -> PreparedItem {
    let (heading, body) = split_heading(item);
    let mut rows = Vec::new();
    let mut handles = Vec::new();

    let text = store.register_fragment(body);
    handles.extend(text);
    rows.push(Row {
        name: "text".to_string(),
        value: RowValue::Markdown(text),
    });

    for name in &item.document.publish {
        if BUILT_IN_FIELDS.contains(&name.as_str()) {
            continue;
        }
        let value = match item.attributes.get(name) {
            None => continue,
            Some(AttributeValue::Str(source)) => {
                let handle = store.register_fragment(source);
                handles.extend(handle);
                RowValue::Markdown(handle)
            }
            Some(AttributeValue::Bool(flag)) => RowValue::Html(flag.to_string()),
            Some(AttributeValue::Unsupported) => {
                debug!(
                    target = "reqview::render::item_html",
                    uid = %item.uid,
                    attribute = %name,
                    "Skipping attribute with unsupported value type"
                );
                continue;
            }
        };
        rows.push(Row {
            name: name.clone(),
            value,
        });
    }

    rows.push(Row {
        name: "parents".to_string(),
        value: RowValue::Html(link_list(&item.parents)),
    });
    rows.push(Row {
        name: "children".to_string(),
        value: RowValue::Html(link_list(&item.children)),
    });

    let mut definitions: Vec<String> = handles
        .iter()
        .flat_map(|handle| store.declared_definitions(*handle).iter().cloned())
        .collect();
    definitions.sort_unstable();
    definitions.dedup();

    PreparedItem {
        heading,
        rows,
        definitions,
    }
}

pub(crate) fn render_prepared(
    store: &mut FragmentStore,
    prepared: PreparedItem,
) -> Result<String, RenderError> {
    let mut table = String::new();
    for row in prepared.rows {
        let value = match row.value {
            RowValue::Markdown(handle) => store.render_fragment(handle)?,
            RowValue::Html(html) => html,
        };
        if value.trim().is_empty() {
            continue;
        }
        table.push_str(&format!(
            "<tr><th>{}</th><td>{}</td></tr>\n",
            escape_html(&row.name),
            value.trim_end()
        ));
    }

    let mut html = prepared.heading;
    if !table.is_empty() {
        html.push_str("<table class=\"item-attributes\"><tbody>\n");
        html.push_str(&table);
        html.push_str("</tbody></table>\n");
    }
    Ok(html)
}

/// Inline block shown in place of an item that failed to render.
pub(crate) fn error_placeholder(uid: &str, error: &RenderError) -> String {
    format!(
        "<div class=\"render-error\"><strong>Failed to render {}</strong>: {}</div>\n",
        escape_html(uid),
        escape_html(&error.to_string())
    )
}

/// Heading markup plus the body text left for the "text" row.
fn split_heading(item: &Item) -> (String, &str) {
    if item.is_header() {
        let (first, rest) = item
            .text
            .split_once('\n')
            .unwrap_or((item.text.as_str(), ""));
        let title = first.trim().trim_start_matches('#').trim();
        let title = if title.is_empty() {
            fallback_title(item)
        } else {
            title
        };
        let depth = item.level.heading_depth().clamp(1, 6);
        let heading = format!(
            "<h{depth} class=\"item-heading\">{}</h{depth}>\n",
            escape_html(title)
        );
        (heading, rest)
    } else {
        let heading = format!(
            "<p class=\"item-heading\">{}</p>\n",
            escape_html(fallback_title(item))
        );
        (heading, item.text.as_str())
    }
}

fn fallback_title(item: &Item) -> &str {
    if item.header.trim().is_empty() {
        &item.uid
    } else {
        item.header.trim()
    }
}

fn link_list(links: &[ItemLink]) -> String {
    links
        .iter()
        .map(|link| {
            let uid = escape_html(&link.uid);
            let label = if link.header.trim().is_empty() {
                uid.clone()
            } else {
                format!("{uid} {}", escape_html(link.header.trim()))
            };
            format!("<a href=\"#{uid}\" class=\"item-link\" data-uid=\"{uid}\">{label}</a>")
        })
        .collect::<Vec<_>>()
        .join(", ")
}
