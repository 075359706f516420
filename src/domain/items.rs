//! Requirement items as consumed by the rendering engine.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc, time::SystemTime};

use super::level::Level;

/// Document-wide settings shared by every item of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentInfo {
    pub prefix: String,
    pub path: PathBuf,
    /// Extended attributes that get their own row in each item's table.
    pub publish: Vec<String>,
}

impl DocumentInfo {
    pub fn new(prefix: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            path: path.into(),
            publish: Vec::new(),
        }
    }

    pub fn with_publish<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.publish = names.into_iter().map(Into::into).collect();
        self
    }
}

/// Value of an extended item attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Str(String),
    Bool(bool),
    /// Lists, maps and numbers are carried but never rendered.
    Unsupported,
}

/// A resolved link target shown in parent and child rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLink {
    pub uid: String,
    pub header: String,
}

impl ItemLink {
    pub fn new(uid: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            header: header.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub uid: String,
    pub level: Level,
    pub header: String,
    pub text: String,
    pub normative: bool,
    pub active: bool,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub parents: Vec<ItemLink>,
    pub children: Vec<ItemLink>,
    pub document: Arc<DocumentInfo>,
}

impl Item {
    /// A normative, active item with no attributes or links.
    pub fn new(
        uid: impl Into<String>,
        level: Level,
        text: impl Into<String>,
        document: Arc<DocumentInfo>,
    ) -> Self {
        Self {
            uid: uid.into(),
            level,
            header: String::new(),
            text: text.into(),
            normative: true,
            active: true,
            attributes: BTreeMap::new(),
            parents: Vec::new(),
            children: Vec::new(),
            document,
        }
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    pub fn with_normative(mut self, normative: bool) -> Self {
        self.normative = normative;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_parent(mut self, link: ItemLink) -> Self {
        self.parents.push(link);
        self
    }

    pub fn with_child(mut self, link: ItemLink) -> Self {
        self.children.push(link);
        self
    }

    /// Heading-only items are non-normative and sit on a `.0` level.
    pub fn is_header(&self) -> bool {
        !self.normative && self.level.is_heading()
    }

    pub fn link(&self) -> ItemLink {
        ItemLink::new(self.uid.clone(), self.header.clone())
    }
}

/// An item paired with the timestamp used as its cache key.
#[derive(Debug, Clone)]
pub struct ItemRevision {
    pub item: Arc<Item>,
    pub modified: SystemTime,
}

impl ItemRevision {
    pub fn new(item: Item, modified: SystemTime) -> Self {
        Self {
            item: Arc::new(item),
            modified,
        }
    }

    pub fn uid(&self) -> &str {
        &self.item.uid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> Arc<DocumentInfo> {
        Arc::new(DocumentInfo::new("REQ", "/tmp/reqs"))
    }

    #[test]
    fn header_items_require_non_normative_heading_level() {
        let level: Level = "1.0".parse().expect("level");
        let heading = Item::new("REQ-1", level.clone(), "# Intro", document()).with_normative(false);
        let normative = Item::new("REQ-2", level, "# Intro", document());
        let leaf = Item::new("REQ-3", "1.1".parse().expect("level"), "x", document())
            .with_normative(false);

        assert!(heading.is_header());
        assert!(!normative.is_header());
        assert!(!leaf.is_header());
    }

    #[test]
    fn builders_collect_links_and_attributes() {
        let item = Item::new("REQ-2", "1.1".parse().expect("level"), "Body", document())
            .with_header("Login")
            .with_attribute("owner", AttributeValue::Str("ops".into()))
            .with_parent(ItemLink::new("SYS-1", "System"))
            .with_child(ItemLink::new("TST-9", "Check"));

        assert_eq!(item.link(), ItemLink::new("REQ-2", "Login"));
        assert_eq!(
            item.attributes.get("owner"),
            Some(&AttributeValue::Str("ops".into()))
        );
        assert_eq!(item.parents.len(), 1);
        assert_eq!(item.children[0].uid, "TST-9");
    }
}
