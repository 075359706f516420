//! Loads one requirement document from its directory of YAML item files.
//!
//! A document directory holds a `.doorstop.yml` with the document settings
//! and one `<UID>.yml` file per item. Nested directories that carry their own
//! `.doorstop.yml` are child documents and are not part of this one.

use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::Arc,
    time::SystemTime,
};

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::domain::{AttributeValue, DocumentInfo, Item, ItemLink, ItemRevision, Level};

use super::error::InfraError;

pub const DOCUMENT_CONFIG: &str = ".doorstop.yml";
const ITEM_EXTENSION: &str = "yml";

/// Keys with a dedicated place on [`Item`]; everything else is an attribute.
const ITEM_FIELDS: &[&str] = &["level", "header", "text", "normative", "active", "links"];

/// A loaded document: its settings and every item sorted by level.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub info: Arc<DocumentInfo>,
    pub items: Vec<ItemRevision>,
}

impl LoadedDocument {
    pub fn title(&self) -> &str {
        &self.info.prefix
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DocumentConfig {
    settings: DocumentSettings,
    attributes: DocumentAttributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DocumentSettings {
    prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DocumentAttributes {
    publish: Vec<String>,
}

/// One item file before links are resolved against the rest of the document.
#[derive(Debug)]
struct RawItem {
    uid: String,
    level: Level,
    header: String,
    text: String,
    normative: bool,
    active: bool,
    attributes: Vec<(String, AttributeValue)>,
    links: Vec<String>,
    modified: SystemTime,
}

pub fn load_document(dir: &Path) -> Result<LoadedDocument, InfraError> {
    let info = Arc::new(read_document_info(dir)?);

    let mut raw_items = Vec::new();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || belongs_to_document(entry));
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() || item_uid(entry.path()).is_none() {
            continue;
        }
        match read_item(entry.path()) {
            Ok(raw) => raw_items.push(raw),
            Err(err) => warn!(
                target = "reqview::infra::store",
                path = %entry.path().display(),
                error = %err,
                "Skipping unreadable item file"
            ),
        }
    }

    raw_items.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.uid.cmp(&b.uid)));
    let items = link_items(raw_items, &info);

    debug!(
        target = "reqview::infra::store",
        prefix = %info.prefix,
        items = items.len(),
        "Loaded document"
    );

    Ok(LoadedDocument { info, items })
}

/// Whether `path` names the document settings file.
pub fn is_document_config(path: &Path) -> bool {
    path.file_name().is_some_and(|name| name == DOCUMENT_CONFIG)
}

/// The item UID for an item file path, `None` for anything else.
pub fn item_uid(path: &Path) -> Option<&str> {
    if path.extension().is_none_or(|ext| ext != ITEM_EXTENSION) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() || stem.starts_with('.') {
        return None;
    }
    Some(stem)
}

fn belongs_to_document(entry: &DirEntry) -> bool {
    let hidden = entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'));
    if hidden {
        return false;
    }
    !(entry.file_type().is_dir() && entry.path().join(DOCUMENT_CONFIG).is_file())
}

fn read_document_info(dir: &Path) -> Result<DocumentInfo, InfraError> {
    let path = dir.join(DOCUMENT_CONFIG);
    if !path.is_file() {
        return Err(InfraError::document(
            dir,
            format!("not a document directory (missing {DOCUMENT_CONFIG})"),
        ));
    }

    let source = fs::read_to_string(&path).map_err(|err| InfraError::read(&path, err))?;
    let config: DocumentConfig = if source.trim().is_empty() {
        DocumentConfig::default()
    } else {
        serde_yaml::from_str(&source).map_err(|err| InfraError::yaml(&path, err))?
    };

    let prefix = config
        .settings
        .prefix
        .filter(|prefix| !prefix.trim().is_empty())
        .or_else(|| {
            dir.file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string)
        })
        .unwrap_or_default();

    Ok(DocumentInfo::new(prefix, dir).with_publish(config.attributes.publish))
}

fn read_item(path: &Path) -> Result<RawItem, InfraError> {
    let uid = item_uid(path)
        .ok_or_else(|| InfraError::document(path, "not an item file"))?
        .to_string();
    let modified = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|err| InfraError::read(path, err))?;
    let source = fs::read_to_string(path).map_err(|err| InfraError::read(path, err))?;
    let mapping: Mapping = if source.trim().is_empty() {
        Mapping::new()
    } else {
        serde_yaml::from_str(&source).map_err(|err| InfraError::yaml(path, err))?
    };

    let level = match mapping.get("level") {
        None | Some(Value::Null) => Level::new(vec![1]),
        Some(Value::String(text)) => text.parse(),
        Some(Value::Number(number)) => number.to_string().parse(),
        Some(other) => {
            return Err(InfraError::document(
                path,
                format!("level must be a number or string, got {other:?}"),
            ));
        }
    }
    .map_err(|err| InfraError::document(path, err.to_string()))?;

    let attributes = mapping
        .iter()
        .filter_map(|(key, value)| {
            let key = key.as_str()?;
            if ITEM_FIELDS.contains(&key) {
                return None;
            }
            attribute_value(value).map(|value| (key.to_string(), value))
        })
        .collect();

    Ok(RawItem {
        uid,
        level,
        header: string_field(&mapping, "header"),
        text: string_field(&mapping, "text"),
        normative: bool_field(&mapping, "normative", true),
        active: bool_field(&mapping, "active", true),
        attributes,
        links: link_targets(mapping.get("links")),
        modified,
    })
}

fn string_field(mapping: &Mapping, key: &str) -> String {
    mapping
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn bool_field(mapping: &Mapping, key: &str, default: bool) -> bool {
    mapping.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn attribute_value(value: &Value) -> Option<AttributeValue> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(AttributeValue::Str(text.clone())),
        Value::Bool(flag) => Some(AttributeValue::Bool(*flag)),
        _ => Some(AttributeValue::Unsupported),
    }
}

/// Links are written either as a bare UID or as a `{UID: fingerprint}` map.
fn link_targets(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Sequence(entries)) = value else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(uid) => Some(uid.clone()),
            Value::Mapping(map) => map.keys().next().and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .collect()
}

fn link_items(raw_items: Vec<RawItem>, info: &Arc<DocumentInfo>) -> Vec<ItemRevision> {
    let headers: HashMap<&str, &str> = raw_items
        .iter()
        .map(|raw| (raw.uid.as_str(), raw.header.as_str()))
        .collect();

    let mut children: HashMap<&str, Vec<ItemLink>> = HashMap::new();
    for raw in &raw_items {
        for parent in &raw.links {
            if headers.contains_key(parent.as_str()) {
                children
                    .entry(parent.as_str())
                    .or_default()
                    .push(ItemLink::new(raw.uid.clone(), raw.header.clone()));
            }
        }
    }

    raw_items
        .iter()
        .map(|raw| {
            let mut item = Item::new(
                raw.uid.clone(),
                raw.level.clone(),
                raw.text.clone(),
                Arc::clone(info),
            )
            .with_header(raw.header.clone())
            .with_normative(raw.normative)
            .with_active(raw.active);

            for (name, value) in &raw.attributes {
                item = item.with_attribute(name.clone(), value.clone());
            }
            for parent in &raw.links {
                let header = headers.get(parent.as_str()).copied().unwrap_or_default();
                item = item.with_parent(ItemLink::new(parent.clone(), header));
            }
            if let Some(links) = children.get(raw.uid.as_str()) {
                item.children = links.clone();
            }

            ItemRevision::new(item, raw.modified)
        })
        .collect()
}
