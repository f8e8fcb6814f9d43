//! Flatten a block tree into per-section records.
//!
//! Every top-level `config <section>` becomes a [`Section`]; each of its
//! `edit` children becomes a [`Record`]. Nested `config` blocks inside an
//! entry turn into [`FieldValue::Table`] (when they hold edits) or
//! [`FieldValue::Settings`] (when they only hold `set` lines).
//!
//! Dumps of devices with virtual domains wrap sections in
//! `config vdom` / `edit <vdom>` and `config global`; those wrappers are
//! unfolded and the sections inside are tagged with their vdom.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::block::{AttrValue, BlockId, Document};

const VDOM_SECTION: &str = "vdom";
const GLOBAL_SECTION: &str = "global";

/// Value of one record field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(String),
    List(Vec<String>),
    /// Nested `config` holding `edit` entries.
    Table(Vec<Record>),
    /// Nested `config` holding only `set` lines.
    Settings(IndexMap<String, FieldValue>),
}

impl FieldValue {
    /// Scalar text, or `None` for any other shape.
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            FieldValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// Tokens of a scalar or list value; empty for nested values.
    pub fn values(&self) -> Vec<&str> {
        match self {
            FieldValue::Scalar(value) => vec![value.as_str()],
            FieldValue::List(values) => values.iter().map(String::as_str).collect(),
            FieldValue::Table(_) | FieldValue::Settings(_) => Vec::new(),
        }
    }
}

impl From<&AttrValue> for FieldValue {
    fn from(value: &AttrValue) -> Self {
        match value {
            AttrValue::Scalar(value) => FieldValue::Scalar(value.clone()),
            AttrValue::List(values) => FieldValue::List(values.clone()),
        }
    }
}

/// One `edit` entry of a section.
///
/// Serializes as a flat object: `{"edit": "10", "name": ..., ...}`. The
/// section name and vdom are carried by the enclosing [`Section`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(skip)]
    pub section: String,
    #[serde(skip)]
    pub vdom: Option<String>,
    pub edit: String,
    #[serde(flatten)]
    pub fields: IndexMap<String, FieldValue>,
}

impl Record {
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Scalar text of `key`.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_scalar)
    }

    /// Tokens of `key` whether it was set with one value or several.
    pub fn values(&self, key: &str) -> Vec<&str> {
        self.get(key).map(FieldValue::values).unwrap_or_default()
    }

    fn stamp(&mut self, section: &str, vdom: Option<&str>) {
        self.section = section.to_string();
        self.vdom = vdom.map(ToOwned::to_owned);
        for (key, value) in &mut self.fields {
            stamp_nested(value, key, vdom);
        }
    }
}

fn stamp_nested(value: &mut FieldValue, key: &str, vdom: Option<&str>) {
    match value {
        FieldValue::Table(records) => {
            for record in records {
                record.stamp(key, vdom);
            }
        }
        FieldValue::Settings(fields) => {
            for (key, value) in fields {
                stamp_nested(value, key, vdom);
            }
        }
        FieldValue::Scalar(_) | FieldValue::List(_) => {}
    }
}

/// All entries of one `config <name>` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SectionRepr")]
pub struct Section {
    #[serde(rename = "config")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vdom: Option<String>,
    /// Direct `set` lines of the section (for example `system global`).
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub settings: IndexMap<String, FieldValue>,
    #[serde(rename = "edits")]
    pub records: Vec<Record>,
}

impl Section {
    /// Entries of the section in document order.
    pub fn records(&self) -> impl Iterator<Item = &Record> + '_ {
        self.records.iter()
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(FieldValue::as_scalar)
    }
}

#[derive(Deserialize)]
struct SectionRepr {
    config: String,
    #[serde(default)]
    vdom: Option<String>,
    #[serde(default)]
    settings: IndexMap<String, FieldValue>,
    #[serde(default)]
    edits: Vec<Record>,
}

impl From<SectionRepr> for Section {
    fn from(repr: SectionRepr) -> Self {
        let mut section = Section {
            name: repr.config,
            vdom: repr.vdom,
            settings: repr.settings,
            records: repr.edits,
        };
        let vdom = section.vdom.clone();
        for record in &mut section.records {
            record.stamp(&section.name, vdom.as_deref());
        }
        for (key, value) in &mut section.settings {
            stamp_nested(value, key, vdom.as_deref());
        }
        section
    }
}

/// Lazily walk the sections of a document in document order.
pub fn sections(doc: &Document) -> Sections<'_> {
    Sections {
        doc,
        pending: doc.roots().iter().rev().map(|id| (*id, None)).collect(),
    }
}

/// Collect every section of a document.
pub fn normalize(doc: &Document) -> Vec<Section> {
    sections(doc).collect()
}

/// Iterator returned by [`sections`].
pub struct Sections<'a> {
    doc: &'a Document,
    pending: Vec<(BlockId, Option<&'a str>)>,
}

impl<'a> Iterator for Sections<'a> {
    type Item = Section;

    fn next(&mut self) -> Option<Section> {
        let doc = self.doc;
        while let Some((id, vdom)) = self.pending.pop() {
            let block = doc.block(id);
            if !block.is_config() {
                continue;
            }

            if vdom.is_none() && block.name == VDOM_SECTION {
                let mut nested = Vec::new();
                for (entry_id, entry) in doc.children(id).filter(|(_, b)| b.is_edit()) {
                    for (child, inner) in doc.children(entry_id) {
                        if inner.is_config() {
                            nested.push((child, Some(entry.name.as_str())));
                        }
                    }
                }
                self.pending.extend(nested.into_iter().rev());
                continue;
            }

            if vdom.is_none() && block.name == GLOBAL_SECTION {
                let nested: Vec<_> = doc
                    .children(id)
                    .filter(|(_, b)| b.is_config())
                    .map(|(child, _)| (child, None))
                    .collect();
                self.pending.extend(nested.into_iter().rev());
                continue;
            }

            return Some(build_section(doc, id, vdom));
        }
        None
    }
}

fn build_section(doc: &Document, id: BlockId, vdom: Option<&str>) -> Section {
    let block = doc.block(id);
    let mut settings: IndexMap<String, FieldValue> = block
        .attributes
        .iter()
        .map(|(key, value)| (key.clone(), FieldValue::from(value)))
        .collect();
    let mut records = Vec::new();

    for (child, inner) in doc.children(id) {
        if inner.is_edit() {
            records.push(build_record(doc, child, &block.name, vdom));
        } else {
            settings.insert(inner.name.clone(), nested_value(doc, child, vdom));
        }
    }

    Section {
        name: block.name.clone(),
        vdom: vdom.map(ToOwned::to_owned),
        settings,
        records,
    }
}

fn build_record(doc: &Document, id: BlockId, section: &str, vdom: Option<&str>) -> Record {
    let block = doc.block(id);
    let mut fields: IndexMap<String, FieldValue> = block
        .attributes
        .iter()
        .map(|(key, value)| (key.clone(), FieldValue::from(value)))
        .collect();

    for (child, inner) in doc.children(id) {
        if inner.is_config() {
            fields.insert(inner.name.clone(), nested_value(doc, child, vdom));
        }
    }

    Record {
        section: section.to_string(),
        vdom: vdom.map(ToOwned::to_owned),
        edit: block.name.clone(),
        fields,
    }
}

fn nested_value(doc: &Document, id: BlockId, vdom: Option<&str>) -> FieldValue {
    let block = doc.block(id);
    if doc.children(id).any(|(_, child)| child.is_edit()) {
        let records = doc
            .children(id)
            .filter(|(_, child)| child.is_edit())
            .map(|(child, _)| build_record(doc, child, &block.name, vdom))
            .collect();
        return FieldValue::Table(records);
    }

    let mut fields: IndexMap<String, FieldValue> = block
        .attributes
        .iter()
        .map(|(key, value)| (key.clone(), FieldValue::from(value)))
        .collect();
    for (child, inner) in doc.children(id) {
        fields.insert(inner.name.clone(), nested_value(doc, child, vdom));
    }
    FieldValue::Settings(fields)
}
