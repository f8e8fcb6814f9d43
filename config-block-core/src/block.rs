use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Index of a block inside its owning [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(usize);

impl BlockId {
    /// Position of the block in the arena (document order of opening lines).
    pub fn index(self) -> usize {
        self.0
    }
}

/// Whether a block was opened by `config` or by `edit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Config,
    Edit,
}

impl BlockKind {
    pub fn keyword(self) -> &'static str {
        match self {
            BlockKind::Config => "config",
            BlockKind::Edit => "edit",
        }
    }
}

/// Value of a `set` line: one token or an ordered list of tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Scalar(String),
    List(Vec<String>),
}

impl AttrValue {
    /// Build a value from the tokens of a `set` line.
    ///
    /// A single token becomes [`AttrValue::Scalar`], several tokens become
    /// [`AttrValue::List`]. A `set` line without any value is an empty scalar.
    pub fn from_tokens(mut tokens: Vec<String>) -> Self {
        match tokens.len() {
            0 => AttrValue::Scalar(String::new()),
            1 => AttrValue::Scalar(tokens.remove(0)),
            _ => AttrValue::List(tokens),
        }
    }

    /// Return the scalar text, or `None` for list values.
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            AttrValue::Scalar(value) => Some(value),
            AttrValue::List(_) => None,
        }
    }

    /// All tokens of the value in order; a scalar yields exactly one item.
    pub fn values(&self) -> Vec<&str> {
        match self {
            AttrValue::Scalar(value) => vec![value.as_str()],
            AttrValue::List(values) => values.iter().map(String::as_str).collect(),
        }
    }

    /// Append tokens, promoting a scalar to a list.
    pub fn extend(&mut self, tokens: Vec<String>) {
        let mut merged: Vec<String> = match std::mem::replace(self, AttrValue::List(Vec::new())) {
            AttrValue::Scalar(value) if value.is_empty() => Vec::new(),
            AttrValue::Scalar(value) => vec![value],
            AttrValue::List(values) => values,
        };
        merged.extend(tokens);
        *self = AttrValue::from_tokens(merged);
    }
}

/// One `config` or `edit` block.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigBlock {
    pub kind: BlockKind,
    /// Section name (`firewall policy`) or edit identifier (`10`, `port1`).
    pub name: String,
    /// Attributes from `set` lines, in the order they first appeared.
    pub attributes: IndexMap<String, AttrValue>,
    /// 1-based line number of the opening statement.
    pub line: usize,
    children: Vec<BlockId>,
    parent: Option<BlockId>,
}

impl ConfigBlock {
    pub fn children(&self) -> &[BlockId] {
        &self.children
    }

    pub fn parent(&self) -> Option<BlockId> {
        self.parent
    }

    pub fn is_config(&self) -> bool {
        self.kind == BlockKind::Config
    }

    pub fn is_edit(&self) -> bool {
        self.kind == BlockKind::Edit
    }
}

/// A parsed configuration dump: an arena of blocks plus the top-level order.
///
/// Parents own their children through the arena; the `parent` link of a block
/// is only an index back into the same arena.
#[derive(Debug, Clone, Default)]
pub struct Document {
    blocks: Vec<ConfigBlock>,
    roots: Vec<BlockId>,
    /// Comment lines (`#config-version=...`) seen before the first statement.
    pub header: Vec<String>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a block and attach it under `parent`, or as a root when `None`.
    pub fn add_block(
        &mut self,
        parent: Option<BlockId>,
        kind: BlockKind,
        name: impl Into<String>,
        line: usize,
    ) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(ConfigBlock {
            kind,
            name: name.into(),
            attributes: IndexMap::new(),
            line,
            children: Vec::new(),
            parent,
        });
        match parent {
            Some(parent) => self.blocks[parent.0].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    pub fn block(&self, id: BlockId) -> &ConfigBlock {
        &self.blocks[id.0]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut ConfigBlock {
        &mut self.blocks[id.0]
    }

    /// Top-level blocks in document order.
    pub fn roots(&self) -> &[BlockId] {
        &self.roots
    }

    /// Children of `id` together with their ids, in document order.
    pub fn children(&self, id: BlockId) -> impl Iterator<Item = (BlockId, &ConfigBlock)> + '_ {
        self.block(id)
            .children
            .iter()
            .map(move |child| (*child, self.block(*child)))
    }

    /// Return the first child of `id` with the given kind and name.
    pub fn get_child(&self, id: BlockId, kind: BlockKind, name: &str) -> Option<BlockId> {
        self.children(id)
            .find(|(_, block)| block.kind == kind && block.name == name)
            .map(|(child, _)| child)
    }

    /// Return the first top-level `config` block with the given name.
    pub fn find_root(&self, name: &str) -> Option<BlockId> {
        self.roots
            .iter()
            .copied()
            .find(|id| self.block(*id).is_config() && self.block(*id).name == name)
    }

    /// Number of blocks in the arena.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{AttrValue, BlockKind, Document};

    #[test]
    fn add_block_links_parent_and_child() {
        let mut doc = Document::new();
        let section = doc.add_block(None, BlockKind::Config, "firewall policy", 1);
        let edit = doc.add_block(Some(section), BlockKind::Edit, "10", 2);

        assert_eq!(doc.roots(), &[section]);
        assert_eq!(doc.block(section).children(), &[edit]);
        assert_eq!(doc.block(edit).parent(), Some(section));
        assert_eq!(doc.get_child(section, BlockKind::Edit, "10"), Some(edit));
        assert_eq!(doc.find_root("firewall policy"), Some(section));
    }

    #[test]
    fn extend_promotes_scalar_to_list() {
        let mut value = AttrValue::Scalar("HTTP".to_string());
        value.extend(vec!["HTTPS".to_string()]);
        assert_eq!(
            value,
            AttrValue::List(vec!["HTTP".to_string(), "HTTPS".to_string()])
        );
    }

    #[test]
    fn single_token_is_scalar() {
        assert_eq!(
            AttrValue::from_tokens(vec!["accept".to_string()]),
            AttrValue::Scalar("accept".to_string())
        );
    }
}
