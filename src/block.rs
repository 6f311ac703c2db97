//! Block tree.
//!
//! Blocks live in an arena (`BlockTree`) and refer to each other by index,
//! so inheritance splicing is an indexed walk instead of a nested-map search.

use crate::error::{ErrorKind, TemplateError};
use crate::parser::expression::{ExprToken, tokenize_expression};
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

/// Index of a block inside its tree
pub type BlockId = usize;

/// Keyword that names a print block
pub const PRINT_KEYWORD: &str = "print";

/// Separates the keyword from the position suffix in synthesized ids.
/// A colon never appears in a literal block name, so ids cannot collide.
pub const ID_DIVIDER: char = ':';

/// Reserved directive keywords (lowercase)
pub const RESERVED_KEYWORDS: &[&str] = &[
    "set", "if", "elseif", "else", "foreach", "include", "extends", "attr", "component", "use", "?",
];

/// Sub-delimiter between an `if`/`foreach` head and its body
pub const THEN_KEYWORD: &str = "then";

/// Sub-delimiter between a `component` head and its body
pub const CONTAINS_KEYWORD: &str = "contains";

pub fn is_reserved(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    RESERVED_KEYWORDS.contains(&lower.as_str())
}

/// Semantic category of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Block,
    If,
    ForLoop,
    Set,
    Print,
    Include,
    Extends,
    Attr,
    Component,
    Use,
    Expression,
}

impl NodeKind {
    /// Resolve a block name; anything unrecognized is a plain block
    pub fn from_keyword(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "extends" => NodeKind::Extends,
            "include" => NodeKind::Include,
            "foreach" => NodeKind::ForLoop,
            "if" => NodeKind::If,
            "set" => NodeKind::Set,
            "attr" => NodeKind::Attr,
            "component" => NodeKind::Component,
            "use" => NodeKind::Use,
            "?" => NodeKind::Expression,
            PRINT_KEYWORD => NodeKind::Print,
            _ => NodeKind::Block,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Block => "block",
            NodeKind::If => "if",
            NodeKind::ForLoop => "forloop",
            NodeKind::Set => "set",
            NodeKind::Print => "print",
            NodeKind::Include => "include",
            NodeKind::Extends => "extends",
            NodeKind::Attr => "attr",
            NodeKind::Component => "component",
            NodeKind::Use => "use",
            NodeKind::Expression => "expression",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Does a tag with this name open a body that needs a `{@ / @}` close tag?
///
/// `if`, `foreach`, `component` and literal named blocks do. Every other
/// directive, including the `else`/`elseif` branch markers, ends at its own `@}`.
pub fn opens_body(name: &str) -> bool {
    match NodeKind::from_keyword(name) {
        NodeKind::If | NodeKind::ForLoop | NodeKind::Component => true,
        NodeKind::Block => !is_reserved(name),
        _ => false,
    }
}

/// Synthesize a unique directive id from the name token position
pub fn synthesize_id(keyword: &str, offset: usize, len: usize) -> String {
    format!("{}{}{:x}{:x}", keyword.to_ascii_lowercase(), ID_DIVIDER, offset, len)
}

/// Placeholder standing in for a child inside its parent's context
pub fn placeholder(id: &str) -> String {
    format!("{{@{id}@}}")
}

/// Inclusive byte range into the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loc {
    pub start: usize,
    pub end: usize,
}

impl Loc {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Decode into `(pos, len)`.
    ///
    /// A range ending before it starts means the matcher produced a broken
    /// tree; that is reported as `NegativeRange`.
    pub fn range(&self) -> Result<(usize, usize), TemplateError> {
        match self.end.checked_sub(self.start) {
            Some(span) => Ok((self.start, span + 1)),
            None => Err(TemplateError::new(
                ErrorKind::NegativeRange,
                format!("Block range {} ends before it starts", self),
                self.start,
            )
            .with_help("This is an internal error in the block matcher")),
        }
    }

    /// Exclusive end offset
    pub fn end_exclusive(&self) -> usize {
        self.end + 1
    }

    pub fn contains(&self, other: &Loc) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &Loc) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// `<hex start>.<hex end>`
impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}.{:x}", self.start, self.end)
    }
}

impl FromStr for Loc {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('.')
            .ok_or_else(|| format!("invalid location `{s}`: expected `<start>.<end>`"))?;
        let parse = |part: &str| {
            usize::from_str_radix(part, 16).map_err(|e| format!("invalid location `{s}`: {e}"))
        };
        Ok(Loc::new(parse(start)?, parse(end)?))
    }
}

impl Serialize for Loc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A delimited region of a template
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: String,
    /// Keyword or literal name; empty for print blocks
    pub name: String,
    pub node: NodeKind,
    pub loc: Loc,
    pub parent: Option<BlockId>,
    pub children: Vec<BlockId>,
    /// Extracted and normalized text, filled in during rendering
    pub ctx: String,
    /// Raw head expression of a directive
    pub exp: String,
}

impl Block {
    pub fn new(id: impl Into<String>, name: impl Into<String>, node: NodeKind, loc: Loc) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node,
            loc,
            parent: None,
            children: Vec::new(),
            ctx: String::new(),
            exp: String::new(),
        }
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    /// Directive blocks are never inheritance targets
    pub fn is_directive(&self) -> bool {
        self.node != NodeKind::Block || is_reserved(&self.name)
    }

    /// The head expression as normalized expression tokens
    pub fn expression_tokens(&self) -> Result<Vec<ExprToken>, TemplateError> {
        tokenize_expression(&self.exp)
    }
}

/// Block id -> dotted path of ids from the root
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BlockMap {
    paths: BTreeMap<String, String>,
}

impl BlockMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.paths.get(id).map(String::as_str)
    }

    /// The first path registered for an id wins
    pub fn insert(&mut self, id: impl Into<String>, path: impl Into<String>) {
        self.paths.entry(id.into()).or_insert_with(|| path.into());
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.paths.iter().map(|(id, path)| (id.as_str(), path.as_str()))
    }
}

/// Arena of blocks with an ordered list of roots
#[derive(Debug, Clone, Default)]
pub struct BlockTree {
    blocks: Vec<Block>,
    roots: Vec<BlockId>,
}

impl BlockTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks reachable from the roots
    pub fn len(&self) -> usize {
        self.walk().len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn roots(&self) -> &[BlockId] {
        &self.roots
    }

    pub fn children(&self, id: BlockId) -> &[BlockId] {
        &self.blocks[id].children
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    /// Append a block under `parent` (or as a root), keeping sibling ids unique
    pub fn insert(&mut self, parent: Option<BlockId>, mut block: Block) -> Result<BlockId, TemplateError> {
        if let Some(existing) = self.child_by_id(parent, &block.id) {
            return Err(TemplateError::new(
                ErrorKind::DuplicateBlock,
                format!("Block `{}` is defined twice at the same level", block.id),
                block.loc.start,
            )
            .with_len(block.name.len() + 3)
            .with_related(self.blocks[existing].loc.start)
            .with_related_label("first defined here")
            .with_help("Rename one of the blocks"));
        }

        let id = self.blocks.len();
        block.parent = parent;
        block.children.clear();
        self.blocks.push(block);
        match parent {
            Some(parent) => self.blocks[parent].children.push(id),
            None => self.roots.push(id),
        }
        Ok(id)
    }

    /// Find a direct child (or root) by block id
    pub fn child_by_id(&self, parent: Option<BlockId>, id: &str) -> Option<BlockId> {
        let siblings = match parent {
            Some(parent) => &self.blocks[parent].children,
            None => &self.roots,
        };
        siblings.iter().copied().find(|&sibling| self.blocks[sibling].id == id)
    }

    /// Descend along a dotted id path
    pub fn find_path(&self, path: &str) -> Option<BlockId> {
        let mut current = None;
        for segment in path.split('.') {
            current = Some(self.child_by_id(current, segment)?);
        }
        current
    }

    /// Dotted id path from the root down to `id`
    pub fn path_of(&self, id: BlockId) -> String {
        let mut segments = vec![self.blocks[id].id.as_str()];
        let mut current = self.blocks[id].parent;
        while let Some(parent) = current {
            segments.push(self.blocks[parent].id.as_str());
            current = self.blocks[parent].parent;
        }
        segments.reverse();
        segments.join(".")
    }

    /// Nesting depth of `id` (roots are 0)
    pub fn depth(&self, id: BlockId) -> usize {
        let mut depth = 0;
        let mut current = self.blocks[id].parent;
        while let Some(parent) = current {
            depth += 1;
            current = self.blocks[parent].parent;
        }
        depth
    }

    /// Ids of every reachable block in pre-order (source order)
    pub fn walk(&self) -> Vec<BlockId> {
        let mut order = Vec::new();
        let mut stack: Vec<BlockId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.blocks[id].children.iter().rev().copied());
        }
        order
    }

    /// Index of every literal named block, for inheritance
    pub fn block_map(&self) -> BlockMap {
        let mut map = BlockMap::new();
        for id in self.walk() {
            let block = &self.blocks[id];
            if !block.is_directive() {
                map.insert(block.id.clone(), self.path_of(id));
            }
        }
        map
    }

    /// Remove a root from the tree (its arena slot stays, unreachable)
    pub fn detach_root(&mut self, id: BlockId) -> Option<Block> {
        let position = self.roots.iter().position(|&root| root == id)?;
        self.roots.remove(position);
        Some(self.blocks[id].clone())
    }

    /// Overwrite `target`'s context with `donor_id`'s and, when the donor has
    /// children, replace `target`'s children with a copy of the donor's
    /// subtree. `target` keeps its own id, kind and location.
    pub fn graft(&mut self, target: BlockId, donor: &BlockTree, donor_id: BlockId) {
        self.blocks[target].ctx = donor.blocks[donor_id].ctx.clone();

        if donor.blocks[donor_id].children.is_empty() {
            return;
        }

        self.blocks[target].children.clear();
        for &child in &donor.blocks[donor_id].children {
            let copied = self.copy_subtree(donor, child, target);
            self.blocks[target].children.push(copied);
        }
    }

    fn copy_subtree(&mut self, donor: &BlockTree, donor_id: BlockId, parent: BlockId) -> BlockId {
        let mut block = donor.blocks[donor_id].clone();
        block.parent = Some(parent);
        block.children.clear();
        let id = self.blocks.len();
        self.blocks.push(block);

        for &child in &donor.blocks[donor_id].children {
            let copied = self.copy_subtree(donor, child, id);
            self.blocks[id].children.push(copied);
        }
        id
    }
}

impl Index<BlockId> for BlockTree {
    type Output = Block;

    fn index(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }
}

impl IndexMut<BlockId> for BlockTree {
    fn index_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id]
    }
}

/// Serializes as a nested list of blocks
impl Serialize for BlockTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.roots.iter().map(|&id| Subtree { tree: self, id }))
    }
}

struct Subtree<'a> {
    tree: &'a BlockTree,
    id: BlockId,
}

impl Serialize for Subtree<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let block = &self.tree[self.id];
        let children: Vec<Subtree<'_>> = block
            .children
            .iter()
            .map(|&id| Subtree { tree: self.tree, id })
            .collect();

        let mut state = serializer.serialize_struct("Block", 8)?;
        state.serialize_field("id", &block.id)?;
        state.serialize_field("name", &block.name)?;
        state.serialize_field("node", &block.node)?;
        state.serialize_field("loc", &block.loc)?;
        state.serialize_field("hasParent", &block.has_parent())?;
        state.serialize_field("ctx", &block.ctx)?;
        state.serialize_field("exp", &block.exp)?;
        state.serialize_field("children", &children)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(id: &str, start: usize, end: usize) -> Block {
        Block::new(id, id, NodeKind::from_keyword(id), Loc::new(start, end))
    }

    fn sample() -> BlockTree {
        // layout { header, main { content } }
        let mut tree = BlockTree::new();
        let layout = tree.insert(None, named("layout", 0, 100)).unwrap();
        tree.insert(Some(layout), named("header", 10, 20)).unwrap();
        let main = tree.insert(Some(layout), named("main", 30, 90)).unwrap();
        tree.insert(Some(main), named("content", 40, 80)).unwrap();
        tree
    }

    #[test]
    fn test_node_kind_table() {
        assert_eq!(NodeKind::from_keyword("IF"), NodeKind::If);
        assert_eq!(NodeKind::from_keyword("foreach"), NodeKind::ForLoop);
        assert_eq!(NodeKind::from_keyword("?"), NodeKind::Expression);
        assert_eq!(NodeKind::from_keyword("print"), NodeKind::Print);
        assert_eq!(NodeKind::from_keyword("sidebar"), NodeKind::Block);
        assert_eq!(NodeKind::from_keyword("else"), NodeKind::Block);
    }

    #[test]
    fn test_opens_body() {
        assert!(opens_body("if"));
        assert!(opens_body("Component"));
        assert!(opens_body("sidebar"));
        assert!(!opens_body("extends"));
        assert!(!opens_body("else"));
        assert!(!opens_body("?"));
    }

    #[test]
    fn test_synthesized_id() {
        assert_eq!(synthesize_id("IF", 255, 2), "if:ff2");
        assert_eq!(placeholder("if:ff2"), "{@if:ff2@}");
    }

    #[test]
    fn test_loc_range() {
        assert_eq!(Loc::new(4, 9).range().unwrap(), (4, 6));
        let err = Loc::new(9, 4).range().unwrap_err();
        assert_eq!(err.kind, ErrorKind::NegativeRange);
    }

    #[test]
    fn test_loc_text_form() {
        let loc = Loc::new(26, 255);
        assert_eq!(loc.to_string(), "1a.ff");
        assert_eq!("1a.ff".parse::<Loc>().unwrap(), loc);
        assert!("1a".parse::<Loc>().is_err());
        assert!("zz.1".parse::<Loc>().is_err());
    }

    #[test]
    fn test_paths() {
        let tree = sample();
        let content = tree.find_path("layout.main.content").unwrap();
        assert_eq!(tree[content].id, "content");
        assert_eq!(tree.path_of(content), "layout.main.content");
        assert_eq!(tree.depth(content), 2);
        assert!(tree[content].has_parent());
        assert_eq!(tree.find_path("layout.missing"), None);
    }

    #[test]
    fn test_walk_is_source_order() {
        let tree = sample();
        let ids: Vec<&str> = tree.walk().into_iter().map(|id| tree[id].id.as_str()).collect();
        assert_eq!(ids, vec!["layout", "header", "main", "content"]);
    }

    #[test]
    fn test_block_map_skips_directives() {
        let mut tree = sample();
        let main = tree.find_path("layout.main").unwrap();
        tree.insert(Some(main), Block::new(synthesize_id("if", 50, 2), "if", NodeKind::If, Loc::new(48, 60)))
            .unwrap();

        let map = tree.block_map();
        assert_eq!(map.get("content"), Some("layout.main.content"));
        assert_eq!(map.get("header"), Some("layout.header"));
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_duplicate_sibling() {
        let mut tree = sample();
        let layout = tree.roots()[0];
        let err = tree.insert(Some(layout), named("header", 22, 28)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateBlock);
        assert_eq!(err.related, Some(10));
    }

    #[test]
    fn test_graft_replaces_ctx_and_children() {
        let mut parent = sample();
        let main = parent.find_path("layout.main").unwrap();
        parent[main].ctx = "old {@content@}".to_string();

        let mut child = BlockTree::new();
        let donor = child.insert(None, named("main", 0, 50)).unwrap();
        child[donor].ctx = "new {@aside@}".to_string();
        let aside = child.insert(Some(donor), named("aside", 10, 20)).unwrap();
        child[aside].ctx = "aside text".to_string();

        parent.graft(main, &child, donor);

        assert_eq!(parent[main].ctx, "new {@aside@}");
        assert_eq!(parent[main].loc, Loc::new(30, 90));
        let grafted = parent.find_path("layout.main.aside").unwrap();
        assert_eq!(parent[grafted].ctx, "aside text");
        assert_eq!(parent[grafted].parent, Some(main));
        assert_eq!(parent.find_path("layout.main.content"), None);
    }

    #[test]
    fn test_graft_without_children_keeps_target_children() {
        let mut parent = sample();
        let main = parent.find_path("layout.main").unwrap();

        let mut child = BlockTree::new();
        let donor = child.insert(None, named("main", 0, 10)).unwrap();
        child[donor].ctx = "plain".to_string();

        parent.graft(main, &child, donor);
        assert_eq!(parent[main].ctx, "plain");
        assert!(parent.find_path("layout.main.content").is_some());
    }

    #[test]
    fn test_detach_root() {
        let mut tree = sample();
        let layout = tree.roots()[0];
        let detached = tree.detach_root(layout).unwrap();
        assert_eq!(detached.id, "layout");
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
    }

    #[test]
    fn test_serialize_nested() {
        let tree = sample();
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json[0]["id"], "layout");
        assert_eq!(json[0]["loc"], "0.64");
        assert_eq!(json[0]["hasParent"], false);
        assert_eq!(json[0]["children"][1]["children"][0]["id"], "content");
    }
}
