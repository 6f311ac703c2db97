//! Template renderer.
//!
//! Loading a template parses it and interprets every block against the file's
//! own [`Source`]: each block's text is cut out of its parent, its children are
//! punctured into `{@id@}` placeholders, and the result is normalized for the
//! block kind. Inheritance then splices a child template's named blocks into
//! its parent, and reassembly walks the placeholders back out.

mod inherit;
pub mod normalize;
mod source;

pub use normalize::display_value;
pub use source::Source;

use crate::Options;
use crate::block::{Block, BlockId, BlockTree, NodeKind, placeholder};
use crate::error::{ErrorKind, RenderError, TemplateError};
use crate::parser::expression::quoted_literal;
use crate::parser::{BlockParser, Parser};
use log::{debug, info, trace};
use std::collections::BTreeMap;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Flat map of variable names to values
pub type Variables = BTreeMap<String, serde_json::Value>;

/// A loaded template: its blocks plus the file gaps are read from
#[derive(Debug)]
pub struct Template {
    pub tree: BlockTree,
    pub source: Source,
}

impl Template {
    /// Reassemble the output text
    pub fn assemble(&self) -> Result<String, RenderError> {
        let mut output = String::new();
        let mut cursor = 0;

        for &root in self.tree.roots() {
            let loc = self.tree[root].loc;
            output.push_str(&self.source.read_range(cursor, loc.start.saturating_sub(cursor))?);
            output.push_str(&build_context(&self.tree, root));
            cursor = loc.end_exclusive();
        }
        output.push_str(&self.source.read_from(cursor)?);

        Ok(output)
    }
}

/// Replace every child placeholder with the child's own text, depth first.
///
/// Placeholders are found in the parent's own context, left to right in
/// child order, so text already substituted is never searched again.
pub fn build_context(tree: &BlockTree, id: BlockId) -> String {
    let ctx = &tree[id].ctx;
    let mut output = String::with_capacity(ctx.len());
    let mut cursor = 0;

    for &child in tree.children(id) {
        let marker = placeholder(&tree[child].id);
        let Some(found) = ctx[cursor..].find(&marker) else {
            trace!("no placeholder for `{}` in `{}`", tree[child].id, tree[id].id);
            continue;
        };
        output.push_str(&ctx[cursor..cursor + found]);
        output.push_str(&build_context(tree, child));
        cursor += found + marker.len();
    }
    output.push_str(&ctx[cursor..]);

    output.trim().to_string()
}

/// Output path for a template: its file name minus the extension part
pub fn target_path(path: &Path, extension: &str) -> Result<PathBuf, RenderError> {
    let not_a_template = || RenderError::NotATemplate {
        path: path.to_path_buf(),
        extension: extension.to_string(),
    };

    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(not_a_template)?;
    let parts: Vec<&str> = name.split('.').collect();
    let kept: Vec<&str> = parts.iter().copied().filter(|part| *part != extension).collect();

    if kept.len() == parts.len() || kept.iter().all(|part| part.is_empty()) {
        return Err(not_a_template());
    }
    Ok(path.with_file_name(kept.join(".")))
}

/// Renders template files
pub struct Renderer {
    options: Options,
    parser: BlockParser,
}

impl Renderer {
    pub fn new(options: Options) -> Self {
        Self {
            parser: BlockParser::new(options.max_nesting_depth),
            options,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Render `path` and write the result next to it; returns the written path
    pub fn render(&mut self, path: &Path, variables: &Variables) -> Result<PathBuf, RenderError> {
        let target = target_path(path, &self.options.extension)?;
        let output = self.render_to_string(path, variables)?;
        fs::write(&target, output).map_err(|e| RenderError::io(&target, e))?;
        info!("{} -> {}", path.display(), target.display());
        Ok(target)
    }

    /// Render `path` without writing anything
    pub fn render_to_string(&mut self, path: &Path, variables: &Variables) -> Result<String, RenderError> {
        let canonical = fs::canonicalize(path).map_err(|e| RenderError::io(path, e))?;
        let mut chain = vec![canonical];
        self.resolve(path, variables, &mut chain)?.assemble()
    }

    /// Load a template and apply its `extends` chain
    pub fn resolve(
        &mut self,
        path: &Path,
        variables: &Variables,
        chain: &mut Vec<PathBuf>,
    ) -> Result<Template, RenderError> {
        let mut child = self.load(path, variables, chain)?;

        let Some(&first) = child.tree.roots().first() else {
            return Ok(child);
        };
        if child.tree[first].node != NodeKind::Extends {
            return Ok(child);
        }

        let Some(extends) = child.tree.detach_root(first) else {
            return Ok(child);
        };
        let parent_path = self.descend(&child.source, &extends, chain)?;

        debug!("{} extends {}", path.display(), parent_path.display());
        let parent = self.resolve(&parent_path, variables, chain);
        chain.pop();
        let mut parent = parent?;

        inherit::splice(&mut parent.tree, &child.tree)
            .map_err(|e| RenderError::template(child.source.path(), e))?;
        Ok(parent)
    }

    /// Parse a template and interpret every block against its own file
    pub fn load(
        &mut self,
        path: &Path,
        variables: &Variables,
        chain: &mut Vec<PathBuf>,
    ) -> Result<Template, RenderError> {
        debug!("loading {}", path.display());
        let (mut tree, _) = self.parser.parse_file(path)?;
        let source = Source::open(path)?;

        for root in tree.roots().to_vec() {
            self.interpret(&mut tree, root, &source, variables, chain)?;
        }

        Ok(Template { tree, source })
    }

    fn interpret(
        &mut self,
        tree: &mut BlockTree,
        id: BlockId,
        source: &Source,
        variables: &Variables,
        chain: &mut Vec<PathBuf>,
    ) -> Result<(), RenderError> {
        let in_file = |e: TemplateError| RenderError::template(source.path(), e);
        let (pos, len) = tree[id].loc.range().map_err(in_file)?;

        let ctx = match tree[id].parent {
            Some(parent) => {
                let range = child_range(&tree[parent].ctx, tree[parent].loc.end_exclusive(), pos, len)
                    .ok_or_else(|| in_file(outside_parent(&tree[id])))?;
                tree[parent].ctx[range].to_string()
            }
            None => source.read_range(pos, len)?,
        };
        tree[id].ctx = ctx;
        trace!("interpret `{}` at {}", tree[id].id, tree[id].loc);

        for child in tree.children(id).to_vec() {
            self.interpret(tree, child, source, variables, chain)?;

            let (child_pos, child_len) = tree[child].loc.range().map_err(in_file)?;
            let range = child_range(&tree[id].ctx, tree[id].loc.end_exclusive(), child_pos, child_len)
                .ok_or_else(|| in_file(outside_parent(&tree[child])))?;
            let marker = placeholder(&tree[child].id);
            tree[id].ctx.replace_range(range, &marker);
        }

        normalize::normalize(&mut tree[id], variables).map_err(in_file)?;

        if tree[id].node == NodeKind::Include {
            let include = tree[id].clone();
            tree[id].ctx = self.include(source, &include, variables, chain)?;
        }
        Ok(())
    }

    /// Render an included template with the same variables
    fn include(
        &mut self,
        from: &Source,
        block: &Block,
        variables: &Variables,
        chain: &mut Vec<PathBuf>,
    ) -> Result<String, RenderError> {
        let path = self.descend(from, block, chain)?;
        debug!("{} includes {}", from.path().display(), path.display());
        let rendered = self.resolve(&path, variables, chain).and_then(|template| template.assemble());
        chain.pop();
        rendered
    }

    /// Resolve the quoted path of an `extends`/`include` directive and push it
    /// onto the chain. The caller pops it once the target is done.
    fn descend(
        &self,
        from: &Source,
        block: &Block,
        chain: &mut Vec<PathBuf>,
    ) -> Result<PathBuf, RenderError> {
        let in_file = |e: TemplateError| RenderError::template(from.path(), e);
        let tag_len = block.loc.end_exclusive() - block.loc.start;

        let literal = quoted_literal(&block.exp).ok_or_else(|| {
            in_file(
                TemplateError::new(
                    ErrorKind::MissingKeyword,
                    format!("`{}` needs a quoted template path", block.name),
                    block.loc.start,
                )
                .with_len(tag_len)
                .with_help(format!("Write it as `{{@ {} \"base.html.srs\" @}}`", block.name.to_ascii_lowercase())),
            )
        })?;

        let path = from.dir().join(&literal);
        let canonical = fs::canonicalize(&path).map_err(|e| RenderError::io(&path, e))?;

        if chain.contains(&canonical) {
            return Err(in_file(
                TemplateError::new(
                    ErrorKind::InheritanceCycle,
                    format!("`{}` is already being rendered further up the chain", literal),
                    block.loc.start,
                )
                .with_len(tag_len)
                .with_help(format!("Chain: {}", describe_chain(chain, &canonical))),
            ));
        }
        if chain.len() > self.options.max_inheritance_depth {
            return Err(in_file(
                TemplateError::new(
                    ErrorKind::InheritanceTooDeep,
                    format!(
                        "Templates are nested more than {} levels deep",
                        self.options.max_inheritance_depth
                    ),
                    block.loc.start,
                )
                .with_len(tag_len),
            ));
        }

        chain.push(canonical);
        Ok(path)
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(Options::default())
    }
}

/// Byte range of a child inside its parent's context.
///
/// Measured from the parent's end: text after the child is still untouched,
/// while earlier siblings have already been shortened to placeholders.
fn child_range(parent_ctx: &str, parent_end: usize, child_pos: usize, child_len: usize) -> Option<Range<usize>> {
    let start = parent_ctx.len().checked_sub(parent_end.checked_sub(child_pos)?)?;
    let range = start..start + child_len;
    parent_ctx.get(range.clone()).map(|_| range)
}

fn outside_parent(block: &Block) -> TemplateError {
    TemplateError::new(
        ErrorKind::NegativeRange,
        format!("Block range {} falls outside its parent", block.loc),
        block.loc.start,
    )
    .with_help("This is an internal error in the block matcher")
}

fn describe_chain(chain: &[PathBuf], repeated: &Path) -> String {
    chain
        .iter()
        .map(|path| path.as_path())
        .chain(std::iter::once(repeated))
        .map(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        })
        .collect::<Vec<_>>()
        .join(" -> ")
}
