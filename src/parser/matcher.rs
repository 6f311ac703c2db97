//! Block structure matcher.
//!
//! Consumes lexer tokens (already shifted to absolute file offsets) one at a
//! time and builds the block tree. Tags are recognized from token pairs:
//! `{` `@` opens a directive tag, `@` `}` ends it, `{{` and `}}` delimit a
//! print. Body-bearing blocks stay open on a frame stack until their
//! `{@ / @}` close tag arrives; anything opened meanwhile becomes their child.

use super::lexer::{QuoteScan, Token, TokenKind};
use crate::block::{
    Block, BlockId, BlockTree, Loc, NodeKind, PRINT_KEYWORD, is_reserved, opens_body, synthesize_id,
};
use crate::error::{ErrorKind, TemplateError};

/// A directive tag between `{@` and `@}`
#[derive(Debug)]
struct Tag {
    /// Offset of the `{`
    open: usize,
    /// Empty for an anonymous close tag
    name: String,
    name_offset: usize,
    closing: bool,
    /// A `@}` inside a quoted literal does not end the tag
    quotes: QuoteScan,
}

impl Tag {
    fn name_end(&self) -> usize {
        self.name_offset + self.name.len()
    }

    /// Can `token` continue the name? (`main_content`, `col-2`)
    fn extends_name(&self, token: &Token<'_>) -> bool {
        self.name != "?"
            && token.offset == self.name_end()
            && (matches!(token.kind, TokenKind::String | TokenKind::Number)
                || (token.kind == TokenKind::Special && token.text.chars().all(|c| c == '_')))
    }
}

#[derive(Debug)]
enum Lookup {
    Text,
    /// Saw `{`; a directly following `@` makes it a tag
    AwaitingTagMarker { open: usize },
    AwaitingBlockName { open: usize, closing: bool },
    InName(Tag),
    InHead(Tag),
    /// Saw `@`; a directly following `}` ends the tag
    AwaitingHeadEnd(Tag),
    InPrint { open: usize },
}

/// A body-bearing block waiting for its close tag
#[derive(Debug)]
struct Frame {
    block: BlockId,
    name: String,
    open: usize,
}

pub(crate) fn is_tag_marker(token: &Token<'_>) -> bool {
    token.is(TokenKind::Special, "@")
}

pub(crate) fn is_head_end(token: &Token<'_>) -> bool {
    token.kind == TokenKind::Special && token.text.ends_with('@')
}

#[derive(Debug)]
pub(crate) struct BlockMatcher {
    state: Lookup,
    frames: Vec<Frame>,
    tree: BlockTree,
    max_depth: usize,
}

impl BlockMatcher {
    pub fn new(max_depth: usize) -> Self {
        Self {
            state: Lookup::Text,
            frames: Vec::new(),
            tree: BlockTree::new(),
            max_depth,
        }
    }

    pub fn reset(&mut self) {
        self.state = Lookup::Text;
        self.frames.clear();
        self.tree = BlockTree::new();
    }

    pub fn feed(&mut self, token: &Token<'_>) -> Result<(), TemplateError> {
        let state = std::mem::replace(&mut self.state, Lookup::Text);
        self.state = match state {
            Lookup::Text => Self::scan_text(token),
            Lookup::AwaitingTagMarker { open } => {
                if token.offset == open + 1 && is_tag_marker(token) {
                    Lookup::AwaitingBlockName { open, closing: false }
                } else {
                    Self::scan_text(token)
                }
            }
            Lookup::AwaitingBlockName { open, closing } => Self::block_name(open, closing, token)?,
            Lookup::InName(mut tag) => {
                if tag.extends_name(token) {
                    tag.name.push_str(token.text);
                    Lookup::InName(tag)
                } else {
                    Self::head(tag, token)
                }
            }
            Lookup::InHead(tag) => Self::head(tag, token),
            Lookup::AwaitingHeadEnd(tag) => {
                if token.kind == TokenKind::Bracket && token.text.starts_with('}') {
                    self.end_tag(tag, token.offset)?;
                    Lookup::Text
                } else {
                    Self::head(tag, token)
                }
            }
            Lookup::InPrint { open } => {
                if token.is(TokenKind::Bracket, "}}") {
                    self.end_print(open, token.offset + 1)?;
                    Lookup::Text
                } else {
                    Lookup::InPrint { open }
                }
            }
        };
        Ok(())
    }

    /// End of input at byte `eof`; hands over the finished tree
    pub fn finish(&mut self, eof: usize) -> Result<BlockTree, TemplateError> {
        match std::mem::replace(&mut self.state, Lookup::Text) {
            Lookup::Text | Lookup::AwaitingTagMarker { .. } => {}
            Lookup::InPrint { open } => {
                return Err(TemplateError::new(
                    ErrorKind::UnbalancedDelimiter,
                    "Print block is never closed",
                    open,
                )
                .with_len(2)
                .with_help("End the print with `}}`"));
            }
            Lookup::AwaitingBlockName { open, .. } => return Err(unclosed_tag(open)),
            Lookup::InName(tag) | Lookup::InHead(tag) | Lookup::AwaitingHeadEnd(tag) => {
                return Err(match tag.quotes.open_at() {
                    Some(quote) => TemplateError::new(
                        ErrorKind::UnterminatedString,
                        "String in directive tag is never closed",
                        quote,
                    )
                    .with_related(tag.open)
                    .with_help("A `@}` inside quotes does not end the tag"),
                    None => unclosed_tag(tag.open),
                });
            }
        }

        if let Some(frame) = self.frames.last() {
            return Err(TemplateError::new(
                ErrorKind::UnbalancedDelimiter,
                format!("Block `{}` is never closed", frame.name),
                eof,
            )
            .with_related(frame.open)
            .with_help(format!("Close it with `{{@ / {} @}}`", frame.name)));
        }

        let tree = std::mem::take(&mut self.tree);
        self.reset();
        Ok(tree)
    }

    fn scan_text(token: &Token<'_>) -> Lookup {
        if token.is(TokenKind::Bracket, "{{") {
            Lookup::InPrint { open: token.offset }
        } else if token.is(TokenKind::Bracket, "{") {
            Lookup::AwaitingTagMarker { open: token.offset }
        } else {
            Lookup::Text
        }
    }

    fn block_name(open: usize, closing: bool, token: &Token<'_>) -> Result<Lookup, TemplateError> {
        if token.is_whitespace() {
            return Ok(Lookup::AwaitingBlockName { open, closing });
        }
        if !closing && token.is(TokenKind::Operator, "/") {
            return Ok(Lookup::AwaitingBlockName { open, closing: true });
        }

        let tag = |name: &str| Tag {
            open,
            name: name.to_string(),
            name_offset: token.offset,
            closing,
            quotes: QuoteScan::default(),
        };

        if closing && is_head_end(token) {
            Ok(Lookup::AwaitingHeadEnd(tag("")))
        } else if token.kind == TokenKind::String || token.is(TokenKind::Special, "?") {
            Ok(Lookup::InName(tag(token.text)))
        } else {
            Err(TemplateError::new(
                ErrorKind::MissingBlockName,
                "Directive tag has no keyword or block name",
                open,
            )
            .with_len(2)
            .with_help("Start the tag with a keyword or a name, e.g. `{@ if ready then @}`\nClose a block with `{@ / @}`"))
        }
    }

    fn head(mut tag: Tag, token: &Token<'_>) -> Lookup {
        if !tag.quotes.quoted(token) && is_head_end(token) {
            Lookup::AwaitingHeadEnd(tag)
        } else {
            Lookup::InHead(tag)
        }
    }

    fn parent(&self) -> Option<BlockId> {
        self.frames.last().map(|frame| frame.block)
    }

    /// A complete tag ending with the `}` at `end`
    fn end_tag(&mut self, tag: Tag, end: usize) -> Result<(), TemplateError> {
        if tag.closing {
            return self.close_frame(tag, end);
        }

        check_name(&tag)?;
        let block = tag_block(&tag, end);
        if opens_body(&tag.name) {
            if self.frames.len() >= self.max_depth {
                return Err(TemplateError::new(
                    ErrorKind::NestingTooDeep,
                    format!("Blocks are nested more than {} levels deep", self.max_depth),
                    tag.open,
                )
                .with_len(end + 1 - tag.open)
                .with_help("Raise the nesting limit or flatten the template"));
            }
            let id = self.tree.insert(self.parent(), block)?;
            log::trace!("open `{}` at {}", tag.name, tag.open);
            self.frames.push(Frame {
                block: id,
                name: tag.name,
                open: tag.open,
            });
        } else {
            self.tree.insert(self.parent(), block)?;
        }
        Ok(())
    }

    fn close_frame(&mut self, tag: Tag, end: usize) -> Result<(), TemplateError> {
        let Some(frame) = self.frames.pop() else {
            return Err(TemplateError::new(
                ErrorKind::UnbalancedDelimiter,
                "Close tag has no open block",
                tag.open,
            )
            .with_len(end + 1 - tag.open)
            .with_help("Remove it, or open the block it should close"));
        };

        if !tag.name.is_empty() && !tag.name.eq_ignore_ascii_case(&frame.name) {
            return Err(TemplateError::new(
                ErrorKind::MismatchedClose,
                format!("Close tag names `{}` but the open block is `{}`", tag.name, frame.name),
                tag.name_offset,
            )
            .with_len(tag.name.len())
            .with_related(frame.open)
            .with_related_label(format!("`{}` opened here", frame.name))
            .with_help(format!("Close `{}` first", frame.name)));
        }

        log::trace!("close `{}` at {}", frame.name, end);
        self.tree[frame.block].loc.end = end;
        Ok(())
    }

    fn end_print(&mut self, open: usize, end: usize) -> Result<(), TemplateError> {
        let block = Block::new(
            synthesize_id(PRINT_KEYWORD, open, 2),
            "",
            NodeKind::Print,
            Loc::new(open, end),
        );
        self.tree.insert(self.parent(), block)?;
        Ok(())
    }
}

fn tag_block(tag: &Tag, end: usize) -> Block {
    let node = NodeKind::from_keyword(&tag.name);
    let id = if node == NodeKind::Block && !is_reserved(&tag.name) {
        tag.name.clone()
    } else {
        synthesize_id(&tag.name, tag.name_offset, tag.name.len())
    };
    Block::new(id, tag.name.clone(), node, Loc::new(tag.open, end))
}

/// Literal names become block map paths, where `.` separates levels, and
/// `print` is the kind of `{{ }}` blocks.
fn check_name(tag: &Tag) -> Result<(), TemplateError> {
    let problem = if tag.name.eq_ignore_ascii_case(PRINT_KEYWORD) {
        "is reserved for `{{ }}` prints"
    } else if NodeKind::from_keyword(&tag.name) == NodeKind::Block && tag.name.contains('.') {
        "contains `.`, which separates levels in block paths"
    } else {
        return Ok(());
    };
    Err(TemplateError::new(
        ErrorKind::InvalidBlockName,
        format!("Block name `{}` {}", tag.name, problem),
        tag.name_offset,
    )
    .with_len(tag.name.len())
    .with_help("Rename the block, e.g. `nav_main`"))
}

fn unclosed_tag(open: usize) -> TemplateError {
    TemplateError::new(ErrorKind::UnbalancedDelimiter, "Directive tag is never closed", open)
        .with_len(2)
        .with_help("End the tag with `@}`")
}
