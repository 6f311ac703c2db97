//! Per-kind block normalization.
//!
//! Runs once a block's context has been extracted and its children punctured
//! into placeholders. Splits the context into the head expression (`exp`) and
//! the text that remains in the output (`ctx`).

use super::Variables;
use crate::block::{Block, CONTAINS_KEYWORD, NodeKind, THEN_KEYWORD, is_reserved};
use crate::error::{ErrorKind, TemplateError};
use crate::parser::expression::{VARIABLE_SIGIL, tokenize_expression};
use crate::parser::lexer::{QuoteScan, TokenKind, tokenize};
use crate::parser::{is_head_end, is_tag_marker};
use serde_json::Value;

/// A directive context cut at its delimiters
#[derive(Debug, PartialEq)]
struct TagParts<'a> {
    /// Text between the name and the closing `@}`
    head: &'a str,
    head_offset: usize,
    /// Length of the opening tag through its `}`
    tag_len: usize,
    /// Text between the opening tag and the close tag
    body: &'a str,
}

fn split_tag<'a>(ctx: &'a str, name: &str, with_body: bool) -> Option<TagParts<'a>> {
    let tokens = tokenize(ctx);
    if !(tokens.first()?.is(TokenKind::Bracket, "{") && is_tag_marker(tokens.get(1)?)) {
        return None;
    }

    let name_token = tokens[2..].iter().find(|token| !token.is_whitespace())?;
    let head_offset = name_token.offset + name.len();

    let mut quotes = QuoteScan::default();
    let closer = tokens.windows(2).position(|pair| {
        pair[0].offset >= head_offset
            && !quotes.quoted(&pair[0])
            && is_head_end(&pair[0])
            && pair[1].kind == TokenKind::Bracket
            && pair[1].text.starts_with('}')
    })?;
    let head_end = tokens[closer].end() - 1;
    let tag_len = tokens[closer + 1].offset + 1;

    let body_end = if with_body {
        let close_tag = tokens
            .windows(2)
            .rposition(|pair| pair[0].is(TokenKind::Bracket, "{") && is_tag_marker(&pair[1]))?;
        tokens[close_tag].offset
    } else {
        tag_len
    };
    if body_end < tag_len {
        return None;
    }

    Some(TagParts {
        head: &ctx[head_offset..head_end],
        head_offset,
        tag_len,
        body: &ctx[tag_len..body_end],
    })
}

/// Head text before `keyword`, skipping anything quoted
fn before_keyword<'a>(head: &'a str, keyword: &str) -> Result<Option<&'a str>, TemplateError> {
    let tokens = tokenize_expression(head)?;
    Ok(tokens
        .iter()
        .find(|token| {
            token.kind == TokenKind::Variable
                && token
                    .text
                    .strip_prefix(VARIABLE_SIGIL)
                    .is_some_and(|word| word.eq_ignore_ascii_case(keyword))
        })
        .map(|token| &head[..token.offset]))
}

/// Text printed for a variable value
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn broken_tag(block: &Block) -> TemplateError {
    TemplateError::new(
        ErrorKind::UnbalancedDelimiter,
        format!("Tag of `{}` could not be split into head and body", block.name),
        block.loc.start,
    )
    .with_len(2)
}

/// Fill in `exp` and `ctx` according to the block kind
pub fn normalize(block: &mut Block, variables: &Variables) -> Result<(), TemplateError> {
    match block.node {
        NodeKind::Print => normalize_print(block, variables),
        NodeKind::If | NodeKind::ForLoop => normalize_body(block, Some(THEN_KEYWORD)),
        NodeKind::Component => normalize_body(block, Some(CONTAINS_KEYWORD)),
        NodeKind::Block if !is_reserved(&block.name) => normalize_body(block, None),
        _ => normalize_directive(block),
    }
}

fn normalize_print(block: &mut Block, variables: &Variables) -> Result<(), TemplateError> {
    let exp = block
        .ctx
        .get(2..block.ctx.len().saturating_sub(2))
        .unwrap_or_default()
        .to_string();
    let name = exp.trim();

    let Some(value) = variables.get(name) else {
        let message = if name.is_empty() {
            "Print block names no variable".to_string()
        } else {
            format!("Variable `{name}` is not bound")
        };
        return Err(TemplateError::new(ErrorKind::MissingVariable, message, block.loc.start)
            .with_len(block.ctx.len())
            .with_help(format!("Pass a value, e.g. `--var {}=...`", if name.is_empty() { "name" } else { name })));
    };

    log::trace!("print `{}`", name);
    block.ctx = display_value(value);
    block.exp = exp;
    Ok(())
}

fn normalize_body(block: &mut Block, keyword: Option<&str>) -> Result<(), TemplateError> {
    let parts = split_tag(&block.ctx, &block.name, true).ok_or_else(|| broken_tag(block))?;

    let exp = match keyword {
        Some(keyword) => before_keyword(parts.head, keyword)
            .map_err(|e| e.shifted(block.loc.start + parts.head_offset))?
            .ok_or_else(|| {
                TemplateError::new(
                    ErrorKind::MissingKeyword,
                    format!("`{}` needs `{}` at the end of its head", block.name, keyword),
                    block.loc.start,
                )
                .with_len(parts.tag_len)
                .with_help(format!("Write it as `{{@ {} ... {} @}}`", block.name.to_ascii_lowercase(), keyword))
            })?,
        None => parts.head,
    };

    let exp = exp.trim().to_string();
    let body = parts.body.to_string();
    block.exp = exp;
    block.ctx = body;
    Ok(())
}

fn normalize_directive(block: &mut Block) -> Result<(), TemplateError> {
    let parts = split_tag(&block.ctx, &block.name, false).ok_or_else(|| broken_tag(block))?;
    block.exp = parts.head.trim().to_string();
    block.ctx.clear();
    Ok(())
}
