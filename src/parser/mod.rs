pub mod expression;
pub mod lexer;
mod matcher;
pub mod positions;

pub use expression::{ExprToken, Literal, normalize, tokenize_expression};
pub use lexer::{Token, TokenKind, tokenize};

use crate::block::{BlockMap, BlockTree};
use crate::error::{RenderError, TemplateError};
use matcher::BlockMatcher;
pub(crate) use matcher::{is_head_end, is_tag_marker};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Parser trait - turns a template file into its block tree
pub trait Parser {
    fn parse_file(&mut self, path: &Path) -> Result<(BlockTree, BlockMap), RenderError>;
}

/// Block parser: lexes line by line and feeds the structure matcher
pub struct BlockParser {
    matcher: BlockMatcher,
}

impl BlockParser {
    pub fn new(max_nesting_depth: usize) -> Self {
        Self {
            matcher: BlockMatcher::new(max_nesting_depth),
        }
    }

    /// Parse an in-memory template
    pub fn parse_str(&mut self, source: &str) -> Result<(BlockTree, BlockMap), TemplateError> {
        self.matcher.reset();
        let mut offset = 0;
        for line in source.split_inclusive('\n') {
            self.feed_line(line, offset)?;
            offset += line.len();
        }
        self.finish(offset)
    }

    fn feed_line(&mut self, line: &str, base: usize) -> Result<(), TemplateError> {
        for token in tokenize(line) {
            self.matcher.feed(&token.shifted(base))?;
        }
        Ok(())
    }

    fn finish(&mut self, eof: usize) -> Result<(BlockTree, BlockMap), TemplateError> {
        let tree = self.matcher.finish(eof)?;
        let map = tree.block_map();
        log::debug!("matched {} blocks ({} named)", tree.len(), map.len());
        Ok((tree, map))
    }
}

impl Default for BlockParser {
    fn default() -> Self {
        Self::new(crate::Options::default().max_nesting_depth)
    }
}

impl Parser for BlockParser {
    fn parse_file(&mut self, path: &Path) -> Result<(BlockTree, BlockMap), RenderError> {
        let file = File::open(path).map_err(|e| RenderError::io(path, e))?;
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        let mut offset = 0;

        self.matcher.reset();
        loop {
            buf.clear();
            let read = reader.read_until(b'\n', &mut buf).map_err(|e| RenderError::io(path, e))?;
            if read == 0 {
                break;
            }
            // Offsets index the raw file, so the text cannot be repaired lossily
            let line = std::str::from_utf8(&buf).map_err(|e| {
                let message = format!("not valid UTF-8 at byte {}", offset + e.valid_up_to());
                RenderError::io(path, io::Error::new(io::ErrorKind::InvalidData, message))
            })?;
            self.feed_line(line, offset)
                .map_err(|e| RenderError::template(path, e))?;
            offset += read;
        }

        self.finish(offset).map_err(|e| RenderError::template(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::NodeKind;
    use crate::error::ErrorKind;
    use std::io::Write;

    #[test]
    fn test_offsets_span_lines() {
        let source = "line one\n{@ section @}\n  {{ name }}\n{@ / @}\n";
        let (tree, map) = BlockParser::default().parse_str(source).unwrap();
        let section = tree.roots()[0];
        assert_eq!(tree[section].loc.start, 9);
        assert_eq!(&source[tree[section].loc.start..=tree[section].loc.end], "{@ section @}\n  {{ name }}\n{@ / @}");

        let print = tree.children(section)[0];
        assert_eq!(tree[print].node, NodeKind::Print);
        assert_eq!(tree[print].loc.start, 25);
        assert_eq!(map.get("section"), Some("section"));
    }

    #[test]
    fn test_parse_file_matches_parse_str() {
        let source = "{@ a @}x{@ b @}y{@ / @}{@ / @}\n{{ z }}\n";
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(source.as_bytes()).unwrap();

        let mut parser = BlockParser::default();
        let (from_file, file_map) = parser.parse_file(file.path()).unwrap();
        let (from_str, str_map) = parser.parse_str(source).unwrap();

        assert_eq!(from_file.walk().len(), from_str.walk().len());
        for (a, b) in from_file.walk().into_iter().zip(from_str.walk()) {
            assert_eq!(from_file[a], from_str[b]);
        }
        assert_eq!(file_map, str_map);
        assert_eq!(file_map.get("b"), Some("a.b"));
    }

    #[test]
    fn test_missing_file() {
        let err = BlockParser::default()
            .parse_file(Path::new("definitely/not/here.srs"))
            .unwrap_err();
        assert!(matches!(err, RenderError::FileNotFound(_)));
    }

    #[test]
    fn test_error_carries_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{{ open").unwrap();
        let err = BlockParser::default().parse_file(file.path()).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::UnbalancedDelimiter));
    }

    #[test]
    fn test_invalid_utf8_names_the_byte() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"ok\nbad \xff here").unwrap();
        let err = BlockParser::default().parse_file(file.path()).unwrap_err();
        match err {
            RenderError::Io { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::InvalidData);
                assert!(source.to_string().contains("byte 7"), "{source}");
            }
            other => panic!("expected an io error, got {other:?}"),
        }
    }

    #[test]
    fn test_parser_is_reusable() {
        let mut parser = BlockParser::default();
        assert!(parser.parse_str("{@ a @}").is_err());
        let (tree, _) = parser.parse_str("{@ a @}{@ / @}").unwrap();
        assert_eq!(tree.roots().len(), 1);
    }
}
