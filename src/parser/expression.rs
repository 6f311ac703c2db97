//! Expression normalizer.
//!
//! A second pass over the tokens of a directive head. Quoted runs collapse
//! into single string tokens, numbers become integers or floats, bare words
//! become variables, literals, or the natural-language operators `is` (`=`),
//! `not` (`!`) and `is not` (`!=`). The output is meant for an evaluator; this
//! module never evaluates anything.

use super::lexer::{Token, TokenKind, tokenize};
use crate::error::{ErrorKind, TemplateError};
use serde::Serialize;
use std::fmt;

/// Sigil marking a variable reference
pub const VARIABLE_SIGIL: char = '$';

/// Typed value carried by literal tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Null,
}

/// Normalized expression token
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExprToken {
    pub kind: TokenKind,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Literal>,
    pub offset: usize,
}

impl ExprToken {
    fn new(kind: TokenKind, text: impl Into<String>, offset: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            value: None,
            offset,
        }
    }

    fn literal(kind: TokenKind, text: &str, value: Literal, offset: usize) -> Self {
        Self {
            kind,
            text: text.to_string(),
            value: Some(value),
            offset,
        }
    }

    pub fn is(&self, kind: TokenKind, text: &str) -> bool {
        self.kind == kind && self.text == text
    }
}

impl fmt::Display for ExprToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Open string literal being collected
#[derive(Debug)]
struct Quoted {
    delimiter: char,
    offset: usize,
    text: String,
}

#[derive(Debug, Default)]
struct Normalizer {
    output: Vec<ExprToken>,
    quote: Option<Quoted>,
    escaped: bool,
    /// Set by a synthesized `=`; any non-space token clears it
    pending_equals: bool,
}

impl Normalizer {
    fn run(mut self, tokens: &[Token<'_>]) -> Result<Vec<ExprToken>, TemplateError> {
        for token in tokens {
            if self.quote.is_some() || token.kind == TokenKind::Quote {
                self.scan_quoted(token);
                continue;
            }
            self.classify(token)?;
        }

        if let Some(quoted) = self.quote {
            return Err(TemplateError::new(
                ErrorKind::UnterminatedString,
                format!("String literal opened with {} is never closed", quoted.delimiter),
                quoted.offset,
            )
            .with_help(format!("Add a closing {} after the literal", quoted.delimiter)));
        }

        Ok(self.output)
    }

    /// Quote and escape handling works per character: quote and backslash
    /// characters coalesce into multi-character tokens (`""`, `\\`).
    fn scan_quoted(&mut self, token: &Token<'_>) {
        for (i, ch) in token.text.char_indices() {
            match self.quote.as_mut() {
                None => {
                    self.quote = Some(Quoted {
                        delimiter: ch,
                        offset: token.offset + i,
                        text: ch.to_string(),
                    });
                    self.escaped = false;
                }
                Some(quoted) => {
                    quoted.text.push(ch);
                    if self.escaped {
                        self.escaped = false;
                    } else if ch == '\\' {
                        self.escaped = true;
                    } else if ch == quoted.delimiter {
                        let offset = quoted.offset;
                        let text = std::mem::take(&mut quoted.text);
                        self.quote = None;
                        self.pending_equals = false;
                        self.output.push(ExprToken::new(TokenKind::String, text, offset));
                    }
                }
            }
        }
    }

    fn classify(&mut self, token: &Token<'_>) -> Result<(), TemplateError> {
        match token.kind {
            TokenKind::Number => {
                self.pending_equals = false;
                let number = self.number(token)?;
                self.output.push(number);
            }
            TokenKind::String => self.word(token),
            kind => {
                if kind != TokenKind::Space {
                    self.pending_equals = false;
                }
                self.output.push(ExprToken::new(kind, token.text, token.offset));
            }
        }
        Ok(())
    }

    fn number(&self, token: &Token<'_>) -> Result<ExprToken, TemplateError> {
        let digits = token.text.replace(',', "");
        let invalid = || {
            TemplateError::new(
                ErrorKind::InvalidNumber,
                format!("`{}` is not a valid number", token.text),
                token.offset,
            )
            .with_len(token.len())
        };

        if digits.contains('.') {
            let value: f64 = digits.parse().map_err(|_| invalid())?;
            Ok(ExprToken::literal(TokenKind::Float, token.text, Literal::Float(value), token.offset))
        } else {
            let value: i64 = digits.parse().map_err(|_| invalid())?;
            Ok(ExprToken::literal(TokenKind::Integer, token.text, Literal::Integer(value), token.offset))
        }
    }

    fn word(&mut self, token: &Token<'_>) {
        let lower = token.text.to_lowercase();
        let offset = token.offset;
        let pending = std::mem::replace(&mut self.pending_equals, false);

        let normalized = match lower.as_str() {
            "true" | "false" => {
                ExprToken::literal(TokenKind::Boolean, token.text, Literal::Boolean(lower == "true"), offset)
            }
            "null" => ExprToken::literal(TokenKind::Null, token.text, Literal::Null, offset),
            "is" => {
                self.pending_equals = true;
                ExprToken::new(TokenKind::Operator, "=", offset)
            }
            "not" if pending => {
                // Fold `is not` into one operator; drop the `=` and the spaces after it
                while let Some(previous) = self.output.pop() {
                    if previous.is(TokenKind::Operator, "=") {
                        break;
                    }
                }
                ExprToken::new(TokenKind::Operator, "!=", offset)
            }
            "not" => ExprToken::new(TokenKind::Operator, "!", offset),
            _ => ExprToken::new(TokenKind::Variable, format!("{VARIABLE_SIGIL}{}", token.text), offset),
        };

        self.output.push(normalized);
    }
}

/// Normalize tokens taken from inside a directive head
pub fn normalize(tokens: &[Token<'_>]) -> Result<Vec<ExprToken>, TemplateError> {
    Normalizer::default().run(tokens)
}

/// Lex and normalize an expression in one go
pub fn tokenize_expression(source: &str) -> Result<Vec<ExprToken>, TemplateError> {
    normalize(&tokenize(source))
}

/// Extract the first quoted literal in `source`, without its quotes.
///
/// The first quote character opens the literal and the next occurrence of the
/// same character closes it; everything in between is taken verbatim.
pub fn quoted_literal(source: &str) -> Option<String> {
    let mut delimiter: Option<&str> = None;
    let mut literal = String::new();

    for token in tokenize(source) {
        match delimiter {
            None if token.kind == TokenKind::Quote => {
                // A coalesced `""` is an empty literal
                let (open, rest) = token.text.split_at(1);
                if let Some(close) = rest.find(open) {
                    return Some(rest[..close].to_string());
                }
                literal.push_str(rest);
                delimiter = Some(open);
            }
            None => {}
            Some(open) => match token.text.find(open).filter(|_| token.kind == TokenKind::Quote) {
                Some(close) => {
                    literal.push_str(&token.text[..close]);
                    return Some(literal);
                }
                None => literal.push_str(token.text),
            },
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(source: &str) -> Vec<(TokenKind, String)> {
        tokenize_expression(source)
            .unwrap()
            .into_iter()
            .filter(|t| t.kind != TokenKind::Space)
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn test_is_becomes_equals() {
        assert_eq!(
            pairs("x is 5"),
            vec![
                (TokenKind::Variable, "$x".to_string()),
                (TokenKind::Operator, "=".to_string()),
                (TokenKind::Integer, "5".to_string()),
            ]
        );
    }

    #[test]
    fn test_is_not_collapses() {
        assert_eq!(
            pairs("x is not 5"),
            vec![
                (TokenKind::Variable, "$x".to_string()),
                (TokenKind::Operator, "!=".to_string()),
                (TokenKind::Integer, "5".to_string()),
            ]
        );
    }

    #[test]
    fn test_is_not_keeps_surrounding_spaces() {
        let tokens = tokenize_expression("x is not 5").unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["$x", " ", "!=", " ", "5"]);
    }

    #[test]
    fn test_not_alone_is_negation() {
        assert_eq!(
            pairs("not ready"),
            vec![
                (TokenKind::Operator, "!".to_string()),
                (TokenKind::Variable, "$ready".to_string()),
            ]
        );
    }

    #[test]
    fn test_pending_equals_resets_on_value() {
        // `not` after a value is a plain negation, not part of `is not`
        assert_eq!(
            pairs("x is 5 not y"),
            vec![
                (TokenKind::Variable, "$x".to_string()),
                (TokenKind::Operator, "=".to_string()),
                (TokenKind::Integer, "5".to_string()),
                (TokenKind::Operator, "!".to_string()),
                (TokenKind::Variable, "$y".to_string()),
            ]
        );
    }

    #[test]
    fn test_literals() {
        let tokens = tokenize_expression("TRUE false null 1.5 1,000").unwrap();
        let values: Vec<Literal> = tokens.iter().filter_map(|t| t.value).collect();
        assert_eq!(
            values,
            vec![
                Literal::Boolean(true),
                Literal::Boolean(false),
                Literal::Null,
                Literal::Float(1.5),
                Literal::Integer(1000),
            ]
        );
    }

    #[test]
    fn test_negative_integer() {
        let tokens = tokenize_expression("-42").unwrap();
        assert_eq!(tokens[0].value, Some(Literal::Integer(-42)));
    }

    #[test]
    fn test_quoted_string_is_one_token() {
        assert_eq!(
            pairs(r#"name is "John Doe""#),
            vec![
                (TokenKind::Variable, "$name".to_string()),
                (TokenKind::Operator, "=".to_string()),
                (TokenKind::String, "\"John Doe\"".to_string()),
            ]
        );
    }

    #[test]
    fn test_escaped_quote_stays_inside() {
        assert_eq!(
            pairs(r#"'it\'s'"#),
            vec![(TokenKind::String, r#"'it\'s'"#.to_string())]
        );
    }

    #[test]
    fn test_empty_string_literal() {
        assert_eq!(pairs(r#""""#), vec![(TokenKind::String, "\"\"".to_string())]);
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize_expression("x is \"open").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnterminatedString);
        assert_eq!(err.offset, 5);
    }

    #[test]
    fn test_integer_overflow() {
        let err = tokenize_expression("99999999999999999999").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidNumber);
    }

    #[test]
    fn test_quoted_literal() {
        assert_eq!(quoted_literal(r#" "base.srs" "#), Some("base.srs".to_string()));
        assert_eq!(quoted_literal("'layouts/main.html.srs'"), Some("layouts/main.html.srs".to_string()));
        assert_eq!(quoted_literal(r#""""#), Some(String::new()));
        assert_eq!(quoted_literal("base.srs"), None);
        assert_eq!(quoted_literal("\"never closed"), None);
    }

    #[test]
    fn test_quoted_literal_keeps_other_quotes() {
        assert_eq!(quoted_literal(r#""it's.srs""#), Some("it's.srs".to_string()));
    }
}
