//! Character-level lexer.
//!
//! Turns raw text into a flat run of classified tokens. Every token borrows its
//! text from the input, so concatenating the token texts gives back the input
//! byte for byte. Offsets are byte offsets into the lexed slice.

use serde::Serialize;
use std::fmt;

/// Token classification.
///
/// The last five kinds are never produced by the lexer itself; they are
/// assigned by the expression normalizer when it refines directive heads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TokenKind {
    String,
    Number,
    Space,
    Colon,
    Parenthesis,
    Bracket,
    Operator,
    Quote,
    Newline,
    Comma,
    Dot,
    Special,

    // === Expression normalizer only ===
    Variable,
    Integer,
    Float,
    Boolean,
    Null,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::String => "STR",
            TokenKind::Number => "NUM",
            TokenKind::Space => "SPACE",
            TokenKind::Colon => "COLON",
            TokenKind::Parenthesis => "PARENTHESIS",
            TokenKind::Bracket => "BRACKET",
            TokenKind::Operator => "OP",
            TokenKind::Quote => "QUOTE",
            TokenKind::Newline => "NL",
            TokenKind::Comma => "COMMA",
            TokenKind::Dot => "DOT",
            TokenKind::Special => "SPECIAL",
            TokenKind::Variable => "VAR",
            TokenKind::Integer => "INT",
            TokenKind::Float => "FLOAT",
            TokenKind::Boolean => "BOOL",
            TokenKind::Null => "NULL",
        }
    }

    /// Words and numbers: the kinds a dot, comma or sign can glue onto.
    fn is_word(self) -> bool {
        matches!(self, TokenKind::Number | TokenKind::String)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A lexed token borrowing its text from the source slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// Byte offset of the first character
    pub offset: usize,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind, text: &'a str, offset: usize) -> Self {
        Self { kind, text, offset }
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Byte offset one past the last character
    pub fn end(&self) -> usize {
        self.offset + self.text.len()
    }

    /// Check kind and exact text at once
    pub fn is(&self, kind: TokenKind, text: &str) -> bool {
        self.kind == kind && self.text == text
    }

    pub fn is_whitespace(&self) -> bool {
        matches!(self.kind, TokenKind::Space | TokenKind::Newline)
    }

    /// Same token moved by `base` bytes (used when lexing line by line)
    pub fn shifted(self, base: usize) -> Self {
        Self { offset: self.offset + base, ..self }
    }
}

/// Direct symbol-table lookup
fn symbol_kind(c: char) -> Option<TokenKind> {
    let kind = match c {
        ' ' | '\t' | '\r' => TokenKind::Space,
        ':' | ';' => TokenKind::Colon,
        '(' | ')' => TokenKind::Parenthesis,
        '[' | '{' | ']' | '}' => TokenKind::Bracket,
        '+' | '-' | '*' | '/' | '|' | '&' | '%' | '<' | '>' | '=' | '!' | '~' | '^' => {
            TokenKind::Operator
        }
        '"' | '\'' | '`' => TokenKind::Quote,
        '\n' => TokenKind::Newline,
        ',' => TokenKind::Comma,
        '.' => TokenKind::Dot,
        '?' | '$' | '@' | '#' | '_' | '\\' => TokenKind::Special,
        _ => return None,
    };
    Some(kind)
}

/// Classification of a single character with no surrounding context
fn base_kind(c: char) -> TokenKind {
    symbol_kind(c).unwrap_or(if c.is_ascii_digit() {
        TokenKind::Number
    } else {
        TokenKind::String
    })
}

/// Optional sign, digits, at most one decimal point.
fn is_numeric(text: &str) -> bool {
    let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
    let mut seen_digit = false;
    let mut dots = 0;
    for c in digits.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' => dots += 1,
            _ => return false,
        }
    }
    seen_digit && dots <= 1
}

/// Lexer over a single slice
pub struct Lexer<'a> {
    source: &'a str,
    chars: Vec<(usize, char)>,
    tokens: Vec<Token<'a>>,
    /// Kind of the token being accumulated
    state: Option<TokenKind>,
    /// Byte offset where the running token starts
    start: usize,
    /// Last character appended to the running token
    last: Option<char>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().collect(),
            tokens: Vec::new(),
            state: None,
            start: 0,
            last: None,
        }
    }

    /// Lex the whole slice
    pub fn tokenize(mut self) -> Vec<Token<'a>> {
        for i in 0..self.chars.len() {
            let (pos, c) = self.chars[i];
            let kind = self.resolve(i, c);
            self.push(kind, c, pos);
        }
        self.flush(self.source.len());
        self.tokens
    }

    fn peek(&self, i: usize, ahead: usize) -> Option<char> {
        self.chars.get(i + ahead).map(|&(_, c)| c)
    }

    /// Resolve the kind of the character at `i`, applying the dot, comma and
    /// sign rules on top of the symbol table.
    fn resolve(&mut self, i: usize, c: char) -> TokenKind {
        match base_kind(c) {
            TokenKind::Dot if !self.is_real_dot(self.peek(i, 1)) => {
                self.state.unwrap_or(TokenKind::Dot)
            }
            TokenKind::Comma
                if !self.is_real_comma(self.peek(i, 1), self.peek(i, 2), self.peek(i, 3)) =>
            {
                TokenKind::Number
            }
            TokenKind::Operator if matches!(c, '+' | '-') && Self::is_sign(self.peek(i, 1)) => {
                TokenKind::Number
            }
            TokenKind::Number if self.state == Some(TokenKind::String) => TokenKind::String,
            TokenKind::String if self.state == Some(TokenKind::Number) => {
                // `1abc` is a word, not a number followed by a word
                self.state = Some(TokenKind::String);
                TokenKind::String
            }
            kind => kind,
        }
    }

    /// A dot between two words/numbers belongs to them (`1.5`, `base.srs`)
    fn is_real_dot(&self, next: Option<char>) -> bool {
        let Some(next) = next else { return true };
        let running_word = self.state.is_some_and(TokenKind::is_word);
        !running_word || !base_kind(next).is_word()
    }

    /// A comma followed by a three-digit group inside a number is a
    /// thousands separator (`1,000`)
    fn is_real_comma(&self, c1: Option<char>, c2: Option<char>, c3: Option<char>) -> bool {
        let (Some(c1), Some(c2), Some(c3)) = (c1, c2, c3) else {
            return true;
        };
        let all_digits = [c1, c2, c3]
            .iter()
            .all(|&c| base_kind(c) == TokenKind::Number);
        self.state != Some(TokenKind::Number) || !all_digits
    }

    /// `+`/`-` directly in front of a word or number signs it
    fn is_sign(next: Option<char>) -> bool {
        next.is_some_and(|c| base_kind(c).is_word())
    }

    fn push(&mut self, kind: TokenKind, c: char, pos: usize) {
        match self.state {
            Some(state) if state == kind && self.continues(kind, c, pos) => {}
            Some(_) => {
                self.flush(pos);
                self.start = pos;
            }
            None => self.start = pos,
        }
        self.state = Some(kind);
        self.last = Some(c);
    }

    /// Brackets only pair up with the same character (`{{`, `}}`), so
    /// `@}{@` still yields separate `}` and `{` tokens. Specials only run
    /// with the same character, so `{@?` keeps `@` and `?` apart.
    fn continues(&self, kind: TokenKind, c: char, pos: usize) -> bool {
        match kind {
            TokenKind::Bracket => self.last == Some(c) && pos - self.start == c.len_utf8(),
            TokenKind::Special => self.last == Some(c),
            _ => true,
        }
    }

    fn flush(&mut self, end: usize) {
        let Some(state) = self.state.take() else { return };
        let text = &self.source[self.start..end];
        let kind = if state == TokenKind::Number && !is_numeric(&text.replace(',', "")) {
            TokenKind::String
        } else {
            state
        };
        self.tokens.push(Token::new(kind, text, self.start));
    }
}

/// Lex `source` into tokens
pub fn tokenize(source: &str) -> Vec<Token<'_>> {
    Lexer::new(source).tokenize()
}

/// Follows quoted literals across a token stream.
///
/// Works per character, since quotes and backslashes coalesce into
/// multi-character tokens. A backslash escapes the next character.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuoteScan {
    /// Delimiter and offset of the open literal
    open: Option<(char, usize)>,
    escaped: bool,
}

impl QuoteScan {
    /// Feed the next token; true when it belongs to a quoted literal
    pub fn quoted(&mut self, token: &Token<'_>) -> bool {
        if self.open.is_none() && token.kind != TokenKind::Quote {
            return false;
        }
        for (i, ch) in token.text.char_indices() {
            match self.open {
                None => {
                    self.open = Some((ch, token.offset + i));
                    self.escaped = false;
                }
                Some((delimiter, _)) => {
                    if self.escaped {
                        self.escaped = false;
                    } else if ch == '\\' {
                        self.escaped = true;
                    } else if ch == delimiter {
                        self.open = None;
                    }
                }
            }
        }
        true
    }

    /// Offset of the quote that opened a still unterminated literal
    pub fn open_at(&self) -> Option<usize> {
        self.open.map(|(_, offset)| offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<(TokenKind, &str)> {
        tokenize(source).iter().map(|t| (t.kind, t.text)).collect()
    }

    #[test]
    fn test_quote_scan() {
        let mut scan = QuoteScan::default();
        let quoted: Vec<(&str, bool)> = tokenize(r#"a "b\" @}" c"#)
            .iter()
            .map(|t| (t.text, scan.quoted(t)))
            .collect();
        assert_eq!(
            quoted,
            vec![
                ("a", false),
                (" ", false),
                ("\"", true),
                ("b", true),
                ("\\", true),
                ("\"", true),
                (" ", true),
                ("@", true),
                ("}", true),
                ("\"", true),
                (" ", false),
                ("c", false),
            ]
        );
        assert_eq!(scan.open_at(), None);

        let mut scan = QuoteScan::default();
        for token in tokenize("x = 'open") {
            scan.quoted(&token);
        }
        assert_eq!(scan.open_at(), Some(4));
    }

    #[test]
    fn test_print_block() {
        assert_eq!(
            kinds("Hello {{ name }}!"),
            vec![
                (TokenKind::String, "Hello"),
                (TokenKind::Space, " "),
                (TokenKind::Bracket, "{{"),
                (TokenKind::Space, " "),
                (TokenKind::String, "name"),
                (TokenKind::Space, " "),
                (TokenKind::Bracket, "}}"),
                (TokenKind::Operator, "!"),
            ]
        );
    }

    #[test]
    fn test_directive_delimiters() {
        assert_eq!(
            kinds("{@ if @}{@"),
            vec![
                (TokenKind::Bracket, "{"),
                (TokenKind::Special, "@"),
                (TokenKind::Space, " "),
                (TokenKind::String, "if"),
                (TokenKind::Space, " "),
                (TokenKind::Special, "@"),
                (TokenKind::Bracket, "}"),
                (TokenKind::Bracket, "{"),
                (TokenKind::Special, "@"),
            ]
        );
    }

    #[test]
    fn test_brackets_pair_at_most_twice() {
        assert_eq!(
            kinds("{{{"),
            vec![(TokenKind::Bracket, "{{"), (TokenKind::Bracket, "{")]
        );
    }

    #[test]
    fn test_specials_run_per_character() {
        assert_eq!(
            kinds("{@?__"),
            vec![
                (TokenKind::Bracket, "{"),
                (TokenKind::Special, "@"),
                (TokenKind::Special, "?"),
                (TokenKind::Special, "__"),
            ]
        );
    }

    #[test]
    fn test_decimal_point() {
        assert_eq!(kinds("1.5"), vec![(TokenKind::Number, "1.5")]);
    }

    #[test]
    fn test_file_name_dot() {
        assert_eq!(kinds("base.srs"), vec![(TokenKind::String, "base.srs")]);
    }

    #[test]
    fn test_sentence_dot() {
        assert_eq!(
            kinds("end.\n"),
            vec![
                (TokenKind::String, "end"),
                (TokenKind::Dot, "."),
                (TokenKind::Newline, "\n"),
            ]
        );
    }

    #[test]
    fn test_thousands_separator() {
        assert_eq!(
            kinds("1,000, 2"),
            vec![
                (TokenKind::Number, "1,000"),
                (TokenKind::Comma, ","),
                (TokenKind::Space, " "),
                (TokenKind::Number, "2"),
            ]
        );
    }

    #[test]
    fn test_signed_number() {
        assert_eq!(
            kinds("x - -5"),
            vec![
                (TokenKind::String, "x"),
                (TokenKind::Space, " "),
                (TokenKind::Operator, "-"),
                (TokenKind::Space, " "),
                (TokenKind::Number, "-5"),
            ]
        );
    }

    #[test]
    fn test_non_numeric_number_becomes_string() {
        // `5-3` coalesces through the sign rule but is not a number
        assert_eq!(kinds("5-3"), vec![(TokenKind::String, "5-3")]);
        assert_eq!(kinds("1abc"), vec![(TokenKind::String, "1abc")]);
        assert_eq!(kinds("abc1"), vec![(TokenKind::String, "abc1")]);
    }

    #[test]
    fn test_multibyte_offsets() {
        let tokens = tokenize("café {{");
        assert_eq!(tokens[0].text, "café");
        assert_eq!(tokens[0].len(), 5);
        assert_eq!(tokens[1].offset, 5);
        assert_eq!(tokens[2].offset, 6);
    }

    #[test]
    fn test_offsets_are_contiguous() {
        let source = "{@ set total = 1,250.50 @}\n\tdone";
        let tokens = tokenize(source);
        let mut expected = 0;
        for token in &tokens {
            assert_eq!(token.offset, expected);
            expected = token.end();
        }
        assert_eq!(expected, source.len());
    }

    #[test]
    fn test_empty_input() {
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn test_shifted() {
        let token = tokenize("@")[0].shifted(10);
        assert_eq!(token.offset, 10);
        assert_eq!(token.end(), 11);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn round_trip(source in "\\PC*") {
                let joined: String = tokenize(&source).iter().map(|t| t.text).collect();
                prop_assert_eq!(joined, source);
            }

            #[test]
            fn offsets_never_decrease(source in "[ a-z0-9{}@.,+\\-\"\n]*") {
                let tokens = tokenize(&source);
                for pair in tokens.windows(2) {
                    prop_assert!(pair[0].end() <= pair[1].offset);
                }
            }
        }
    }
}
