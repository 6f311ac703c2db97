use crate::parser::positions::line_col;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Kind of template error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnbalancedDelimiter,
    MissingBlockName,
    InvalidBlockName,
    MismatchedClose,
    DuplicateBlock,
    NestingTooDeep,
    MissingKeyword,
    MissingVariable,
    UnresolvedInheritanceTarget,
    InheritanceCycle,
    InheritanceTooDeep,
    NegativeRange,
    UnterminatedString,
    InvalidNumber,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnbalancedDelimiter => "Unbalanced delimiter",
            ErrorKind::MissingBlockName => "Missing block name",
            ErrorKind::InvalidBlockName => "Invalid block name",
            ErrorKind::MismatchedClose => "Mismatched close tag",
            ErrorKind::DuplicateBlock => "Duplicate block",
            ErrorKind::NestingTooDeep => "Nesting too deep",
            ErrorKind::MissingKeyword => "Missing keyword",
            ErrorKind::MissingVariable => "Missing variable",
            ErrorKind::UnresolvedInheritanceTarget => "Unresolved inheritance target",
            ErrorKind::InheritanceCycle => "Inheritance cycle",
            ErrorKind::InheritanceTooDeep => "Inheritance too deep",
            ErrorKind::NegativeRange => "Negative range",
            ErrorKind::UnterminatedString => "Unterminated string",
            ErrorKind::InvalidNumber => "Invalid number",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural error in a template, located by byte offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateError {
    pub kind: ErrorKind,
    pub message: String,
    /// Byte offset in the template file
    pub offset: usize,
    /// Number of bytes to underline
    pub len: usize,
    pub related: Option<usize>,
    pub related_label: Option<String>,
    pub help: Option<String>,
}

impl TemplateError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, offset: usize) -> Self {
        Self {
            kind,
            message: message.into(),
            offset,
            len: 1,
            related: None,
            related_label: None,
            help: None,
        }
    }

    /// Underline `len` bytes instead of one
    pub fn with_len(mut self, len: usize) -> Self {
        self.len = len.max(1);
        self
    }

    /// Add a related location (e.g., where a block was opened)
    pub fn with_related(mut self, offset: usize) -> Self {
        self.related = Some(offset);
        self
    }

    pub fn with_related_label(mut self, label: impl Into<String>) -> Self {
        self.related_label = Some(label.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Move an error found in a slice to file offsets
    pub fn shifted(mut self, base: usize) -> Self {
        self.offset += base;
        self.related = self.related.map(|related| related + base);
        self
    }

    /// Render the error with source context
    pub fn render(&self, source: &str, filename: &str) -> String {
        self.render_inner(source, filename, false)
    }

    /// Render the error with ANSI color codes
    pub fn render_color(&self, source: &str, filename: &str) -> String {
        self.render_inner(source, filename, true)
    }

    fn render_inner(&self, source: &str, filename: &str, color: bool) -> String {
        let red = if color { "\x1b[1;31m" } else { "" };
        let dim = if color { "\x1b[2m" } else { "" };
        let cyan = if color { "\x1b[1;38;5;73m" } else { "" };
        let reset = if color { "\x1b[0m" } else { "" };

        let mut output = String::new();
        output.push('\n');

        let (line, col) = line_col(source, self.offset);
        output.push_str(&format!(" {}file:{} {}:{}:{}\n", dim, reset, filename, line + 1, col + 1));
        output.push_str(&format!("{}error:{} {}\n", red, reset, self.message));

        if let Some(snippet) = snippet(source, self.offset, self.len) {
            let width = format!("{}", line + 1).len().max(2);
            output.push_str(&format!("{}{:>width$} |{}\n", dim, "", reset, width = width));
            output.push_str(&format!("{}{:>width$} |{} {}\n", dim, line + 1, reset, snippet.text, width = width));
            output.push_str(&format!(
                "{}{:>width$} |{} {}{}{}{}\n",
                dim, "", reset,
                " ".repeat(snippet.col), red, "^".repeat(snippet.carets), reset,
                width = width
            ));
        }

        if let Some(related) = self.related {
            let (related_line, _) = line_col(source, related);
            if let Some(snippet) = snippet(source, related, 2) {
                let width = format!("{}", related_line + 1).len().max(2);
                let label = self.related_label.as_deref().unwrap_or("opened here");
                output.push_str(&format!("{}{:>width$} |{} {}\n", dim, related_line + 1, reset, snippet.text, width = width));
                output.push_str(&format!(
                    "{}{:>width$} |{} {}{}{} {}{}\n",
                    dim, "", reset,
                    " ".repeat(snippet.col), dim, "^".repeat(snippet.carets), label, reset,
                    width = width
                ));
            }
        }

        if let Some(ref help) = self.help {
            output.push('\n');
            for (i, help_line) in help.lines().enumerate() {
                if i == 0 {
                    output.push_str(&format!(" {}help:{} {}\n", cyan, reset, help_line));
                } else {
                    output.push_str(&format!("       {}\n", help_line));
                }
            }
        }

        output.push('\n');
        output
    }
}

/// Source line around an offset plus where the underline goes
struct Snippet<'a> {
    text: &'a str,
    col: usize,
    carets: usize,
}

fn snippet(source: &str, offset: usize, len: usize) -> Option<Snippet<'_>> {
    let (line, col) = line_col(source, offset);
    let text = source.lines().nth(line)?;
    let remaining = text.chars().count().saturating_sub(col);
    Some(Snippet {
        text,
        col,
        carets: len.min(remaining).max(1),
    })
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at byte {})", self.message, self.offset)
    }
}

impl std::error::Error for TemplateError {}

/// Error while loading, parsing or rendering a template file
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("{}: {error}", path.display())]
    Template { path: PathBuf, error: TemplateError },

    #[error("template not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("{} has no `.{extension}` part to strip for the output name", path.display())]
    NotATemplate { path: PathBuf, extension: String },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RenderError {
    pub fn template(path: &Path, error: TemplateError) -> Self {
        RenderError::Template {
            path: path.to_path_buf(),
            error,
        }
    }

    /// Map an I/O error, turning a missing file into `FileNotFound`
    pub fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            RenderError::FileNotFound(path.to_path_buf())
        } else {
            RenderError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    /// Structural error kind, if this is one
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            RenderError::Template { error, .. } => Some(error.kind),
            _ => None,
        }
    }

    /// Render the error with source context (no color)
    pub fn render(&self) -> String {
        self.render_inner(false)
    }

    /// Render the error with ANSI color codes
    pub fn render_color(&self) -> String {
        self.render_inner(true)
    }

    fn render_inner(&self, color: bool) -> String {
        if let RenderError::Template { path, error } = self {
            // The template may have vanished since; fall back to the plain message
            if let Ok(source) = std::fs::read_to_string(path) {
                let filename = path.display().to_string();
                return if color {
                    error.render_color(&source, &filename)
                } else {
                    error.render(&source, &filename)
                };
            }
        }

        if color {
            format!("\x1b[1;31merror\x1b[0m: \x1b[1m{}\x1b[0m\n", self)
        } else {
            format!("error: {}\n", self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_offset() {
        let err = TemplateError::new(ErrorKind::MissingVariable, "Variable `name` is not bound", 6);
        assert_eq!(err.to_string(), "Variable `name` is not bound (at byte 6)");
    }

    #[test]
    fn test_render_points_at_offset() {
        let source = "first line\nHello {{ name }}!\n";
        let err = TemplateError::new(ErrorKind::MissingVariable, "Variable `name` is not bound", 17)
            .with_len(10)
            .with_help("Pass it with --var name=VALUE");
        let rendered = err.render(source, "hello.txt.srs");
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(lines[1], " file: hello.txt.srs:2:7");
        assert_eq!(lines[2], "error: Variable `name` is not bound");
        assert_eq!(lines[4], " 2 | Hello {{ name }}!");
        assert_eq!(lines[5], "   |       ^^^^^^^^^^");
        assert!(rendered.contains(" help: Pass it with --var name=VALUE"));
    }

    #[test]
    fn test_render_related() {
        let source = "{@ section @}\nbody\n";
        let err = TemplateError::new(ErrorKind::UnbalancedDelimiter, "Block `section` is never closed", 18)
            .with_related(0);
        let rendered = err.render(source, "page.srs");
        assert!(rendered.contains(" 1 | {@ section @}"));
        assert!(rendered.contains("^^ opened here"));
    }

    #[test]
    fn test_render_error_kind() {
        let err = RenderError::template(
            Path::new("a.srs"),
            TemplateError::new(ErrorKind::DuplicateBlock, "dup", 0),
        );
        assert_eq!(err.kind(), Some(ErrorKind::DuplicateBlock));
        assert_eq!(RenderError::FileNotFound(PathBuf::from("a.srs")).kind(), None);
    }

    #[test]
    fn test_missing_file_maps_to_not_found() {
        let err = RenderError::io(Path::new("nope.srs"), io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, RenderError::FileNotFound(_)));
    }
}
