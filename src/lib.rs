//! Siris: a file-based template engine.
//!
//! Templates mark regions with `{@ ... @}` directive tags and `{{ ... }}`
//! prints. Rendering lexes the file, matches its blocks into a tree, resolves
//! `extends` inheritance, normalizes every block and writes the reassembled
//! text next to the template with the `.srs` part dropped from its name.
//!
//! ```no_run
//! use siris::{Variables, render};
//! use std::path::Path;
//!
//! let mut vars = Variables::new();
//! vars.insert("name".into(), "World".into());
//! let written = render(Path::new("hello.txt.srs"), &vars)?;
//! assert_eq!(written, Path::new("hello.txt"));
//! # Ok::<(), siris::RenderError>(())
//! ```

pub mod block;
pub mod error;
pub mod parser;
pub mod render;

pub use block::{Block, BlockId, BlockMap, BlockTree, Loc, NodeKind};
pub use error::{ErrorKind, RenderError, TemplateError};
pub use parser::{BlockParser, Parser};
pub use render::{Renderer, Template, Variables, target_path};

use std::path::{Path, PathBuf};

/// Rendering configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// File name part marking a template (default: "srs")
    pub extension: String,
    /// How many `extends`/`include` levels may stack up (default: 16)
    pub max_inheritance_depth: usize,
    /// How many body blocks may be open at once (default: 64)
    pub max_nesting_depth: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            extension: "srs".to_string(),
            max_inheritance_depth: 16,
            max_nesting_depth: 64,
        }
    }
}

/// Render a template with default options and write the output file
pub fn render(path: &Path, variables: &Variables) -> Result<PathBuf, RenderError> {
    render_with(path, variables, Options::default())
}

pub fn render_with(path: &Path, variables: &Variables, options: Options) -> Result<PathBuf, RenderError> {
    Renderer::new(options).render(path, variables)
}

/// Render a template to a string with default options
pub fn render_to_string(path: &Path, variables: &Variables) -> Result<String, RenderError> {
    Renderer::default().render_to_string(path, variables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_options() {
        let options = Options::default();
        assert_eq!(options.extension, "srs");
        assert_eq!(options.max_inheritance_depth, 16);
        assert_eq!(options.max_nesting_depth, 64);
    }

    #[test]
    fn test_render_writes_target() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("hello.txt.srs");
        fs::write(&template, "Hello {{ name }}!").unwrap();

        let mut vars = Variables::new();
        vars.insert("name".to_string(), "World".into());

        let written = render(&template, &vars).unwrap();
        assert_eq!(written, dir.path().join("hello.txt"));
        assert_eq!(fs::read_to_string(written).unwrap(), "Hello World!");
    }

    #[test]
    fn test_custom_extension() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("page.tpl");
        fs::write(&template, "plain").unwrap();

        let options = Options {
            extension: "tpl".to_string(),
            ..Options::default()
        };
        let written = render_with(&template, &Variables::new(), options).unwrap();
        assert_eq!(written, dir.path().join("page"));
    }
}
