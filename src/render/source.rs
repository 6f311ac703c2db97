//! Random-access handle on a template file.

use crate::error::RenderError;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// An open template file that block ranges are read from
#[derive(Debug)]
pub struct Source {
    path: PathBuf,
    file: File,
    len: usize,
}

impl Source {
    pub fn open(path: &Path) -> Result<Self, RenderError> {
        let file = File::open(path).map_err(|e| RenderError::io(path, e))?;
        let len = file.metadata().map_err(|e| RenderError::io(path, e))?.len() as usize;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory the template lives in; relative paths resolve against it
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read `len` bytes starting at byte `pos`.
    ///
    /// Block boundaries always fall on ASCII delimiters, so a valid range never
    /// splits a character. Parsing has already rejected invalid UTF-8; bytes
    /// that changed on disk since then are replaced rather than rejected.
    pub fn read_range(&self, pos: usize, len: usize) -> Result<String, RenderError> {
        if len == 0 {
            return Ok(String::new());
        }

        let mut buf = vec![0; len];
        let mut file = &self.file;
        file.seek(SeekFrom::Start(pos as u64))
            .and_then(|_| file.read_exact(&mut buf))
            .map_err(|e| RenderError::io(&self.path, e))?;

        Ok(match String::from_utf8(buf) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }

    /// Everything from byte `pos` to the end of the file
    pub fn read_from(&self, pos: usize) -> Result<String, RenderError> {
        self.read_range(pos, self.len.saturating_sub(pos))
    }
}
