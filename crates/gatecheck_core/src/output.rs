//! Captured process output.
//!
//! Stdout and stderr of a child are pointed at the same file descriptor, so
//! the child itself is the only writer and the kernel preserves the order of
//! its writes. Readers re-read the file whenever they need the current text.

use crate::error::Result;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Append-only merged stdout/stderr of one process.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    path: PathBuf,
}

impl CapturedOutput {
    /// Creates (or truncates) the capture file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        File::create(&path)?;
        Ok(Self { path })
    }

    /// Wraps an existing capture file.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the capture file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `(stdout, stderr)` handles sharing one append-mode descriptor.
    pub fn stdio(&self) -> Result<(Stdio, Stdio)> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let err = file.try_clone()?;
        Ok((Stdio::from(file), Stdio::from(err)))
    }

    /// Everything captured so far, lossily decoded.
    pub fn text(&self) -> Result<String> {
        let bytes = fs::read(&self.path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Number of bytes captured so far.
    pub fn len(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// True if nothing has been captured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
