//! Run-scoped directories.

use crate::error::{HarnessError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;

/// Well-known subdirectories of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirs {
    /// Run root; default working directory of every process.
    pub run: PathBuf,
    /// Log files written by collaborators.
    pub log: PathBuf,
    /// TLS material.
    pub ssl: PathBuf,
    /// Generated configuration files.
    pub config: PathBuf,
    /// Captured process output.
    pub output: PathBuf,
    /// Directory holding the scenario's fixtures (scripts, golden files).
    pub test: PathBuf,
}

impl RunDirs {
    /// Resolves a `{dir:NAME}` placeholder.
    pub fn get(&self, name: &str) -> Option<&Path> {
        match name {
            "run" => Some(&self.run),
            "log" => Some(&self.log),
            "ssl" => Some(&self.ssl),
            "config" => Some(&self.config),
            "output" => Some(&self.output),
            "test" => Some(&self.test),
            _ => None,
        }
    }
}

/// Isolated directory tree for one run, removed on drop unless kept.
pub struct RunWorkspace {
    dir: Option<TempDir>,
    kept: Option<PathBuf>,
    run_id: Uuid,
    dirs: RunDirs,
}

impl RunWorkspace {
    /// Creates a fresh workspace under `root` (system temp dir when `None`).
    ///
    /// `test_dir` is where fixtures live; it is not copied.
    pub fn create(root: Option<&Path>, name: &str, test_dir: impl AsRef<Path>) -> Result<Self> {
        let run_id = Uuid::new_v4();
        let prefix = format!("gatecheck-{}-", sanitize(name));

        let dir = match root {
            Some(root) => {
                fs::create_dir_all(root)?;
                tempfile::Builder::new().prefix(&prefix).tempdir_in(root)?
            }
            None => tempfile::Builder::new().prefix(&prefix).tempdir()?,
        };

        let run = dir.path().to_path_buf();
        let dirs = RunDirs {
            log: run.join("log"),
            ssl: run.join("ssl"),
            config: run.join("config"),
            output: run.join("output"),
            test: test_dir.as_ref().to_path_buf(),
            run,
        };
        for sub in [&dirs.log, &dirs.ssl, &dirs.config, &dirs.output] {
            fs::create_dir_all(sub)?;
        }

        Ok(Self {
            dir: Some(dir),
            kept: None,
            run_id,
            dirs,
        })
    }

    /// Unique id of this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Run directories.
    pub fn dirs(&self) -> &RunDirs {
        &self.dirs
    }

    /// Run root.
    pub fn path(&self) -> &Path {
        &self.dirs.run
    }

    /// Persists the directory past drop and returns its path.
    pub fn keep(&mut self) -> PathBuf {
        if let Some(dir) = self.dir.take() {
            #[allow(deprecated)]
            let path = dir.into_path();
            self.kept = Some(path);
        }
        self.dirs.run.clone()
    }

    /// Path of a kept workspace.
    pub fn kept_path(&self) -> Option<&Path> {
        self.kept.as_deref()
    }

    /// Copies a fixture file into a run subdirectory.
    pub fn install(&self, source: impl AsRef<Path>, dest_dir: &Path) -> Result<PathBuf> {
        let source = source.as_ref();
        let name = source
            .file_name()
            .ok_or_else(|| HarnessError::FixtureNotFound(source.to_path_buf()))?;
        if !source.is_file() {
            return Err(HarnessError::FixtureNotFound(source.to_path_buf()));
        }
        let dest = dest_dir.join(name);
        fs::copy(source, &dest)?;
        Ok(dest)
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(40)
        .collect()
}
