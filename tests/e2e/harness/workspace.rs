use anyhow::{Context, Result};
use gatecheck_core::HarnessConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Isolated lock and run directories for one test
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    /// Create an empty workspace
    pub fn empty() -> Result<Self> {
        let dir = TempDir::new().context("Failed to create temp directory")?;
        fs::create_dir_all(dir.path().join("runs"))?;
        Ok(Self { dir })
    }

    /// Get workspace path
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Directory run workspaces are created under
    pub fn run_root(&self) -> PathBuf {
        self.path().join("runs")
    }

    /// Harness configuration confined to this workspace, with short timeouts
    pub fn config(&self) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.ports.lock_dir = Some(self.path().join("locks"));
        config.run.run_root = Some(self.run_root());
        config.run.step_timeout_ms = 10_000;
        config.run.quiescence_ms = 200;
        config.readiness.timeout_ms = 5_000;
        config.readiness.poll_interval_ms = 20;
        config.teardown.grace_period_ms = 500;
        config
    }

    /// Write file to workspace
    pub fn write_file(&self, path: &str, content: &str) -> Result<PathBuf> {
        let full_path = self.path().join(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directories for {}", path))?;
        }
        fs::write(&full_path, content)
            .with_context(|| format!("Failed to write file: {}", path))?;
        Ok(full_path)
    }

    /// Run directories still present under the run root
    pub fn leftover_runs(&self) -> Result<Vec<PathBuf>> {
        let mut runs = Vec::new();
        for entry in fs::read_dir(self.run_root())? {
            runs.push(entry?.path());
        }
        Ok(runs)
    }
}

/// Path of a fixture directory shipped with the tests
pub fn fixture_dir(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name)
}
