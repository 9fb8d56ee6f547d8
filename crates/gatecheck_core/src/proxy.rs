//! Reverse-proxy fixture.
//!
//! Writes the proxy's configuration files into the run's config directory,
//! installs TLS material and produces the `ProcessSpec` that starts it. The
//! proxy binary itself is an opaque collaborator; only the file formats and
//! environment below are part of the contract.
//!
//! | File | Line format |
//! |---|---|
//! | `records.config` | `CONFIG <name> <INT\|FLOAT\|STRING> <value>` |
//! | `remap.config` | `map <from> <to>` |
//! | `ssl_multicert.config` | free-form, e.g. `dest_ip=* ssl_cert_name=server.pem ssl_key_name=server.key` |
//! | `plugin.config` | `<plugin path> [args...]` |

use crate::error::{HarnessError, Result};
use crate::process::ProcessSpec;
use crate::readiness::Readiness;
use crate::test_run::TestRun;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// The HTTP port is reserved under the proxy's name, the TLS port under
/// the name plus this suffix.
pub const SSL_PORT_SUFFIX: &str = "_ssl";

/// TLS files installed by [`ProxyFixture::default_ssl_files`].
pub const DEFAULT_SSL_FILES: [&str; 2] = ["server.pem", "server.key"];

/// Typed record value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordValue {
    /// 64-bit integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// String.
    String(String),
}

impl RecordValue {
    /// Type keyword written in `records.config`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "INT",
            Self::Float(_) => "FLOAT",
            Self::String(_) => "STRING",
        }
    }
}

impl fmt::Display for RecordValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{:.6}", v),
            Self::String(v) => f.write_str(v),
        }
    }
}

impl From<i64> for RecordValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for RecordValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for RecordValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for RecordValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Proxy configuration for one run.
#[derive(Debug, Clone)]
pub struct ProxyFixture {
    name: String,
    program: String,
    args: Vec<String>,
    enable_tls: bool,
    enable_cache: bool,
    records: BTreeMap<String, RecordValue>,
    remaps: Vec<(String, String)>,
    ssl_multicert: Vec<String>,
    plugins: Vec<String>,
    ssl_files: Vec<PathBuf>,
    ready_timeout: Option<Duration>,
}

/// Ports and spec produced by installing a fixture.
#[derive(Debug, Clone)]
pub struct InstalledProxy {
    /// Plain HTTP port.
    pub port: u16,
    /// TLS port, when TLS is enabled.
    pub ssl_port: Option<u16>,
    /// Spec to declare on the run.
    pub spec: ProcessSpec,
}

impl ProxyFixture {
    /// A proxy process named `name` started as `program`.
    pub fn new(name: &str, program: &str) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args: Vec::new(),
            enable_tls: false,
            enable_cache: true,
            records: BTreeMap::new(),
            remaps: Vec::new(),
            ssl_multicert: Vec::new(),
            plugins: Vec::new(),
            ssl_files: Vec::new(),
            ready_timeout: None,
        }
    }

    /// Appends a program argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Reserves a TLS port and configures it.
    pub fn enable_tls(mut self, enabled: bool) -> Self {
        self.enable_tls = enabled;
        self
    }

    /// Turns the HTTP cache on or off.
    pub fn enable_cache(mut self, enabled: bool) -> Self {
        self.enable_cache = enabled;
        self
    }

    /// Sets a record; later values replace earlier ones.
    pub fn record(mut self, name: &str, value: impl Into<RecordValue>) -> Self {
        self.records.insert(name.to_string(), value.into());
        self
    }

    /// Adds a `map <from> <to>` rule.
    pub fn remap(mut self, from: &str, to: &str) -> Self {
        self.remaps.push((from.to_string(), to.to_string()));
        self
    }

    /// Adds an `ssl_multicert.config` line.
    pub fn ssl_multicert(mut self, line: &str) -> Self {
        self.ssl_multicert.push(line.to_string());
        self
    }

    /// Adds a `plugin.config` line.
    pub fn plugin(mut self, line: &str) -> Self {
        self.plugins.push(line.to_string());
        self
    }

    /// Copies a TLS file into the run's ssl directory at install time.
    pub fn ssl_file(mut self, path: impl AsRef<Path>) -> Self {
        self.ssl_files.push(path.as_ref().to_path_buf());
        self
    }

    /// Installs `server.pem` and `server.key` from `dir`.
    pub fn default_ssl_files(self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        DEFAULT_SSL_FILES
            .iter()
            .fold(self, |fixture, file| fixture.ssl_file(dir.join(file)))
    }

    /// Overrides the readiness timeout of the proxy process.
    pub fn ready_within(mut self, timeout: Duration) -> Self {
        self.ready_timeout = Some(timeout);
        self
    }

    /// Process name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reserves ports, writes config files, copies TLS files and declares
    /// the proxy process on `run`.
    ///
    /// # Errors
    ///
    /// Allocation errors, `FixtureNotFound` for missing TLS files, I/O
    /// errors and `DuplicateProcess`.
    pub fn install(self, run: &mut TestRun) -> Result<InstalledProxy> {
        let port = run.reserve_port(&self.name)?;
        let ssl_port = if self.enable_tls {
            Some(run.reserve_port(&format!("{}{}", self.name, SSL_PORT_SUFFIX))?)
        } else {
            None
        };

        let dirs = run.dirs().clone();
        for file in &self.ssl_files {
            let name = file
                .file_name()
                .ok_or_else(|| HarnessError::FixtureNotFound(file.clone()))?;
            if !file.is_file() {
                return Err(HarnessError::FixtureNotFound(file.clone()));
            }
            fs::copy(file, dirs.ssl.join(name))?;
        }

        let records = self.effective_records(port, ssl_port, &dirs.log, &dirs.ssl);
        write_lines(
            &dirs.config.join("records.config"),
            records
                .iter()
                .map(|(name, value)| format!("CONFIG {} {} {}", name, value.type_name(), value)),
        )?;
        write_lines(
            &dirs.config.join("remap.config"),
            self.remaps.iter().map(|(from, to)| format!("map {} {}", from, to)),
        )?;
        write_lines(
            &dirs.config.join("ssl_multicert.config"),
            self.ssl_multicert.iter().cloned(),
        )?;
        write_lines(&dirs.config.join("plugin.config"), self.plugins.iter().cloned())?;
        debug!(proxy = %self.name, port, ?ssl_port, "Proxy configuration written");

        let mut spec = ProcessSpec::new(&self.name, &self.program)
            .args(self.args.iter().cloned())
            .env("PROXY_CONFIG_DIR", dirs.config.display().to_string())
            .env("PROXY_LOG_DIR", dirs.log.display().to_string())
            .env("PROXY_SSL_DIR", dirs.ssl.display().to_string())
            .env("PROXY_PORT", port.to_string())
            .ready(Readiness::port(port));
        if let Some(ssl_port) = ssl_port {
            spec = spec.env("PROXY_SSL_PORT", ssl_port.to_string());
        }
        if let Some(timeout) = self.ready_timeout {
            spec = spec.ready_within(timeout);
        }

        run.process(spec.clone())?;
        Ok(InstalledProxy {
            port,
            ssl_port,
            spec,
        })
    }

    /// Records written to disk: built-in defaults overlaid by user records.
    fn effective_records(
        &self,
        port: u16,
        ssl_port: Option<u16>,
        log_dir: &Path,
        ssl_dir: &Path,
    ) -> BTreeMap<String, RecordValue> {
        let mut records = BTreeMap::new();
        let server_ports = match ssl_port {
            Some(ssl) => format!("{} {}:ssl", port, ssl),
            None => port.to_string(),
        };
        records.insert("proxy.config.http.server_ports".to_string(), server_ports.into());
        records.insert(
            "proxy.config.log.logfile_dir".to_string(),
            log_dir.display().to_string().into(),
        );
        records.insert(
            "proxy.config.http.cache.http".to_string(),
            RecordValue::Int(i64::from(self.enable_cache)),
        );
        if self.enable_tls {
            let ssl = ssl_dir.display().to_string();
            records.insert("proxy.config.ssl.server.cert.path".to_string(), ssl.clone().into());
            records.insert("proxy.config.ssl.server.private_key.path".to_string(), ssl.into());
        }
        records.extend(self.records.clone());
        records
    }
}

fn write_lines(path: &Path, lines: impl Iterator<Item = String>) -> Result<()> {
    let mut content = String::new();
    for line in lines {
        content.push_str(&line);
        content.push('\n');
    }
    fs::write(path, content)?;
    Ok(())
}
