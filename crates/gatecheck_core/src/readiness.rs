//! Readiness predicates for launched processes.

use crate::output::CapturedOutput;
use serde::{Deserialize, Serialize};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Condition a process must satisfy before it counts as started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Readiness {
    /// Ready as soon as it is spawned.
    Immediate,

    /// Ready once a TCP connect to `host:port` succeeds.
    PortOpen {
        /// Host to connect to.
        host: String,
        /// Port to connect to.
        port: u16,
    },

    /// Ready once the captured output contains this text.
    OutputContains(String),

    /// Ready once this path exists.
    FileExists(PathBuf),

    /// Ready after a fixed delay.
    Delay(Duration),
}

impl Readiness {
    /// `PortOpen` on the loopback interface.
    pub fn port(port: u16) -> Self {
        Self::PortOpen {
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    /// Evaluates the predicate once.
    ///
    /// `started` is when the process was spawned; `probe_timeout` bounds a
    /// single connect attempt.
    pub fn probe(&self, output: &CapturedOutput, started: Instant, probe_timeout: Duration) -> bool {
        match self {
            Self::Immediate => true,
            Self::PortOpen { host, port } => port_accepts(host, *port, probe_timeout),
            Self::OutputContains(text) => output
                .text()
                .map(|captured| captured.contains(text.as_str()))
                .unwrap_or(false),
            Self::FileExists(path) => path.exists(),
            Self::Delay(delay) => started.elapsed() >= *delay,
        }
    }

    /// Short description for logs and failure reasons.
    pub fn describe(&self) -> String {
        match self {
            Self::Immediate => "immediate".to_string(),
            Self::PortOpen { host, port } => format!("port {}:{} accepting connections", host, port),
            Self::OutputContains(text) => format!("output containing {:?}", text),
            Self::FileExists(path) => format!("file {} existing", path.display()),
            Self::Delay(delay) => format!("{}ms delay", delay.as_millis()),
        }
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::Immediate
    }
}

fn port_accepts(host: &str, port: u16, timeout: Duration) -> bool {
    let addrs = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(_) => return false,
    };
    for addr in addrs {
        if TcpStream::connect_timeout(&addr, timeout).is_ok() {
            return true;
        }
    }
    false
}
