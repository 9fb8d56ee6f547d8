//! Port reservation for test runs.
//!
//! A reservation is exclusive in two directions: within a run, the allocator
//! never hands out the same port twice; across runs on the same host, an
//! `fs2` lock file per port keeps concurrent allocators apart. A candidate is
//! only accepted if it can also be bound on the loopback interface.

use crate::config::PortConfig;
use crate::error::{HarnessError, Result};
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::net::TcpListener;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// A port held exclusively by one run.
///
/// The lock is released when the reservation is dropped. Lock files are
/// never removed: another allocator may already hold an open descriptor on
/// the same path, and unlinking would let two runs lock different inodes.
#[derive(Debug)]
pub struct PortReservation {
    port: u16,
    lock: Option<File>,
}

impl PortReservation {
    /// The reserved port number.
    pub fn port(&self) -> u16 {
        self.port
    }

    fn release(&mut self) {
        if let Some(file) = self.lock.take() {
            if let Err(e) = FileExt::unlock(&file) {
                warn!(port = self.port, "Failed to unlock port reservation: {}", e);
            }
            drop(file);
            debug!(port = self.port, "Released port");
        }
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        self.release();
    }
}

/// Hands out non-conflicting TCP ports for a single run.
pub struct PortAllocator {
    config: PortConfig,
    lock_dir: PathBuf,
    reservations: BTreeMap<u16, PortReservation>,
    names: BTreeMap<String, u16>,
    cursor: u32,
}

impl PortAllocator {
    /// Creates an allocator for the configured range.
    pub fn new(config: PortConfig) -> Result<Self> {
        if config.range_start == 0 || config.range_start >= config.range_end {
            return Err(HarnessError::ConfigError(format!(
                "invalid port range {}..{}",
                config.range_start, config.range_end
            )));
        }

        let lock_dir = config.lock_dir();
        fs::create_dir_all(&lock_dir)?;

        // Spread concurrent allocators across the range so they rarely
        // contend for the same lock files.
        let span = u32::from(config.range_end - config.range_start);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let cursor = std::process::id()
            .wrapping_mul(7919)
            .wrapping_add(nanos)
            % span;

        Ok(Self {
            config,
            lock_dir,
            reservations: BTreeMap::new(),
            names: BTreeMap::new(),
            cursor,
        })
    }

    /// Reserves a port that is unbound on the host and unused by other runs.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` if no candidate could be claimed within
    /// `max_probe_attempts`.
    pub fn reserve(&mut self) -> Result<u16> {
        let span = u32::from(self.config.range_end - self.config.range_start);
        let attempts = self.config.max_probe_attempts.min(span);

        for _ in 0..attempts {
            let candidate = self.config.range_start + (self.cursor % span) as u16;
            self.cursor = (self.cursor + 1) % span;

            if self.reservations.contains_key(&candidate) {
                continue;
            }

            if let Some(reservation) = self.try_claim(candidate) {
                debug!(port = candidate, "Reserved port");
                self.reservations.insert(candidate, reservation);
                return Ok(candidate);
            }
        }

        Err(HarnessError::ResourceExhausted {
            attempts: self.config.max_probe_attempts,
        })
    }

    /// Reserves a port and remembers it under `name`.
    ///
    /// Reserving the same name twice returns the existing port.
    pub fn reserve_named(&mut self, name: &str) -> Result<u16> {
        if let Some(port) = self.names.get(name) {
            return Ok(*port);
        }
        let port = self.reserve()?;
        self.names.insert(name.to_string(), port);
        Ok(port)
    }

    /// Looks up a named reservation.
    pub fn named(&self, name: &str) -> Option<u16> {
        self.names.get(name).copied()
    }

    /// All named reservations.
    pub fn names(&self) -> &BTreeMap<String, u16> {
        &self.names
    }

    /// Ports currently held, in ascending order.
    pub fn reserved(&self) -> Vec<u16> {
        self.reservations.keys().copied().collect()
    }

    /// Releases a single port. Returns false if it was not held.
    pub fn release(&mut self, port: u16) -> bool {
        self.names.retain(|_, p| *p != port);
        self.reservations.remove(&port).is_some()
    }

    /// Releases every held port.
    pub fn release_all(&mut self) {
        self.names.clear();
        self.reservations.clear();
    }

    fn try_claim(&self, port: u16) -> Option<PortReservation> {
        let lock_path = self.lock_dir.join(format!("port-{}.lock", port));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .ok()?;

        if file.try_lock_exclusive().is_err() {
            debug!(port, "Port locked by another run");
            return None;
        }

        match TcpListener::bind(("127.0.0.1", port)) {
            Ok(listener) => drop(listener),
            Err(e) => {
                debug!(port, "Port not bindable: {}", e);
                let _ = FileExt::unlock(&file);
                return None;
            }
        }

        Some(PortReservation {
            port,
            lock: Some(file),
        })
    }
}
