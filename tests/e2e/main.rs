//! End-to-end tests for gatecheck.
//!
//! Self-test scenarios drive the harness with stand-in shell processes and
//! run everywhere with a POSIX shell. Conformance scenarios need a gateway
//! binary and HTTP/2 clients and report themselves skipped otherwise.

#![cfg(unix)]

mod harness;
mod scenarios;
