//! CLI commands.

pub mod probe;
pub mod run;
pub mod validate;
