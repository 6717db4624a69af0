//! handson: declarative provisioning and AI-function pipelines for
//! data-platform hands-on labs.
//!
//! Ordered steps, idempotent create-or-replace, BLAKE3 state hashing,
//! provenance events. One explicit session per run.

pub mod catalog;
pub mod cli;
pub mod core;
pub mod cortex;
pub mod platform;
pub mod tripwire;
