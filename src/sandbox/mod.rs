//! Sandbox module - Low-level isolate wrapper
//!
//! This module provides a minimal abstraction over the isolate sandbox.
//! It handles:
//! - Isolate box initialization and cleanup
//! - Cgroup detection
//! - Raw, abortable command execution returning `SandboxOutcome`
//!
//! Verdicts, languages and output comparison live elsewhere.

pub mod config;
pub mod isolate_box;
pub mod meta;

pub use config::{BoxAllocator, SandboxConfig};
pub use isolate_box::{is_cgroups_available, IoSpec, IsolateBox, Limits, SandboxOutcome};
pub use meta::{IsolateMeta, IsolateStatus};
