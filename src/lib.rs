//! Judge worker library
//!
//! Pops jobs from Redis, grades them one at a time inside isolate boxes and
//! streams status packets back to the coordinator.

pub mod admin;
pub mod checker;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod executor;
pub mod grader;
pub mod intake;
pub mod languages;
pub mod reporter;
pub mod sandbox;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;
