//! Core data model shared by graders, the engine and the reporter

pub mod ansi;
pub mod problem;
pub mod verdict;
