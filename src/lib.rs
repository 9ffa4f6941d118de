//! # Runbox
//!
//! A container-backed code execution orchestrator built with Rust.
//!
//! ## Features
//!
//! - **Placement Strategies:** Fresh, session-owned, or warm-pooled containers
//! - **Dependency Caching:** Checksum-keyed installs, run once per dependency set
//! - **Live Streaming:** Demultiplexed stdout/stderr pushed to caller sinks
//! - **Generated-File Tracking:** Workspace diffs against a pre-run baseline
//! - **Resource Discipline:** Memory/CPU caps with per-execution overrides

pub mod container;
pub mod engine;
pub mod error;
pub mod languages;
pub mod session;
pub mod types;
pub mod workspace;

pub use engine::ExecutionEngine;
pub use error::{Error, Result};
pub use types::{
    ExecutionOptions, ExecutionResult, PlacementStrategy, SessionConfig, WorkspaceSharing,
};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
