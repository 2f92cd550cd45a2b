//! tokio_workers - Worker pool scheduler powered by Tokio.
//!
//! This crate hands units of work to a fixed-size set of workers (OS threads
//! or child processes), queues work while every worker is busy, enforces a
//! per-assignment deadline and settles each submission exactly once.
//!
//! # Features
//!
//! - **Single-owner scheduler**: one task owns queue, registry and timers
//! - **Backpressure**: optional bound on pending assignments
//! - **Deadlines**: timed-out workers are reclaimed or replaced
//! - **Fault isolation**: a crashed worker fails only its own assignment
//! - **Pluggable backends**: threads, or processes speaking JSON lines
//!
//! # Architecture
//!
//! - [`pool`] - scheduler, assignment futures, options, stats and events
//! - [`backend`] - `WorkerBackend` trait with thread and process backends
//! - [`worker`] - child side of the process protocol
//!
//! # Example
//!
//! ```rust,ignore
//! use tokio_workers::backend::ThreadBackend;
//! use tokio_workers::pool::{PoolOptions, WorkerPool};
//!
//! let backend = ThreadBackend::new("square", |n: u64| Ok(n * n));
//! let pool = WorkerPool::new(backend, PoolOptions::new().with_base_size(4));
//! assert_eq!(pool.assign(7).await?, 49);
//! ```

/// Package version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod backend;
pub mod config;
pub mod logging;
pub mod pool;
pub mod worker;

// Re-exports for convenience
pub use backend::{ProcessBackend, ProcessOptions, ThreadBackend, WorkerBackend};
pub use config::Config;
pub use pool::{Assignment, PoolError, PoolOptions, PoolResult, WorkerPool};
