//! Integration tests for tokio_workers
//!
//! These tests drive the compiled `echo_worker` and `tokio_workers` binaries.
//! Run with: cargo test --test integration

mod helpers;

mod process_pool;
mod runner;
