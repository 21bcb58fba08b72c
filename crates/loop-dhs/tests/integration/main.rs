//! Integration test entry point for loop-dhs.
//!
//! Run with: cargo test --test integration

mod harness;
mod collect;
mod operations;
