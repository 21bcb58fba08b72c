//! Integration test entry point for dhs-dcss.
//!
//! Run with: cargo test --test integration

mod harness;
mod handshake;
mod operations;
mod lifecycle;
