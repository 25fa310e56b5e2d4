//! Integration tests for filter_chain
//!
//! Everything runs in-process. The HTTP tests bind a server to an ephemeral
//! loopback port.
//!
//! Run with: cargo test --test integration

mod helpers;

mod chain_scenarios;
mod concurrency;
