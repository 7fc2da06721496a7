//! ctscope library crate: TCP connection tracking over captured traffic.
//! Re-exports modules for the binary, benchmarks and tests.

pub mod capture;
pub mod config;
pub mod conntrack;
pub mod display;
pub mod pipeline;
pub mod protocol;
pub mod table;
