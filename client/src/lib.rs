//! Client process: registers no state of its own — it acquires a lease, dials the router for
//! each local connection against it, and drives the exporter's driver tree through a generic
//! stub tree. See `crate::lease` for the acquisition algorithm and `crate::stub_tree` for how a
//! `GetReport` turns into callable stubs.

pub mod config;
pub mod controller_client;
pub mod dial;
pub mod lease;
pub mod stub_tree;

pub struct ClientLogConfig;

impl jmp_log::StaticLogConfig for ClientLogConfig {
    const MAX_BYTES_PER_LOG_FILE: u64 = 10 * 1024 * 1024;
    const MAX_LOG_FILES: usize = 10;
    const LOG_FILE_PREFIX: &'static str = "jmp-client";
}
