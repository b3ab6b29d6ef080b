//! Exporter process: registration, the lease state machine, hook execution, and the router-facing
//! session socket. See `crate::config` for how a process is configured and `crate::lifecycle` for
//! how a lease transitions the process through its states.

pub mod config;
pub mod controller_client;
pub mod export_tree;
pub mod hook;
pub mod lease;
pub mod lifecycle;
pub mod listen;
pub mod log_sink;
pub mod registration;
pub mod service;
pub mod session;
pub mod status;

pub struct ExporterLogConfig;

impl jmp_log::StaticLogConfig for ExporterLogConfig {
    const MAX_BYTES_PER_LOG_FILE: u64 = 10 * 1024 * 1024;
    const MAX_LOG_FILES: usize = 10;
    const LOG_FILE_PREFIX: &'static str = "jmp-exporter";
}
