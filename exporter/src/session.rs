//! Owns the state a single `ExporterService` instance serves: the driver registry built fresh
//! for each lease, the resource arena backing streamed uploads, the lease phase, and the log
//! sink. One [`Session`] is constructed per lease (spec §8: a fresh `Registry` per lease, never
//! reused across leases), but [`LeaseContext`] and [`LogSink`] outlive it.

use std::sync::Arc;

use jmp_driver::{Driver, Registry, ResourceTable};

use crate::lease::LeaseContext;
use crate::log_sink::LogSink;

pub struct Session {
    pub registry: Registry,
    pub resources: Arc<ResourceTable>,
}

impl Session {
    pub fn new(root: Arc<dyn Driver>) -> Self {
        Self {
            registry: Registry::build(root),
            resources: Arc::new(ResourceTable::new()),
        }
    }
}

/// Process-lifetime state that survives across leases, shared by the registration loop, the
/// status loop, the hook runner and the gRPC service.
pub struct ExporterState {
    pub lease: Arc<LeaseContext>,
    pub log_sink: LogSink,
}

impl ExporterState {
    pub fn new() -> Self {
        Self {
            lease: Arc::new(LeaseContext::new()),
            log_sink: LogSink::new(),
        }
    }
}

impl Default for ExporterState {
    fn default() -> Self {
        Self::new()
    }
}
