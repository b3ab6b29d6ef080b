//! Concrete driver implementations standing in for the out-of-scope hardware drivers named in
//! the core's specification: a mock power switch, a mock network peer, and a mock storage sink.
//! Used by integration tests and by the exporter binary's example export tree.

mod network;
mod power;
mod storage;

pub use self::network::EchoNetwork;
pub use self::power::MockPower;
pub use self::storage::MockStorage;

use std::sync::Arc;

use jmp_driver::{Driver, ResourceTable};

/// Resolves a compiled-in driver-type name to a constructor. Returns `None` for unknown names —
/// the caller is expected to fail config validation on that, not materialize a stub driver (the
/// exporter, unlike the client's `unsafe`/`allow` policy, has no notion of "build but refuse to
/// call").
pub fn build(driver_type: &str, resources: &Arc<ResourceTable>) -> Option<Arc<dyn Driver>> {
    match driver_type {
        "mock_power" => Some(MockPower::new()),
        "echo_network" => Some(EchoNetwork::new()),
        "mock_storage" => Some(MockStorage::new(Arc::clone(resources))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_driver_types_resolve() {
        let resources = Arc::new(ResourceTable::new());
        assert!(build("mock_power", &resources).is_some());
        assert!(build("echo_network", &resources).is_some());
        assert!(build("mock_storage", &resources).is_some());
        assert!(build("unknown", &resources).is_none());
    }
}
