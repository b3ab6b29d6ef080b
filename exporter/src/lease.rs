//! The lease state machine (spec §4.3) and the context object it's stored on.
//!
//! The phase lives on [`LeaseContext`] rather than on the `Session` itself: `GetStatus` must
//! answer correctly even before a `Session` exists (e.g. mid `BEFORE_LEASE_HOOK`), so the status
//! handler reads this context instead of reaching into an `Option<Session>`.

use parking_lot::RwLock;

use jmp_proto::proto::ExporterStatus as WireStatus;

/// Mirrors `jmp_proto::proto::ExporterStatus` plus the message accompanying a failed phase;
/// kept as its own type so the rest of the exporter never has to match on the wire enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Available,
    BeforeLeaseHook,
    LeaseReady,
    AfterLeaseHook,
    BeforeLeaseHookFailed(String),
    AfterLeaseHookFailed(String),
}

impl Phase {
    pub fn to_wire(&self) -> (WireStatus, String) {
        match self {
            Phase::Available => (WireStatus::Available, String::new()),
            Phase::BeforeLeaseHook => (WireStatus::BeforeLeaseHook, String::new()),
            Phase::LeaseReady => (WireStatus::LeaseReady, String::new()),
            Phase::AfterLeaseHook => (WireStatus::AfterLeaseHook, String::new()),
            Phase::BeforeLeaseHookFailed(message) => (WireStatus::BeforeLeaseHookFailed, message.clone()),
            Phase::AfterLeaseHookFailed(message) => (WireStatus::AfterLeaseHookFailed, message.clone()),
        }
    }

    /// `GetStatus()` must report `LEASE_READY` iff the beforeLease hook has completed
    /// successfully *and* a Session is serving (spec §8 invariant 4).
    pub fn is_ready(&self) -> bool {
        matches!(self, Phase::LeaseReady)
    }
}

/// Shared, single-writer-at-a-time state read by the `GetStatus` RPC handler and written by the
/// status loop and the hook runner. A `parking_lot::RwLock` stands in for "the reactor serializes
/// these reads/writes" (spec §5): readers never block a writer long enough to matter, and this
/// binary isn't actually guaranteed single-threaded like the source runtime was.
pub struct LeaseContext {
    phase: RwLock<Phase>,
    lease_name: RwLock<String>,
    client_name: RwLock<String>,
}

impl LeaseContext {
    pub fn new() -> Self {
        Self {
            phase: RwLock::new(Phase::Available),
            lease_name: RwLock::new(String::new()),
            client_name: RwLock::new(String::new()),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase.read().clone()
    }

    pub fn set_phase(&self, phase: Phase) {
        *self.phase.write() = phase;
    }

    pub fn lease_name(&self) -> String {
        self.lease_name.read().clone()
    }

    pub fn client_name(&self) -> String {
        self.client_name.read().clone()
    }

    pub fn set_lease(&self, lease_name: String, client_name: String) {
        *self.lease_name.write() = lease_name;
        *self.client_name.write() = client_name;
    }

    pub fn clear_lease(&self) {
        self.lease_name.write().clear();
        self.client_name.write().clear();
    }
}

impl Default for LeaseContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_lease_ready_phase_is_ready() {
        assert!(!Phase::Available.is_ready());
        assert!(!Phase::BeforeLeaseHook.is_ready());
        assert!(Phase::LeaseReady.is_ready());
        assert!(!Phase::AfterLeaseHook.is_ready());
    }

    #[test]
    fn context_starts_available_with_no_lease() {
        let ctx = LeaseContext::new();
        assert_eq!(ctx.phase(), Phase::Available);
        assert_eq!(ctx.lease_name(), "");
    }
}
