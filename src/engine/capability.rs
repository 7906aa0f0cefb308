//! Capability set - routes a payload's protocol tag to its executor.

use std::collections::HashMap;
use std::sync::Arc;

use crate::protocols::{
    BrokerExecutor, HttpExecutor, KvExecutor, NetExecutor, Protocol, ProtocolExecutor, SqlExecutor,
};

/// The run-scoped bundle of protocol executors, keyed by protocol tag.
///
/// A pure router: it performs no protocol-specific logic itself. Built once
/// before any stage executes and read-only for the run's lifetime. Absent
/// slots are legal; dispatching to one yields `Error::NoCapability` rather
/// than a silent skip, so an engine built without a backend wired in is
/// always observable.
#[derive(Clone, Default)]
pub struct CapabilitySet {
    executors: HashMap<Protocol, Arc<dyn ProtocolExecutor>>,
}

impl CapabilitySet {
    /// Create an empty set; every dispatch fails until executors are
    /// registered.
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Create a set with every built-in executor registered.
    pub fn with_defaults() -> Self {
        let mut set = Self::new();
        set.register(Arc::new(HttpExecutor::new()));
        set.register(Arc::new(KvExecutor::new()));
        set.register(Arc::new(SqlExecutor::new()));
        set.register(Arc::new(BrokerExecutor::new()));
        set.register(Arc::new(NetExecutor::new()));
        set
    }

    /// Register an executor under its own protocol tag, replacing any
    /// previous occupant of that slot.
    pub fn register(&mut self, executor: Arc<dyn ProtocolExecutor>) {
        self.executors.insert(executor.protocol(), executor);
    }

    /// Look up the executor for a protocol tag.
    pub fn get(&self, protocol: Protocol) -> Option<Arc<dyn ProtocolExecutor>> {
        self.executors.get(&protocol).cloned()
    }

    pub fn has(&self, protocol: Protocol) -> bool {
        self.executors.contains_key(&protocol)
    }

    /// Registered protocol tags, sorted.
    pub fn protocols(&self) -> Vec<Protocol> {
        let mut protocols: Vec<Protocol> = self.executors.keys().copied().collect();
        protocols.sort();
        protocols
    }

    /// Descriptions of all registered executors.
    pub fn descriptions(&self) -> Vec<(Protocol, &str)> {
        let mut out: Vec<(Protocol, &str)> = self
            .executors
            .iter()
            .map(|(protocol, executor)| (*protocol, executor.description()))
            .collect();
        out.sort_by_key(|(protocol, _)| *protocol);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_defaults_fills_every_slot() {
        let set = CapabilitySet::with_defaults();
        for protocol in Protocol::all() {
            assert!(set.has(protocol), "missing slot for {}", protocol);
        }
    }

    #[test]
    fn test_empty_set_has_no_slots() {
        let set = CapabilitySet::new();
        assert!(!set.has(Protocol::Http));
        assert!(set.get(Protocol::Kv).is_none());
        assert!(set.protocols().is_empty());
    }

    #[test]
    fn test_sparse_registration() {
        let mut set = CapabilitySet::new();
        set.register(Arc::new(HttpExecutor::new()));

        assert!(set.has(Protocol::Http));
        assert!(!set.has(Protocol::Sql));
        assert_eq!(set.protocols(), vec![Protocol::Http]);
    }
}
