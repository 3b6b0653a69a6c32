use crate::types::TopicPartition;

/// Callbacks a real consumer runs around a group rebalance.
///
/// The mock accepts and stores a listener on subscribe so code under test can pass
/// its production listener, but it never calls one: `MockConsumer::rebalance` swaps
/// the assignment without revoke/assign notifications. Tests that need the
/// callbacks should call them directly.
pub trait RebalanceListener: Send + Sync {
    /// Called before partitions are taken away from this consumer.
    fn on_partitions_revoked(&self, _partitions: &[TopicPartition]) {
        // Default implementation does nothing
    }

    /// Called after partitions have been handed to this consumer.
    fn on_partitions_assigned(&self, _partitions: &[TopicPartition]) {
        // Default implementation does nothing
    }
}

/// Listener used when the caller subscribes without one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpRebalanceListener;

impl RebalanceListener for NoOpRebalanceListener {}
