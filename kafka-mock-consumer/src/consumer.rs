use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::error::ConsumerError;
use crate::rebalance::RebalanceListener;
use crate::types::{
    ConsumerRecords, OffsetAndMetadata, OffsetAndTimestamp, PartitionInfo, TopicPartition,
};

/// Committed offsets as passed to commit calls and their callbacks.
pub type CommittedOffsets = HashMap<TopicPartition, OffsetAndMetadata>;

/// The client surface application code consumes through.
///
/// Code that takes `impl Consumer<K, V>` can be driven by `MockConsumer` in tests.
/// Every operation except `closed` fails with `ConsumerError::Closed` once the
/// consumer has been closed.
pub trait Consumer<K, V> {
    fn assignment(&self) -> Result<HashSet<TopicPartition>, ConsumerError>;
    fn subscription(&self) -> Result<HashSet<String>, ConsumerError>;

    fn subscribe<I, S>(&mut self, topics: I) -> Result<(), ConsumerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>;
    fn subscribe_with_listener<I, S>(
        &mut self,
        topics: I,
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<(), ConsumerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>;
    /// Subscribe to every known topic whose whole name matches `pattern`.
    fn subscribe_pattern(
        &mut self,
        pattern: &Regex,
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<(), ConsumerError>;
    fn assign<I>(&mut self, partitions: I) -> Result<(), ConsumerError>
    where
        I: IntoIterator<Item = TopicPartition>;
    fn unsubscribe(&mut self) -> Result<(), ConsumerError>;

    fn poll(&mut self, timeout: Duration) -> Result<ConsumerRecords<K, V>, ConsumerError>;

    /// Record `offsets` as committed and report the outcome to `callback` before returning.
    fn commit_async<F>(
        &mut self,
        offsets: CommittedOffsets,
        callback: F,
    ) -> Result<(), ConsumerError>
    where
        F: FnOnce(&CommittedOffsets, Option<&ConsumerError>);
    /// Commit the current position of every assigned partition.
    fn commit_async_consumed<F>(&mut self, callback: F) -> Result<(), ConsumerError>
    where
        F: FnOnce(&CommittedOffsets, Option<&ConsumerError>);
    fn commit_sync(&mut self) -> Result<(), ConsumerError>;
    fn commit_sync_offsets(&mut self, offsets: CommittedOffsets) -> Result<(), ConsumerError>;

    fn seek(&mut self, partition: &TopicPartition, offset: i64) -> Result<(), ConsumerError>;
    fn seek_to_beginning(&mut self, partitions: &[TopicPartition]) -> Result<(), ConsumerError>;
    fn seek_to_end(&mut self, partitions: &[TopicPartition]) -> Result<(), ConsumerError>;
    fn position(&mut self, partition: &TopicPartition) -> Result<i64, ConsumerError>;
    fn committed(
        &self,
        partition: &TopicPartition,
    ) -> Result<Option<OffsetAndMetadata>, ConsumerError>;

    fn metrics(&self) -> Result<HashMap<String, f64>, ConsumerError>;
    fn partitions_for(&self, topic: &str) -> Result<Option<Vec<PartitionInfo>>, ConsumerError>;
    fn list_topics(&self) -> Result<HashMap<String, Vec<PartitionInfo>>, ConsumerError>;

    fn pause(&mut self, partitions: &[TopicPartition]) -> Result<(), ConsumerError>;
    fn resume(&mut self, partitions: &[TopicPartition]) -> Result<(), ConsumerError>;
    fn paused(&self) -> Result<HashSet<TopicPartition>, ConsumerError>;

    fn offsets_for_times(
        &self,
        timestamps: &HashMap<TopicPartition, i64>,
    ) -> Result<HashMap<TopicPartition, OffsetAndTimestamp>, ConsumerError>;
    fn beginning_offsets(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, i64>, ConsumerError>;
    fn end_offsets(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, i64>, ConsumerError>;

    fn close(&mut self) -> Result<(), ConsumerError>;
    fn close_with_timeout(&mut self, timeout: Duration) -> Result<(), ConsumerError>;
    fn closed(&self) -> bool;
    /// Abort the next (or in-flight) poll with `ConsumerError::Wakeup`.
    fn wakeup(&self) -> Result<(), ConsumerError>;
}
