//! Mock Consumer - an in-memory stand-in for a Kafka consumer client
//!
//! The mock never talks to a broker. Tests script everything it returns: the
//! assignment, the records each poll delivers, the beginning/end offsets used to
//! resolve offset resets, and faults (wakeups, injected errors) surfaced by the next
//! poll.
//!
//! The consumer itself is owned by one driver thread. Other threads get a
//! [`MockConsumerHandle`] and may only arm faults and schedule poll tasks. A poll
//! task runs at the start of a poll call with mutable access to the consumer, one
//! task per poll, which lets a test synchronise with a consumer loop running
//! elsewhere and mutate the consumer between polls.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use regex::Regex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::Config;
use crate::consumer::{CommittedOffsets, Consumer};
use crate::error::ConsumerError;
use crate::metadata::TopicRegistry;
use crate::metrics_consts::{
    MOCK_CONSUMER_INJECTED_ERRORS, MOCK_CONSUMER_POLLS, MOCK_CONSUMER_POLL_TASKS_RUN,
    MOCK_CONSUMER_RECORDS_DELIVERED, MOCK_CONSUMER_RECORDS_DISCARDED, MOCK_CONSUMER_WAKEUPS,
};
use crate::rebalance::{NoOpRebalanceListener, RebalanceListener};
use crate::subscription::{AssignmentTracker, SubscriptionState};
use crate::types::{
    ConsumerRecord, ConsumerRecords, OffsetAndMetadata, OffsetAndTimestamp,
    OffsetResetStrategy, PartitionInfo, TopicPartition,
};

pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Callback run by `poll` before it does anything else.
pub type PollTask<K, V> = Box<dyn FnOnce(&mut MockConsumer<K, V>) + Send>;

/// State shared between the consumer and its control handles
struct Signals {
    wakeup: AtomicBool,
    exception: Mutex<Option<ConsumerError>>,
    closed: AtomicBool,
}

impl Signals {
    fn new() -> Self {
        Self {
            wakeup: AtomicBool::new(false),
            exception: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_not_closed(&self) -> Result<(), ConsumerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConsumerError::Closed);
        }
        Ok(())
    }

    fn arm_wakeup(&self) -> Result<(), ConsumerError> {
        self.ensure_not_closed()?;
        self.wakeup.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Observe and clear the wakeup flag in one step.
    fn consume_wakeup(&self) -> bool {
        self.wakeup.swap(false, Ordering::SeqCst)
    }

    fn arm_exception(&self, error: ConsumerError) -> Result<(), ConsumerError> {
        self.ensure_not_closed()?;
        *self
            .exception
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
        Ok(())
    }

    fn take_exception(&self) -> Option<ConsumerError> {
        self.exception
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Cloneable control handle for threads other than the one driving the consumer.
pub struct MockConsumerHandle<K, V> {
    signals: Arc<Signals>,
    tasks: mpsc::UnboundedSender<PollTask<K, V>>,
}

impl<K, V> Clone for MockConsumerHandle<K, V> {
    fn clone(&self) -> Self {
        Self {
            signals: self.signals.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

impl<K, V> MockConsumerHandle<K, V> {
    /// Make the next poll fail with `ConsumerError::Wakeup`. Arming twice before a
    /// poll still produces a single wakeup.
    pub fn wakeup(&self) -> Result<(), ConsumerError> {
        self.signals.arm_wakeup()
    }

    /// Make the next poll return `error`. A later call replaces an unobserved error.
    pub fn set_exception(&self, error: impl Into<ConsumerError>) -> Result<(), ConsumerError> {
        self.signals.arm_exception(error.into())
    }

    /// Queue a task for a future poll. Tasks run in the order they were scheduled,
    /// one per poll call.
    pub fn schedule_poll_task<F>(&self, task: F) -> Result<(), ConsumerError>
    where
        F: FnOnce(&mut MockConsumer<K, V>) + Send + 'static,
    {
        self.signals.ensure_not_closed()?;
        self.tasks
            .send(Box::new(task))
            .map_err(|_| ConsumerError::Closed)
    }

    /// Queue a task that does nothing, so a driver can count polls.
    pub fn schedule_nop_poll_task(&self) -> Result<(), ConsumerError> {
        self.schedule_poll_task(|_| {})
    }
}

pub struct MockConsumer<K, V> {
    tracker: Box<dyn AssignmentTracker>,
    partitions: TopicRegistry,
    records: HashMap<TopicPartition, Vec<ConsumerRecord<K, V>>>,
    paused: HashSet<TopicPartition>,
    beginning_offsets: HashMap<TopicPartition, i64>,
    end_offsets: HashMap<TopicPartition, i64>,
    signals: Arc<Signals>,
    task_tx: mpsc::UnboundedSender<PollTask<K, V>>,
    task_rx: mpsc::UnboundedReceiver<PollTask<K, V>>,
    close_timeout: Duration,
}

impl<K, V> MockConsumer<K, V> {
    pub fn new(offset_reset_strategy: OffsetResetStrategy) -> Self {
        Self::with_tracker(SubscriptionState::new(offset_reset_strategy))
    }

    /// A consumer that already knows the topics in `partitions`.
    pub fn with_topics(
        offset_reset_strategy: OffsetResetStrategy,
        partitions: TopicRegistry,
    ) -> Self {
        let mut consumer = Self::new(offset_reset_strategy);
        consumer.partitions = partitions;
        consumer
    }

    pub fn from_config(config: &Config) -> Self {
        let mut consumer = Self::new(config.kafka_consumer_offset_reset);
        consumer.close_timeout = Duration::from_millis(config.kafka_consumer_close_timeout_ms);
        consumer
    }

    /// Use a custom assignment tracker instead of the in-memory `SubscriptionState`.
    pub fn with_tracker(tracker: impl AssignmentTracker + 'static) -> Self {
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        Self {
            tracker: Box::new(tracker),
            partitions: TopicRegistry::new(),
            records: HashMap::new(),
            paused: HashSet::new(),
            beginning_offsets: HashMap::new(),
            end_offsets: HashMap::new(),
            signals: Arc::new(Signals::new()),
            task_tx,
            task_rx,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    pub fn handle(&self) -> MockConsumerHandle<K, V> {
        MockConsumerHandle {
            signals: self.signals.clone(),
            tasks: self.task_tx.clone(),
        }
    }

    pub fn tracker(&self) -> &dyn AssignmentTracker {
        self.tracker.as_ref()
    }

    /// Number of records waiting for the next poll.
    pub fn buffered_record_count(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    /// Simulate a group rebalance: drop every buffered record and replace the
    /// assignment with `new_assignment`. Rebalance listeners are not called.
    pub fn rebalance<I>(&mut self, new_assignment: I) -> Result<(), ConsumerError>
    where
        I: IntoIterator<Item = TopicPartition>,
    {
        self.signals.ensure_not_closed()?;
        let new_assignment: Vec<TopicPartition> = new_assignment.into_iter().collect();
        let assigned = new_assignment.len();

        self.tracker.assign_from_subscribed(new_assignment)?;
        let dropped = self.buffered_record_count();
        self.records.clear();
        self.sync_paused();

        info!(
            assigned_partitions = assigned,
            dropped_records = dropped,
            "Simulated rebalance"
        );
        Ok(())
    }

    /// Buffer a record for delivery by the next poll. Its partition must be assigned
    /// and its offset must leave room for the position that follows it.
    pub fn add_record(&mut self, record: ConsumerRecord<K, V>) -> Result<(), ConsumerError> {
        self.signals.ensure_not_closed()?;
        let tp = record.topic_partition();
        if !self.tracker.is_assigned(&tp) {
            return Err(ConsumerError::RecordForUnassignedPartition(tp));
        }
        if record.offset() == i64::MAX {
            return Err(ConsumerError::RecordOffsetOutOfRange(tp, record.offset()));
        }
        self.records.entry(tp).or_default().push(record);
        Ok(())
    }

    pub fn set_exception(&self, error: impl Into<ConsumerError>) -> Result<(), ConsumerError> {
        self.signals.arm_exception(error.into())
    }

    pub fn update_beginning_offsets(
        &mut self,
        offsets: HashMap<TopicPartition, i64>,
    ) -> Result<(), ConsumerError> {
        self.signals.ensure_not_closed()?;
        self.beginning_offsets.extend(offsets);
        Ok(())
    }

    pub fn update_end_offsets(
        &mut self,
        offsets: HashMap<TopicPartition, i64>,
    ) -> Result<(), ConsumerError> {
        self.signals.ensure_not_closed()?;
        self.end_offsets.extend(offsets);
        Ok(())
    }

    pub fn update_partitions(
        &mut self,
        topic: &str,
        partitions: Vec<PartitionInfo>,
    ) -> Result<(), ConsumerError> {
        self.signals.ensure_not_closed()?;
        self.partitions.update(topic, partitions);
        Ok(())
    }

    pub fn schedule_poll_task<F>(&self, task: F) -> Result<(), ConsumerError>
    where
        F: FnOnce(&mut MockConsumer<K, V>) + Send + 'static,
    {
        self.handle().schedule_poll_task(task)
    }

    pub fn schedule_nop_poll_task(&self) -> Result<(), ConsumerError> {
        self.handle().schedule_nop_poll_task()
    }

    fn ensure_assigned<'a, I>(&self, partitions: I) -> Result<(), ConsumerError>
    where
        I: IntoIterator<Item = &'a TopicPartition>,
    {
        match partitions
            .into_iter()
            .find(|tp| !self.tracker.is_assigned(tp))
        {
            Some(tp) => Err(ConsumerError::UnassignedPartition(tp.clone())),
            None => Ok(()),
        }
    }

    /// Forget pause state for partitions the tracker no longer reports as paused,
    /// e.g. after the assignment was replaced.
    fn sync_paused(&mut self) {
        let tracker = &self.tracker;
        self.paused.retain(|tp| tracker.is_paused(tp));
    }

    /// Offset a partition without a position starts from. Only reads state, the
    /// caller seeks once every lookup has succeeded.
    fn resolve_fetch_position(&self, tp: &TopicPartition) -> Result<i64, ConsumerError> {
        if self.tracker.is_offset_reset_needed(tp)? {
            return self.reset_offset(tp, self.tracker.reset_strategy(tp)?);
        }

        match self.tracker.committed(tp)? {
            Some(committed) => {
                debug!(
                    topic = tp.topic(),
                    partition = tp.partition(),
                    offset = committed.offset(),
                    "Resuming from committed offset"
                );
                Ok(committed.offset())
            }
            None => self.reset_offset(tp, Some(self.tracker.default_reset_strategy())),
        }
    }

    fn reset_offset(
        &self,
        tp: &TopicPartition,
        strategy: Option<OffsetResetStrategy>,
    ) -> Result<i64, ConsumerError> {
        let (strategy, scripted) = match strategy {
            Some(OffsetResetStrategy::Earliest) => (
                OffsetResetStrategy::Earliest,
                self.beginning_offsets
                    .get(tp)
                    .ok_or_else(|| ConsumerError::MissingBeginningOffset(tp.clone()))?,
            ),
            Some(OffsetResetStrategy::Latest) => (
                OffsetResetStrategy::Latest,
                self.end_offsets
                    .get(tp)
                    .ok_or_else(|| ConsumerError::MissingEndOffset(tp.clone()))?,
            ),
            Some(OffsetResetStrategy::None) | None => {
                return Err(ConsumerError::NoOffsetForPartition(tp.clone()))
            }
        };

        debug!(
            topic = tp.topic(),
            partition = tp.partition(),
            strategy = %strategy,
            offset = *scripted,
            "Reset offset position"
        );
        Ok(*scripted)
    }

    fn scripted_offsets(
        scripted: &HashMap<TopicPartition, i64>,
        partitions: &[TopicPartition],
        missing: fn(TopicPartition) -> ConsumerError,
    ) -> Result<HashMap<TopicPartition, i64>, ConsumerError> {
        partitions
            .iter()
            .map(|tp| match scripted.get(tp) {
                Some(offset) => Ok((tp.clone(), *offset)),
                None => Err(missing(tp.clone())),
            })
            .collect()
    }
}

impl<K, V> Consumer<K, V> for MockConsumer<K, V> {
    fn assignment(&self) -> Result<HashSet<TopicPartition>, ConsumerError> {
        self.signals.ensure_not_closed()?;
        Ok(self.tracker.assigned_partitions())
    }

    fn subscription(&self) -> Result<HashSet<String>, ConsumerError> {
        self.signals.ensure_not_closed()?;
        Ok(self.tracker.subscription())
    }

    fn subscribe<I, S>(&mut self, topics: I) -> Result<(), ConsumerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscribe_with_listener(topics, Arc::new(NoOpRebalanceListener))
    }

    fn subscribe_with_listener<I, S>(
        &mut self,
        topics: I,
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<(), ConsumerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.signals.ensure_not_closed()?;
        let topics: HashSet<String> = topics.into_iter().map(Into::into).collect();
        self.tracker.subscribe(topics, listener)
    }

    fn subscribe_pattern(
        &mut self,
        pattern: &Regex,
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<(), ConsumerError> {
        self.signals.ensure_not_closed()?;
        let whole_name = Regex::new(&format!("^(?:{})$", pattern.as_str()))?;

        self.tracker.subscribe_pattern(pattern.clone(), listener)?;
        let topics: HashSet<String> = self
            .partitions
            .topics()
            .filter(|topic| whole_name.is_match(topic))
            .map(str::to_owned)
            .collect();

        debug!(
            pattern = pattern.as_str(),
            matched_topics = topics.len(),
            "Resolved pattern subscription"
        );
        self.tracker.subscribe_from_pattern(topics)
    }

    fn assign<I>(&mut self, partitions: I) -> Result<(), ConsumerError>
    where
        I: IntoIterator<Item = TopicPartition>,
    {
        self.signals.ensure_not_closed()?;
        self.tracker
            .assign_from_user(partitions.into_iter().collect())?;
        self.sync_paused();
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<(), ConsumerError> {
        self.signals.ensure_not_closed()?;
        self.tracker.unsubscribe();
        self.sync_paused();
        Ok(())
    }

    fn poll(&mut self, _timeout: Duration) -> Result<ConsumerRecords<K, V>, ConsumerError> {
        self.signals.ensure_not_closed()?;
        metrics::counter!(MOCK_CONSUMER_POLLS).increment(1);

        // Anything scheduled while this task runs lands behind it in the channel
        if let Ok(task) = self.task_rx.try_recv() {
            debug!("Running scheduled poll task");
            metrics::counter!(MOCK_CONSUMER_POLL_TASKS_RUN).increment(1);
            task(self);
            // The task may have closed the consumer
            self.signals.ensure_not_closed()?;
        }

        if self.signals.consume_wakeup() {
            debug!("Poll interrupted by wakeup");
            metrics::counter!(MOCK_CONSUMER_WAKEUPS).increment(1);
            return Err(ConsumerError::Wakeup);
        }

        if let Some(error) = self.signals.take_exception() {
            metrics::counter!(MOCK_CONSUMER_INJECTED_ERRORS).increment(1);
            return Err(error);
        }

        // Seeks and resets are applied lazily, on the poll that follows them
        let resolved = self
            .tracker
            .missing_fetch_positions()
            .into_iter()
            .map(|tp| self.resolve_fetch_position(&tp).map(|offset| (tp, offset)))
            .collect::<Result<Vec<_>, _>>()?;
        for (tp, offset) in &resolved {
            self.tracker.seek(tp, *offset)?;
        }

        let tracker = &self.tracker;
        let mut discarded = 0;
        self.records.retain(|tp, records| {
            let assigned = tracker.is_assigned(tp);
            if !assigned {
                discarded += records.len();
            }
            assigned
        });
        if discarded > 0 {
            debug!(
                discarded_records = discarded,
                "Dropped records for partitions no longer assigned"
            );
            metrics::counter!(MOCK_CONSUMER_RECORDS_DISCARDED).increment(discarded as u64);
        }

        for (tp, records) in &self.records {
            if self.paused.contains(tp) {
                continue;
            }
            if let Some(last) = records.last() {
                self.tracker.set_position(tp, last.offset() + 1)?;
            }
        }

        let delivered = ConsumerRecords::new(std::mem::take(&mut self.records));
        metrics::counter!(MOCK_CONSUMER_RECORDS_DELIVERED).increment(delivered.count() as u64);
        Ok(delivered)
    }

    fn commit_async<F>(
        &mut self,
        offsets: CommittedOffsets,
        callback: F,
    ) -> Result<(), ConsumerError>
    where
        F: FnOnce(&CommittedOffsets, Option<&ConsumerError>),
    {
        self.signals.ensure_not_closed()?;
        self.ensure_assigned(offsets.keys())?;

        for (tp, offset) in &offsets {
            self.tracker.set_committed(tp, offset.clone())?;
        }
        debug!(partitions = offsets.len(), "Committed offsets");

        callback(&offsets, None);
        Ok(())
    }

    fn commit_async_consumed<F>(&mut self, callback: F) -> Result<(), ConsumerError>
    where
        F: FnOnce(&CommittedOffsets, Option<&ConsumerError>),
    {
        self.signals.ensure_not_closed()?;
        let consumed = self.tracker.all_consumed();
        self.commit_async(consumed, callback)
    }

    fn commit_sync(&mut self) -> Result<(), ConsumerError> {
        self.commit_async_consumed(|_, _| {})
    }

    fn commit_sync_offsets(&mut self, offsets: CommittedOffsets) -> Result<(), ConsumerError> {
        self.commit_async(offsets, |_, _| {})
    }

    fn seek(&mut self, partition: &TopicPartition, offset: i64) -> Result<(), ConsumerError> {
        self.signals.ensure_not_closed()?;
        self.tracker.seek(partition, offset)
    }

    fn seek_to_beginning(&mut self, partitions: &[TopicPartition]) -> Result<(), ConsumerError> {
        self.signals.ensure_not_closed()?;
        self.ensure_assigned(partitions)?;
        for tp in partitions {
            self.tracker
                .need_offset_reset(tp, OffsetResetStrategy::Earliest)?;
        }
        Ok(())
    }

    fn seek_to_end(&mut self, partitions: &[TopicPartition]) -> Result<(), ConsumerError> {
        self.signals.ensure_not_closed()?;
        self.ensure_assigned(partitions)?;
        for tp in partitions {
            self.tracker
                .need_offset_reset(tp, OffsetResetStrategy::Latest)?;
        }
        Ok(())
    }

    fn position(&mut self, partition: &TopicPartition) -> Result<i64, ConsumerError> {
        self.signals.ensure_not_closed()?;
        if !self.tracker.is_assigned(partition) {
            return Err(ConsumerError::PositionForUnassignedPartition(
                partition.clone(),
            ));
        }

        if let Some(offset) = self.tracker.position(partition)? {
            return Ok(offset);
        }
        let offset = self.resolve_fetch_position(partition)?;
        self.tracker.seek(partition, offset)?;
        Ok(offset)
    }

    fn committed(
        &self,
        partition: &TopicPartition,
    ) -> Result<Option<OffsetAndMetadata>, ConsumerError> {
        self.signals.ensure_not_closed()?;
        if self.tracker.is_assigned(partition) {
            return self.tracker.committed(partition);
        }
        // Unassigned partitions report offset 0 rather than an error
        Ok(Some(OffsetAndMetadata::new(0)))
    }

    fn metrics(&self) -> Result<HashMap<String, f64>, ConsumerError> {
        self.signals.ensure_not_closed()?;
        Ok(HashMap::new())
    }

    fn partitions_for(&self, topic: &str) -> Result<Option<Vec<PartitionInfo>>, ConsumerError> {
        self.signals.ensure_not_closed()?;
        Ok(self.partitions.partitions_for(topic).map(<[_]>::to_vec))
    }

    fn list_topics(&self) -> Result<HashMap<String, Vec<PartitionInfo>>, ConsumerError> {
        self.signals.ensure_not_closed()?;
        Ok(self.partitions.to_map())
    }

    fn pause(&mut self, partitions: &[TopicPartition]) -> Result<(), ConsumerError> {
        self.signals.ensure_not_closed()?;
        self.ensure_assigned(partitions)?;
        for tp in partitions {
            self.tracker.pause(tp)?;
            self.paused.insert(tp.clone());
        }
        Ok(())
    }

    fn resume(&mut self, partitions: &[TopicPartition]) -> Result<(), ConsumerError> {
        self.signals.ensure_not_closed()?;
        self.ensure_assigned(partitions)?;
        for tp in partitions {
            self.tracker.resume(tp)?;
            self.paused.remove(tp);
        }
        Ok(())
    }

    fn paused(&self) -> Result<HashSet<TopicPartition>, ConsumerError> {
        self.signals.ensure_not_closed()?;
        Ok(self.paused.clone())
    }

    fn offsets_for_times(
        &self,
        _timestamps: &HashMap<TopicPartition, i64>,
    ) -> Result<HashMap<TopicPartition, OffsetAndTimestamp>, ConsumerError> {
        self.signals.ensure_not_closed()?;
        Err(ConsumerError::Unsupported("offsets_for_times"))
    }

    fn beginning_offsets(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, i64>, ConsumerError> {
        self.signals.ensure_not_closed()?;
        Self::scripted_offsets(
            &self.beginning_offsets,
            partitions,
            ConsumerError::MissingBeginningOffset,
        )
    }

    fn end_offsets(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, i64>, ConsumerError> {
        self.signals.ensure_not_closed()?;
        Self::scripted_offsets(&self.end_offsets, partitions, ConsumerError::MissingEndOffset)
    }

    fn close(&mut self) -> Result<(), ConsumerError> {
        self.close_with_timeout(self.close_timeout)
    }

    fn close_with_timeout(&mut self, timeout: Duration) -> Result<(), ConsumerError> {
        self.signals.ensure_not_closed()?;
        self.signals.closed.store(true, Ordering::SeqCst);
        info!(timeout = ?timeout, "Mock consumer closed");
        Ok(())
    }

    fn closed(&self) -> bool {
        self.signals.closed.load(Ordering::SeqCst)
    }

    fn wakeup(&self) -> Result<(), ConsumerError> {
        self.signals.arm_wakeup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestConsumer = MockConsumer<String, String>;

    fn tp(partition: i32) -> TopicPartition {
        TopicPartition::new("events", partition)
    }

    fn record(partition: i32, offset: i64) -> ConsumerRecord<String, String> {
        ConsumerRecord::new(
            "events",
            partition,
            offset,
            Some(format!("key-{offset}")),
            Some(format!("value-{offset}")),
        )
    }

    fn assigned_consumer(partitions: &[i32]) -> TestConsumer {
        let mut consumer = TestConsumer::new(OffsetResetStrategy::Earliest);
        consumer.assign(partitions.iter().map(|p| tp(*p))).unwrap();
        consumer
            .update_beginning_offsets(partitions.iter().map(|p| (tp(*p), 0)).collect())
            .unwrap();
        consumer
    }

    #[test]
    fn test_poll_delivers_records_in_order_and_drains_buffer() {
        let mut consumer = assigned_consumer(&[0]);
        for offset in 0..3 {
            consumer.add_record(record(0, offset)).unwrap();
        }

        let records = consumer.poll(Duration::from_millis(10)).unwrap();

        let offsets: Vec<i64> = records.records(&tp(0)).iter().map(|r| r.offset()).collect();
        assert_eq!(offsets, vec![0, 1, 2]);
        assert_eq!(consumer.buffered_record_count(), 0);
        assert_eq!(consumer.position(&tp(0)).unwrap(), 3);
        assert!(consumer.poll(Duration::ZERO).unwrap().is_empty());
    }

    #[test]
    fn test_add_record_for_unassigned_partition_fails() {
        let mut consumer = assigned_consumer(&[0]);

        let err = consumer.add_record(record(1, 0)).unwrap_err();

        assert!(matches!(err, ConsumerError::RecordForUnassignedPartition(p) if p == tp(1)));
        assert_eq!(consumer.buffered_record_count(), 0);
    }

    #[test]
    fn test_poll_drops_records_for_partitions_no_longer_assigned() {
        let mut consumer = assigned_consumer(&[0, 1]);
        consumer.add_record(record(0, 0)).unwrap();
        consumer.add_record(record(1, 0)).unwrap();

        consumer.assign([tp(1)]).unwrap();
        let records = consumer.poll(Duration::ZERO).unwrap();

        assert_eq!(records.count(), 1);
        assert!(records.records(&tp(0)).is_empty());
        assert_eq!(consumer.buffered_record_count(), 0);
    }

    #[test]
    fn test_paused_partition_keeps_position() {
        let mut consumer = assigned_consumer(&[0, 1]);
        consumer.seek(&tp(0), 10).unwrap();
        consumer.seek(&tp(1), 10).unwrap();
        consumer.pause(&[tp(0)]).unwrap();

        consumer.add_record(record(0, 10)).unwrap();
        consumer.add_record(record(1, 10)).unwrap();
        let records = consumer.poll(Duration::ZERO).unwrap();

        // Records are still delivered, only the position is frozen
        assert_eq!(records.count(), 2);
        assert_eq!(consumer.position(&tp(0)).unwrap(), 10);
        assert_eq!(consumer.position(&tp(1)).unwrap(), 11);
        assert_eq!(consumer.paused().unwrap(), HashSet::from([tp(0)]));

        consumer.resume(&[tp(0)]).unwrap();
        consumer.add_record(record(0, 11)).unwrap();
        consumer.poll(Duration::ZERO).unwrap();
        assert_eq!(consumer.position(&tp(0)).unwrap(), 12);
        assert!(consumer.paused().unwrap().is_empty());
    }

    #[test]
    fn test_pause_unassigned_partition_changes_nothing() {
        let mut consumer = assigned_consumer(&[0]);

        let err = consumer.pause(&[tp(0), tp(5)]).unwrap_err();

        assert!(matches!(err, ConsumerError::UnassignedPartition(p) if p == tp(5)));
        assert!(consumer.paused().unwrap().is_empty());
        assert!(!consumer.tracker().is_paused(&tp(0)));
    }

    #[test]
    fn test_wakeup_fires_once_and_keeps_buffer() {
        let mut consumer = assigned_consumer(&[0]);
        consumer.add_record(record(0, 0)).unwrap();
        consumer.wakeup().unwrap();
        consumer.wakeup().unwrap();

        let err = consumer.poll(Duration::ZERO).unwrap_err();
        assert!(err.is_wakeup());
        assert_eq!(consumer.buffered_record_count(), 1);

        let records = consumer.poll(Duration::ZERO).unwrap();
        assert_eq!(records.count(), 1);
    }

    #[test]
    fn test_wakeup_checked_before_injected_error() {
        let mut consumer = assigned_consumer(&[0]);
        consumer.set_exception(ConsumerError::Injected("boom".into())).unwrap();
        consumer.wakeup().unwrap();

        assert!(matches!(
            consumer.poll(Duration::ZERO),
            Err(ConsumerError::Wakeup)
        ));
        assert!(matches!(
            consumer.poll(Duration::ZERO),
            Err(ConsumerError::Injected(msg)) if msg == "boom"
        ));
        assert!(consumer.poll(Duration::ZERO).is_ok());
    }

    #[test]
    fn test_poll_task_runs_before_delivery() {
        let mut consumer = assigned_consumer(&[0]);
        consumer
            .schedule_poll_task(|consumer: &mut TestConsumer| {
                consumer.add_record(record(0, 0)).unwrap();
            })
            .unwrap();

        let records = consumer.poll(Duration::ZERO).unwrap();

        assert_eq!(records.count(), 1);
    }

    #[test]
    fn test_task_scheduled_inside_task_waits_for_next_poll() {
        let mut consumer = assigned_consumer(&[0]);
        consumer
            .schedule_poll_task(|consumer: &mut TestConsumer| {
                consumer
                    .schedule_poll_task(|consumer: &mut TestConsumer| {
                        consumer.add_record(record(0, 0)).unwrap();
                    })
                    .unwrap();
            })
            .unwrap();

        assert!(consumer.poll(Duration::ZERO).unwrap().is_empty());
        assert_eq!(consumer.poll(Duration::ZERO).unwrap().count(), 1);
    }

    #[test]
    fn test_task_closing_consumer_fails_poll() {
        let mut consumer = assigned_consumer(&[0]);
        consumer
            .schedule_poll_task(|consumer: &mut TestConsumer| {
                consumer.close().unwrap();
            })
            .unwrap();

        assert!(matches!(
            consumer.poll(Duration::ZERO),
            Err(ConsumerError::Closed)
        ));
        assert!(consumer.closed());
    }

    #[test]
    fn test_position_resolves_latest_from_end_offsets() {
        let mut consumer = TestConsumer::new(OffsetResetStrategy::Latest);
        consumer.assign([tp(0)]).unwrap();
        consumer
            .update_end_offsets(HashMap::from([(tp(0), 77)]))
            .unwrap();

        assert_eq!(consumer.position(&tp(0)).unwrap(), 77);
    }

    #[test]
    fn test_missing_end_offset_is_fatal() {
        let mut consumer = TestConsumer::new(OffsetResetStrategy::Latest);
        consumer.assign([tp(0)]).unwrap();

        let err = consumer.position(&tp(0)).unwrap_err();

        assert!(matches!(err, ConsumerError::MissingEndOffset(p) if p == tp(0)));
    }

    #[test]
    fn test_failed_reset_does_not_shadow_later_commit() {
        let mut consumer = TestConsumer::new(OffsetResetStrategy::Earliest);
        consumer.assign([tp(0)]).unwrap();

        assert!(matches!(
            consumer.position(&tp(0)),
            Err(ConsumerError::MissingBeginningOffset(_))
        ));
        assert!(!consumer.tracker().is_offset_reset_needed(&tp(0)).unwrap());

        consumer
            .commit_sync_offsets(HashMap::from([(tp(0), OffsetAndMetadata::new(5))]))
            .unwrap();
        assert_eq!(consumer.position(&tp(0)).unwrap(), 5);
    }

    #[test]
    fn test_failed_reset_on_one_partition_resolves_none() {
        let mut consumer = TestConsumer::new(OffsetResetStrategy::Earliest);
        consumer.assign([tp(0), tp(1)]).unwrap();
        consumer
            .update_beginning_offsets(HashMap::from([(tp(0), 7)]))
            .unwrap();

        let err = consumer.poll(Duration::ZERO).unwrap_err();

        assert!(matches!(err, ConsumerError::MissingBeginningOffset(p) if p == tp(1)));
        assert_eq!(consumer.tracker().position(&tp(0)).unwrap(), None);
        assert_eq!(consumer.tracker().position(&tp(1)).unwrap(), None);

        consumer
            .update_beginning_offsets(HashMap::from([(tp(1), 3)]))
            .unwrap();
        consumer.poll(Duration::ZERO).unwrap();
        assert_eq!(consumer.tracker().position(&tp(0)).unwrap(), Some(7));
        assert_eq!(consumer.tracker().position(&tp(1)).unwrap(), Some(3));
    }

    #[test]
    fn test_record_at_max_offset_is_rejected() {
        let mut consumer = assigned_consumer(&[0]);

        let err = consumer.add_record(record(0, i64::MAX)).unwrap_err();

        assert!(matches!(
            err,
            ConsumerError::RecordOffsetOutOfRange(p, offset) if p == tp(0) && offset == i64::MAX
        ));
        assert_eq!(consumer.buffered_record_count(), 0);
        assert!(consumer.poll(Duration::ZERO).unwrap().is_empty());

        consumer.add_record(record(0, i64::MAX - 1)).unwrap();
        consumer.seek(&tp(0), i64::MAX - 1).unwrap();
        consumer.poll(Duration::ZERO).unwrap();
        assert_eq!(consumer.position(&tp(0)).unwrap(), i64::MAX);
    }

    #[test]
    fn test_record_timestamp_is_delivered() {
        let mut consumer = assigned_consumer(&[0]);
        consumer
            .add_record(record(0, 0).with_timestamp(1_700_000_000_000))
            .unwrap();
        consumer.add_record(record(0, 1)).unwrap();

        let records = consumer.poll(Duration::ZERO).unwrap();

        let timestamps: Vec<Option<i64>> =
            records.records(&tp(0)).iter().map(|r| r.timestamp()).collect();
        assert_eq!(timestamps, vec![Some(1_700_000_000_000), None]);
    }

    #[test]
    fn test_seek_to_end_is_applied_on_next_poll() {
        let mut consumer = assigned_consumer(&[0]);
        consumer.seek(&tp(0), 3).unwrap();
        consumer
            .update_end_offsets(HashMap::from([(tp(0), 50)]))
            .unwrap();

        consumer.seek_to_end(&[tp(0)]).unwrap();
        assert!(consumer.tracker().is_offset_reset_needed(&tp(0)).unwrap());

        consumer.poll(Duration::ZERO).unwrap();
        assert_eq!(consumer.position(&tp(0)).unwrap(), 50);
        assert!(!consumer.tracker().is_offset_reset_needed(&tp(0)).unwrap());
    }

    #[test]
    fn test_seek_to_beginning_overrides_committed_offset() {
        let mut consumer = assigned_consumer(&[0]);
        consumer
            .commit_sync_offsets(HashMap::from([(tp(0), OffsetAndMetadata::new(8))]))
            .unwrap();

        consumer.seek_to_beginning(&[tp(0)]).unwrap();

        assert_eq!(consumer.position(&tp(0)).unwrap(), 0);
    }

    #[test]
    fn test_commit_async_invokes_callback_before_returning() {
        let mut consumer = assigned_consumer(&[0, 1]);
        let offsets = HashMap::from([
            (tp(0), OffsetAndMetadata::new(4)),
            (tp(1), OffsetAndMetadata::with_metadata(9, "checkpoint")),
        ]);

        let mut seen = None;
        consumer
            .commit_async(offsets.clone(), |committed, error| {
                assert!(error.is_none());
                seen = Some(committed.clone());
            })
            .unwrap();

        assert_eq!(seen, Some(offsets));
        assert_eq!(
            consumer.committed(&tp(1)).unwrap(),
            Some(OffsetAndMetadata::with_metadata(9, "checkpoint"))
        );
    }

    #[test]
    fn test_commit_with_unassigned_partition_commits_nothing() {
        let mut consumer = assigned_consumer(&[0]);
        let offsets = HashMap::from([
            (tp(0), OffsetAndMetadata::new(4)),
            (tp(3), OffsetAndMetadata::new(4)),
        ]);

        let mut called = false;
        let err = consumer
            .commit_async(offsets, |_, _| called = true)
            .unwrap_err();

        assert!(matches!(err, ConsumerError::UnassignedPartition(p) if p == tp(3)));
        assert!(!called);
        assert_eq!(consumer.committed(&tp(0)).unwrap(), None);
    }

    #[test]
    fn test_commit_sync_commits_consumed_positions() {
        let mut consumer = assigned_consumer(&[0, 1]);
        consumer.add_record(record(0, 0)).unwrap();
        consumer.add_record(record(0, 1)).unwrap();
        consumer.poll(Duration::ZERO).unwrap();

        consumer.commit_sync().unwrap();

        assert_eq!(
            consumer.committed(&tp(0)).unwrap(),
            Some(OffsetAndMetadata::new(2))
        );
        // Partition 1 was resolved to its beginning offset by the poll
        assert_eq!(
            consumer.committed(&tp(1)).unwrap(),
            Some(OffsetAndMetadata::new(0))
        );
    }

    #[test]
    fn test_committed_for_unassigned_partition_is_zero() {
        let consumer = TestConsumer::new(OffsetResetStrategy::Earliest);

        assert_eq!(
            consumer.committed(&tp(9)).unwrap(),
            Some(OffsetAndMetadata::new(0))
        );
    }

    #[test]
    fn test_position_for_unassigned_partition_fails() {
        let mut consumer = TestConsumer::new(OffsetResetStrategy::Earliest);

        assert!(matches!(
            consumer.position(&tp(0)),
            Err(ConsumerError::PositionForUnassignedPartition(_))
        ));
    }

    #[test]
    fn test_pattern_subscription_matches_known_topics_only() {
        let registry = TopicRegistry::new()
            .with_topic("events", 2)
            .with_topic("events_dlq", 1)
            .with_topic("clickhouse_events", 1);
        let mut consumer = TestConsumer::with_topics(OffsetResetStrategy::Earliest, registry);

        consumer
            .subscribe_pattern(&Regex::new("events.*").unwrap(), Arc::new(NoOpRebalanceListener))
            .unwrap();
        consumer
            .update_partitions("events_late", vec![PartitionInfo::new("events_late", 0, 0)])
            .unwrap();

        let subscription = consumer.subscription().unwrap();
        assert_eq!(
            subscription,
            HashSet::from(["events".to_string(), "events_dlq".to_string()])
        );
    }

    #[test]
    fn test_pattern_subscription_excludes_manual_assignment() {
        let mut consumer = TestConsumer::new(OffsetResetStrategy::Earliest);
        let pattern = Regex::new("events").unwrap();
        consumer
            .subscribe_pattern(&pattern, Arc::new(NoOpRebalanceListener))
            .unwrap();

        // Manual assignment cannot be mixed with a pattern subscription
        let err = consumer.assign([tp(0)]).unwrap_err();
        assert!(matches!(err, ConsumerError::ExclusiveSubscription));
        assert!(consumer.assignment().unwrap().is_empty());
    }

    #[test]
    fn test_rebalance_clears_buffer_and_replaces_assignment() {
        let mut consumer = TestConsumer::new(OffsetResetStrategy::Earliest);
        consumer.subscribe(["events"]).unwrap();
        consumer.rebalance([tp(0), tp(1)]).unwrap();
        consumer.add_record(record(0, 0)).unwrap();

        consumer.rebalance([tp(1), tp(2)]).unwrap();

        assert_eq!(consumer.buffered_record_count(), 0);
        assert_eq!(consumer.assignment().unwrap(), HashSet::from([tp(1), tp(2)]));
    }

    #[test]
    fn test_rebalance_failure_keeps_buffer() {
        let mut consumer = TestConsumer::new(OffsetResetStrategy::Earliest);
        consumer.subscribe(["events"]).unwrap();
        consumer.rebalance([tp(0)]).unwrap();
        consumer.add_record(record(0, 0)).unwrap();

        let err = consumer
            .rebalance([TopicPartition::new("other", 0)])
            .unwrap_err();

        assert!(matches!(err, ConsumerError::NonSubscribedTopic(_)));
        assert_eq!(consumer.buffered_record_count(), 1);
        assert_eq!(consumer.assignment().unwrap(), HashSet::from([tp(0)]));
    }

    #[test]
    fn test_rebalance_forgets_pause_state() {
        let mut consumer = TestConsumer::new(OffsetResetStrategy::Earliest);
        consumer.subscribe(["events"]).unwrap();
        consumer.rebalance([tp(0)]).unwrap();
        consumer.pause(&[tp(0)]).unwrap();

        consumer.rebalance([tp(0)]).unwrap();

        assert!(consumer.paused().unwrap().is_empty());
    }

    #[test]
    fn test_scripted_offsets_lookup() {
        let mut consumer = assigned_consumer(&[0, 1]);
        consumer
            .update_end_offsets(HashMap::from([(tp(0), 100)]))
            .unwrap();

        assert_eq!(
            consumer.beginning_offsets(&[tp(0), tp(1)]).unwrap(),
            HashMap::from([(tp(0), 0), (tp(1), 0)])
        );
        assert!(matches!(
            consumer.end_offsets(&[tp(0), tp(1)]),
            Err(ConsumerError::MissingEndOffset(p)) if p == tp(1)
        ));
    }

    #[test]
    fn test_metadata_queries() {
        let registry = TopicRegistry::new().with_topic("events", 2);
        let mut consumer = TestConsumer::with_topics(OffsetResetStrategy::Earliest, registry);

        assert_eq!(consumer.partitions_for("events").unwrap().unwrap().len(), 2);
        assert!(consumer.partitions_for("missing").unwrap().is_none());

        consumer
            .update_partitions("sessions", vec![PartitionInfo::new("sessions", 0, 1)])
            .unwrap();
        assert_eq!(consumer.list_topics().unwrap().len(), 2);
        assert!(consumer.metrics().unwrap().is_empty());
    }

    #[test]
    fn test_offsets_for_times_is_unsupported() {
        let consumer = TestConsumer::new(OffsetResetStrategy::Earliest);

        assert!(matches!(
            consumer.offsets_for_times(&HashMap::from([(tp(0), 1_000)])),
            Err(ConsumerError::Unsupported("offsets_for_times"))
        ));
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            kafka_consumer_offset_reset: OffsetResetStrategy::None,
            kafka_consumer_close_timeout_ms: 10,
        };
        let mut consumer = TestConsumer::from_config(&config);
        consumer.assign([tp(0)]).unwrap();

        assert!(matches!(
            consumer.position(&tp(0)),
            Err(ConsumerError::NoOffsetForPartition(p)) if p == tp(0)
        ));
        consumer.close().unwrap();
        assert!(consumer.closed());
    }
}
