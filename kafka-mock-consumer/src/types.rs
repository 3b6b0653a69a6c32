use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rdkafka::error::KafkaError;
use rdkafka::message::OwnedMessage;
use rdkafka::topic_partition_list::TopicPartitionListElem;
use rdkafka::{Message, Offset, TopicPartitionList};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConsumerError;

/// A topic name paired with a partition index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    topic: String,
    partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

impl From<TopicPartitionListElem<'_>> for TopicPartition {
    fn from(elem: TopicPartitionListElem<'_>) -> Self {
        Self::new(elem.topic(), elem.partition())
    }
}

/// Collect every element of an rdkafka partition list, ignoring offsets.
pub fn partitions_from_list(list: &TopicPartitionList) -> Vec<TopicPartition> {
    list.elements().into_iter().map(TopicPartition::from).collect()
}

/// Build an rdkafka partition list carrying the given committed offsets, e.g. to hand
/// them to code that expects a real consumer's commit payload.
pub fn offsets_to_list(
    offsets: &HashMap<TopicPartition, OffsetAndMetadata>,
) -> Result<TopicPartitionList, KafkaError> {
    let mut list = TopicPartitionList::with_capacity(offsets.len());
    for (tp, committed) in offsets {
        list.add_partition_offset(tp.topic(), tp.partition(), Offset::Offset(committed.offset()))?;
    }
    Ok(list)
}

/// An offset acknowledged as processed, with optional free-form metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OffsetAndMetadata {
    offset: i64,
    #[serde(default)]
    metadata: String,
}

impl OffsetAndMetadata {
    pub fn new(offset: i64) -> Self {
        Self::with_metadata(offset, "")
    }

    pub fn with_metadata(offset: i64, metadata: impl Into<String>) -> Self {
        Self {
            offset,
            metadata: metadata.into(),
        }
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn metadata(&self) -> &str {
        &self.metadata
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OffsetAndTimestamp {
    pub offset: i64,
    pub timestamp: i64,
}

/// Static partition metadata, as returned by `partitions_for` and `list_topics`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub topic: String,
    pub partition: i32,
    pub leader: Option<i32>,
    pub replicas: Vec<i32>,
    pub in_sync_replicas: Vec<i32>,
}

impl PartitionInfo {
    /// Partition metadata led by a single broker that is also the only replica.
    pub fn new(topic: impl Into<String>, partition: i32, broker_id: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
            leader: Some(broker_id),
            replicas: vec![broker_id],
            in_sync_replicas: vec![broker_id],
        }
    }
}

/// Policy used to pick a starting offset when a partition has no position and no commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetResetStrategy {
    Earliest,
    Latest,
    None,
}

impl FromStr for OffsetResetStrategy {
    type Err = ConsumerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" | "smallest" | "beginning" => Ok(OffsetResetStrategy::Earliest),
            "latest" | "largest" | "end" => Ok(OffsetResetStrategy::Latest),
            "none" | "error" => Ok(OffsetResetStrategy::None),
            _ => Err(ConsumerError::InvalidResetStrategy(s.to_owned())),
        }
    }
}

impl fmt::Display for OffsetResetStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OffsetResetStrategy::Earliest => "earliest",
            OffsetResetStrategy::Latest => "latest",
            OffsetResetStrategy::None => "none",
        };
        f.write_str(name)
    }
}

/// A single record as delivered by `poll`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerRecord<K, V> {
    topic: String,
    partition: i32,
    offset: i64,
    timestamp: Option<i64>,
    key: Option<K>,
    value: Option<V>,
}

impl<K, V> ConsumerRecord<K, V> {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: Option<K>,
        value: Option<V>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            timestamp: None,
            key,
            value,
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = Some(timestamp_ms);
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

impl ConsumerRecord<Vec<u8>, Vec<u8>> {
    /// Decode the payload as JSON. Returns `Ok(None)` for records without a payload.
    pub fn json_value<T>(&self) -> Result<Option<T>, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        self.value
            .as_deref()
            .map(|payload| serde_json::from_slice(payload))
            .transpose()
    }
}

impl From<&OwnedMessage> for ConsumerRecord<Vec<u8>, Vec<u8>> {
    fn from(message: &OwnedMessage) -> Self {
        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            timestamp: message.timestamp().to_millis(),
            key: message.key().map(<[u8]>::to_vec),
            value: message.payload().map(<[u8]>::to_vec),
        }
    }
}

/// The batch returned by one `poll` call, grouped by partition. Records within a
/// partition are in the order they were added.
#[derive(Debug, Clone)]
pub struct ConsumerRecords<K, V> {
    records: HashMap<TopicPartition, Vec<ConsumerRecord<K, V>>>,
}

impl<K, V> ConsumerRecords<K, V> {
    pub fn new(records: HashMap<TopicPartition, Vec<ConsumerRecord<K, V>>>) -> Self {
        Self { records }
    }

    /// Total number of records across all partitions.
    pub fn count(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.values().all(Vec::is_empty)
    }

    pub fn partitions(&self) -> impl Iterator<Item = &TopicPartition> {
        self.records.keys()
    }

    pub fn records(&self, partition: &TopicPartition) -> &[ConsumerRecord<K, V>] {
        self.records
            .get(partition)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConsumerRecord<K, V>> {
        self.records.values().flatten()
    }
}

impl<K, V> IntoIterator for ConsumerRecords<K, V> {
    type Item = ConsumerRecord<K, V>;
    type IntoIter = std::iter::Flatten<
        std::collections::hash_map::IntoValues<TopicPartition, Vec<ConsumerRecord<K, V>>>,
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_values().flatten()
    }
}
