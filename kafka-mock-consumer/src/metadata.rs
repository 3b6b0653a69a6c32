use std::collections::HashMap;

use crate::types::PartitionInfo;

/// Topic → partition metadata table backing `partitions_for`, `list_topics` and
/// pattern subscription.
///
/// Each consumer owns its registry. Tests that want several consumers to see the
/// same topics build one registry and hand a clone to each.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicRegistry {
    topics: HashMap<String, Vec<PartitionInfo>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `partition_count` single-replica partitions for `topic`, led by broker 0.
    pub fn with_topic(mut self, topic: &str, partition_count: i32) -> Self {
        let partitions = (0..partition_count)
            .map(|partition| PartitionInfo::new(topic, partition, 0))
            .collect();
        self.update(topic, partitions);
        self
    }

    /// Replace the partition list for a topic.
    pub fn update(&mut self, topic: impl Into<String>, partitions: Vec<PartitionInfo>) {
        self.topics.insert(topic.into(), partitions);
    }

    pub fn partitions_for(&self, topic: &str) -> Option<&[PartitionInfo]> {
        self.topics.get(topic).map(Vec::as_slice)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.keys().map(String::as_str)
    }

    pub fn to_map(&self) -> HashMap<String, Vec<PartitionInfo>> {
        self.topics.clone()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
