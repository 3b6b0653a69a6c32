pub mod config;
pub mod consumer;
pub mod error;
pub mod metadata;
pub mod metrics_consts;
pub mod mock;
pub mod rebalance;
pub mod subscription;
pub mod types;

// Public API
pub use config::Config;
pub use consumer::{CommittedOffsets, Consumer};
pub use error::ConsumerError;
pub use metadata::TopicRegistry;
pub use mock::{MockConsumer, MockConsumerHandle, PollTask};
pub use rebalance::{NoOpRebalanceListener, RebalanceListener};
pub use subscription::{AssignmentTracker, SubscriptionState};
pub use types::{
    ConsumerRecord, ConsumerRecords, OffsetAndMetadata, OffsetAndTimestamp, OffsetResetStrategy,
    PartitionInfo, TopicPartition,
};
