use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::types::TopicPartition;

/// Enumeration of errors returned by the mock consumer and its assignment tracker.
///
/// `Wakeup` is a control-flow signal rather than a failure: the poll was aborted on
/// request and the caller decides whether to retry. Use [`ConsumerError::is_wakeup`]
/// to tell it apart from the rest.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("this consumer has already been closed")]
    Closed,

    #[error("no current assignment for partition {0}")]
    UnassignedPartition(TopicPartition),
    #[error("cannot add records for partition {0} that is not assigned to the consumer")]
    RecordForUnassignedPartition(TopicPartition),
    #[error("record offset {1} for partition {0} leaves no room for a next position")]
    RecordOffsetOutOfRange(TopicPartition, i64),
    #[error("can only check the position for partitions assigned to this consumer, got {0}")]
    PositionForUnassignedPartition(TopicPartition),
    #[error("subscription to topics, partitions and pattern are mutually exclusive")]
    ExclusiveSubscription,
    #[error("attempt to subscribe from pattern while subscription type is {0}")]
    PatternSubscriptionRequired(&'static str),
    #[error("attempt to dynamically assign partitions while subscription type is {0}")]
    NotAutoAssigned(&'static str),
    #[error("assigned partition {0} for non-subscribed topic")]
    NonSubscribedTopic(TopicPartition),
    #[error("cannot set a new position for {0} without a valid current position")]
    InvalidPositionUpdate(TopicPartition),

    #[error("partition {0} has no scripted beginning offset")]
    MissingBeginningOffset(TopicPartition),
    #[error("partition {0} has no scripted end offset")]
    MissingEndOffset(TopicPartition),

    #[error("undefined offset with no reset policy for partition {0}")]
    NoOffsetForPartition(TopicPartition),

    #[error("poll aborted by wakeup")]
    Wakeup,

    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("injected error: {0}")]
    Injected(String),

    #[error("{0} is not supported by the mock consumer")]
    Unsupported(&'static str),
    #[error("invalid subscription pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    #[error("{0} is not a valid offset reset strategy")]
    InvalidResetStrategy(String),
}

impl ConsumerError {
    pub fn is_wakeup(&self) -> bool {
        matches!(self, ConsumerError::Wakeup)
    }

    /// Partitions whose offset could not be established, for the no-reset-policy case.
    pub fn partitions(&self) -> Vec<TopicPartition> {
        match self {
            ConsumerError::NoOffsetForPartition(tp) => vec![tp.clone()],
            _ => Vec::new(),
        }
    }
}
