//! Subscription and assignment bookkeeping.
//!
//! `AssignmentTracker` is the seam the mock consumer delegates to for everything a
//! real client keeps in its subscription state: which topics are subscribed, which
//! partitions are assigned, and per-partition position, committed offset, pause
//! flag and pending offset-reset request. `SubscriptionState` is the in-memory
//! implementation used by default.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::error::ConsumerError;
use crate::rebalance::RebalanceListener;
use crate::types::{OffsetAndMetadata, OffsetResetStrategy, TopicPartition};

pub trait AssignmentTracker: Send {
    fn assigned_partitions(&self) -> HashSet<TopicPartition>;
    fn subscription(&self) -> HashSet<String>;

    fn subscribe(
        &mut self,
        topics: HashSet<String>,
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<(), ConsumerError>;
    fn subscribe_pattern(
        &mut self,
        pattern: Regex,
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<(), ConsumerError>;
    /// Replace the subscribed topics with the ones a pattern subscription resolved to.
    fn subscribe_from_pattern(&mut self, topics: HashSet<String>) -> Result<(), ConsumerError>;
    fn assign_from_user(&mut self, partitions: HashSet<TopicPartition>)
        -> Result<(), ConsumerError>;
    /// Replace the assignment with the outcome of a (simulated) group rebalance.
    fn assign_from_subscribed(
        &mut self,
        partitions: Vec<TopicPartition>,
    ) -> Result<(), ConsumerError>;
    fn unsubscribe(&mut self);

    fn is_assigned(&self, tp: &TopicPartition) -> bool;
    fn is_paused(&self, tp: &TopicPartition) -> bool;
    fn pause(&mut self, tp: &TopicPartition) -> Result<(), ConsumerError>;
    fn resume(&mut self, tp: &TopicPartition) -> Result<(), ConsumerError>;

    fn position(&self, tp: &TopicPartition) -> Result<Option<i64>, ConsumerError>;
    /// Advance an already established position.
    fn set_position(&mut self, tp: &TopicPartition, offset: i64) -> Result<(), ConsumerError>;
    fn committed(&self, tp: &TopicPartition) -> Result<Option<OffsetAndMetadata>, ConsumerError>;
    fn set_committed(
        &mut self,
        tp: &TopicPartition,
        offset: OffsetAndMetadata,
    ) -> Result<(), ConsumerError>;
    /// Every assigned partition with a valid position, as the offset to commit.
    fn all_consumed(&self) -> HashMap<TopicPartition, OffsetAndMetadata>;
    fn missing_fetch_positions(&self) -> BTreeSet<TopicPartition>;

    fn is_offset_reset_needed(&self, tp: &TopicPartition) -> Result<bool, ConsumerError>;
    fn need_offset_reset(
        &mut self,
        tp: &TopicPartition,
        strategy: OffsetResetStrategy,
    ) -> Result<(), ConsumerError>;
    fn default_reset_strategy(&self) -> OffsetResetStrategy;
    /// The pending reset strategy, if a reset was requested.
    fn reset_strategy(
        &self,
        tp: &TopicPartition,
    ) -> Result<Option<OffsetResetStrategy>, ConsumerError>;
    /// Set the position and drop any pending reset request.
    fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<(), ConsumerError>;

    fn need_default_offset_reset(&mut self, tp: &TopicPartition) -> Result<(), ConsumerError> {
        let strategy = self.default_reset_strategy();
        self.need_offset_reset(tp, strategy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionType {
    None,
    AutoTopics,
    AutoPattern,
    UserAssigned,
}

impl SubscriptionType {
    fn as_str(&self) -> &'static str {
        match self {
            SubscriptionType::None => "none",
            SubscriptionType::AutoTopics => "auto_topics",
            SubscriptionType::AutoPattern => "auto_pattern",
            SubscriptionType::UserAssigned => "user_assigned",
        }
    }
}

#[derive(Debug, Default, Clone)]
struct PartitionState {
    position: Option<i64>,
    committed: Option<OffsetAndMetadata>,
    paused: bool,
    /// Set while a reset is pending.
    reset_strategy: Option<OffsetResetStrategy>,
}

impl PartitionState {
    fn await_reset(&mut self, strategy: OffsetResetStrategy) {
        self.reset_strategy = Some(strategy);
        self.position = None;
    }

    fn seek(&mut self, offset: i64) {
        self.position = Some(offset);
        self.reset_strategy = None;
    }
}

pub struct SubscriptionState {
    subscription_type: SubscriptionType,
    subscribed_pattern: Option<Regex>,
    subscription: HashSet<String>,
    user_assignment: HashSet<TopicPartition>,
    assignment: HashMap<TopicPartition, PartitionState>,
    default_reset_strategy: OffsetResetStrategy,
    listener: Option<Arc<dyn RebalanceListener>>,
}

impl SubscriptionState {
    pub fn new(default_reset_strategy: OffsetResetStrategy) -> Self {
        Self {
            subscription_type: SubscriptionType::None,
            subscribed_pattern: None,
            subscription: HashSet::new(),
            user_assignment: HashSet::new(),
            assignment: HashMap::new(),
            default_reset_strategy,
            listener: None,
        }
    }

    pub fn subscribed_pattern(&self) -> Option<&Regex> {
        self.subscribed_pattern.as_ref()
    }

    /// The listener registered by the last subscribe call. Stored only; nothing calls it.
    pub fn listener(&self) -> Option<&Arc<dyn RebalanceListener>> {
        self.listener.as_ref()
    }

    pub fn partitions_auto_assigned(&self) -> bool {
        matches!(
            self.subscription_type,
            SubscriptionType::AutoTopics | SubscriptionType::AutoPattern
        )
    }

    fn set_subscription_type(&mut self, kind: SubscriptionType) -> Result<(), ConsumerError> {
        if self.subscription_type == SubscriptionType::None {
            self.subscription_type = kind;
            Ok(())
        } else if self.subscription_type != kind {
            Err(ConsumerError::ExclusiveSubscription)
        } else {
            Ok(())
        }
    }

    fn change_subscription(&mut self, topics: HashSet<String>) {
        if self.subscription != topics {
            debug!(topics = ?topics, "Subscription changed");
            self.subscription = topics;
        }
    }

    fn assigned_state(&self, tp: &TopicPartition) -> Result<&PartitionState, ConsumerError> {
        self.assignment
            .get(tp)
            .ok_or_else(|| ConsumerError::UnassignedPartition(tp.clone()))
    }

    fn assigned_state_mut(
        &mut self,
        tp: &TopicPartition,
    ) -> Result<&mut PartitionState, ConsumerError> {
        self.assignment
            .get_mut(tp)
            .ok_or_else(|| ConsumerError::UnassignedPartition(tp.clone()))
    }
}

impl AssignmentTracker for SubscriptionState {
    fn assigned_partitions(&self) -> HashSet<TopicPartition> {
        self.assignment.keys().cloned().collect()
    }

    fn subscription(&self) -> HashSet<String> {
        self.subscription.clone()
    }

    fn subscribe(
        &mut self,
        topics: HashSet<String>,
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<(), ConsumerError> {
        self.set_subscription_type(SubscriptionType::AutoTopics)?;
        self.listener = Some(listener);
        self.change_subscription(topics);
        Ok(())
    }

    fn subscribe_pattern(
        &mut self,
        pattern: Regex,
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<(), ConsumerError> {
        self.set_subscription_type(SubscriptionType::AutoPattern)?;
        self.listener = Some(listener);
        self.subscribed_pattern = Some(pattern);
        Ok(())
    }

    fn subscribe_from_pattern(&mut self, topics: HashSet<String>) -> Result<(), ConsumerError> {
        if self.subscription_type != SubscriptionType::AutoPattern {
            return Err(ConsumerError::PatternSubscriptionRequired(
                self.subscription_type.as_str(),
            ));
        }
        self.change_subscription(topics);
        Ok(())
    }

    fn assign_from_user(
        &mut self,
        partitions: HashSet<TopicPartition>,
    ) -> Result<(), ConsumerError> {
        self.set_subscription_type(SubscriptionType::UserAssigned)?;

        if self.user_assignment != partitions {
            for tp in &partitions {
                self.assignment.entry(tp.clone()).or_default();
            }
            self.assignment.retain(|tp, _| partitions.contains(tp));
            debug!(partitions = partitions.len(), "Manual assignment changed");
            self.user_assignment = partitions;
        }
        Ok(())
    }

    fn assign_from_subscribed(
        &mut self,
        partitions: Vec<TopicPartition>,
    ) -> Result<(), ConsumerError> {
        if !self.partitions_auto_assigned() {
            return Err(ConsumerError::NotAutoAssigned(
                self.subscription_type.as_str(),
            ));
        }
        if let Some(tp) = partitions
            .iter()
            .find(|tp| !self.subscription.contains(tp.topic()))
        {
            return Err(ConsumerError::NonSubscribedTopic(tp.clone()));
        }

        // A rebalance always starts every partition from a clean state
        self.assignment = partitions
            .into_iter()
            .map(|tp| (tp, PartitionState::default()))
            .collect();
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.subscription.clear();
        self.user_assignment.clear();
        self.assignment.clear();
        self.subscribed_pattern = None;
        self.listener = None;
        self.subscription_type = SubscriptionType::None;
    }

    fn is_assigned(&self, tp: &TopicPartition) -> bool {
        self.assignment.contains_key(tp)
    }

    fn is_paused(&self, tp: &TopicPartition) -> bool {
        self.assignment.get(tp).is_some_and(|state| state.paused)
    }

    fn pause(&mut self, tp: &TopicPartition) -> Result<(), ConsumerError> {
        self.assigned_state_mut(tp)?.paused = true;
        Ok(())
    }

    fn resume(&mut self, tp: &TopicPartition) -> Result<(), ConsumerError> {
        self.assigned_state_mut(tp)?.paused = false;
        Ok(())
    }

    fn position(&self, tp: &TopicPartition) -> Result<Option<i64>, ConsumerError> {
        Ok(self.assigned_state(tp)?.position)
    }

    fn set_position(&mut self, tp: &TopicPartition, offset: i64) -> Result<(), ConsumerError> {
        let state = self.assigned_state_mut(tp)?;
        if state.position.is_none() {
            return Err(ConsumerError::InvalidPositionUpdate(tp.clone()));
        }
        state.position = Some(offset);
        Ok(())
    }

    fn committed(&self, tp: &TopicPartition) -> Result<Option<OffsetAndMetadata>, ConsumerError> {
        Ok(self.assigned_state(tp)?.committed.clone())
    }

    fn set_committed(
        &mut self,
        tp: &TopicPartition,
        offset: OffsetAndMetadata,
    ) -> Result<(), ConsumerError> {
        self.assigned_state_mut(tp)?.committed = Some(offset);
        Ok(())
    }

    fn all_consumed(&self) -> HashMap<TopicPartition, OffsetAndMetadata> {
        self.assignment
            .iter()
            .filter_map(|(tp, state)| {
                state
                    .position
                    .map(|position| (tp.clone(), OffsetAndMetadata::new(position)))
            })
            .collect()
    }

    fn missing_fetch_positions(&self) -> BTreeSet<TopicPartition> {
        self.assignment
            .iter()
            .filter(|(_, state)| state.position.is_none())
            .map(|(tp, _)| tp.clone())
            .collect()
    }

    fn is_offset_reset_needed(&self, tp: &TopicPartition) -> Result<bool, ConsumerError> {
        Ok(self.assigned_state(tp)?.reset_strategy.is_some())
    }

    fn need_offset_reset(
        &mut self,
        tp: &TopicPartition,
        strategy: OffsetResetStrategy,
    ) -> Result<(), ConsumerError> {
        self.assigned_state_mut(tp)?.await_reset(strategy);
        Ok(())
    }

    fn default_reset_strategy(&self) -> OffsetResetStrategy {
        self.default_reset_strategy
    }

    fn reset_strategy(
        &self,
        tp: &TopicPartition,
    ) -> Result<Option<OffsetResetStrategy>, ConsumerError> {
        Ok(self.assigned_state(tp)?.reset_strategy)
    }

    fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<(), ConsumerError> {
        self.assigned_state_mut(tp)?.seek(offset);
        Ok(())
    }
}
