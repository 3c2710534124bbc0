//! Rollout — a staged, fleet-wide deployment campaign split into groups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::action::{Action, ActionState, ActionType};

/// Rollout state machine. `Error`, `Finished` and `Stopped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutState {
    Creating,
    Ready,
    Starting,
    Running,
    Paused,
    Finished,
    Error,
    Stopped,
}

impl RolloutState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RolloutState::Finished | RolloutState::Error | RolloutState::Stopped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RolloutState::Creating => "creating",
            RolloutState::Ready => "ready",
            RolloutState::Starting => "starting",
            RolloutState::Running => "running",
            RolloutState::Paused => "paused",
            RolloutState::Finished => "finished",
            RolloutState::Error => "error",
            RolloutState::Stopped => "stopped",
        }
    }
}

/// How the rollout begins once it is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StartType {
    Manual,
    Auto,
    Scheduled { at: DateTime<Utc> },
}

/// Cancellation semantics applied when a rollout is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    /// Leave in-flight actions running to completion.
    None,
    /// Put every in-flight action into cancellation immediately.
    Force,
}

/// What happens to the rollout when a group exceeds its error threshold.
/// The group itself always transitions to `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutErrorAction {
    /// Pause the rollout; an operator may resume it.
    PauseRollout,
    /// Move the rollout to `Error`; later groups never start.
    HaltRollout,
    /// Keep going; later groups may still start.
    Continue,
}

/// Group creation strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroupStrategy {
    /// Explicit percentage splits; must sum to 100. The filtered population
    /// is partitioned sequentially across the splits at creation time.
    Static { percentages: Vec<u8> },
    /// Groups are created lazily as matching targets appear, each holding
    /// up to `target_count` targets, never more than `max_groups` groups.
    Dynamic {
        suffix: String,
        target_count: usize,
        max_groups: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rollout {
    pub id: i64,
    pub tenant_id: Uuid,
    pub name: String,
    pub ds_id: i64,
    /// Target filter query defining the population (virtual properties
    /// already resolved at creation time).
    pub filter: String,
    pub state: RolloutState,
    pub strategy: GroupStrategy,
    /// Percent of a group's targets that must reach a terminal state before
    /// the group finishes and its successor may start.
    pub success_threshold: u8,
    /// Percent of error-terminated actions above which the group errors.
    pub error_threshold: Option<u8>,
    pub error_action: RolloutErrorAction,
    pub start_type: StartType,
    pub action_type: ActionType,
    pub weight: i32,
    pub total_targets: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Group state machine. A group leaves `Scheduled` only when every prior
/// group has satisfied its start threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    Scheduled,
    Running,
    Finished,
    Error,
}

impl GroupState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GroupState::Finished | GroupState::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupState::Scheduled => "scheduled",
            GroupState::Running => "running",
            GroupState::Finished => "finished",
            GroupState::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutGroup {
    pub id: i64,
    pub rollout_id: i64,
    /// Position within the rollout's fixed group order, starting at 0.
    pub sequence: usize,
    pub name: String,
    pub state: GroupState,
    /// Controller ids partitioned into this group. Fixed for static groups;
    /// dynamic groups append until their target-count threshold is reached.
    pub members: Vec<String>,
    pub success_threshold: u8,
    pub error_threshold: Option<u8>,
}

impl RolloutGroup {
    pub fn total(&self) -> usize {
        self.members.len()
    }
}

/// Per-status counters for a group, derived from its actions — never
/// incremented in place, so recomputation is replay-safe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupCounters {
    pub scheduled: usize,
    pub running: usize,
    pub finished: usize,
    pub error: usize,
    pub cancelled: usize,
}

impl GroupCounters {
    /// Derive counters from the group's actions. Members without an action
    /// yet (group not started, or dynamic member pending) count as scheduled.
    pub fn derive<'a>(group: &RolloutGroup, actions: impl Iterator<Item = &'a Action>) -> Self {
        let mut counters = GroupCounters::default();
        let mut with_action = 0usize;
        for action in actions {
            with_action += 1;
            match action.state {
                ActionState::Scheduled => counters.scheduled += 1,
                ActionState::Running | ActionState::Download | ActionState::Cancelling => {
                    counters.running += 1
                }
                ActionState::Finished => counters.finished += 1,
                ActionState::Error => counters.error += 1,
                ActionState::Canceled => counters.cancelled += 1,
            }
        }
        counters.scheduled += group.total().saturating_sub(with_action);
        counters
    }

    /// Actions that reached a terminal state, the trigger condition for
    /// start/finish thresholds.
    pub fn terminal(&self) -> usize {
        self.finished + self.error + self.cancelled
    }

    pub fn sum(&self) -> usize {
        self.scheduled + self.running + self.finished + self.error + self.cancelled
    }
}
