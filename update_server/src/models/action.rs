//! Action — the unit of work assigning one distribution set to one target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default weight for actions created without an explicit priority.
pub const DEFAULT_ACTION_WEIGHT: i32 = 1000;

/// Action state machine states.
///
/// `Finished`, `Error` and `Canceled` are terminal; nothing leaves them
/// except the administrative force-quit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Scheduled,
    Running,
    Download,
    Finished,
    Error,
    Cancelling,
    Canceled,
}

impl ActionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionState::Finished | ActionState::Error | ActionState::Canceled
        )
    }

    /// Legal next states. Repeating the current non-terminal state is legal
    /// (progress updates arrive with an unchanged status code).
    pub fn may_transition(&self, to: ActionState) -> bool {
        use ActionState::*;
        match self {
            Scheduled => matches!(to, Scheduled | Running | Download | Cancelling | Canceled | Error),
            Running => matches!(to, Running | Download | Finished | Error | Cancelling),
            Download => matches!(to, Download | Running | Finished | Error | Cancelling),
            Cancelling => matches!(to, Cancelling | Canceled | Finished | Error),
            Finished | Error | Canceled => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionState::Scheduled => "scheduled",
            ActionState::Running => "running",
            ActionState::Download => "download",
            ActionState::Finished => "finished",
            ActionState::Error => "error",
            ActionState::Cancelling => "cancelling",
            ActionState::Canceled => "canceled",
        }
    }
}

/// How forcefully the update is applied on the device side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Forced,
    Soft,
    DownloadOnly,
}

/// Optional time constraint gating `Scheduled -> Running`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub start: DateTime<Utc>,
    pub duration_secs: i64,
}

impl MaintenanceWindow {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        now >= self.start && now < self.start + chrono::Duration::seconds(self.duration_secs)
    }
}

/// Device-reported progress: `cnt` of `of` units done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub cnt: i32,
    pub of: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: i64,
    pub tenant_id: Uuid,
    pub controller_id: String,
    pub ds_id: i64,
    pub state: ActionState,
    pub action_type: ActionType,
    pub weight: i32,
    /// Owning rollout/group, `None` for manual and auto-assignments.
    pub rollout_id: Option<i64>,
    pub group_id: Option<i64>,
    pub maintenance_window: Option<MaintenanceWindow>,
    /// Set when the tenant's confirmation flow gates the start of this
    /// action; cleared by the confirm operation.
    pub awaiting_confirmation: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Action {
    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }
}

/// Immutable status report appended to an action's history.
///
/// Ordered by the server-side `sequence` assigned at arrival; client
/// timestamps never reorder history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStatus {
    pub sequence: i64,
    pub action_id: i64,
    pub state: ActionState,
    pub progress: Option<Progress>,
    pub messages: Vec<String>,
    pub reported_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_admit_no_transition() {
        for terminal in [ActionState::Finished, ActionState::Error, ActionState::Canceled] {
            for to in [
                ActionState::Scheduled,
                ActionState::Running,
                ActionState::Download,
                ActionState::Finished,
                ActionState::Error,
                ActionState::Cancelling,
                ActionState::Canceled,
            ] {
                assert!(!terminal.may_transition(to), "{terminal:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn cancelling_can_still_finish() {
        assert!(ActionState::Cancelling.may_transition(ActionState::Finished));
        assert!(ActionState::Cancelling.may_transition(ActionState::Canceled));
        assert!(!ActionState::Cancelling.may_transition(ActionState::Running));
    }

    #[test]
    fn progress_repeats_are_legal() {
        assert!(ActionState::Running.may_transition(ActionState::Running));
        assert!(ActionState::Download.may_transition(ActionState::Download));
    }

    #[test]
    fn maintenance_window_open_interval() {
        let start = Utc::now();
        let window = MaintenanceWindow {
            start,
            duration_secs: 3600,
        };
        assert!(!window.is_open(start - chrono::Duration::seconds(1)));
        assert!(window.is_open(start));
        assert!(window.is_open(start + chrono::Duration::minutes(30)));
        assert!(!window.is_open(start + chrono::Duration::seconds(3600)));
    }
}
