//! Domain error taxonomy for the update server core.

use thiserror::Error;

/// Errors surfaced by core management and tracking operations.
///
/// Rollout-level failure is modeled as data (`RolloutState::Error`), not as
/// a variant here; bulk operations isolate per-entity failures and report
/// them as per-entity outcomes instead of aborting.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A tenant configuration value could not be parsed (e.g. a malformed
    /// `HH:MM:SS` polling interval).
    #[error("unparsable tenant configuration value for '{key}': '{value}'")]
    ConfigurationFormat { key: String, value: String },

    /// Static rollout group percentages are invalid (empty, zero entries,
    /// or not summing to 100).
    #[error("invalid rollout group definition: {0}")]
    InvalidGroupDefinition(String),

    /// A status report attempted a transition the action state machine
    /// forbids. The action is left unchanged.
    #[error("illegal action transition for action {action_id}: {from} -> {to}")]
    IllegalActionTransition {
        action_id: i64,
        from: String,
        to: String,
    },

    /// A referenced entity does not exist in the tenant's scope.
    #[error("{kind} '{id}' not found")]
    EntityNotFound { kind: &'static str, id: String },

    /// An equivalent active assignment already exists. Callers on the
    /// assignment pathway treat this as a no-op success; it only escapes as
    /// an error where a caller explicitly asks for strict semantics.
    #[error("target '{controller_id}' already has an active assignment for distribution set {ds_id}")]
    DuplicateAssignment { controller_id: String, ds_id: i64 },

    /// A target filter query failed to parse.
    #[error("invalid target filter query: {0}")]
    InvalidFilterQuery(String),

    /// A management operation was rejected (invalid or incomplete
    /// distribution set, unconfirmable action, and the like).
    #[error("{0}")]
    Validation(String),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        CoreError::EntityNotFound {
            kind,
            id: id.to_string(),
        }
    }
}
