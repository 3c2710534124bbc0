//! Distribution set assignment — the single pathway shared by manual
//! assignment, auto-assignment and rollout group starts.

use chrono::Utc;

use crate::error::CoreError;
use crate::events::{ChangeType, EntityKind, Event, EventBus};
use crate::models::{
    Action, ActionState, ActionType, MaintenanceWindow, DEFAULT_ACTION_WEIGHT,
};
use crate::store::{Store, TenantData};
use crate::tenant::TenantContext;

/// Parameters of one assignment. Rollout/group ids are set only on the
/// rollout pathway.
#[derive(Debug, Clone)]
pub struct AssignmentRequest {
    pub controller_id: String,
    pub ds_id: i64,
    pub action_type: ActionType,
    pub weight: i32,
    pub maintenance_window: Option<MaintenanceWindow>,
    pub rollout_id: Option<i64>,
    pub group_id: Option<i64>,
}

impl AssignmentRequest {
    pub fn manual(controller_id: impl Into<String>, ds_id: i64) -> Self {
        Self {
            controller_id: controller_id.into(),
            ds_id,
            action_type: ActionType::Forced,
            weight: DEFAULT_ACTION_WEIGHT,
            maintenance_window: None,
            rollout_id: None,
            group_id: None,
        }
    }
}

/// Assign a distribution set to a target.
///
/// Returns the new action id, or `None` when an equivalent active
/// assignment already exists (no-op success, keeps repeated sweeps
/// idempotent).
pub fn assign_distribution_set(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    request: AssignmentRequest,
) -> Result<Option<i64>, CoreError> {
    let mut events = Vec::new();
    let result = store.with_tenant(ctx.tenant, |td| assign_in(td, &request, &mut events));
    for event in &events {
        bus.publish(event);
    }
    result
}

/// Assignment core, invoked inside an already-open transaction. Validation
/// happens before any mutation; collected events reflect committed changes
/// only.
pub(crate) fn assign_in(
    td: &mut TenantData,
    request: &AssignmentRequest,
    events: &mut Vec<Event>,
) -> Result<Option<i64>, CoreError> {
    let tenant = td.tenant;
    let ds = td.distribution_set(request.ds_id)?;
    if !ds.assignable() {
        return Err(CoreError::Validation(format!(
            "distribution set {} is not assignable (incomplete or invalidated)",
            request.ds_id
        )));
    }
    td.target(&request.controller_id)?;

    // Equivalent active assignment -> no-op success.
    let already_assigned = td.actions.values().any(|a| {
        a.controller_id == request.controller_id && a.ds_id == request.ds_id && a.is_active()
    });
    if already_assigned {
        tracing::debug!(
            controller_id = %request.controller_id,
            ds_id = request.ds_id,
            "Equivalent active assignment exists, skipping"
        );
        return Ok(None);
    }

    // Single-assignment mode supersedes previously active actions.
    if !td.settings.multi_assignments_enabled() {
        for action_id in td.active_actions_for_target(&request.controller_id) {
            let state = td.action(action_id)?.state;
            if state == ActionState::Cancelling || !state.may_transition(ActionState::Cancelling) {
                continue;
            }
            td.append_action_status(
                action_id,
                ActionState::Cancelling,
                None,
                vec!["Superseded by a newer assignment".to_string()],
            )?;
            crate::metrics::action_status_changed(ActionState::Cancelling.as_str());
            events.push(Event::entity(
                tenant,
                EntityKind::Action,
                action_id,
                ChangeType::Updated,
            ));
        }
    }

    let initial_state = initial_action_state(td, request);
    let action_id = td.alloc_id();
    let now = Utc::now();
    td.actions.insert(
        action_id,
        Action {
            id: action_id,
            tenant_id: tenant,
            controller_id: request.controller_id.clone(),
            ds_id: request.ds_id,
            state: initial_state,
            action_type: request.action_type,
            weight: request.weight,
            rollout_id: request.rollout_id,
            group_id: request.group_id,
            maintenance_window: request.maintenance_window,
            awaiting_confirmation: td.settings.confirmation_flow_enabled(),
            created_at: now,
            updated_at: now,
        },
    );
    td.append_action_status(action_id, initial_state, None, Vec::new())?;
    crate::metrics::action_status_changed(initial_state.as_str());

    let target = td.target_mut(&request.controller_id)?;
    target.assigned_ds = Some(request.ds_id);
    td.recompute_target_status(&request.controller_id);

    events.push(Event::entity(
        tenant,
        EntityKind::Action,
        action_id,
        ChangeType::Created,
    ));
    events.push(Event::entity(
        tenant,
        EntityKind::Target,
        request.controller_id.clone(),
        ChangeType::Updated,
    ));

    tracing::info!(
        controller_id = %request.controller_id,
        ds_id = request.ds_id,
        action_id,
        state = initial_state.as_str(),
        "Distribution set assigned"
    );

    Ok(Some(action_id))
}

/// An action starts Running unless the confirmation flow or a closed
/// maintenance window gates it.
fn initial_action_state(td: &TenantData, request: &AssignmentRequest) -> ActionState {
    if td.settings.confirmation_flow_enabled() {
        return ActionState::Scheduled;
    }
    match request.maintenance_window {
        Some(window) if !window.is_open(Utc::now()) => ActionState::Scheduled,
        _ => ActionState::Running,
    }
}
