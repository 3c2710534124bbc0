//! Action/status tracking — validates device feedback against the action
//! state machine and keeps targets and rollouts consistent with it.

use crate::error::CoreError;
use crate::events::{ChangeType, EntityKind, Event, EventBus};
use crate::models::{ActionState, Progress};
use crate::services::rollout_service;
use crate::store::{Store, TenantData};
use crate::tenant::TenantContext;

/// Append a status report to an action's history.
///
/// The transition is validated against the action state machine; an illegal
/// report is rejected with `IllegalActionTransition` and the action is left
/// unchanged. Re-reporting the terminal state an action is already in is a
/// no-op success, so replayed feedback never fails or duplicates history.
pub fn append_status(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    action_id: i64,
    state: ActionState,
    progress: Option<Progress>,
    messages: Vec<String>,
) -> Result<(), CoreError> {
    let mut events = Vec::new();
    let rollout_id = store.with_tenant(ctx.tenant, |td| {
        append_status_in(td, action_id, state, progress, messages, &mut events)
    })?;
    for event in &events {
        bus.publish(event);
    }
    if let Some(rollout_id) = rollout_id {
        rollout_service::handle_rollout_progress(store, bus, ctx, rollout_id)?;
    }
    Ok(())
}

/// Request cancellation of an active action. The device confirms via a
/// `Canceled` status report.
pub fn cancel_action(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    action_id: i64,
) -> Result<(), CoreError> {
    let mut events = Vec::new();
    let rollout_id = store.with_tenant(ctx.tenant, |td| {
        let action = td.action(action_id)?;
        if !action.is_active() {
            return Err(CoreError::Validation(format!(
                "action {action_id} is already closed"
            )));
        }
        append_status_in(
            td,
            action_id,
            ActionState::Cancelling,
            None,
            vec!["Cancellation requested".to_string()],
            &mut events,
        )
    })?;
    for event in &events {
        bus.publish(event);
    }
    if let Some(rollout_id) = rollout_id {
        rollout_service::handle_rollout_progress(store, bus, ctx, rollout_id)?;
    }
    Ok(())
}

/// Administrative force-quit: closes an action that has a pending
/// cancellation the device never confirmed.
pub fn force_quit_action(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    action_id: i64,
) -> Result<(), CoreError> {
    let mut events = Vec::new();
    let rollout_id = store.with_tenant(ctx.tenant, |td| {
        let action = td.action(action_id)?;
        if action.state != ActionState::Cancelling {
            return Err(CoreError::Validation(format!(
                "action {action_id} has no pending cancellation to force-quit"
            )));
        }
        append_status_in(
            td,
            action_id,
            ActionState::Canceled,
            None,
            vec!["Force-quit by administrator".to_string()],
            &mut events,
        )
    })?;
    for event in &events {
        bus.publish(event);
    }
    if let Some(rollout_id) = rollout_id {
        rollout_service::handle_rollout_progress(store, bus, ctx, rollout_id)?;
    }
    Ok(())
}

/// Confirm an action held back by the tenant's confirmation flow. Moves it
/// to Running unless a maintenance window still gates it.
pub fn confirm_action(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    action_id: i64,
) -> Result<(), CoreError> {
    let mut events = Vec::new();
    store.with_tenant(ctx.tenant, |td| {
        let action = td.action_mut(action_id)?;
        if !action.awaiting_confirmation {
            return Err(CoreError::Validation(format!(
                "action {action_id} is not awaiting confirmation"
            )));
        }
        action.awaiting_confirmation = false;
        let gated = action
            .maintenance_window
            .is_some_and(|w| !w.is_open(chrono::Utc::now()));
        if gated {
            events.push(Event::entity(
                td.tenant,
                EntityKind::Action,
                action_id,
                ChangeType::Updated,
            ));
            return Ok(None);
        }
        append_status_in(
            td,
            action_id,
            ActionState::Running,
            None,
            vec!["Confirmed".to_string()],
            &mut events,
        )
    })?;
    for event in &events {
        bus.publish(event);
    }
    Ok(())
}

/// Status append core, invoked inside an open transaction. Returns the
/// owning rollout id when the caller must trigger a progress recompute.
pub(crate) fn append_status_in(
    td: &mut TenantData,
    action_id: i64,
    state: ActionState,
    progress: Option<Progress>,
    messages: Vec<String>,
    events: &mut Vec<Event>,
) -> Result<Option<i64>, CoreError> {
    let tenant = td.tenant;
    let action = td.action(action_id)?;
    let from = action.state;
    let controller_id = action.controller_id.clone();
    let ds_id = action.ds_id;
    let rollout_id = action.rollout_id;

    // Replayed terminal report: already in the reported state, nothing to do.
    if from.is_terminal() && from == state {
        return Ok(None);
    }
    if !from.may_transition(state) {
        return Err(CoreError::IllegalActionTransition {
            action_id,
            from: from.as_str().to_string(),
            to: state.as_str().to_string(),
        });
    }

    td.append_action_status(action_id, state, progress, messages)?;
    crate::metrics::action_status_changed(state.as_str());

    if state == ActionState::Finished {
        let target = td.target_mut(&controller_id)?;
        target.installed_ds = Some(ds_id);
    }
    td.recompute_target_status(&controller_id);

    events.push(Event::entity(
        tenant,
        EntityKind::Action,
        action_id,
        ChangeType::Updated,
    ));
    events.push(Event::entity(
        tenant,
        EntityKind::Target,
        controller_id.clone(),
        ChangeType::Updated,
    ));

    tracing::info!(
        action_id,
        controller_id = %controller_id,
        from = from.as_str(),
        to = state.as_str(),
        "Action status recorded"
    );

    Ok(rollout_id)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::models::{DistributionSet, Target, UpdateStatus};
    use crate::services::assignment_service::{assign_distribution_set, AssignmentRequest};
    use crate::tenant::TenantId;

    fn seed(store: &Store, tenant: TenantId) -> i64 {
        store.with_tenant(tenant, |td| {
            td.targets.insert("dev01".into(), Target::new(tenant, "dev01"));
            td.distribution_sets.insert(
                1,
                DistributionSet {
                    id: 1,
                    tenant_id: tenant,
                    name: "os".into(),
                    version: "1.0".into(),
                    ds_type: "os".into(),
                    module_ids: vec![],
                    valid: true,
                    complete: true,
                    required_migration_step: false,
                },
            );
        });
        let bus = EventBus::new();
        let ctx = TenantContext::system(tenant);
        assign_distribution_set(store, &bus, &ctx, AssignmentRequest::manual("dev01", 1))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn finished_report_closes_action_and_syncs_target() {
        let store = Store::new();
        let bus = EventBus::new();
        let tenant = Uuid::new_v4();
        let action_id = seed(&store, tenant);
        let ctx = TenantContext::system(tenant);
        append_status(&store, &bus, &ctx, action_id, ActionState::Finished, None, vec![]).unwrap();
        store.with_tenant(tenant, |td| {
            assert_eq!(td.action(action_id).unwrap().state, ActionState::Finished);
            let target = td.target("dev01").unwrap();
            assert_eq!(target.update_status, UpdateStatus::InSync);
            assert_eq!(target.installed_ds, Some(1));
        });
    }

    #[test]
    fn illegal_transition_is_rejected_and_state_unchanged() {
        let store = Store::new();
        let bus = EventBus::new();
        let tenant = Uuid::new_v4();
        let action_id = seed(&store, tenant);
        let ctx = TenantContext::system(tenant);
        append_status(&store, &bus, &ctx, action_id, ActionState::Finished, None, vec![]).unwrap();
        let result = append_status(
            &store,
            &bus,
            &ctx,
            action_id,
            ActionState::Running,
            None,
            vec![],
        );
        assert!(matches!(
            result,
            Err(CoreError::IllegalActionTransition { .. })
        ));
        store.with_tenant(tenant, |td| {
            assert_eq!(td.action(action_id).unwrap().state, ActionState::Finished);
            // rejected report appended nothing
            assert_eq!(td.status_history(action_id).len(), 2);
        });
    }

    #[test]
    fn duplicate_terminal_report_is_noop() {
        let store = Store::new();
        let bus = EventBus::new();
        let tenant = Uuid::new_v4();
        let action_id = seed(&store, tenant);
        let ctx = TenantContext::system(tenant);
        append_status(&store, &bus, &ctx, action_id, ActionState::Finished, None, vec![]).unwrap();
        append_status(&store, &bus, &ctx, action_id, ActionState::Finished, None, vec![]).unwrap();
        store.with_tenant(tenant, |td| {
            assert_eq!(td.status_history(action_id).len(), 2);
        });
    }

    #[test]
    fn cancel_then_force_quit() {
        let store = Store::new();
        let bus = EventBus::new();
        let tenant = Uuid::new_v4();
        let action_id = seed(&store, tenant);
        let ctx = TenantContext::system(tenant);
        assert!(force_quit_action(&store, &bus, &ctx, action_id).is_err());
        cancel_action(&store, &bus, &ctx, action_id).unwrap();
        force_quit_action(&store, &bus, &ctx, action_id).unwrap();
        store.with_tenant(tenant, |td| {
            assert_eq!(td.action(action_id).unwrap().state, ActionState::Canceled);
        });
    }

    #[test]
    fn statuses_are_server_sequenced() {
        let store = Store::new();
        let bus = EventBus::new();
        let tenant = Uuid::new_v4();
        let action_id = seed(&store, tenant);
        let ctx = TenantContext::system(tenant);
        append_status(
            &store,
            &bus,
            &ctx,
            action_id,
            ActionState::Download,
            Some(Progress { cnt: 1, of: 4 }),
            vec![],
        )
        .unwrap();
        append_status(&store, &bus, &ctx, action_id, ActionState::Running, None, vec![]).unwrap();
        store.with_tenant(tenant, |td| {
            let history = td.status_history(action_id);
            assert!(history.windows(2).all(|w| w[0].sequence < w[1].sequence));
        });
    }
}
