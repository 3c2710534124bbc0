//! Rollout orchestration — staged deployment campaigns over filtered
//! target populations.
//!
//! Group progress is never tracked incrementally: every recompute derives
//! group counters from the current action states, so replaying feedback or
//! re-running the sweep can never drift the counters.

use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::events::{ChangeType, EntityKind, Event, EventBus};
use crate::filter::{virtual_props, FilterQuery};
use crate::models::{
    ActionState, ActionType, GroupCounters, GroupState, GroupStrategy, Rollout, RolloutErrorAction,
    RolloutGroup, RolloutState, StartType, StopPolicy,
};
use crate::services::assignment_service::{assign_in, AssignmentRequest};
use crate::store::{Store, TenantData};
use crate::tenant::TenantContext;

#[derive(Debug, Clone)]
pub struct RolloutRequest {
    pub name: String,
    pub ds_id: i64,
    pub filter: String,
    pub strategy: GroupStrategy,
    pub success_threshold: u8,
    pub error_threshold: Option<u8>,
    pub error_action: RolloutErrorAction,
    pub start_type: StartType,
    pub action_type: ActionType,
    pub weight: i32,
}

/// Create a rollout: snapshot the filter population and partition it into
/// groups. Ends in `Ready`.
pub fn create_rollout(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    request: RolloutRequest,
) -> Result<i64, CoreError> {
    validate_request(&request)?;
    let mut events = Vec::new();
    let rollout_id = store.with_tenant(ctx.tenant, |td| {
        let ds = td.distribution_set(request.ds_id)?;
        if !ds.assignable() {
            return Err(CoreError::Validation(format!(
                "distribution set {} is not assignable (incomplete or invalidated)",
                request.ds_id
            )));
        }

        // Virtual properties are resolved once, at creation time; the
        // stored filter is the resolved form.
        let resolved = virtual_props::resolve(&td.settings, &request.filter, Utc::now())?;
        let query = FilterQuery::parse(&resolved)?;
        let population = td.matching_controller_ids(&query);

        let rollout_id = td.alloc_id();
        let now = Utc::now();
        td.rollouts.insert(
            rollout_id,
            Rollout {
                id: rollout_id,
                tenant_id: td.tenant,
                name: request.name.clone(),
                ds_id: request.ds_id,
                filter: resolved,
                state: RolloutState::Creating,
                strategy: request.strategy.clone(),
                success_threshold: request.success_threshold,
                error_threshold: request.error_threshold,
                error_action: request.error_action,
                start_type: request.start_type,
                action_type: request.action_type,
                weight: request.weight,
                total_targets: 0,
                created_at: now,
                updated_at: now,
            },
        );

        match &request.strategy {
            GroupStrategy::Static { percentages } => {
                let partitions = partition_static(&population, percentages)?;
                for (sequence, members) in partitions.into_iter().enumerate() {
                    let group_id = td.alloc_id();
                    td.groups.insert(
                        group_id,
                        RolloutGroup {
                            id: group_id,
                            rollout_id,
                            sequence,
                            name: format!("{}-group-{}", request.name, sequence + 1),
                            state: GroupState::Scheduled,
                            members,
                            success_threshold: request.success_threshold,
                            error_threshold: request.error_threshold,
                        },
                    );
                }
                td.rollout_mut(rollout_id)?.total_targets = population.len();
            }
            GroupStrategy::Dynamic { .. } => {
                // Initial snapshot is grouped immediately; later arrivals
                // are picked up by the sweep.
                fill_dynamic_groups_in(td, rollout_id, &mut events)?;
            }
        }

        set_rollout_state(td, rollout_id, RolloutState::Ready, &mut events)?;
        let group_ids = td.groups_of(rollout_id);
        events.push(Event::entity(
            td.tenant,
            EntityKind::Rollout,
            rollout_id,
            ChangeType::Created,
        ));
        events.push(Event::bulk(
            td.tenant,
            EntityKind::RolloutGroup,
            group_ids,
            ChangeType::Created,
        ));
        Ok(rollout_id)
    })?;
    for event in &events {
        bus.publish(event);
    }
    tracing::info!(rollout_id, name = %request.name, "Rollout created");
    Ok(rollout_id)
}

/// Start a ready rollout: begins the first group.
pub fn start_rollout(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    rollout_id: i64,
) -> Result<(), CoreError> {
    let mut events = Vec::new();
    store.with_tenant(ctx.tenant, |td| {
        let state = td.rollout(rollout_id)?.state;
        if state != RolloutState::Ready {
            return Err(CoreError::Validation(format!(
                "rollout {rollout_id} cannot start from state {}",
                state.as_str()
            )));
        }
        set_rollout_state(td, rollout_id, RolloutState::Starting, &mut events)?;
        if let Some(first) = td.groups_of(rollout_id).first().copied() {
            start_group_in(td, rollout_id, first, &mut events)?;
        }
        set_rollout_state(td, rollout_id, RolloutState::Running, &mut events)
    })?;
    for event in &events {
        bus.publish(event);
    }
    tracing::info!(rollout_id, "Rollout started");
    Ok(())
}

pub fn pause_rollout(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    rollout_id: i64,
) -> Result<(), CoreError> {
    transition_rollout(store, bus, ctx, rollout_id, RolloutState::Running, RolloutState::Paused)
}

pub fn resume_rollout(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    rollout_id: i64,
) -> Result<(), CoreError> {
    transition_rollout(store, bus, ctx, rollout_id, RolloutState::Paused, RolloutState::Running)?;
    // A group may already satisfy its threshold; advance immediately.
    handle_rollout_progress(store, bus, ctx, rollout_id)
}

/// Stop a rollout for good. `StopPolicy::Force` additionally puts every
/// in-flight action into cancellation.
pub fn stop_rollout(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    rollout_id: i64,
    policy: StopPolicy,
) -> Result<(), CoreError> {
    let mut events = Vec::new();
    store.with_tenant(ctx.tenant, |td| {
        let state = td.rollout(rollout_id)?.state;
        if !matches!(
            state,
            RolloutState::Ready | RolloutState::Starting | RolloutState::Running
        ) {
            return Err(CoreError::Validation(format!(
                "rollout {rollout_id} cannot be stopped from state {}",
                state.as_str()
            )));
        }
        if policy == StopPolicy::Force {
            let active: Vec<i64> = td
                .actions
                .values()
                .filter(|a| a.rollout_id == Some(rollout_id) && a.is_active())
                .filter(|a| a.state.may_transition(ActionState::Cancelling))
                .map(|a| a.id)
                .collect();
            for action_id in active {
                crate::services::action_service::append_status_in(
                    td,
                    action_id,
                    ActionState::Cancelling,
                    None,
                    vec!["Rollout stopped".to_string()],
                    &mut events,
                )?;
            }
        }
        set_rollout_state(td, rollout_id, RolloutState::Stopped, &mut events)
    })?;
    for event in &events {
        bus.publish(event);
    }
    tracing::info!(rollout_id, forced = policy == StopPolicy::Force, "Rollout stopped");
    Ok(())
}

/// Recompute a running rollout from its action states: finish groups whose
/// success threshold is met, error groups past their error threshold
/// (applying the rollout's error action), start the next scheduled group,
/// and finish the rollout once every group is terminal.
///
/// Idempotent: counters are derived, never incremented, so calling this any
/// number of times converges on the same state.
pub fn handle_rollout_progress(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    rollout_id: i64,
) -> Result<(), CoreError> {
    let mut events = Vec::new();
    store.with_tenant(ctx.tenant, |td| {
        if td.rollout(rollout_id)?.state != RolloutState::Running {
            return Ok(());
        }
        let group_ids = td.groups_of(rollout_id);
        let mut prior_all_terminal = true;
        for group_id in group_ids {
            // The rollout may have left Running while processing an
            // earlier group's error action.
            if td.rollout(rollout_id)?.state != RolloutState::Running {
                break;
            }
            let group = td.group(group_id)?;
            let counters = GroupCounters::derive(group, td.actions_in_group(group_id));
            match group.state {
                GroupState::Running => {
                    if exceeds_error_threshold(group, &counters) {
                        let error_action = td.rollout(rollout_id)?.error_action;
                        set_group_state(td, group_id, GroupState::Error, &mut events)?;
                        match error_action {
                            RolloutErrorAction::PauseRollout => {
                                set_rollout_state(td, rollout_id, RolloutState::Paused, &mut events)?;
                            }
                            RolloutErrorAction::HaltRollout => {
                                set_rollout_state(td, rollout_id, RolloutState::Error, &mut events)?;
                            }
                            RolloutErrorAction::Continue => {}
                        }
                    } else if meets_success_threshold(group, &counters) {
                        set_group_state(td, group_id, GroupState::Finished, &mut events)?;
                    } else {
                        prior_all_terminal = false;
                    }
                }
                GroupState::Scheduled => {
                    if prior_all_terminal {
                        start_group_in(td, rollout_id, group_id, &mut events)?;
                        prior_all_terminal = false;
                    } else {
                        prior_all_terminal = false;
                    }
                }
                GroupState::Finished | GroupState::Error => {}
            }
            if !td.group(group_id)?.state.is_terminal() {
                prior_all_terminal = false;
            }
        }

        let rollout = td.rollout(rollout_id)?;
        if rollout.state == RolloutState::Running && rollout_complete(td, rollout_id)? {
            set_rollout_state(td, rollout_id, RolloutState::Finished, &mut events)?;
        }
        Ok(())
    })?;
    for event in &events {
        bus.publish(event);
    }
    Ok(())
}

/// Admit newly matching targets into a dynamic rollout's groups, creating
/// groups as needed up to the strategy's `max_groups`. Returns the number
/// of targets admitted.
pub fn fill_dynamic_groups(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    rollout_id: i64,
) -> Result<usize, CoreError> {
    let mut events = Vec::new();
    let admitted =
        store.with_tenant(ctx.tenant, |td| fill_dynamic_groups_in(td, rollout_id, &mut events))?;
    for event in &events {
        bus.publish(event);
    }
    Ok(admitted)
}

/// One periodic pass over a tenant's rollouts: start due auto/scheduled
/// rollouts, admit new targets into dynamic ones, recompute running ones.
/// Per-rollout failures are logged and do not stop the sweep.
pub fn run_rollout_sweep(store: &Store, bus: &EventBus, ctx: &TenantContext, now: DateTime<Utc>) {
    let rollouts: Vec<(i64, RolloutState, StartType, bool)> = store.with_tenant(ctx.tenant, |td| {
        td.rollouts
            .values()
            .map(|r| {
                (
                    r.id,
                    r.state,
                    r.start_type,
                    matches!(r.strategy, GroupStrategy::Dynamic { .. }),
                )
            })
            .collect()
    });

    let mut active = 0usize;
    for (rollout_id, state, start_type, dynamic) in rollouts {
        let result = match state {
            RolloutState::Ready => match start_type {
                StartType::Auto => start_rollout(store, bus, ctx, rollout_id),
                StartType::Scheduled { at } if at <= now => start_rollout(store, bus, ctx, rollout_id),
                _ => Ok(()),
            },
            RolloutState::Running => {
                active += 1;
                let fill = if dynamic {
                    fill_dynamic_groups(store, bus, ctx, rollout_id).map(|_| ())
                } else {
                    Ok(())
                };
                fill.and_then(|_| handle_rollout_progress(store, bus, ctx, rollout_id))
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            tracing::error!(rollout_id, "Rollout sweep error: {e}");
        }
    }
    crate::metrics::active_rollouts(active);
}

fn validate_request(request: &RolloutRequest) -> Result<(), CoreError> {
    if request.success_threshold > 100 {
        return Err(CoreError::Validation(format!(
            "success threshold {} exceeds 100",
            request.success_threshold
        )));
    }
    if let Some(et) = request.error_threshold {
        if et > 100 {
            return Err(CoreError::Validation(format!(
                "error threshold {et} exceeds 100"
            )));
        }
    }
    if let GroupStrategy::Dynamic {
        target_count,
        max_groups,
        ..
    } = &request.strategy
    {
        if *target_count == 0 || *max_groups == 0 {
            return Err(CoreError::InvalidGroupDefinition(
                "dynamic strategy needs a positive target count and group limit".to_string(),
            ));
        }
    }
    Ok(())
}

/// Partition the population sequentially across the percentage splits.
/// Cumulative integer boundaries guarantee every target lands in exactly
/// one group.
fn partition_static(
    population: &[String],
    percentages: &[u8],
) -> Result<Vec<Vec<String>>, CoreError> {
    if percentages.is_empty() {
        return Err(CoreError::InvalidGroupDefinition(
            "at least one group is required".to_string(),
        ));
    }
    if percentages.iter().any(|p| *p == 0) {
        return Err(CoreError::InvalidGroupDefinition(
            "zero-percent groups are not allowed".to_string(),
        ));
    }
    let sum: u32 = percentages.iter().map(|p| *p as u32).sum();
    if sum != 100 {
        return Err(CoreError::InvalidGroupDefinition(format!(
            "group percentages sum to {sum}, expected 100"
        )));
    }
    let total = population.len();
    let mut partitions = Vec::with_capacity(percentages.len());
    let mut cumulative = 0u32;
    let mut start = 0usize;
    for percent in percentages {
        cumulative += *percent as u32;
        let end = (total as u64 * cumulative as u64 / 100) as usize;
        partitions.push(population[start..end].to_vec());
        start = end;
    }
    Ok(partitions)
}

/// Start one group: create an action per member via the shared assignment
/// pathway. Per-member failures are logged and skipped so a single broken
/// target never wedges the group.
fn start_group_in(
    td: &mut TenantData,
    rollout_id: i64,
    group_id: i64,
    events: &mut Vec<Event>,
) -> Result<(), CoreError> {
    let rollout = td.rollout(rollout_id)?;
    let (ds_id, action_type, weight) = (rollout.ds_id, rollout.action_type, rollout.weight);
    let members = td.group(group_id)?.members.clone();
    set_group_state(td, group_id, GroupState::Running, events)?;
    for controller_id in members {
        let request = AssignmentRequest {
            controller_id: controller_id.clone(),
            ds_id,
            action_type,
            weight,
            maintenance_window: None,
            rollout_id: Some(rollout_id),
            group_id: Some(group_id),
        };
        if let Err(e) = assign_in(td, &request, events) {
            tracing::warn!(
                rollout_id,
                group_id,
                controller_id = %controller_id,
                "Skipping group member: {e}"
            );
        }
    }
    Ok(())
}

pub(crate) fn fill_dynamic_groups_in(
    td: &mut TenantData,
    rollout_id: i64,
    events: &mut Vec<Event>,
) -> Result<usize, CoreError> {
    let rollout = td.rollout(rollout_id)?;
    let GroupStrategy::Dynamic {
        suffix,
        target_count,
        max_groups,
    } = rollout.strategy.clone()
    else {
        return Ok(0);
    };
    let name = rollout.name.clone();
    let query = FilterQuery::parse(&rollout.filter)?;

    let group_ids = td.groups_of(rollout_id);
    let mut known: std::collections::HashSet<String> = std::collections::HashSet::new();
    for group_id in &group_ids {
        known.extend(td.group(*group_id)?.members.iter().cloned());
    }
    let newcomers: Vec<String> = td
        .matching_controller_ids(&query)
        .into_iter()
        .filter(|id| !known.contains(id))
        .collect();
    if newcomers.is_empty() {
        return Ok(0);
    }

    let mut admitted = 0usize;
    let mut pending = std::collections::VecDeque::from(newcomers);
    let mut group_count = group_ids.len();
    // Top up the newest non-terminal group before opening another.
    let mut open_group = group_ids
        .last()
        .copied()
        .filter(|id| td.groups.get(id).is_some_and(|g| !g.state.is_terminal()));

    while !pending.is_empty() {
        let group_id = match open_group.take() {
            Some(id) => id,
            None => {
                if group_count >= max_groups {
                    break;
                }
                group_count += 1;
                let rollout = td.rollout(rollout_id)?;
                let (success_threshold, error_threshold) =
                    (rollout.success_threshold, rollout.error_threshold);
                let id = td.alloc_id();
                td.groups.insert(
                    id,
                    RolloutGroup {
                        id,
                        rollout_id,
                        sequence: group_count - 1,
                        name: format!("{name}-{suffix}-{group_count}"),
                        state: GroupState::Scheduled,
                        members: Vec::new(),
                        success_threshold,
                        error_threshold,
                    },
                );
                events.push(Event::entity(
                    td.tenant,
                    EntityKind::RolloutGroup,
                    id,
                    ChangeType::Created,
                ));
                id
            }
        };

        let capacity = target_count.saturating_sub(td.group(group_id)?.total());
        let batch: Vec<String> = pending.drain(..capacity.min(pending.len())).collect();
        let group_running = td.group(group_id)?.state == GroupState::Running;
        for controller_id in batch {
            td.group_mut(group_id)?.members.push(controller_id.clone());
            admitted += 1;
            // Members admitted into an already-running group get their
            // action right away.
            if group_running {
                let rollout = td.rollout(rollout_id)?;
                let request = AssignmentRequest {
                    controller_id: controller_id.clone(),
                    ds_id: rollout.ds_id,
                    action_type: rollout.action_type,
                    weight: rollout.weight,
                    maintenance_window: None,
                    rollout_id: Some(rollout_id),
                    group_id: Some(group_id),
                };
                if let Err(e) = assign_in(td, &request, events) {
                    tracing::warn!(rollout_id, group_id, controller_id = %controller_id, "Skipping admitted target: {e}");
                }
            }
        }
        events.push(Event::entity(
            td.tenant,
            EntityKind::RolloutGroup,
            group_id,
            ChangeType::Updated,
        ));
    }

    if admitted > 0 {
        td.rollout_mut(rollout_id)?.total_targets += admitted;
    }
    Ok(admitted)
}

fn meets_success_threshold(group: &RolloutGroup, counters: &GroupCounters) -> bool {
    counters.terminal() * 100 >= group.success_threshold as usize * group.total()
}

fn exceeds_error_threshold(group: &RolloutGroup, counters: &GroupCounters) -> bool {
    match group.error_threshold {
        Some(threshold) => group.total() > 0 && counters.error * 100 > threshold as usize * group.total(),
        None => false,
    }
}

fn rollout_complete(td: &TenantData, rollout_id: i64) -> Result<bool, CoreError> {
    let rollout = td.rollout(rollout_id)?;
    let group_ids = td.groups_of(rollout_id);
    if group_ids.is_empty() {
        // A dynamic rollout with no groups yet is waiting for targets.
        return Ok(matches!(rollout.strategy, GroupStrategy::Static { .. }));
    }
    for group_id in &group_ids {
        if !td.group(*group_id)?.state.is_terminal() {
            return Ok(false);
        }
    }
    // Dynamic rollouts keep running until their group limit is reached;
    // new targets may still arrive.
    if let GroupStrategy::Dynamic { max_groups, .. } = &rollout.strategy {
        return Ok(group_ids.len() >= *max_groups);
    }
    Ok(true)
}

fn transition_rollout(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    rollout_id: i64,
    from: RolloutState,
    to: RolloutState,
) -> Result<(), CoreError> {
    let mut events = Vec::new();
    store.with_tenant(ctx.tenant, |td| {
        let state = td.rollout(rollout_id)?.state;
        if state != from {
            return Err(CoreError::Validation(format!(
                "rollout {rollout_id} is {}, expected {}",
                state.as_str(),
                from.as_str()
            )));
        }
        set_rollout_state(td, rollout_id, to, &mut events)
    })?;
    for event in &events {
        bus.publish(event);
    }
    Ok(())
}

pub(crate) fn set_rollout_state(
    td: &mut TenantData,
    rollout_id: i64,
    state: RolloutState,
    events: &mut Vec<Event>,
) -> Result<(), CoreError> {
    let rollout = td.rollout_mut(rollout_id)?;
    if rollout.state == state {
        return Ok(());
    }
    rollout.state = state;
    rollout.updated_at = Utc::now();
    crate::metrics::rollout_status_changed(state.as_str());
    events.push(Event::entity(
        td.tenant,
        EntityKind::Rollout,
        rollout_id,
        ChangeType::Updated,
    ));
    Ok(())
}

fn set_group_state(
    td: &mut TenantData,
    group_id: i64,
    state: GroupState,
    events: &mut Vec<Event>,
) -> Result<(), CoreError> {
    let group = td.group_mut(group_id)?;
    if group.state == state {
        return Ok(());
    }
    group.state = state;
    events.push(Event::entity(
        td.tenant,
        EntityKind::RolloutGroup,
        group_id,
        ChangeType::Updated,
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_partition_covers_every_target_exactly_once() {
        let population: Vec<String> = (0..7).map(|i| format!("dev{i:02}")).collect();
        let partitions = partition_static(&population, &[30, 30, 40]).unwrap();
        assert_eq!(partitions.len(), 3);
        let mut rejoined: Vec<String> = partitions.concat();
        rejoined.sort();
        let mut expected = population.clone();
        expected.sort();
        assert_eq!(rejoined, expected);
    }

    #[test]
    fn static_partition_rejects_bad_percentages() {
        let population = vec!["dev01".to_string()];
        assert!(matches!(
            partition_static(&population, &[]),
            Err(CoreError::InvalidGroupDefinition(_))
        ));
        assert!(matches!(
            partition_static(&population, &[50, 40]),
            Err(CoreError::InvalidGroupDefinition(_))
        ));
        assert!(matches!(
            partition_static(&population, &[100, 0]),
            Err(CoreError::InvalidGroupDefinition(_))
        ));
    }

    #[test]
    fn empty_population_partitions_into_empty_groups() {
        let partitions = partition_static(&[], &[50, 50]).unwrap();
        assert_eq!(partitions.len(), 2);
        assert!(partitions.iter().all(|p| p.is_empty()));
    }

    #[test]
    fn success_threshold_on_empty_group_is_met() {
        let group = RolloutGroup {
            id: 1,
            rollout_id: 1,
            sequence: 0,
            name: "g".into(),
            state: GroupState::Running,
            members: vec![],
            success_threshold: 50,
            error_threshold: None,
        };
        let counters = GroupCounters::default();
        assert!(meets_success_threshold(&group, &counters));
    }

    #[test]
    fn error_threshold_is_strictly_above() {
        let group = RolloutGroup {
            id: 1,
            rollout_id: 1,
            sequence: 0,
            name: "g".into(),
            state: GroupState::Running,
            members: (0..10).map(|i| format!("dev{i}")).collect(),
            success_threshold: 50,
            error_threshold: Some(20),
        };
        let at = GroupCounters {
            error: 2,
            ..Default::default()
        };
        let above = GroupCounters {
            error: 3,
            ..Default::default()
        };
        assert!(!exceeds_error_threshold(&group, &at));
        assert!(exceeds_error_threshold(&group, &above));
    }
}
