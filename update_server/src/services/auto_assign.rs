//! Auto-assignment — applies target filter queries with an auto-assign
//! distribution set to newly matching targets.
//!
//! Runs under a system tenant context: elevated within the tenant, never
//! across tenants. A target qualifies only if it has never had an action
//! for the filter's distribution set, so devices that already completed
//! (or failed) the update are not re-targeted.

use chrono::Utc;

use crate::error::CoreError;
use crate::events::EventBus;
use crate::filter::{virtual_props, FilterQuery};
use crate::models::{ActionType, DEFAULT_ACTION_WEIGHT};
use crate::services::assignment_service::{assign_in, AssignmentRequest};
use crate::store::{Store, TenantData};
use crate::tenant::{TenantContext, TenantId};

/// Run one auto-assignment pass over every tenant. Per-filter and
/// per-target failures are logged and skipped.
pub fn check_all_targets(store: &Store, bus: &EventBus) {
    for tenant in store.tenants() {
        let ctx = TenantContext::system(tenant);
        if let Err(e) = check_tenant(store, bus, &ctx, None) {
            tracing::error!(tenant = %tenant, "Auto-assign pass failed: {e}");
        }
    }
}

/// Auto-assignment for a single target, invoked right after the target
/// registers or polls.
pub fn check_single_target(
    store: &Store,
    bus: &EventBus,
    tenant: TenantId,
    controller_id: &str,
) -> Result<(), CoreError> {
    let ctx = TenantContext::system(tenant);
    check_tenant(store, bus, &ctx, Some(controller_id))
}

fn check_tenant(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    only_controller: Option<&str>,
) -> Result<(), CoreError> {
    let filters: Vec<i64> = store.with_tenant(ctx.tenant, |td| {
        td.filter_queries
            .values()
            .filter(|f| f.auto_assign_configured())
            .map(|f| f.id)
            .collect()
    });
    for filter_id in filters {
        let mut events = Vec::new();
        let result = store.with_tenant(ctx.tenant, |td| {
            apply_filter_in(td, filter_id, only_controller, &mut events)
        });
        for event in &events {
            bus.publish(event);
        }
        match result {
            Ok(assigned) if assigned > 0 => {
                tracing::info!(filter_id, assigned, "Auto-assignment applied");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(filter_id, "Auto-assign filter skipped: {e}"),
        }
    }
    Ok(())
}

fn apply_filter_in(
    td: &mut TenantData,
    filter_id: i64,
    only_controller: Option<&str>,
    events: &mut Vec<crate::events::Event>,
) -> Result<usize, CoreError> {
    let filter = td.filter_query(filter_id)?;
    let Some(ds_id) = filter.auto_assign_ds else {
        return Ok(0);
    };
    let action_type = filter.auto_assign_action_type.unwrap_or(ActionType::Forced);
    let weight = filter.auto_assign_weight.unwrap_or(DEFAULT_ACTION_WEIGHT);

    let resolved = virtual_props::resolve(&td.settings, &filter.query, Utc::now())?;
    let query = FilterQuery::parse(&resolved)?;

    // Any action for this exact DS, open or closed, disqualifies a target.
    let seen: std::collections::HashSet<String> = td
        .actions
        .values()
        .filter(|a| a.ds_id == ds_id)
        .map(|a| a.controller_id.clone())
        .collect();
    let candidates: Vec<String> = td
        .matching_controller_ids(&query)
        .into_iter()
        .filter(|id| !seen.contains(id))
        .filter(|id| only_controller.is_none_or(|c| c == id))
        .collect();

    let mut assigned = 0usize;
    for controller_id in candidates {
        let request = AssignmentRequest {
            controller_id: controller_id.clone(),
            ds_id,
            action_type,
            weight,
            maintenance_window: None,
            rollout_id: None,
            group_id: None,
        };
        match assign_in(td, &request, events) {
            Ok(Some(_)) => {
                assigned += 1;
                crate::metrics::auto_assignment_created();
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    filter_id,
                    controller_id = %controller_id,
                    "Auto-assign skipped target: {e}"
                );
            }
        }
    }
    Ok(assigned)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::models::{DistributionSet, Target, TargetFilterQuery};
    use crate::services::action_service;
    use crate::tenant::TenantContext;

    fn seed(store: &Store, tenant: TenantId) {
        store.with_tenant(tenant, |td| {
            for i in 0..3 {
                let mut target = Target::new(tenant, format!("dev{i:02}"));
                target.attributes.insert("hw".into(), "rev2".into());
                td.targets.insert(target.controller_id.clone(), target);
            }
            let mut other = Target::new(tenant, "other");
            other.attributes.insert("hw".into(), "rev1".into());
            td.targets.insert("other".into(), other);
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
            let id = td.alloc_id();
            td.filter_queries.insert(
                id,
                TargetFilterQuery {
                    id,
                    tenant_id: tenant,
                    name: "rev2 fleet".into(),
                    query: "attribute.hw==rev2".into(),
                    auto_assign_ds: Some(1),
                    auto_assign_action_type: None,
                    auto_assign_weight: None,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
            );
        });
    }

    #[test]
    fn assigns_only_matching_targets() {
        let store = Store::new();
        let bus = EventBus::new();
        let tenant = Uuid::new_v4();
        seed(&store, tenant);
        check_all_targets(&store, &bus);
        store.with_tenant(tenant, |td| {
            assert_eq!(td.actions.len(), 3);
            assert!(td.actions.values().all(|a| a.controller_id != "other"));
        });
    }

    #[test]
    fn sweep_is_idempotent() {
        let store = Store::new();
        let bus = EventBus::new();
        let tenant = Uuid::new_v4();
        seed(&store, tenant);
        check_all_targets(&store, &bus);
        check_all_targets(&store, &bus);
        store.with_tenant(tenant, |td| {
            assert_eq!(td.actions.len(), 3);
        });
    }

    #[test]
    fn closed_action_for_ds_disqualifies_target() {
        let store = Store::new();
        let bus = EventBus::new();
        let tenant = Uuid::new_v4();
        seed(&store, tenant);
        check_all_targets(&store, &bus);
        let ctx = TenantContext::system(tenant);
        let action_ids: Vec<i64> = store.with_tenant(tenant, |td| td.actions.keys().copied().collect());
        for id in action_ids {
            action_service::append_status(
                &store,
                &bus,
                &ctx,
                id,
                crate::models::ActionState::Finished,
                None,
                vec![],
            )
            .unwrap();
        }
        check_all_targets(&store, &bus);
        store.with_tenant(tenant, |td| {
            assert_eq!(td.actions.len(), 3, "finished targets must not be re-targeted");
        });
    }

    #[test]
    fn single_target_check_scopes_to_one_controller() {
        let store = Store::new();
        let bus = EventBus::new();
        let tenant = Uuid::new_v4();
        seed(&store, tenant);
        check_single_target(&store, &bus, tenant, "dev01").unwrap();
        store.with_tenant(tenant, |td| {
            assert_eq!(td.actions.len(), 1);
            assert!(td.actions.values().all(|a| a.controller_id == "dev01"));
        });
    }
}
