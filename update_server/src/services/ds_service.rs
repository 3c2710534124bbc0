//! Distribution set management — composition against the set type's module
//! rules and invalidation with optional cancellation.
//!
//! `complete` is always derived from the type's mandatory module list, never
//! set directly; assignment pathways only ever check `assignable()`.

use crate::error::CoreError;
use crate::events::{ChangeType, EntityKind, Event, EventBus};
use crate::models::{ActionState, DistributionSet, DistributionSetType, RolloutState};
use crate::store::{Store, TenantData};
use crate::tenant::TenantContext;

#[derive(Debug, Clone)]
pub struct DistributionSetRequest {
    pub name: String,
    pub version: String,
    pub ds_type: String,
    pub module_ids: Vec<i64>,
    pub required_migration_step: bool,
}

/// Create a distribution set. Every module must exist and carry a module
/// type the set type allows; `complete` is derived from the mandatory list.
pub fn create_distribution_set(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    request: DistributionSetRequest,
) -> Result<i64, CoreError> {
    let ds_id = store.with_tenant(ctx.tenant, |td| {
        let ds_type = td
            .ds_types
            .get(&request.ds_type)
            .cloned()
            .ok_or_else(|| CoreError::not_found("distribution set type", &request.ds_type))?;
        for module_id in &request.module_ids {
            check_module_allowed(td, &ds_type, *module_id)?;
        }
        let complete = is_complete(td, &ds_type, &request.module_ids);
        let id = td.alloc_id();
        td.distribution_sets.insert(
            id,
            DistributionSet {
                id,
                tenant_id: td.tenant,
                name: request.name.clone(),
                version: request.version.clone(),
                ds_type: request.ds_type.clone(),
                module_ids: request.module_ids.clone(),
                valid: true,
                complete,
                required_migration_step: request.required_migration_step,
            },
        );
        Ok::<_, CoreError>(id)
    })?;
    bus.publish(&Event::entity(
        ctx.tenant,
        EntityKind::DistributionSet,
        ds_id,
        ChangeType::Created,
    ));
    tracing::info!(ds_id, name = %request.name, version = %request.version, "Distribution set created");
    Ok(ds_id)
}

/// Add a software module to a distribution set and re-derive `complete`.
/// Composition is frozen once the set has been assigned to any target.
pub fn assign_module(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    ds_id: i64,
    module_id: i64,
) -> Result<(), CoreError> {
    store.with_tenant(ctx.tenant, |td| {
        let ds = td.distribution_set(ds_id)?;
        if !ds.valid {
            return Err(CoreError::Validation(format!(
                "invalidated distribution set {ds_id} cannot be modified"
            )));
        }
        if ds.module_ids.contains(&module_id) {
            return Ok(());
        }
        let ds_type_key = ds.ds_type.clone();
        let mut module_ids = ds.module_ids.clone();
        if td.actions.values().any(|a| a.ds_id == ds_id) {
            return Err(CoreError::Validation(format!(
                "distribution set {ds_id} has been assigned, its module composition is frozen"
            )));
        }
        let ds_type = td
            .ds_types
            .get(&ds_type_key)
            .cloned()
            .ok_or_else(|| CoreError::not_found("distribution set type", ds_type_key))?;
        check_module_allowed(td, &ds_type, module_id)?;
        module_ids.push(module_id);
        let complete = is_complete(td, &ds_type, &module_ids);
        let ds = td
            .distribution_sets
            .get_mut(&ds_id)
            .ok_or_else(|| CoreError::not_found("distribution set", ds_id))?;
        ds.module_ids = module_ids;
        ds.complete = complete;
        Ok(())
    })?;
    bus.publish(&Event::entity(
        ctx.tenant,
        EntityKind::DistributionSet,
        ds_id,
        ChangeType::Updated,
    ));
    Ok(())
}

/// Invalidate a distribution set so it can no longer be newly assigned.
///
/// Auto-assignments pointing at the set are always switched off so the sweep
/// stops offering it. With `cancel`, rollouts deploying the set are stopped
/// and every in-flight action for it is put into cancellation; without it,
/// existing assignments run to completion untouched. Invalidating an already
/// invalid set is a no-op.
pub fn invalidate_distribution_set(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    ds_id: i64,
    cancel: bool,
) -> Result<(), CoreError> {
    let mut events = Vec::new();
    store.with_tenant(ctx.tenant, |td| {
        let tenant = td.tenant;
        if !td.distribution_set(ds_id)?.valid {
            tracing::debug!(ds_id, "Distribution set already invalidated, skipping");
            return Ok(());
        }
        td.distribution_sets
            .get_mut(&ds_id)
            .ok_or_else(|| CoreError::not_found("distribution set", ds_id))?
            .valid = false;
        events.push(Event::entity(
            tenant,
            EntityKind::DistributionSet,
            ds_id,
            ChangeType::Updated,
        ));

        let auto_assign_filters: Vec<i64> = td
            .filter_queries
            .values()
            .filter(|f| f.auto_assign_ds == Some(ds_id))
            .map(|f| f.id)
            .collect();
        for filter_id in auto_assign_filters {
            let filter = td
                .filter_queries
                .get_mut(&filter_id)
                .ok_or_else(|| CoreError::not_found("target filter query", filter_id))?;
            filter.auto_assign_ds = None;
            filter.auto_assign_action_type = None;
            filter.auto_assign_weight = None;
            filter.updated_at = chrono::Utc::now();
            events.push(Event::entity(
                tenant,
                EntityKind::TargetFilterQuery,
                filter_id,
                ChangeType::Updated,
            ));
            tracing::info!(ds_id, filter_id, "Auto-assignment disabled by invalidation");
        }

        if cancel {
            let affected_rollouts: Vec<i64> = td
                .rollouts
                .values()
                .filter(|r| r.ds_id == ds_id && !r.state.is_terminal())
                .map(|r| r.id)
                .collect();
            for rollout_id in affected_rollouts {
                crate::services::rollout_service::set_rollout_state(
                    td,
                    rollout_id,
                    RolloutState::Stopped,
                    &mut events,
                )?;
            }
            let active: Vec<i64> = td
                .actions
                .values()
                .filter(|a| a.ds_id == ds_id && a.is_active())
                .filter(|a| a.state.may_transition(ActionState::Cancelling))
                .map(|a| a.id)
                .collect();
            for action_id in active {
                crate::services::action_service::append_status_in(
                    td,
                    action_id,
                    ActionState::Cancelling,
                    None,
                    vec!["Distribution set invalidated".to_string()],
                    &mut events,
                )?;
            }
        }
        Ok(())
    })?;
    for event in &events {
        bus.publish(event);
    }
    tracing::info!(ds_id, cancel, "Distribution set invalidated");
    Ok(())
}

fn check_module_allowed(
    td: &TenantData,
    ds_type: &DistributionSetType,
    module_id: i64,
) -> Result<(), CoreError> {
    let module = td
        .modules
        .get(&module_id)
        .ok_or_else(|| CoreError::not_found("software module", module_id))?;
    if !ds_type.allows(&module.module_type) {
        return Err(CoreError::Validation(format!(
            "module type '{}' is not part of distribution set type '{}'",
            module.module_type, ds_type.key
        )));
    }
    Ok(())
}

/// Every mandatory module type of the set type is filled by some module.
fn is_complete(td: &TenantData, ds_type: &DistributionSetType, module_ids: &[i64]) -> bool {
    ds_type.mandatory_module_types.iter().all(|required| {
        module_ids
            .iter()
            .filter_map(|id| td.modules.get(id))
            .any(|m| &m.module_type == required)
    })
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::models::{SoftwareModule, Target};
    use crate::services::assignment_service::{assign_distribution_set, AssignmentRequest};
    use crate::services::filter_service;
    use crate::tenant::TenantId;

    fn seed_catalog(store: &Store, tenant: TenantId) -> (i64, i64) {
        store.with_tenant(tenant, |td| {
            td.ds_types.insert(
                "os_app".into(),
                DistributionSetType {
                    key: "os_app".into(),
                    name: "OS with app".into(),
                    mandatory_module_types: vec!["os".into()],
                    optional_module_types: vec!["application".into()],
                },
            );
            let os = td.alloc_id();
            td.modules.insert(
                os,
                SoftwareModule {
                    id: os,
                    tenant_id: tenant,
                    name: "base".into(),
                    version: "1.0".into(),
                    module_type: "os".into(),
                    artifacts: vec![],
                },
            );
            let app = td.alloc_id();
            td.modules.insert(
                app,
                SoftwareModule {
                    id: app,
                    tenant_id: tenant,
                    name: "agent".into(),
                    version: "3.2".into(),
                    module_type: "application".into(),
                    artifacts: vec![],
                },
            );
            (os, app)
        })
    }

    fn ds_request(modules: Vec<i64>) -> DistributionSetRequest {
        DistributionSetRequest {
            name: "bundle".into(),
            version: "1.0".into(),
            ds_type: "os_app".into(),
            module_ids: modules,
            required_migration_step: false,
        }
    }

    #[test]
    fn completeness_follows_mandatory_module_types() {
        let store = Store::new();
        let bus = EventBus::new();
        let tenant = Uuid::new_v4();
        let ctx = TenantContext::system(tenant);
        let (os, app) = seed_catalog(&store, tenant);

        // Only the optional application module: mandatory "os" is missing.
        let ds_id = create_distribution_set(&store, &bus, &ctx, ds_request(vec![app])).unwrap();
        store.with_tenant(tenant, |td| {
            let ds = td.distribution_set(ds_id).unwrap();
            assert!(!ds.complete);
            assert!(!ds.assignable());
        });

        assign_module(&store, &bus, &ctx, ds_id, os).unwrap();
        store.with_tenant(tenant, |td| {
            let ds = td.distribution_set(ds_id).unwrap();
            assert!(ds.complete);
            assert!(ds.assignable());
        });
    }

    #[test]
    fn disallowed_module_type_is_rejected() {
        let store = Store::new();
        let bus = EventBus::new();
        let tenant = Uuid::new_v4();
        let ctx = TenantContext::system(tenant);
        let (os, _) = seed_catalog(&store, tenant);
        let rogue = store.with_tenant(tenant, |td| {
            let id = td.alloc_id();
            td.modules.insert(
                id,
                SoftwareModule {
                    id,
                    tenant_id: tenant,
                    name: "bootloader".into(),
                    version: "0.9".into(),
                    module_type: "bootloader".into(),
                    artifacts: vec![],
                },
            );
            id
        });

        let result = create_distribution_set(&store, &bus, &ctx, ds_request(vec![os, rogue]));
        assert!(matches!(result, Err(CoreError::Validation(_))));

        let ds_id = create_distribution_set(&store, &bus, &ctx, ds_request(vec![os])).unwrap();
        assert!(matches!(
            assign_module(&store, &bus, &ctx, ds_id, rogue),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn composition_frozen_after_first_assignment() {
        let store = Store::new();
        let bus = EventBus::new();
        let tenant = Uuid::new_v4();
        let ctx = TenantContext::system(tenant);
        let (os, app) = seed_catalog(&store, tenant);
        let ds_id = create_distribution_set(&store, &bus, &ctx, ds_request(vec![os])).unwrap();
        store.with_tenant(tenant, |td| {
            td.targets.insert("dev01".into(), Target::new(tenant, "dev01"));
        });
        assign_distribution_set(&store, &bus, &ctx, AssignmentRequest::manual("dev01", ds_id))
            .unwrap();

        assert!(matches!(
            assign_module(&store, &bus, &ctx, ds_id, app),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn invalidation_without_cancel_leaves_actions_untouched() {
        let store = Store::new();
        let bus = EventBus::new();
        let tenant = Uuid::new_v4();
        let ctx = TenantContext::system(tenant);
        let (os, _) = seed_catalog(&store, tenant);
        let ds_id = create_distribution_set(&store, &bus, &ctx, ds_request(vec![os])).unwrap();
        store.with_tenant(tenant, |td| {
            td.targets.insert("dev01".into(), Target::new(tenant, "dev01"));
            td.targets.insert("dev02".into(), Target::new(tenant, "dev02"));
        });
        let action_id =
            assign_distribution_set(&store, &bus, &ctx, AssignmentRequest::manual("dev01", ds_id))
                .unwrap()
                .unwrap();

        invalidate_distribution_set(&store, &bus, &ctx, ds_id, false).unwrap();
        store.with_tenant(tenant, |td| {
            assert!(!td.distribution_set(ds_id).unwrap().valid);
            // The in-flight action keeps running.
            assert_eq!(td.action(action_id).unwrap().state, ActionState::Running);
        });

        // New assignments of the invalidated set are refused.
        let result =
            assign_distribution_set(&store, &bus, &ctx, AssignmentRequest::manual("dev02", ds_id));
        assert!(matches!(result, Err(CoreError::Validation(_))));

        // Repeating the invalidation is a no-op.
        invalidate_distribution_set(&store, &bus, &ctx, ds_id, false).unwrap();
    }

    #[test]
    fn invalidation_with_cancel_cancels_actions() {
        let store = Store::new();
        let bus = EventBus::new();
        let tenant = Uuid::new_v4();
        let ctx = TenantContext::system(tenant);
        let (os, _) = seed_catalog(&store, tenant);
        let ds_id = create_distribution_set(&store, &bus, &ctx, ds_request(vec![os])).unwrap();
        store.with_tenant(tenant, |td| {
            td.targets.insert("dev01".into(), Target::new(tenant, "dev01"));
        });
        let action_id =
            assign_distribution_set(&store, &bus, &ctx, AssignmentRequest::manual("dev01", ds_id))
                .unwrap()
                .unwrap();

        invalidate_distribution_set(&store, &bus, &ctx, ds_id, true).unwrap();
        store.with_tenant(tenant, |td| {
            assert_eq!(td.action(action_id).unwrap().state, ActionState::Cancelling);
        });
    }

    #[test]
    fn invalidation_disables_auto_assignment() {
        let store = Store::new();
        let bus = EventBus::new();
        let tenant = Uuid::new_v4();
        let ctx = TenantContext::system(tenant);
        let (os, _) = seed_catalog(&store, tenant);
        let ds_id = create_distribution_set(&store, &bus, &ctx, ds_request(vec![os])).unwrap();
        let filter_id =
            filter_service::create_filter(&store, &bus, &ctx, "all", "controllerid!=nothing")
                .unwrap();
        filter_service::set_auto_assignment(&store, &bus, &ctx, filter_id, Some(ds_id), None, None)
            .unwrap();

        invalidate_distribution_set(&store, &bus, &ctx, ds_id, false).unwrap();
        store.with_tenant(tenant, |td| {
            assert_eq!(td.filter_query(filter_id).unwrap().auto_assign_ds, None);
        });
    }
}
