//! Demo seeder — a small fleet, a distribution set, an auto-assign filter
//! and a two-group rollout for local exploration.

use chrono::Utc;

use crate::error::CoreError;
use crate::events::EventBus;
use crate::models::{
    ActionType, ArtifactMeta, DistributionSetType, GroupStrategy, RolloutErrorAction,
    SoftwareModule, StartType, Target, DEFAULT_ACTION_WEIGHT,
};
use crate::services::{ds_service, filter_service, rollout_service};
use crate::store::Store;
use crate::tenant::{TenantContext, TenantId};

/// Seed demo data for one fresh tenant. Returns the tenant id.
pub fn seed_demo(store: &Store, bus: &EventBus) -> Result<TenantId, CoreError> {
    let tenant = uuid::Uuid::new_v4();
    let ctx = TenantContext::system(tenant);

    let os_module = store.with_tenant(tenant, |td| {
        td.ds_types.insert(
            "os_app".into(),
            DistributionSetType {
                key: "os_app".into(),
                name: "OS with app".into(),
                mandatory_module_types: vec!["os".into()],
                optional_module_types: vec!["application".into()],
            },
        );
        let os_module = td.alloc_id();
        td.modules.insert(
            os_module,
            SoftwareModule {
                id: os_module,
                tenant_id: tenant,
                name: "corebase".into(),
                version: "1.4.0".into(),
                module_type: "os".into(),
                artifacts: vec![ArtifactMeta {
                    id: 1,
                    filename: "corebase-1.4.0.img".into(),
                    size: 4_194_304,
                }],
            },
        );
        for i in 0..10 {
            let mut target = Target::new(tenant, format!("demo-{i:03}"));
            target.name = format!("Demo device {i:03}");
            target.last_contact = Some(Utc::now());
            if i % 2 == 0 {
                target.tags.insert("canary".into());
            }
            target.attributes.insert("hw".into(), "rev2".into());
            td.targets.insert(target.controller_id.clone(), target);
        }
        os_module
    });

    let ds_id = ds_service::create_distribution_set(
        store,
        bus,
        &ctx,
        ds_service::DistributionSetRequest {
            name: "corebase".into(),
            version: "1.4.0".into(),
            ds_type: "os_app".into(),
            module_ids: vec![os_module],
            required_migration_step: false,
        },
    )?;

    let filter_id = filter_service::create_filter(store, bus, &ctx, "canary fleet", "tag==canary")?;
    filter_service::set_auto_assignment(
        store,
        bus,
        &ctx,
        filter_id,
        Some(ds_id),
        Some(ActionType::Soft),
        None,
    )?;

    let rollout_id = rollout_service::create_rollout(
        store,
        bus,
        &ctx,
        rollout_service::RolloutRequest {
            name: "corebase-1.4.0".into(),
            ds_id,
            filter: "attribute.hw==rev2".into(),
            strategy: GroupStrategy::Static {
                percentages: vec![20, 80],
            },
            success_threshold: 80,
            error_threshold: Some(20),
            error_action: RolloutErrorAction::PauseRollout,
            start_type: StartType::Manual,
            action_type: ActionType::Forced,
            weight: DEFAULT_ACTION_WEIGHT,
        },
    )?;

    tracing::info!(
        tenant = %tenant,
        ds_id,
        rollout_id,
        "Seeded demo tenant with 10 targets and a two-group rollout"
    );
    Ok(tenant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RolloutState;

    #[test]
    fn demo_seed_produces_ready_rollout() {
        let store = Store::new();
        let bus = EventBus::new();
        let tenant = seed_demo(&store, &bus).unwrap();
        store.with_tenant(tenant, |td| {
            assert_eq!(td.targets.len(), 10);
            let rollout = td.rollouts.values().next().unwrap();
            assert_eq!(rollout.state, RolloutState::Ready);
            assert_eq!(rollout.total_targets, 10);
            assert_eq!(td.groups_of(rollout.id).len(), 2);
        });
    }
}
