//! In-process transactional store for all tenant-scoped entities.
//!
//! Every public operation runs under [`Store::with_tenant`], which holds the
//! tenant's lock for the duration of the closure — the row-level-locking
//! equivalent that linearizes group-counter recomputation and status
//! appends. Persistence technology is an external collaborator; this is the
//! storage interface the core programs against, with an in-memory
//! implementation behind it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;

use crate::error::CoreError;
use crate::filter::FilterQuery;
use crate::models::{
    Action, ActionState, ActionStatus, DistributionSet, DistributionSetType, Progress, Rollout,
    RolloutGroup, SoftwareModule, Target, TargetFilterQuery, UpdateStatus,
};
use crate::tenant::{TenantId, TenantSettings};

/// All state owned by a single tenant. Exclusive access is guaranteed by
/// the per-tenant lock in [`Store`].
pub struct TenantData {
    pub tenant: TenantId,
    next_id: i64,
    pub settings: TenantSettings,
    pub targets: BTreeMap<String, Target>,
    pub distribution_sets: BTreeMap<i64, DistributionSet>,
    pub ds_types: BTreeMap<String, DistributionSetType>,
    pub modules: BTreeMap<i64, SoftwareModule>,
    pub rollouts: BTreeMap<i64, Rollout>,
    pub groups: BTreeMap<i64, RolloutGroup>,
    pub actions: BTreeMap<i64, Action>,
    pub action_statuses: BTreeMap<i64, Vec<ActionStatus>>,
    pub filter_queries: BTreeMap<i64, TargetFilterQuery>,
}

impl TenantData {
    fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            next_id: 1,
            settings: TenantSettings::default(),
            targets: BTreeMap::new(),
            distribution_sets: BTreeMap::new(),
            ds_types: BTreeMap::new(),
            modules: BTreeMap::new(),
            rollouts: BTreeMap::new(),
            groups: BTreeMap::new(),
            actions: BTreeMap::new(),
            action_statuses: BTreeMap::new(),
            filter_queries: BTreeMap::new(),
        }
    }

    /// Monotonic id allocation; also used for status sequence numbers so
    /// appends are totally ordered by arrival within the tenant.
    pub fn alloc_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // ── Targets ──

    pub fn target(&self, controller_id: &str) -> Result<&Target, CoreError> {
        self.targets
            .get(controller_id)
            .filter(|t| !t.deleted)
            .ok_or_else(|| CoreError::not_found("target", controller_id))
    }

    pub fn target_mut(&mut self, controller_id: &str) -> Result<&mut Target, CoreError> {
        self.targets
            .get_mut(controller_id)
            .filter(|t| !t.deleted)
            .ok_or_else(|| CoreError::not_found("target", controller_id))
    }

    /// Count targets matching a parsed filter in one consistent snapshot.
    pub fn count_matching(&self, query: &FilterQuery) -> usize {
        self.live_targets().filter(|t| query.matches(t)).count()
    }

    /// Controller ids matching a parsed filter, in stable (id) order. The
    /// id list is collected eagerly under the tenant lock so callers get one
    /// consistent snapshot they can iterate after the transaction ends; ids
    /// only, never entity rows, which keeps the result small even for large
    /// fleets.
    pub fn matching_controller_ids(&self, query: &FilterQuery) -> Vec<String> {
        self.live_targets()
            .filter(|t| query.matches(t))
            .map(|t| t.controller_id.clone())
            .collect()
    }

    fn live_targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.values().filter(|t| !t.deleted)
    }

    /// Soft-delete a target; rows referenced by actions are never removed.
    pub fn delete_target(&mut self, controller_id: &str) -> Result<(), CoreError> {
        let has_actions = self
            .actions
            .values()
            .any(|a| a.controller_id == controller_id);
        let target = self.target_mut(controller_id)?;
        if has_actions {
            target.deleted = true;
        } else {
            self.targets.remove(controller_id);
        }
        Ok(())
    }

    /// Re-derive a target's update status from its action history.
    pub fn recompute_target_status(&mut self, controller_id: &str) {
        let mut latest_terminal: Option<(i64, ActionState)> = None;
        let mut any_active = false;
        for action in self.actions.values().filter(|a| a.controller_id == controller_id) {
            if action.is_active() {
                any_active = true;
            } else if latest_terminal.is_none_or(|(id, _)| action.id > id) {
                latest_terminal = Some((action.id, action.state));
            }
        }
        let Some(target) = self.targets.get_mut(controller_id) else {
            return;
        };
        target.update_status = if any_active {
            UpdateStatus::Pending
        } else {
            match latest_terminal {
                Some((_, ActionState::Error)) => UpdateStatus::Error,
                Some((_, ActionState::Finished)) => UpdateStatus::InSync,
                Some((_, _)) | None => {
                    if target.installed_ds.is_some() {
                        UpdateStatus::InSync
                    } else {
                        UpdateStatus::Registered
                    }
                }
            }
        };
    }

    // ── Distribution sets ──

    pub fn distribution_set(&self, ds_id: i64) -> Result<&DistributionSet, CoreError> {
        self.distribution_sets
            .get(&ds_id)
            .ok_or_else(|| CoreError::not_found("distribution set", ds_id))
    }

    // ── Actions ──

    pub fn action(&self, action_id: i64) -> Result<&Action, CoreError> {
        self.actions
            .get(&action_id)
            .ok_or_else(|| CoreError::not_found("action", action_id))
    }

    pub fn action_mut(&mut self, action_id: i64) -> Result<&mut Action, CoreError> {
        self.actions
            .get_mut(&action_id)
            .ok_or_else(|| CoreError::not_found("action", action_id))
    }

    pub fn active_actions_for_target(&self, controller_id: &str) -> Vec<i64> {
        self.actions
            .values()
            .filter(|a| a.controller_id == controller_id && a.is_active())
            .map(|a| a.id)
            .collect()
    }

    pub fn actions_in_group<'a>(&'a self, group_id: i64) -> impl Iterator<Item = &'a Action> {
        self.actions
            .values()
            .filter(move |a| a.group_id == Some(group_id))
    }

    /// Append an immutable status entry and move the action to `state`.
    /// The caller has already validated the transition.
    pub fn append_action_status(
        &mut self,
        action_id: i64,
        state: ActionState,
        progress: Option<Progress>,
        messages: Vec<String>,
    ) -> Result<(), CoreError> {
        let sequence = self.alloc_id();
        let action = self.action_mut(action_id)?;
        action.state = state;
        action.updated_at = Utc::now();
        let entry = ActionStatus {
            sequence,
            action_id,
            state,
            progress,
            messages,
            reported_at: Utc::now(),
        };
        self.action_statuses.entry(action_id).or_default().push(entry);
        Ok(())
    }

    pub fn status_history(&self, action_id: i64) -> &[ActionStatus] {
        self.action_statuses
            .get(&action_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    // ── Rollouts ──

    pub fn rollout(&self, rollout_id: i64) -> Result<&Rollout, CoreError> {
        self.rollouts
            .get(&rollout_id)
            .ok_or_else(|| CoreError::not_found("rollout", rollout_id))
    }

    pub fn rollout_mut(&mut self, rollout_id: i64) -> Result<&mut Rollout, CoreError> {
        self.rollouts
            .get_mut(&rollout_id)
            .ok_or_else(|| CoreError::not_found("rollout", rollout_id))
    }

    /// Groups of a rollout in their fixed sequence order.
    pub fn groups_of(&self, rollout_id: i64) -> Vec<i64> {
        let mut groups: Vec<&RolloutGroup> = self
            .groups
            .values()
            .filter(|g| g.rollout_id == rollout_id)
            .collect();
        groups.sort_by_key(|g| g.sequence);
        groups.iter().map(|g| g.id).collect()
    }

    pub fn group(&self, group_id: i64) -> Result<&RolloutGroup, CoreError> {
        self.groups
            .get(&group_id)
            .ok_or_else(|| CoreError::not_found("rollout group", group_id))
    }

    pub fn group_mut(&mut self, group_id: i64) -> Result<&mut RolloutGroup, CoreError> {
        self.groups
            .get_mut(&group_id)
            .ok_or_else(|| CoreError::not_found("rollout group", group_id))
    }

    // ── Filter queries ──

    pub fn filter_query(&self, filter_id: i64) -> Result<&TargetFilterQuery, CoreError> {
        self.filter_queries
            .get(&filter_id)
            .ok_or_else(|| CoreError::not_found("target filter query", filter_id))
    }
}

/// Process-wide store handle. Cheap to share via `Arc`.
#[derive(Default)]
pub struct Store {
    tenants: RwLock<HashMap<TenantId, Arc<Mutex<TenantData>>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` as one transaction over the tenant's data. Creates the
    /// tenant lazily on first touch.
    pub fn with_tenant<R>(&self, tenant: TenantId, f: impl FnOnce(&mut TenantData) -> R) -> R {
        let handle = self.tenant_handle(tenant);
        let mut data = handle.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut data)
    }

    /// Known tenant ids, for cross-tenant sweeps.
    pub fn tenants(&self) -> Vec<TenantId> {
        self.tenants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub fn settings(&self, tenant: TenantId) -> TenantSettings {
        self.with_tenant(tenant, |td| td.settings.clone())
    }

    fn tenant_handle(&self, tenant: TenantId) -> Arc<Mutex<TenantData>> {
        if let Some(handle) = self
            .tenants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tenant)
        {
            return handle.clone();
        }
        self.tenants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tenant)
            .or_insert_with(|| Arc::new(Mutex::new(TenantData::new(tenant))))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn tenants_are_isolated() {
        let store = Store::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.with_tenant(a, |td| {
            td.targets
                .insert("dev01".into(), Target::new(a, "dev01"));
        });
        let seen_in_b = store.with_tenant(b, |td| td.targets.len());
        assert_eq!(seen_in_b, 0);
        assert_eq!(store.tenants().len(), 2);
    }

    #[test]
    fn id_allocation_is_monotonic() {
        let store = Store::new();
        let tenant = Uuid::new_v4();
        let ids = store.with_tenant(tenant, |td| [td.alloc_id(), td.alloc_id(), td.alloc_id()]);
        assert!(ids[0] < ids[1] && ids[1] < ids[2]);
    }

    #[test]
    fn soft_delete_keeps_rows_referenced_by_actions() {
        let store = Store::new();
        let tenant = Uuid::new_v4();
        store.with_tenant(tenant, |td| {
            td.targets.insert("dev01".into(), Target::new(tenant, "dev01"));
            let id = td.alloc_id();
            td.actions.insert(
                id,
                Action {
                    id,
                    tenant_id: tenant,
                    controller_id: "dev01".into(),
                    ds_id: 1,
                    state: ActionState::Running,
                    action_type: crate::models::ActionType::Forced,
                    weight: 1000,
                    rollout_id: None,
                    group_id: None,
                    maintenance_window: None,
                    awaiting_confirmation: false,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
            );
            td.delete_target("dev01").unwrap();
            // Row survives soft-deleted, but lookups no longer see it.
            assert!(td.targets.contains_key("dev01"));
            assert!(td.target("dev01").is_err());
        });
    }

    #[test]
    fn deleted_targets_invisible_to_filters() {
        let store = Store::new();
        let tenant = Uuid::new_v4();
        let query = FilterQuery::parse("controllerid!=nothing").unwrap();
        store.with_tenant(tenant, |td| {
            td.targets.insert("dev01".into(), Target::new(tenant, "dev01"));
            let mut gone = Target::new(tenant, "dev02");
            gone.deleted = true;
            td.targets.insert("dev02".into(), gone);
            assert_eq!(td.count_matching(&query), 1);
            assert_eq!(td.matching_controller_ids(&query), vec!["dev01".to_string()]);
        });
    }
}
