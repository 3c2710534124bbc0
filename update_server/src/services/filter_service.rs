//! Target filter query management — named filters, auto-assign wiring,
//! and cached match counts.

use chrono::Utc;

use crate::cache::TenantCache;
use crate::error::CoreError;
use crate::events::{ChangeType, EntityKind, Event, EventBus};
use crate::filter::{virtual_props, FilterQuery};
use crate::models::{ActionType, TargetFilterQuery};
use crate::store::Store;
use crate::tenant::TenantContext;

/// Cache key prefix for per-filter match counts; invalidated wholesale on
/// target changes.
pub const MATCH_COUNT_PREFIX: &str = "filter-matches:";

/// Create a named filter. The query is validated by resolving its virtual
/// properties and parsing it; the raw (unresolved) form is stored.
pub fn create_filter(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    name: impl Into<String>,
    query: impl Into<String>,
) -> Result<i64, CoreError> {
    let name = name.into();
    let query = query.into();
    let filter_id = store.with_tenant(ctx.tenant, |td| {
        let resolved = virtual_props::resolve(&td.settings, &query, Utc::now())?;
        FilterQuery::parse(&resolved)?;
        let id = td.alloc_id();
        let now = Utc::now();
        td.filter_queries.insert(
            id,
            TargetFilterQuery {
                id,
                tenant_id: td.tenant,
                name,
                query,
                auto_assign_ds: None,
                auto_assign_action_type: None,
                auto_assign_weight: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok::<_, CoreError>(id)
    })?;
    bus.publish(&Event::entity(
        ctx.tenant,
        EntityKind::TargetFilterQuery,
        filter_id,
        ChangeType::Created,
    ));
    Ok(filter_id)
}

/// Replace a filter's query string, re-validating it.
pub fn update_filter_query(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    filter_id: i64,
    query: impl Into<String>,
) -> Result<(), CoreError> {
    let query = query.into();
    store.with_tenant(ctx.tenant, |td| {
        let resolved = virtual_props::resolve(&td.settings, &query, Utc::now())?;
        FilterQuery::parse(&resolved)?;
        let filter = td
            .filter_queries
            .get_mut(&filter_id)
            .ok_or_else(|| CoreError::not_found("target filter query", filter_id))?;
        filter.query = query;
        filter.updated_at = Utc::now();
        Ok::<_, CoreError>(())
    })?;
    bus.publish(&Event::entity(
        ctx.tenant,
        EntityKind::TargetFilterQuery,
        filter_id,
        ChangeType::Updated,
    ));
    Ok(())
}

/// Enable or disable auto-assignment for a filter. The distribution set is
/// validated when enabling.
pub fn set_auto_assignment(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    filter_id: i64,
    ds_id: Option<i64>,
    action_type: Option<ActionType>,
    weight: Option<i32>,
) -> Result<(), CoreError> {
    store.with_tenant(ctx.tenant, |td| {
        if let Some(ds_id) = ds_id {
            let ds = td.distribution_set(ds_id)?;
            if !ds.assignable() {
                return Err(CoreError::Validation(format!(
                    "distribution set {ds_id} is not assignable (incomplete or invalidated)"
                )));
            }
        }
        let filter = td
            .filter_queries
            .get_mut(&filter_id)
            .ok_or_else(|| CoreError::not_found("target filter query", filter_id))?;
        filter.auto_assign_ds = ds_id;
        filter.auto_assign_action_type = action_type;
        filter.auto_assign_weight = weight;
        filter.updated_at = Utc::now();
        Ok(())
    })?;
    bus.publish(&Event::entity(
        ctx.tenant,
        EntityKind::TargetFilterQuery,
        filter_id,
        ChangeType::Updated,
    ));
    Ok(())
}

pub fn delete_filter(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    filter_id: i64,
) -> Result<(), CoreError> {
    store.with_tenant(ctx.tenant, |td| {
        td.filter_queries
            .remove(&filter_id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found("target filter query", filter_id))
    })?;
    bus.publish(&Event::entity(
        ctx.tenant,
        EntityKind::TargetFilterQuery,
        filter_id,
        ChangeType::Deleted,
    ));
    Ok(())
}

/// Number of targets currently matching a filter, served from the cache
/// when fresh. Virtual properties are re-resolved on every recompute so
/// time-relative filters do not go stale inside the cache TTL window.
pub fn match_count(
    store: &Store,
    cache: &TenantCache<usize>,
    ctx: &TenantContext,
    filter_id: i64,
) -> Result<usize, CoreError> {
    let key = format!("{MATCH_COUNT_PREFIX}{filter_id}");
    if let Some(count) = cache.get(ctx.tenant, &key) {
        return Ok(count);
    }
    let count = store.with_tenant(ctx.tenant, |td| {
        let filter = td.filter_query(filter_id)?;
        let resolved = virtual_props::resolve(&td.settings, &filter.query, Utc::now())?;
        let query = FilterQuery::parse(&resolved)?;
        Ok::<_, CoreError>(td.count_matching(&query))
    })?;
    cache.put(ctx.tenant, key, count);
    Ok(count)
}
