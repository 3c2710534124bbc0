//! Background executors — periodic auto-assignment and rollout handling.
//!
//! Two independent loops, spawned as tokio tasks from `main`. Each pass is
//! fallible in isolation: errors are logged and the loop keeps going.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::config::ServerConfig;
use crate::events::EventBus;
use crate::services::{auto_assign, rollout_service};
use crate::store::Store;
use crate::tenant::TenantContext;

/// Run the auto-assignment loop forever.
pub async fn run_auto_assign_loop(store: Arc<Store>, bus: Arc<EventBus>, config: ServerConfig) {
    tracing::info!(
        interval_secs = config.auto_assign_interval_secs,
        "Auto-assign executor started"
    );
    loop {
        let started = Instant::now();
        auto_assign::check_all_targets(&store, &bus);
        crate::metrics::auto_assign_sweep_duration(started.elapsed().as_millis() as u64);
        tokio::time::sleep(Duration::from_secs(config.auto_assign_interval_secs)).await;
    }
}

/// Run the rollout handler loop forever: starts due rollouts, admits new
/// targets into dynamic groups, and recomputes running rollouts.
pub async fn run_rollout_loop(store: Arc<Store>, bus: Arc<EventBus>, config: ServerConfig) {
    tracing::info!(
        interval_secs = config.rollout_interval_secs,
        "Rollout executor started"
    );
    loop {
        let started = Instant::now();
        let now = Utc::now();
        for tenant in store.tenants() {
            let ctx = TenantContext::system(tenant);
            rollout_service::run_rollout_sweep(&store, &bus, &ctx, now);
        }
        crate::metrics::rollout_sweep_duration(started.elapsed().as_millis() as u64);
        tokio::time::sleep(Duration::from_secs(config.rollout_interval_secs)).await;
    }
}
