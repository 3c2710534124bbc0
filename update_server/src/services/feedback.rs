//! Inbound controller feedback — transport-neutral ingest of device
//! status reports and polls.
//!
//! Device-facing transports (poll-based HTTP, messaging) deserialize into
//! [`ControllerFeedback`] and hand it here; the tracking rules live in
//! `action_service`, never in a transport.

use chrono::Utc;
use serde::Deserialize;

use crate::error::CoreError;
use crate::events::{ChangeType, EntityKind, Event, EventBus};
use crate::models::{ActionState, Progress, Target};
use crate::services::{action_service, auto_assign};
use crate::store::Store;
use crate::tenant::TenantContext;

/// One status report from a device about one of its actions.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerFeedback {
    pub controller_id: String,
    pub action_id: i64,
    pub status: ActionState,
    #[serde(default)]
    pub progress: Option<Progress>,
    #[serde(default)]
    pub messages: Vec<String>,
}

/// Ingest a feedback report. The action must belong to the reporting
/// controller; cross-device reports are rejected.
pub fn ingest(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    feedback: ControllerFeedback,
) -> Result<(), CoreError> {
    let owner = store.with_tenant(ctx.tenant, |td| {
        td.action(feedback.action_id).map(|a| a.controller_id.clone())
    })?;
    if owner != feedback.controller_id {
        return Err(CoreError::Validation(format!(
            "action {} does not belong to controller '{}'",
            feedback.action_id, feedback.controller_id
        )));
    }
    action_service::append_status(
        store,
        bus,
        ctx,
        feedback.action_id,
        feedback.status,
        feedback.progress,
        feedback.messages,
    )
}

/// Record a device poll: refresh last-contact, register the target on
/// first contact, and run single-target auto-assignment.
pub fn register_poll(
    store: &Store,
    bus: &EventBus,
    ctx: &TenantContext,
    controller_id: &str,
) -> Result<(), CoreError> {
    let mut events = Vec::new();
    store.with_tenant(ctx.tenant, |td| {
        let tenant = td.tenant;
        match td.targets.get_mut(controller_id).filter(|t| !t.deleted) {
            Some(target) => {
                target.last_contact = Some(Utc::now());
                events.push(Event::entity(
                    tenant,
                    EntityKind::Target,
                    controller_id,
                    ChangeType::Updated,
                ));
            }
            None => {
                let mut target = Target::new(tenant, controller_id);
                target.last_contact = Some(Utc::now());
                td.targets.insert(controller_id.to_string(), target);
                tracing::info!(controller_id, "Target registered on first poll");
                events.push(Event::entity(
                    tenant,
                    EntityKind::Target,
                    controller_id,
                    ChangeType::Created,
                ));
            }
        }
    });
    for event in &events {
        bus.publish(event);
    }
    auto_assign::check_single_target(store, bus, ctx.tenant, controller_id)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::models::{DistributionSet, UpdateStatus};
    use crate::services::assignment_service::{assign_distribution_set, AssignmentRequest};

    #[test]
    fn poll_registers_and_refreshes() {
        let store = Store::new();
        let bus = EventBus::new();
        let tenant = Uuid::new_v4();
        let ctx = TenantContext::system(tenant);
        register_poll(&store, &bus, &ctx, "dev01").unwrap();
        store.with_tenant(tenant, |td| {
            let target = td.target("dev01").unwrap();
            assert_eq!(target.update_status, UpdateStatus::Registered);
            assert!(target.last_contact.is_some());
        });
        register_poll(&store, &bus, &ctx, "dev01").unwrap();
        store.with_tenant(tenant, |td| {
            assert_eq!(td.targets.len(), 1);
        });
    }

    #[test]
    fn feedback_for_foreign_action_is_rejected() {
        let store = Store::new();
        let bus = EventBus::new();
        let tenant = Uuid::new_v4();
        let ctx = TenantContext::system(tenant);
        register_poll(&store, &bus, &ctx, "dev01").unwrap();
        register_poll(&store, &bus, &ctx, "dev02").unwrap();
        store.with_tenant(tenant, |td| {
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
        let action_id =
            assign_distribution_set(&store, &bus, &ctx, AssignmentRequest::manual("dev01", 1))
                .unwrap()
                .unwrap();
        let result = ingest(
            &store,
            &bus,
            &ctx,
            ControllerFeedback {
                controller_id: "dev02".into(),
                action_id,
                status: ActionState::Finished,
                progress: None,
                messages: vec![],
            },
        );
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn feedback_json_shape() {
        let feedback: ControllerFeedback = serde_json::from_str(
            r#"{"controller_id":"dev01","action_id":7,"status":"download","progress":{"cnt":1,"of":3}}"#,
        )
        .unwrap();
        assert_eq!(feedback.status, ActionState::Download);
        assert_eq!(feedback.progress, Some(Progress { cnt: 1, of: 3 }));
        assert!(feedback.messages.is_empty());
    }
}
