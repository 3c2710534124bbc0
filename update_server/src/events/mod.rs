//! Entity-change events propagated after state mutations commit.
//!
//! Events carry entity ids, never entity payloads — subscribers re-fetch
//! from the store, so stale data is never propagated. The same serialized
//! form is handed to the cross-node event sink.

pub mod bus;

use serde::{Deserialize, Serialize};

use crate::tenant::TenantId;

pub use bus::EventBus;

/// Entity kinds addressed by change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Target,
    DistributionSet,
    Rollout,
    RolloutGroup,
    Action,
    TargetFilterQuery,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Target => "target",
            EntityKind::DistributionSet => "distribution_set",
            EntityKind::Rollout => "rollout",
            EntityKind::RolloutGroup => "rollout_group",
            EntityKind::Action => "action",
            EntityKind::TargetFilterQuery => "target_filter_query",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

/// A change notification. Single-entity changes and bulk changes are the
/// two variants of one tagged union, dispatched by tag — no event class
/// hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    EntityChanged {
        tenant: TenantId,
        kind: EntityKind,
        id: String,
        change: ChangeType,
    },
    BulkChanged {
        tenant: TenantId,
        kind: EntityKind,
        ids: Vec<String>,
        change: ChangeType,
    },
}

impl Event {
    pub fn entity(
        tenant: TenantId,
        kind: EntityKind,
        id: impl ToString,
        change: ChangeType,
    ) -> Self {
        Event::EntityChanged {
            tenant,
            kind,
            id: id.to_string(),
            change,
        }
    }

    pub fn bulk<I: ToString>(
        tenant: TenantId,
        kind: EntityKind,
        ids: impl IntoIterator<Item = I>,
        change: ChangeType,
    ) -> Self {
        Event::BulkChanged {
            tenant,
            kind,
            ids: ids.into_iter().map(|i| i.to_string()).collect(),
            change,
        }
    }

    pub fn tenant(&self) -> TenantId {
        match self {
            Event::EntityChanged { tenant, .. } | Event::BulkChanged { tenant, .. } => *tenant,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Event::EntityChanged { kind, .. } | Event::BulkChanged { kind, .. } => *kind,
        }
    }
}
