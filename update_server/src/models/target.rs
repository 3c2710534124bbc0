//! Target — a managed device/controller under fleet management.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current update status of a target, derived from its action history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Unknown,
    InSync,
    Pending,
    Error,
    Registered,
}

impl UpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::Unknown => "unknown",
            UpdateStatus::InSync => "in_sync",
            UpdateStatus::Pending => "pending",
            UpdateStatus::Error => "error",
            UpdateStatus::Registered => "registered",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub tenant_id: Uuid,
    /// Stable controller identifier, unique per tenant.
    pub controller_id: String,
    pub name: String,
    pub update_status: UpdateStatus,
    pub last_contact: Option<DateTime<Utc>>,
    pub assigned_ds: Option<i64>,
    pub installed_ds: Option<i64>,
    pub tags: BTreeSet<String>,
    /// Controller-reported key/value attributes, matched by filter queries
    /// via `attribute.<key>`.
    pub attributes: BTreeMap<String, String>,
    /// Soft-delete marker; targets are never physically removed while
    /// actions reference them.
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl Target {
    pub fn new(tenant_id: Uuid, controller_id: impl Into<String>) -> Self {
        let controller_id = controller_id.into();
        Self {
            tenant_id,
            name: controller_id.clone(),
            controller_id,
            update_status: UpdateStatus::Registered,
            last_contact: None,
            assigned_ds: None,
            installed_ds: None,
            tags: BTreeSet::new(),
            attributes: BTreeMap::new(),
            deleted: false,
            created_at: Utc::now(),
        }
    }
}
