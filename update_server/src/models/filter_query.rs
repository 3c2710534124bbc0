//! TargetFilterQuery — a named, persisted filter, optionally auto-assigning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::action::ActionType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetFilterQuery {
    pub id: i64,
    pub tenant_id: Uuid,
    pub name: String,
    pub query: String,
    /// When set, the auto-assign executor assigns this distribution set to
    /// every matching target that does not already have an action for it.
    pub auto_assign_ds: Option<i64>,
    pub auto_assign_action_type: Option<ActionType>,
    pub auto_assign_weight: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TargetFilterQuery {
    pub fn auto_assign_configured(&self) -> bool {
        self.auto_assign_ds.is_some()
    }
}
