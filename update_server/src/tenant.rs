//! Tenant identity, execution context, and per-tenant configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Stable tenant identifier. Every entity, query, and cache key is scoped
/// by one of these; cross-tenant references are unrepresentable.
pub type TenantId = Uuid;

/// Carries the current tenant and security principal through an operation.
///
/// Passed explicitly into every service call — there are no ambient
/// singletons to reach a "current" tenant from.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant: TenantId,
    pub principal: String,
    /// Elevated execution, used by background sweeps that run without an
    /// interactive principal. Bypasses per-user restrictions but never the
    /// tenant boundary.
    pub system: bool,
}

impl TenantContext {
    pub fn user(tenant: TenantId, principal: impl Into<String>) -> Self {
        Self {
            tenant,
            principal: principal.into(),
            system: false,
        }
    }

    /// Context for background work (auto-assign sweep, rollout handler).
    pub fn system(tenant: TenantId) -> Self {
        Self {
            tenant,
            principal: "system".to_string(),
            system: true,
        }
    }
}

// ── Tenant configuration ──

pub const KEY_POLLING_TIME: &str = "polling.time";
pub const KEY_POLLING_OVERDUE_TIME: &str = "polling.overdue.time";
pub const KEY_MULTI_ASSIGNMENTS: &str = "multi.assignments.enabled";
pub const KEY_CONFIRMATION_FLOW: &str = "confirmation.flow.enabled";

const DEFAULT_POLLING_TIME: &str = "00:05:00";
const DEFAULT_POLLING_OVERDUE_TIME: &str = "00:05:00";

/// Key/value tenant settings with typed accessors.
///
/// Read frequently, written rarely. Interval values use the `HH:MM:SS`
/// format; unparsable values surface as [`CoreError::ConfigurationFormat`]
/// at read time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantSettings {
    values: BTreeMap<String, String>,
}

impl TenantSettings {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn polling_time(&self) -> Result<chrono::Duration, CoreError> {
        self.interval(KEY_POLLING_TIME, DEFAULT_POLLING_TIME)
    }

    pub fn polling_overdue_time(&self) -> Result<chrono::Duration, CoreError> {
        self.interval(KEY_POLLING_OVERDUE_TIME, DEFAULT_POLLING_OVERDUE_TIME)
    }

    pub fn multi_assignments_enabled(&self) -> bool {
        self.flag(KEY_MULTI_ASSIGNMENTS)
    }

    pub fn confirmation_flow_enabled(&self) -> bool {
        self.flag(KEY_CONFIRMATION_FLOW)
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    fn interval(&self, key: &str, default: &str) -> Result<chrono::Duration, CoreError> {
        let raw = self.get(key).unwrap_or(default);
        parse_interval(raw).ok_or_else(|| CoreError::ConfigurationFormat {
            key: key.to_string(),
            value: raw.to_string(),
        })
    }
}

/// Parse an `HH:MM:SS` interval string. Hours may exceed 24.
fn parse_interval(raw: &str) -> Option<chrono::Duration> {
    let mut parts = raw.trim().splitn(3, ':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds: i64 = parts.next()?.parse().ok()?;
    if !(0..60).contains(&minutes) || !(0..60).contains(&seconds) || hours < 0 {
        return None;
    }
    Some(chrono::Duration::seconds(hours * 3600 + minutes * 60 + seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_interval_strings() {
        assert_eq!(
            parse_interval("00:05:00"),
            Some(chrono::Duration::minutes(5))
        );
        assert_eq!(
            parse_interval("01:30:15"),
            Some(chrono::Duration::seconds(5415))
        );
        assert_eq!(parse_interval("48:00:00"), Some(chrono::Duration::hours(48)));
    }

    #[test]
    fn rejects_malformed_intervals() {
        assert_eq!(parse_interval("five minutes"), None);
        assert_eq!(parse_interval("00:99:00"), None);
        assert_eq!(parse_interval("00:05"), None);
        assert_eq!(parse_interval("-1:00:00"), None);
    }

    #[test]
    fn settings_fall_back_to_defaults() {
        let settings = TenantSettings::default();
        assert_eq!(settings.polling_time().unwrap(), chrono::Duration::minutes(5));
        assert!(!settings.multi_assignments_enabled());
        assert!(!settings.confirmation_flow_enabled());
    }

    #[test]
    fn unparsable_setting_surfaces_configuration_error() {
        let mut settings = TenantSettings::default();
        settings.set(KEY_POLLING_TIME, "soon");
        assert!(matches!(
            settings.polling_time(),
            Err(CoreError::ConfigurationFormat { .. })
        ));
    }
}
