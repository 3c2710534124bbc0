//! Tenant-aware cache for computed values (filter match counts and the
//! like), with no-op configuration detection.
//!
//! The cache is read-mostly and invalidated, never updated in place. A
//! no-op spec (`""`, `"nop"`, `"none"`, `maximumSize=0`, `expireAfterWrite=0`)
//! short-circuits every operation so disabled caching adds no overhead.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::tenant::TenantId;

/// Parsed cache configuration string.
///
/// Grammar: empty/whitespace, the literals `nop`/`none`, or a
/// comma-separated `key=value` option list. Key matching is
/// case-insensitive and whitespace-tolerant; unknown options are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSpec {
    explicit_nop: bool,
    max_size: Option<u64>,
    expire_after_write_secs: Option<u64>,
}

impl CacheSpec {
    pub fn parse(spec: &str) -> Self {
        let trimmed = spec.trim();
        if trimmed.is_empty()
            || trimmed.eq_ignore_ascii_case("nop")
            || trimmed.eq_ignore_ascii_case("none")
        {
            return Self {
                explicit_nop: true,
                ..Self::default()
            };
        }
        let mut parsed = Self::default();
        for token in trimmed.split(',') {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            if key.eq_ignore_ascii_case("maximumSize") {
                parsed.max_size = value.parse().ok();
            } else if key.eq_ignore_ascii_case("expireAfterWrite") {
                parsed.expire_after_write_secs = value.parse().ok();
            }
        }
        parsed
    }

    /// Whether this spec disables caching entirely.
    pub fn is_nop(&self) -> bool {
        self.explicit_nop
            || self.max_size == Some(0)
            || self.expire_after_write_secs == Some(0)
    }
}

/// Convenience form used by configuration validation.
pub fn is_nop(spec: &str) -> bool {
    CacheSpec::parse(spec).is_nop()
}

struct Entry<V> {
    value: V,
    written_at: Instant,
}

/// Per-tenant keyed cache. All keys are implicitly tenant-scoped; one
/// tenant can never observe another tenant's entries.
pub struct TenantCache<V> {
    spec: CacheSpec,
    entries: RwLock<HashMap<(TenantId, String), Entry<V>>>,
}

impl<V: Clone> TenantCache<V> {
    pub fn new(spec: CacheSpec) -> Self {
        Self {
            spec,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_spec(spec: &str) -> Self {
        Self::new(CacheSpec::parse(spec))
    }

    pub fn is_nop(&self) -> bool {
        self.spec.is_nop()
    }

    pub fn get(&self, tenant: TenantId, key: &str) -> Option<V> {
        if self.spec.is_nop() {
            return None;
        }
        let entries = self.read();
        let entry = entries.get(&(tenant, key.to_string()))?;
        if let Some(ttl) = self.spec.expire_after_write_secs {
            if entry.written_at.elapsed() >= Duration::from_secs(ttl) {
                return None;
            }
        }
        Some(entry.value.clone())
    }

    pub fn put(&self, tenant: TenantId, key: impl Into<String>, value: V) {
        if self.spec.is_nop() {
            return;
        }
        let mut entries = self.write();
        if let Some(max) = self.spec.max_size {
            // Size bound: evict the oldest entry once full.
            while entries.len() as u64 >= max {
                let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.written_at)
                    .map(|(k, _)| k.clone())
                else {
                    break;
                };
                entries.remove(&oldest);
            }
        }
        entries.insert(
            (tenant, key.into()),
            Entry {
                value,
                written_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, tenant: TenantId, key: &str) {
        if self.spec.is_nop() {
            return;
        }
        self.write().remove(&(tenant, key.to_string()));
    }

    pub fn invalidate_prefix(&self, tenant: TenantId, prefix: &str) {
        if self.spec.is_nop() {
            return;
        }
        self.write()
            .retain(|(t, k), _| *t != tenant || !k.starts_with(prefix));
    }

    pub fn invalidate_tenant(&self, tenant: TenantId) {
        if self.spec.is_nop() {
            return;
        }
        self.write().retain(|(t, _), _| *t != tenant);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<(TenantId, String), Entry<V>>> {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<(TenantId, String), Entry<V>>> {
        self.entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
