//! Overdue cutoff calculation from tenant polling configuration.

use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::tenant::TenantSettings;

/// Epoch-millis cutoff below which a target's last poll counts as overdue:
/// `now - polling interval - polling overdue interval`.
///
/// Pure function of tenant configuration and the supplied clock value; safe
/// to call concurrently. Monotonic non-decreasing as `now` advances while
/// the configuration is held fixed.
pub fn overdue_timestamp(
    settings: &TenantSettings,
    now: DateTime<Utc>,
) -> Result<i64, CoreError> {
    let cutoff = now - settings.polling_time()? - settings.polling_overdue_time()?;
    Ok(cutoff.timestamp_millis())
}

/// Whether a last-contact timestamp is past the overdue cutoff. A target
/// that never polled is not overdue, it is simply unknown.
pub fn is_overdue(
    settings: &TenantSettings,
    now: DateTime<Utc>,
    last_contact: Option<DateTime<Utc>>,
) -> Result<bool, CoreError> {
    let Some(last) = last_contact else {
        return Ok(false);
    };
    Ok(last.timestamp_millis() <= overdue_timestamp(settings, now)?)
}
