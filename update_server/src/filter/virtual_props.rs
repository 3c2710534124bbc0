//! Virtual property resolution — time-relative macros in filter queries.
//!
//! Expands `${now_ts}` and `${overdue_ts}` placeholders to epoch-millis
//! before the expression reaches the parser. Unknown placeholders are left
//! verbatim so placeholder-like substrings in user queries are not
//! rejected. This is purely textual substitution; quoting rules belong to
//! the filter grammar.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::CoreError;
use crate::overdue;
use crate::tenant::TenantSettings;

pub const MACRO_NOW_TS: &str = "now_ts";
pub const MACRO_OVERDUE_TS: &str = "overdue_ts";

static MACRO_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").unwrap());

pub fn resolve(
    settings: &TenantSettings,
    expression: &str,
    now: DateTime<Utc>,
) -> Result<String, CoreError> {
    let mut out = String::with_capacity(expression.len());
    let mut last_end = 0;
    for caps in MACRO_REGEX.captures_iter(expression) {
        // capture 0 is the whole match and always present
        let whole = caps.get(0).unwrap();
        out.push_str(&expression[last_end..whole.start()]);
        match &caps[1] {
            m if m == MACRO_NOW_TS => out.push_str(&now.timestamp_millis().to_string()),
            m if m == MACRO_OVERDUE_TS => {
                out.push_str(&overdue::overdue_timestamp(settings, now)?.to_string())
            }
            _ => out.push_str(whole.as_str()),
        }
        last_end = whole.end();
    }
    out.push_str(&expression[last_end..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::{KEY_POLLING_OVERDUE_TIME, KEY_POLLING_TIME};

    fn settings() -> TenantSettings {
        let mut s = TenantSettings::default();
        s.set(KEY_POLLING_TIME, "00:05:00");
        s.set(KEY_POLLING_OVERDUE_TIME, "00:02:00");
        s
    }

    #[test]
    fn expands_now_ts() {
        let now = Utc::now();
        let resolved = resolve(&settings(), "lastcontrollerrequestat=le=${now_ts}", now).unwrap();
        assert_eq!(
            resolved,
            format!("lastcontrollerrequestat=le={}", now.timestamp_millis())
        );
    }

    #[test]
    fn overdue_ts_is_now_minus_both_intervals() {
        let now = Utc::now();
        let resolved =
            resolve(&settings(), "lastcontrollerrequestat=le=${overdue_ts}", now).unwrap();
        let expected = (now - chrono::Duration::minutes(7)).timestamp_millis();
        assert_eq!(
            resolved,
            format!("lastcontrollerrequestat=le={expected}")
        );
    }

    #[test]
    fn unknown_macros_are_preserved() {
        let resolved = resolve(&settings(), "name==${unknown}", Utc::now()).unwrap();
        assert_eq!(resolved, "name==${unknown}");
    }

    #[test]
    fn mixed_known_and_unknown() {
        let now = Utc::now();
        let resolved = resolve(&settings(), "a==${now_ts};b==${later_ts}", now).unwrap();
        assert_eq!(
            resolved,
            format!("a=={};b==${{later_ts}}", now.timestamp_millis())
        );
    }

    #[test]
    fn bad_config_fails_only_when_macro_needs_it() {
        let mut s = settings();
        s.set(KEY_POLLING_TIME, "junk");
        // overdue_ts needs the polling config
        assert!(resolve(&s, "a==${overdue_ts}", Utc::now()).is_err());
        // now_ts does not
        assert!(resolve(&s, "a==${now_ts}", Utc::now()).is_ok());
    }
}
