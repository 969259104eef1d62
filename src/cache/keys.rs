use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Deterministic cache key: a prefix plus sorted `name=value` parameters.
///
/// `CacheKey::new("releases").param("artist", "a1").build()` →
/// `releases:artist=a1`. Parameter order does not matter, so the same
/// logical request always yields the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    prefix: String,
    params: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    /// Fold `floor(now / interval_secs)` into the key so every request in the
    /// same interval shares one entry.
    pub fn bucketed(self, interval_secs: u64, now: DateTime<Utc>) -> Self {
        let bucket = time_bucket(interval_secs, now);
        self.param("bucket", bucket)
    }

    pub fn build(&self) -> String {
        if self.params.is_empty() {
            return self.prefix.clone();
        }
        let params: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{k}={}", escape(v)))
            .collect();
        format!("{}:{}", self.prefix, params.join("&"))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.build())
    }
}

/// Index of the `interval_secs`-wide window containing `now`.
pub fn time_bucket(interval_secs: u64, now: DateTime<Utc>) -> i64 {
    let interval = i64::try_from(interval_secs.max(1)).unwrap_or(i64::MAX);
    now.timestamp().div_euclid(interval)
}

/// Keep separators inside values from colliding with the key layout.
fn escape(value: &str) -> String {
    value.replace('%', "%25").replace('&', "%26").replace('=', "%3D")
}
