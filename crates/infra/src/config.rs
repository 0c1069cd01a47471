//! Configuration loading and representation.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// How scans prevent overlapping runs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ScanGuardKind {
    /// In-process flag; correct for a single instance only.
    #[default]
    Local,
    /// TTL'd lease row in the store; correct across instances.
    Lease,
}

impl FromStr for ScanGuardKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ScanGuardKind::Local),
            "lease" => Ok(ScanGuardKind::Lease),
            other => Err(format!("expected 'local' or 'lease', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryConfig {
    /// Unset selects the in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub alert_scan_interval: Duration,
    pub suggestion_scan_interval: Duration,
    pub reconcile_interval: Duration,
    /// Global; there is no per-tenant cooldown.
    pub auto_reorder_cooldown: chrono::Duration,
    pub lead_time_buffer_pct: u32,
    pub scan_lease_ttl: chrono::Duration,
    pub scan_guard: ScanGuardKind,
    pub reconcile_repair: bool,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 10,
            alert_scan_interval: Duration::from_secs(20 * 60),
            suggestion_scan_interval: Duration::from_secs(60 * 60),
            reconcile_interval: Duration::from_secs(24 * 60 * 60),
            auto_reorder_cooldown: chrono::Duration::hours(24),
            lead_time_buffer_pct: 0,
            scan_lease_ttl: chrono::Duration::minutes(15),
            scan_guard: ScanGuardKind::Local,
            reconcile_repair: false,
        }
    }
}

impl InventoryConfig {
    /// Load from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |var: &'static str| lookup(var).filter(|v| !v.trim().is_empty());

        Ok(Self {
            database_url: get("DATABASE_URL"),
            database_max_connections: parse_or(
                "DATABASE_MAX_CONNECTIONS",
                get("DATABASE_MAX_CONNECTIONS"),
                defaults.database_max_connections,
            )?,
            alert_scan_interval: secs_or(
                "ALERT_SCAN_INTERVAL_SECS",
                get("ALERT_SCAN_INTERVAL_SECS"),
                defaults.alert_scan_interval,
            )?,
            suggestion_scan_interval: secs_or(
                "SUGGESTION_SCAN_INTERVAL_SECS",
                get("SUGGESTION_SCAN_INTERVAL_SECS"),
                defaults.suggestion_scan_interval,
            )?,
            reconcile_interval: secs_or(
                "RECONCILE_INTERVAL_SECS",
                get("RECONCILE_INTERVAL_SECS"),
                defaults.reconcile_interval,
            )?,
            auto_reorder_cooldown: chrono::Duration::hours(parse_or(
                "AUTO_REORDER_COOLDOWN_HOURS",
                get("AUTO_REORDER_COOLDOWN_HOURS"),
                defaults.auto_reorder_cooldown.num_hours(),
            )?),
            lead_time_buffer_pct: parse_or(
                "LEAD_TIME_BUFFER_PCT",
                get("LEAD_TIME_BUFFER_PCT"),
                defaults.lead_time_buffer_pct,
            )?,
            scan_lease_ttl: chrono::Duration::seconds(parse_or(
                "SCAN_LEASE_TTL_SECS",
                get("SCAN_LEASE_TTL_SECS"),
                defaults.scan_lease_ttl.num_seconds(),
            )?),
            scan_guard: parse_or("SCAN_GUARD", get("SCAN_GUARD"), defaults.scan_guard)?,
            reconcile_repair: parse_or(
                "RECONCILE_REPAIR",
                get("RECONCILE_REPAIR"),
                defaults.reconcile_repair,
            )?,
        })
    }
}

fn parse_or<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

/// Intervals must be positive; a zero interval would spin the runner.
fn secs_or(var: &'static str, raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_or(var, raw, default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: "0".to_string(),
            reason: "must be at least one second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<InventoryConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        InventoryConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(load(&[]).unwrap(), InventoryConfig::default());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = load(&[
            ("DATABASE_URL", "postgres://localhost/cmms"),
            ("ALERT_SCAN_INTERVAL_SECS", "60"),
            ("AUTO_REORDER_COOLDOWN_HOURS", "6"),
            ("LEAD_TIME_BUFFER_PCT", "25"),
            ("SCAN_GUARD", "Lease"),
            ("RECONCILE_REPAIR", "true"),
        ])
        .unwrap();
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/cmms"));
        assert_eq!(cfg.alert_scan_interval, Duration::from_secs(60));
        assert_eq!(cfg.auto_reorder_cooldown, chrono::Duration::hours(6));
        assert_eq!(cfg.lead_time_buffer_pct, 25);
        assert_eq!(cfg.scan_guard, ScanGuardKind::Lease);
        assert!(cfg.reconcile_repair);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = load(&[("LEAD_TIME_BUFFER_PCT", "-5")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "LEAD_TIME_BUFFER_PCT", .. }));

        let err = load(&[("SUGGESTION_SCAN_INTERVAL_SECS", "0")]).unwrap_err();
        assert!(err.to_string().contains("SUGGESTION_SCAN_INTERVAL_SECS"));

        assert!(load(&[("SCAN_GUARD", "redis")]).is_err());
    }
}
