//! Tunable parameters for reconciliation, lead-in synthesis and sync.
//!
//! All values have working defaults; `SyncConfig::from_env` layers
//! `WATCH_SYNC_*` environment overrides on top of them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::synthesis::LeadInHeuristic;

/// Padding and offset applied when framing a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundsConfig {
    /// Degrees added to each delta so the box slightly exceeds the tight extent.
    /// Default: 0.02
    pub padding: f64,
    /// Degrees subtracted from the center latitude (marker/label offset).
    /// Default: 0.007
    pub latitude_bias: f64,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            padding: 0.02,
            latitude_bias: 0.007,
        }
    }
}

/// Parameters for the missing-GPS lead-in heuristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadInConfig {
    /// Start-to-end distance divided by route length at or below which the
    /// route is treated as a loop. Default: 0.15
    pub loop_ratio_threshold: f64,
    /// Force a heuristic instead of choosing by ratio.
    pub heuristic: Option<LeadInHeuristic>,
    /// Lead-in windows shorter than this are left alone. Default: 5 s
    pub min_lead_in_secs: f64,
    /// Upper bound on synthesized lead-in distance. Default: 5000 m
    pub max_lead_in_meters: f64,
    /// How far into the recorded route to look when estimating the initial
    /// heading for the linear heuristic. Default: 50 m
    pub heading_sample_meters: f64,
}

impl Default for LeadInConfig {
    fn default() -> Self {
        Self {
            loop_ratio_threshold: 0.15,
            heuristic: None,
            min_lead_in_secs: 5.0,
            max_lead_in_meters: 5000.0,
            heading_sample_meters: 50.0,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Max |gps.t - detail.t| (seconds) for a detail sample to adopt a GPS fix.
    /// Default: 2
    pub match_tolerance_secs: i64,
    pub bounds: BoundsConfig,
    pub lead_in: LeadInConfig,
    /// Timeout applied to every directions request. Default: 15 s
    pub route_timeout_secs: u64,
    /// Page size for the remote activity list. Default: 50
    pub remote_page_size: u32,
    /// GPX metadata description.
    pub gpx_description: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            match_tolerance_secs: 2,
            bounds: BoundsConfig::default(),
            lead_in: LeadInConfig::default(),
            route_timeout_secs: 15,
            remote_page_size: 50,
            gpx_description: "OnePlus Watch activity".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn route_timeout(&self) -> Duration {
        Duration::from_secs(self.route_timeout_secs)
    }

    /// Defaults overridden by `WATCH_SYNC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SyncConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("WATCH_SYNC_MATCH_TOLERANCE_SECS") {
            config.match_tolerance_secs = parse_var("WATCH_SYNC_MATCH_TOLERANCE_SECS", &v)?;
        }
        if let Some(v) = lookup("WATCH_SYNC_LOOP_RATIO") {
            config.lead_in.loop_ratio_threshold = parse_var("WATCH_SYNC_LOOP_RATIO", &v)?;
        }
        if let Some(v) = lookup("WATCH_SYNC_LEAD_IN") {
            config.lead_in.heuristic = match v.to_ascii_lowercase().as_str() {
                "auto" | "" => None,
                "loop" => Some(LeadInHeuristic::Loop),
                "linear" => Some(LeadInHeuristic::Linear),
                other => {
                    return Err(SyncError::Config {
                        message: format!("WATCH_SYNC_LEAD_IN must be auto, loop or linear, got '{}'", other),
                    })
                }
            };
        }
        if let Some(v) = lookup("WATCH_SYNC_ROUTE_TIMEOUT_SECS") {
            config.route_timeout_secs = parse_var("WATCH_SYNC_ROUTE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("WATCH_SYNC_PAGE_SIZE") {
            config.remote_page_size = parse_var("WATCH_SYNC_PAGE_SIZE", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.match_tolerance_secs < 0 {
            return Err(SyncError::Config {
                message: "match tolerance must not be negative".to_string(),
            });
        }
        if self.remote_page_size == 0 {
            return Err(SyncError::Config {
                message: "remote page size must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.lead_in.loop_ratio_threshold) {
            return Err(SyncError::Config {
                message: format!(
                    "loop ratio threshold must be within [0, 1], got {}",
                    self.lead_in.loop_ratio_threshold
                ),
            });
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| SyncError::Config {
        message: format!("{}='{}': {}", key, value, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.match_tolerance_secs, 2);
        assert_eq!(config.remote_page_size, 50);
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("WATCH_SYNC_LOOP_RATIO", "0.3"),
            ("WATCH_SYNC_LEAD_IN", "linear"),
            ("WATCH_SYNC_PAGE_SIZE", "25"),
        ]
        .into_iter()
        .collect();

        let config = SyncConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.lead_in.loop_ratio_threshold, 0.3);
        assert_eq!(config.lead_in.heuristic, Some(LeadInHeuristic::Linear));
        assert_eq!(config.remote_page_size, 25);
    }

    #[test]
    fn test_invalid_override_is_config_error() {
        let result = SyncConfig::from_lookup(|k| {
            (k == "WATCH_SYNC_ROUTE_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(SyncError::Config { .. })));

        let result =
            SyncConfig::from_lookup(|k| (k == "WATCH_SYNC_LOOP_RATIO").then(|| "2.5".to_string()));
        assert!(matches!(result, Err(SyncError::Config { .. })));
    }
}
