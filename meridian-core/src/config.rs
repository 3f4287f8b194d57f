//! Typed configuration for every component
//!
//! Each section defaults field by field, so an empty file is a complete
//! configuration and a file may set a single value.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::allocator::AllocatorConfig;
use crate::anomaly::AnomalyConfig;
use crate::attribution::AttributionConfig;
use crate::error::{MeridianError, Result};
use crate::guard::ResourceLimits;
use crate::predictive::PredictiveConfig;
use crate::segmentation::SegmentationConfig;
use crate::store::StoreConfig;
use crate::types::Component;

/// Hard ceilings for the batch components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub segmentation: ResourceLimits,
    pub predictive: ResourceLimits,
    pub attribution: ResourceLimits,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            segmentation: ResourceLimits::new(300, 2_048),
            predictive: ResourceLimits::new(600, 4_096),
            attribution: ResourceLimits::new(120, 2_048),
        }
    }
}

impl LimitsConfig {
    pub fn for_component(&self, component: Component) -> Option<ResourceLimits> {
        match component {
            Component::Segmentation => Some(self.segmentation),
            Component::Predictive => Some(self.predictive),
            Component::Attribution => Some(self.attribution),
            Component::Allocator | Component::Anomaly => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeridianConfig {
    pub segmentation: SegmentationConfig,
    pub predictive: PredictiveConfig,
    pub attribution: AttributionConfig,
    pub allocator: AllocatorConfig,
    pub anomaly: AnomalyConfig,
    pub store: StoreConfig,
    pub limits: LimitsConfig,
}

fn check(ok: bool, message: impl FnOnce() -> String) -> Result<()> {
    if ok { Ok(()) } else { Err(MeridianError::Config(message())) }
}

fn probability(name: &str, value: f64) -> Result<()> {
    check(value > 0.0 && value < 1.0, || format!("{name} must be in (0, 1), got {value}"))
}

impl MeridianConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| MeridianError::Serialization(e.to_string()))
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.segmentation;
        check(s.min_clusters >= 2, || "segmentation.min_clusters must be at least 2".into())?;
        check(s.min_clusters <= s.max_clusters, || {
            format!("segmentation.min_clusters {} exceeds max_clusters {}", s.min_clusters, s.max_clusters)
        })?;
        check((-1.0..=1.0).contains(&s.silhouette_threshold), || {
            "segmentation.silhouette_threshold must be in [-1, 1]".into()
        })?;
        check(s.silhouette_sample >= s.max_clusters, || {
            "segmentation.silhouette_sample must cover every cluster".into()
        })?;

        let p = &self.predictive;
        probability("predictive.confidence_level", p.confidence_level)?;
        probability("predictive.degradation_threshold", p.degradation_threshold)?;
        check(p.min_observation_days >= 1, || "predictive.min_observation_days must be positive".into())?;
        check(p.online_timeout_ms > 0, || "predictive.online_timeout_ms must be positive".into())?;

        let a = &self.attribution;
        check(a.half_life_days > 0.0, || "attribution.half_life_days must be positive".into())?;
        check(a.lookback_days > 0, || "attribution.lookback_days must be positive".into())?;
        check(a.bootstrap_samples >= 1, || "attribution.bootstrap_samples must be positive".into())?;
        probability("attribution.confidence_level", a.confidence_level)?;
        check(a.clv_prior_shape > 0.0 && a.clv_prior_rate > 0.0, || {
            "attribution CLV prior shape and rate must be positive".into()
        })?;
        check(a.drift_threshold >= 0.0 && a.drift_smoothing > 0.0, || {
            "attribution drift threshold must be non-negative and smoothing positive".into()
        })?;
        check(a.spend_bin_edges.windows(2).all(|w| w[0] < w[1]), || {
            "attribution.spend_bin_edges must be strictly increasing".into()
        })?;

        let al = &self.allocator;
        probability("allocator.credible_level", al.credible_level)?;
        check((0.0..1.0).contains(&al.exploration_floor), || {
            "allocator.exploration_floor must be in [0, 1)".into()
        })?;
        check(al.max_interval_width > 0.0, || "allocator.max_interval_width must be positive".into())?;
        check((0.0..=1.0).contains(&al.min_ev_delta), || "allocator.min_ev_delta must be in [0, 1]".into())?;
        check((0.0..=1.0).contains(&al.fatigue_discount), || {
            "allocator.fatigue_discount must be in [0, 1]".into()
        })?;
        check(al.thompson_draws >= 1, || "allocator.thompson_draws must be positive".into())?;
        check(al.decision_timeout_ms > 0, || "allocator.decision_timeout_ms must be positive".into())?;
        check(al.max_arms >= 1 && al.ledger_mailbox >= 1, || {
            "allocator.max_arms and ledger_mailbox must be positive".into()
        })?;

        let an = &self.anomaly;
        check(an.warmup >= 3 && an.warmup <= an.window, || {
            format!("anomaly.warmup {} must be between 3 and window {}", an.warmup, an.window)
        })?;
        check(an.z_threshold > 0.0 && an.medium_z <= an.high_z, || {
            "anomaly z thresholds must be positive and ordered".into()
        })?;
        check(an.medium_ratio >= 1.0 && an.medium_ratio <= an.high_ratio, || {
            "anomaly ratios must satisfy 1 <= medium_ratio <= high_ratio".into()
        })?;
        check((0.0..=1.0).contains(&an.fatigue_suppression), || {
            "anomaly.fatigue_suppression must be in [0, 1]".into()
        })?;
        check(an.level_shift_after >= 1 && an.point_timeout_ms > 0, || {
            "anomaly.level_shift_after and point_timeout_ms must be positive".into()
        })?;

        check(self.store.max_age_hours > 0, || "store.max_age_hours must be positive".into())?;
        for (name, limits) in [
            ("segmentation", &self.limits.segmentation),
            ("predictive", &self.limits.predictive),
            ("attribution", &self.limits.attribution),
        ] {
            check(limits.max_run_seconds > 0 && limits.max_memory_mb > 0, || {
                format!("limits.{name} must have positive time and memory ceilings")
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let config = MeridianConfig::from_toml_str("").unwrap();
        assert_eq!(config, MeridianConfig::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = MeridianConfig::from_toml_str(
            r#"
            [allocator]
            exploration_floor = 0.1

            [limits.attribution]
            max_run_seconds = 60
            max_memory_mb = 1024
            "#,
        )
        .unwrap();
        assert_eq!(config.allocator.exploration_floor, 0.1);
        assert_eq!(config.allocator.decision_timeout_ms, 300);
        assert_eq!(config.limits.attribution.max_run_seconds, 60);
        assert_eq!(config.limits.segmentation, ResourceLimits::new(300, 2_048));
    }

    #[test]
    fn test_out_of_range_rejected() {
        let err = MeridianConfig::from_toml_str("[allocator]\nexploration_floor = 1.5\n").unwrap_err();
        assert!(matches!(err, MeridianError::Config(_)));
        let err = MeridianConfig::from_toml_str("[segmentation]\nmin_clusters = 9\n").unwrap_err();
        assert!(err.to_string().contains("min_clusters"));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        assert!(matches!(
            MeridianConfig::from_toml_str("[allocator"),
            Err(MeridianError::Config(_))
        ));
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = MeridianConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(MeridianConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meridian.toml");
        std::fs::write(&path, "[anomaly]\nz_threshold = 4.0\n").unwrap();
        let config = MeridianConfig::load(&path).unwrap();
        assert_eq!(config.anomaly.z_threshold, 4.0);
    }
}
