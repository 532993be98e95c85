use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_trajectory_samples() -> usize {
    21
}

fn default_max_orderings() -> usize {
    720
}

fn default_approach_fraction() -> f64 {
    0.9
}

fn default_precision_speed() -> u8 {
    3
}

/// Collision detection and sequencing settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlannerParams {
    /// Evenly spaced samples along each straight-line trajectory,
    /// endpoints included.
    #[serde(default = "default_trajectory_samples")]
    pub trajectory_samples: usize,
    /// Upper bound on orderings explored by the sequential search.
    ///
    /// Four devices need at most 24 orderings. When the search would
    /// exceed this bound the batch is refused with
    /// `Refusal::SearchLimitReached` instead of running factorial time.
    #[serde(default = "default_max_orderings")]
    pub max_orderings: usize,
    /// Treat a requested device without a footprint as a configuration
    /// error instead of skipping its geometric checks.
    #[serde(default)]
    pub require_footprints: bool,
    /// When no whole-move ordering is clear, retry with every move split
    /// into an X leg followed by a Y leg.
    #[serde(default)]
    pub segmented_fallback: bool,
    /// Refuse to plan with cached positions older than this many seconds.
    /// `None` trusts the cache unconditionally.
    #[serde(default)]
    pub max_position_age_s: Option<f64>,
}

impl Default for PlannerParams {
    fn default() -> Self {
        Self {
            trajectory_samples: default_trajectory_samples(),
            max_orderings: default_max_orderings(),
            require_footprints: false,
            segmented_fallback: false,
            max_position_age_s: None,
        }
    }
}

impl PlannerParams {
    /// `None` when unset, negative, non-finite, or too large to represent
    /// (treated as unlimited).
    pub fn max_position_age(&self) -> Option<Duration> {
        self.max_position_age_s
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
    }
}

/// Two-phase move settings for [`TwoPhaseExecutor`](crate::TwoPhaseExecutor).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutorParams {
    /// Share of the remaining distance covered by the fast approach,
    /// clamped to `[0, 1]`.
    #[serde(default = "default_approach_fraction")]
    pub approach_fraction: f64,
    /// Controller speed index used for the precision leg.
    #[serde(default = "default_precision_speed")]
    pub precision_speed: u8,
}

impl Default for ExecutorParams {
    fn default() -> Self {
        Self {
            approach_fraction: default_approach_fraction(),
            precision_speed: default_precision_speed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let p: PlannerParams = serde_json::from_str("{}").unwrap();
        assert_eq!(p, PlannerParams::default());
        assert_eq!(p.trajectory_samples, 21);
        assert!(p.max_position_age().is_none());

        let e: ExecutorParams = serde_json::from_str("{}").unwrap();
        assert_eq!(e, ExecutorParams::default());
    }

    #[test]
    fn negative_age_is_ignored() {
        let p = PlannerParams {
            max_position_age_s: Some(-1.0),
            ..PlannerParams::default()
        };
        assert!(p.max_position_age().is_none());

        let p = PlannerParams {
            max_position_age_s: Some(2.5),
            ..PlannerParams::default()
        };
        assert_eq!(p.max_position_age(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn huge_age_means_unlimited() {
        let p: PlannerParams = serde_json::from_str(r#"{ "max_position_age_s": 1e20 }"#).unwrap();
        assert!(p.max_position_age().is_none());

        let p = PlannerParams {
            max_position_age_s: Some(f64::INFINITY),
            ..PlannerParams::default()
        };
        assert!(p.max_position_age().is_none());
    }
}
