// src/engine/config.rs

use serde::{Deserialize, Serialize};

pub const MIN_BAND: i32 = 1;
pub const MAX_BAND: i32 = 5;

/// Neutral starting rating for candidates and freshly authored questions.
pub const DEFAULT_RATING: i64 = 1200;

/// Per-band multipliers applied to the base per-item time allowance.
/// Lower bands get proportionally more generous time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWeights(pub [f64; 5]);

impl Default for TimeWeights {
    fn default() -> Self {
        TimeWeights([1.2, 1.1, 1.0, 0.9, 0.8])
    }
}

impl TimeWeights {
    /// Weight for a band, clamped into the valid band range.
    pub fn for_band(&self, band: i32) -> f64 {
        let idx = band.clamp(MIN_BAND, MAX_BAND) as usize - 1;
        self.0[idx]
    }
}

/// Per-band multipliers used when scoring a stage item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifficultyFactors(pub [f64; 5]);

impl Default for DifficultyFactors {
    fn default() -> Self {
        DifficultyFactors([0.7, 0.85, 1.0, 1.15, 1.3])
    }
}

impl DifficultyFactors {
    pub fn for_band(&self, band: i32) -> f64 {
        let idx = band.clamp(MIN_BAND, MAX_BAND) as usize - 1;
        self.0[idx]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoteRule {
    pub min_stage_score: f64,
    pub min_accuracy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldRule {
    /// Stage scores in [low, high) hold the band.
    pub low: f64,
    pub high: f64,
    pub min_accuracy: f64,
    pub min_avg_pace: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoteRule {
    pub max_stage_score: f64,
    pub max_accuracy: f64,
}

/// Stage routing thresholds. A snapshot of this struct is persisted on every
/// session so that mid-flight sessions keep the rules they started with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Number of trailing answers evaluated per routing decision.
    pub stage_size: i64,
    /// Promotion is blocked outright above this many fast wrong answers.
    pub guard_max_wrong_fast: i64,
    pub promote: PromoteRule,
    pub hold: HoldRule,
    pub demote: DemoteRule,
    pub difficulty_factors: DifficultyFactors,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        RoutingConfig {
            stage_size: 10,
            guard_max_wrong_fast: 2,
            promote: PromoteRule {
                min_stage_score: 7.5,
                min_accuracy: 0.8,
            },
            hold: HoldRule {
                low: 4.0,
                high: 7.5,
                min_accuracy: 0.6,
                min_avg_pace: 1.2,
            },
            demote: DemoteRule {
                max_stage_score: 4.0,
                max_accuracy: 0.5,
            },
            difficulty_factors: DifficultyFactors::default(),
        }
    }
}

/// Engine-wide tunables carried in AppState.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub time_weights: TimeWeights,
    pub routing: RoutingConfig,
}

/// Maps a candidate rating to the starting difficulty band of a new session.
/// Five contiguous ranges covering bands 1-5.
pub fn starting_band(rating: i64) -> i32 {
    match rating {
        r if r < 1100 => 1,
        r if r < 1200 => 2,
        r if r < 1300 => 3,
        r if r < 1400 => 4,
        _ => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_band_covers_all_ranges() {
        assert_eq!(starting_band(0), 1);
        assert_eq!(starting_band(1099), 1);
        assert_eq!(starting_band(1100), 2);
        assert_eq!(starting_band(1200), 3);
        assert_eq!(starting_band(1299), 3);
        assert_eq!(starting_band(1300), 4);
        assert_eq!(starting_band(1400), 5);
        assert_eq!(starting_band(2500), 5);
    }

    #[test]
    fn time_weights_decrease_with_band() {
        let w = TimeWeights::default();
        for band in MIN_BAND..MAX_BAND {
            assert!(w.for_band(band) > w.for_band(band + 1));
        }
    }

    #[test]
    fn band_lookup_clamps_out_of_range() {
        let w = TimeWeights::default();
        assert_eq!(w.for_band(0), w.for_band(1));
        assert_eq!(w.for_band(99), w.for_band(5));
    }

    #[test]
    fn routing_config_round_trips_through_json() {
        let cfg = RoutingConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: RoutingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.stage_size, cfg.stage_size);
        assert_eq!(back.promote.min_accuracy, cfg.promote.min_accuracy);
    }
}
