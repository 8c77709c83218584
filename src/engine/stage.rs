// src/engine/stage.rs

//! Stage routing: aggregates a trailing block of answers into accuracy,
//! score and pace statistics, then decides whether the candidate's
//! difficulty band should rise, fall or hold.

use super::config::{MAX_BAND, MIN_BAND, RoutingConfig};

/// One answer reduced to what routing needs.
#[derive(Debug, Clone, Copy)]
pub struct StageItem {
    pub correct: bool,
    pub pace_ratio: f64,
    /// Band the question was served at.
    pub band: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageAggregate {
    pub accuracy: f64,
    pub stage_score: f64,
    pub avg_pace_ratio: f64,
    pub wrong_fast_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecision {
    Promote,
    Hold,
    Demote,
}

fn time_bonus(pace_ratio: f64) -> f64 {
    if pace_ratio <= 0.8 {
        0.2
    } else if pace_ratio <= 1.2 {
        0.1
    } else {
        0.0
    }
}

fn guess_penalty(correct: bool, pace_ratio: f64) -> f64 {
    if !correct && pace_ratio <= 0.8 { -0.2 } else { 0.0 }
}

/// Score contribution of a single answer, clamped to [-0.2, 1.5].
pub fn item_score(item: &StageItem, config: &RoutingConfig) -> f64 {
    let base = if item.correct { 1.0 } else { 0.0 };
    let factor = config.difficulty_factors.for_band(item.band);
    (factor * (base + time_bonus(item.pace_ratio)) + guess_penalty(item.correct, item.pace_ratio))
        .clamp(-0.2, 1.5)
}

/// Reduces a stage block to its routing statistics. An empty block (which
/// the lifecycle manager never produces) aggregates to all zeros.
pub fn aggregate(items: &[StageItem], config: &RoutingConfig) -> StageAggregate {
    if items.is_empty() {
        return StageAggregate {
            accuracy: 0.0,
            stage_score: 0.0,
            avg_pace_ratio: 0.0,
            wrong_fast_count: 0,
        };
    }
    let n = items.len() as f64;
    let correct = items.iter().filter(|i| i.correct).count() as f64;
    let stage_score: f64 = items.iter().map(|i| item_score(i, config)).sum();
    let pace_sum: f64 = items.iter().map(|i| i.pace_ratio).sum();
    let wrong_fast = items
        .iter()
        .filter(|i| !i.correct && i.pace_ratio <= 0.8)
        .count() as i64;

    StageAggregate {
        accuracy: correct / n,
        stage_score,
        avg_pace_ratio: pace_sum / n,
        wrong_fast_count: wrong_fast,
    }
}

/// Routing rule order: promote, hold, demote, then hold as the fallback so
/// no threshold combination leaves the candidate un-routed.
pub fn route(agg: &StageAggregate, config: &RoutingConfig) -> RoutingDecision {
    if agg.wrong_fast_count <= config.guard_max_wrong_fast
        && agg.stage_score >= config.promote.min_stage_score
        && agg.accuracy >= config.promote.min_accuracy
    {
        return RoutingDecision::Promote;
    }
    if (agg.stage_score >= config.hold.low && agg.stage_score < config.hold.high)
        || (agg.accuracy >= config.hold.min_accuracy && agg.avg_pace_ratio > config.hold.min_avg_pace)
    {
        return RoutingDecision::Hold;
    }
    if agg.stage_score < config.demote.max_stage_score || agg.accuracy < config.demote.max_accuracy {
        return RoutingDecision::Demote;
    }
    RoutingDecision::Hold
}

/// Applies a routing decision to the current band, clamped to [1, 5].
pub fn next_band(current_band: i32, decision: RoutingDecision) -> i32 {
    let next = match decision {
        RoutingDecision::Promote => current_band + 1,
        RoutingDecision::Hold => current_band,
        RoutingDecision::Demote => current_band - 1,
    };
    next.clamp(MIN_BAND, MAX_BAND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::DifficultyFactors;

    fn block(correct: bool, pace: f64, band: i32, n: usize) -> Vec<StageItem> {
        vec![
            StageItem {
                correct,
                pace_ratio: pace,
                band,
            };
            n
        ]
    }

    #[test]
    fn item_score_clamps_at_the_ceiling() {
        let cfg = RoutingConfig::default();
        // Band 5, correct and fast: 1.3 * 1.2 = 1.56 -> 1.5.
        let high = StageItem {
            correct: true,
            pace_ratio: 0.5,
            band: 5,
        };
        assert_eq!(item_score(&high, &cfg), 1.5);
    }

    #[test]
    fn wrong_fast_answer_nets_the_guess_penalty() {
        let cfg = RoutingConfig::default();
        // The time bonus applies regardless of correctness: at band 3 a fast
        // wrong answer scores 1.0 * (0 + 0.2) - 0.2 = 0.0.
        let item = StageItem {
            correct: false,
            pace_ratio: 0.5,
            band: 3,
        };
        assert!((item_score(&item, &cfg)).abs() < 1e-12);

        // With the default factors the -0.2 floor is only met, never
        // crossed; a zeroed factor pins it exactly.
        let mut cfg = RoutingConfig::default();
        cfg.difficulty_factors = DifficultyFactors([0.0; 5]);
        assert_eq!(item_score(&item, &cfg), -0.2);
    }

    #[test]
    fn fast_perfect_stage_promotes() {
        // 10 correct answers at pace 0.5 on band 3: each scores
        // 1.0 * (1 + 0.2) = 1.2, stage score 12, accuracy 1.0.
        let cfg = RoutingConfig::default();
        let agg = aggregate(&block(true, 0.5, 3, 10), &cfg);
        assert_eq!(agg.accuracy, 1.0);
        assert!((agg.stage_score - 12.0).abs() < 1e-9);
        assert_eq!(agg.wrong_fast_count, 0);
        assert_eq!(route(&agg, &cfg), RoutingDecision::Promote);
        assert_eq!(next_band(3, RoutingDecision::Promote), 4);
    }

    #[test]
    fn all_wrong_and_fast_demotes() {
        let cfg = RoutingConfig::default();
        let agg = aggregate(&block(false, 0.5, 3, 10), &cfg);
        assert_eq!(agg.accuracy, 0.0);
        assert_eq!(agg.wrong_fast_count, 10);
        assert_eq!(route(&agg, &cfg), RoutingDecision::Demote);
    }

    #[test]
    fn guard_blocks_promotion_of_fast_guessers() {
        let cfg = RoutingConfig::default();
        // 8 correct fast answers plus 3 fast wrong ones: score and accuracy
        // could still clear the promote bar on a generous config, but the
        // wrong-fast guard must veto it.
        let mut items = block(true, 0.5, 5, 8);
        items.extend(block(false, 0.5, 5, 3));
        let agg = aggregate(&items, &cfg);
        assert!(agg.wrong_fast_count > cfg.guard_max_wrong_fast);
        assert_ne!(route(&agg, &cfg), RoutingDecision::Promote);
    }

    #[test]
    fn middling_stage_holds() {
        let cfg = RoutingConfig::default();
        // 6 correct at normal pace on band 3: 6 * 1.1 = 6.6, inside [4, 7.5).
        let mut items = block(true, 1.0, 3, 6);
        items.extend(block(false, 1.0, 3, 4));
        let agg = aggregate(&items, &cfg);
        assert_eq!(route(&agg, &cfg), RoutingDecision::Hold);
    }

    #[test]
    fn accurate_but_slow_holds_instead_of_demoting() {
        let mut cfg = RoutingConfig::default();
        cfg.hold.low = 5.0;
        // Band 1, 6 correct and 4 wrong, all well over budget: stage score
        // 6 * 0.7 = 4.2 falls below the hold window, but decent accuracy at
        // a slow pace reads as careful work, not failure.
        let mut items = block(true, 1.5, 1, 6);
        items.extend(block(false, 1.5, 1, 4));
        let agg = aggregate(&items, &cfg);
        assert!(agg.stage_score < cfg.hold.low);
        assert!(agg.accuracy >= cfg.hold.min_accuracy);
        assert!(agg.avg_pace_ratio > cfg.hold.min_avg_pace);
        assert_eq!(route(&agg, &cfg), RoutingDecision::Hold);
    }

    #[test]
    fn every_decision_keeps_band_in_range() {
        for band in -2..9 {
            for decision in [
                RoutingDecision::Promote,
                RoutingDecision::Hold,
                RoutingDecision::Demote,
            ] {
                let next = next_band(band, decision);
                assert!((MIN_BAND..=MAX_BAND).contains(&next));
            }
        }
        assert_eq!(next_band(5, RoutingDecision::Promote), 5);
        assert_eq!(next_band(1, RoutingDecision::Demote), 1);
    }

    #[test]
    fn empty_block_aggregates_to_zeros() {
        let cfg = RoutingConfig::default();
        let agg = aggregate(&[], &cfg);
        assert_eq!(agg.accuracy, 0.0);
        assert_eq!(agg.stage_score, 0.0);
        assert_eq!(agg.avg_pace_ratio, 0.0);
        assert_eq!(agg.wrong_fast_count, 0);
    }
}
