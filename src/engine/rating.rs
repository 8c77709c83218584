// src/engine/rating.rs

//! Paired rating updates for candidates and questions.
//!
//! Both sides carry a comparable rating on the same scale (neutral default
//! 1200). After every graded answer the candidate and the question move in
//! opposite directions, with the question moving half as fast.

/// Logistic scale: a 400-point rating gap maps to 10:1 odds.
const SCALE: f64 = 400.0 / core::f64::consts::LN_10;

/// Maximum rating movement per answer, for either party.
const MAX_DELTA: f64 = 24.0;

pub const K_CANDIDATE: f64 = 16.0;
pub const K_ITEM: f64 = 8.0;

/// Result of one paired update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingUpdate {
    pub candidate_after: i64,
    pub item_after: i64,
}

/// Probability that the candidate answers the item correctly,
/// `1 / (1 + e^(-(candidate - item)/S))`. Always strictly inside (0, 1).
pub fn expected_win_probability(candidate_rating: i64, item_rating: i64) -> f64 {
    let diff = (candidate_rating - item_rating) as f64;
    1.0 / (1.0 + (-diff / SCALE).exp())
}

/// Observed score in [0, 1]: correctness plus a pace adjustment.
/// Fast wrong answers are treated as likely guesses and penalized.
pub fn actual_score(correct: bool, pace_ratio: f64) -> f64 {
    let mut score: f64 = if correct { 1.0 } else { 0.0 };
    if correct {
        if pace_ratio <= 0.8 {
            score += 0.10;
        } else if pace_ratio <= 1.2 {
            score += 0.05;
        }
    } else if pace_ratio <= 0.8 {
        score -= 0.10;
    }
    score.clamp(0.0, 1.0)
}

/// Applies one graded answer to both ratings. Deltas are clamped to
/// +/-24 and rounded to whole points before being applied. Pure.
pub fn update_pair(
    candidate_rating: i64,
    item_rating: i64,
    correct: bool,
    pace_ratio: f64,
) -> RatingUpdate {
    let p = expected_win_probability(candidate_rating, item_rating);
    let a = actual_score(correct, pace_ratio);

    let candidate_delta = (K_CANDIDATE * (a - p)).clamp(-MAX_DELTA, MAX_DELTA);
    let item_delta = (K_ITEM * (p - a)).clamp(-MAX_DELTA, MAX_DELTA);

    RatingUpdate {
        candidate_after: candidate_rating + candidate_delta.round() as i64,
        item_after: item_rating + item_delta.round() as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_match_is_a_coin_flip() {
        let p = expected_win_probability(1200, 1200);
        assert!((p - 0.5).abs() < 1e-12);
    }

    #[test]
    fn four_hundred_points_is_ten_to_one() {
        let p = expected_win_probability(1600, 1200);
        assert!((p - 10.0 / 11.0).abs() < 1e-9);
    }

    #[test]
    fn probability_stays_open_interval() {
        for (c, i) in [(0, 4000), (4000, 0), (1200, 1200), (-500, 3000)] {
            let p = expected_win_probability(c, i);
            assert!(p > 0.0 && p < 1.0, "p={p} for ({c}, {i})");
        }
    }

    #[test]
    fn actual_score_pace_tiers() {
        assert_eq!(actual_score(true, 0.5), 1.0); // 1.1 clamped
        assert_eq!(actual_score(true, 0.8), 1.0);
        assert!((actual_score(true, 1.0) - 1.0).abs() < 1e-12); // 1.05 clamped
        assert_eq!(actual_score(true, 1.5), 1.0);
        assert_eq!(actual_score(false, 0.5), 0.0); // -0.1 clamped
        assert_eq!(actual_score(false, 1.0), 0.0);
    }

    // Property sweep: deltas are bounded and move in opposite directions
    // for every combination, not just a fixed example.
    #[test]
    fn deltas_bounded_and_antisymmetric() {
        let ratings = [400, 800, 1200, 1600, 2400];
        let paces = [0.0, 0.5, 0.8, 1.0, 1.2, 2.0, 10.0];
        for &c in &ratings {
            for &i in &ratings {
                for &correct in &[true, false] {
                    for &pace in &paces {
                        let up = update_pair(c, i, correct, pace);
                        let dc = up.candidate_after - c;
                        let di = up.item_after - i;
                        assert!(dc.abs() <= 24, "candidate delta {dc}");
                        assert!(di.abs() <= 24, "item delta {di}");
                        // Item never moves the same direction as the candidate.
                        assert!(dc * di <= 0, "dc={dc} di={di}");
                        // Item moves with half the K factor.
                        assert!(di.abs() <= dc.abs() + 1);
                    }
                }
            }
        }
    }

    #[test]
    fn upset_win_moves_candidate_up() {
        let up = update_pair(1000, 1400, true, 1.0);
        assert!(up.candidate_after > 1000);
        assert!(up.item_after < 1400);
    }

    #[test]
    fn expected_win_barely_moves_ratings() {
        // Strong candidate beats a weak item: p is near 1, so the
        // movement is small.
        let up = update_pair(1800, 1000, true, 1.0);
        assert!(up.candidate_after - 1800 <= 2);
    }
}
