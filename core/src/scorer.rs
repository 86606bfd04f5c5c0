//! `Scorer`: assigns a normalized quality score and filters by
//! `minEfficiency`. See `spec.md` §4.8.

use std::collections::HashMap;

use crate::config::ScoringWeights;
use crate::graph_index::GraphSnapshot;
use crate::ids::WalletId;
use crate::model::TradeStep;

/// Participant count at which `size_bonus` saturates at 1.0.
const SIZE_BONUS_CAP: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreResult {
    pub score: f64,
    pub efficiency: f64,
    pub valuation_incomplete: bool,
}

pub struct Scorer {
    pub weights: ScoringWeights,
    pub neutral_efficiency: f64,
    pub fairness_imbalance_threshold: f64,
}

impl Scorer {
    pub fn new(
        weights: ScoringWeights,
        neutral_efficiency: f64,
        fairness_imbalance_threshold: f64,
    ) -> Self {
        Self {
            weights,
            neutral_efficiency,
            fairness_imbalance_threshold,
        }
    }

    /// Scores one candidate loop. Never raises — an unscoreable loop still
    /// gets a result (neutral efficiency, flagged incomplete); the caller
    /// decides whether to drop it via `minEfficiency`.
    pub fn score(&self, steps: &[TradeStep], snapshot: &GraphSnapshot) -> ScoreResult {
        let mut given: HashMap<&WalletId, Option<f64>> = HashMap::new();
        let mut received: HashMap<&WalletId, Option<f64>> = HashMap::new();

        for step in steps {
            let value = snapshot.nft(&step.nft).and_then(|n| n.estimated_value);
            given.insert(&step.from, value);
            received.insert(&step.to, value);
        }

        let participants: Vec<&WalletId> = steps.iter().map(|s| &s.from).collect();
        let mut nets: Vec<f64> = Vec::new();
        let mut relative_imbalances: Vec<f64> = Vec::new();
        let mut any_unknown = false;

        for participant in &participants {
            match (
                given.get(participant).copied().flatten(),
                received.get(participant).copied().flatten(),
            ) {
                (Some(g), Some(r)) => {
                    nets.push(r - g);
                    let denom = g.abs().max(1e-9);
                    relative_imbalances.push(((r - g) / denom).abs());
                }
                _ => any_unknown = true,
            }
        }

        let valuation_incomplete = any_unknown;
        let efficiency = if nets.len() < 2 {
            self.neutral_efficiency
        } else {
            let mean = nets.iter().sum::<f64>() / nets.len() as f64;
            let variance = nets.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / nets.len() as f64;
            let std_dev = variance.sqrt();
            let cv = if mean.abs() > 1e-9 {
                (std_dev / mean).abs()
            } else if std_dev < 1e-9 {
                0.0
            } else {
                1.0
            };
            (1.0 - cv).clamp(0.0, 1.0)
        };

        let size_bonus = {
            let n = participants.len().min(SIZE_BONUS_CAP);
            if SIZE_BONUS_CAP <= 2 {
                0.0
            } else {
                ((n.saturating_sub(2)) as f64 / (SIZE_BONUS_CAP - 2) as f64).clamp(0.0, 1.0)
            }
        };

        let fairness = if relative_imbalances.is_empty() {
            1.0
        } else {
            let violations = relative_imbalances
                .iter()
                .filter(|imb| **imb > self.fairness_imbalance_threshold)
                .count();
            1.0 - (violations as f64 / relative_imbalances.len() as f64)
        };

        let score = self.weights.efficiency * efficiency
            + self.weights.size * size_bonus
            + self.weights.fairness * fairness;

        ScoreResult {
            score: score.clamp(0.0, 1.0),
            efficiency,
            valuation_incomplete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MergePolicy;
    use crate::graph_index::GraphIndex;
    use crate::ids::NftId;
    use crate::model::Nft;

    fn snapshot_with_values(values: &[(&str, f64)]) -> GraphSnapshot {
        let index = GraphIndex::new();
        for (id, value) in values {
            let mut nft = Nft::new(NftId::from(*id));
            nft.estimated_value = Some(*value);
            index
                .upsert_inventory(&WalletId::from("owner"), &[nft], MergePolicy::Steal)
                .unwrap();
        }
        index.snapshot()
    }

    fn step(from: &str, to: &str, nft: &str) -> TradeStep {
        TradeStep {
            from: WalletId::from(from),
            to: WalletId::from(to),
            nft: NftId::from(nft),
        }
    }

    #[test]
    fn equal_values_yield_full_efficiency() {
        let snapshot = snapshot_with_values(&[("n1", 1.0), ("n2", 1.0)]);
        let scorer = Scorer::new(ScoringWeights::default(), 0.5, 0.5);
        let steps = vec![step("a", "b", "n1"), step("b", "a", "n2")];
        let result = scorer.score(&steps, &snapshot);
        assert!((result.efficiency - 1.0).abs() < 1e-9);
        assert!(!result.valuation_incomplete);
    }

    #[test]
    fn unknown_values_are_neutral_and_flagged() {
        let snapshot = GraphIndex::new().snapshot();
        let scorer = Scorer::new(ScoringWeights::default(), 0.5, 0.5);
        let steps = vec![step("a", "b", "n1"), step("b", "a", "n2")];
        let result = scorer.score(&steps, &snapshot);
        assert_eq!(result.efficiency, 0.5);
        assert!(result.valuation_incomplete);
    }

    #[test]
    fn larger_loop_scores_at_least_as_high_on_size_bonus() {
        let snapshot = snapshot_with_values(&[
            ("n1", 1.0),
            ("n2", 1.0),
            ("n3", 1.0),
            ("n4", 1.0),
            ("n5", 1.0),
            ("n6", 1.0),
        ]);
        let scorer = Scorer::new(ScoringWeights::default(), 0.5, 0.5);
        let two = vec![step("a", "b", "n1"), step("b", "a", "n2")];
        let six = vec![
            step("a", "b", "n1"),
            step("b", "c", "n2"),
            step("c", "d", "n3"),
            step("d", "e", "n4"),
            step("e", "f", "n5"),
            step("f", "a", "n6"),
        ];
        let score_two = scorer.score(&two, &snapshot).score;
        let score_six = scorer.score(&six, &snapshot).score;
        assert!(score_six >= score_two);
    }
}
