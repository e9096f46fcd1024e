//! Scalarization of global cost, local cost and unfairness into the single
//! objective an agent minimizes when it picks a plan.

mod optimization;

pub use optimization::{Candidate, Objective};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data::DiscomfortStats;

/// Variances whose magnitude is below this are treated as zero before `sqrt`
pub const VARIANCE_CLAMP: f64 = 1e-9;

/// Run-wide trade-off weights
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Weights {
    /// Weight of unfairness
    pub alpha: f64,
    /// Weight of the mean local cost
    pub beta: f64,
    /// Weight of the rank-position term in the alternative scalarizations
    #[serde(default)]
    pub lambda: f64,
}

impl Weights {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self {
            alpha,
            beta,
            lambda: 0.0,
        }
    }

    /// Weight left for the global cost term
    pub fn global(&self) -> f64 {
        1.0 - self.alpha - self.beta
    }

    pub fn is_multi_objective(&self) -> bool {
        self.alpha > 0.0 || self.beta > 0.0
    }
}

/// Mean discomfort over the population
pub fn local_cost(stats: &DiscomfortStats, num_agents: usize) -> f64 {
    stats.sum / num_agents.max(1) as f64
}

/// Population standard deviation of discomfort. Never negative and never NaN
/// for finite inputs.
pub fn unfairness(stats: &DiscomfortStats, num_agents: usize) -> f64 {
    let n = num_agents.max(1) as f64;
    let mean = stats.sum / n;
    let mut diff = stats.sum_sqr / n - mean * mean;
    if diff.abs() < VARIANCE_CLAMP {
        diff = 0.0;
    }
    diff.max(0.0).sqrt()
}

/// Values available to a scalarization for one candidate
#[derive(Debug, Clone, Copy)]
pub struct Factors {
    pub global_cost: f64,
    pub discomfort: DiscomfortStats,
    pub num_agents: usize,
    /// Position of the candidate divided by the number of candidates
    pub rank: f64,
    /// Standard deviation of the global costs of all candidates
    pub cost_std: f64,
    /// Mean of the global costs of all candidates
    pub cost_mean: f64,
}

/// Pluggable scalarization function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scalarization {
    /// `(1-α-β)·global + α·unfairness + β·local`
    #[default]
    Complex,
    /// `cost + λ·rank·std`
    WeightedStd,
    /// `(1-λ)·cost + λ·rank·std`
    ComplementaryStd,
    /// `(1-λ)·cost + λ·rank·mean`
    ComplementaryMean,
    /// `(1-λ)·cost + λ·rank`
    ComplementaryRank,
}

impl Scalarization {
    /// Whether the weights make this function differ from the raw global cost
    pub fn is_active(&self, weights: &Weights) -> bool {
        match self {
            Scalarization::Complex => weights.is_multi_objective(),
            _ => weights.lambda != 0.0,
        }
    }

    pub fn apply(&self, weights: &Weights, f: &Factors) -> f64 {
        let lambda = weights.lambda;
        match self {
            Scalarization::Complex => {
                weights.global() * f.global_cost
                    + weights.alpha * unfairness(&f.discomfort, f.num_agents)
                    + weights.beta * local_cost(&f.discomfort, f.num_agents)
            }
            Scalarization::WeightedStd => f.global_cost + lambda * f.rank * f.cost_std,
            Scalarization::ComplementaryStd => {
                (1.0 - lambda) * f.global_cost + lambda * f.rank * f.cost_std
            }
            Scalarization::ComplementaryMean => {
                (1.0 - lambda) * f.global_cost + lambda * f.rank * f.cost_mean
            }
            Scalarization::ComplementaryRank => (1.0 - lambda) * f.global_cost + lambda * f.rank,
        }
    }
}

impl fmt::Display for Scalarization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalarization::Complex => write!(f, "complex"),
            Scalarization::WeightedStd => write!(f, "weighted_std"),
            Scalarization::ComplementaryStd => write!(f, "complementary_std"),
            Scalarization::ComplementaryMean => write!(f, "complementary_mean"),
            Scalarization::ComplementaryRank => write!(f, "complementary_rank"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factors(global_cost: f64, sum: f64, sum_sqr: f64, num_agents: usize) -> Factors {
        Factors {
            global_cost,
            discomfort: DiscomfortStats::new(sum, sum_sqr),
            num_agents,
            rank: 0.0,
            cost_std: 0.0,
            cost_mean: 0.0,
        }
    }

    #[test]
    fn test_unfairness_is_population_std() {
        // discomforts 1, 2, 3 -> mean 2, variance 2/3
        let stats = DiscomfortStats::new(6.0, 14.0);
        assert!((unfairness(&stats, 3) - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(local_cost(&stats, 3), 2.0);
    }

    #[test]
    fn test_unfairness_clamps_round_off() {
        // sum_sqr/n marginally below mean^2
        let stats = DiscomfortStats::new(3.0, 3.0 - 1e-10);
        let value = unfairness(&stats, 3);
        assert_eq!(value, 0.0);
        assert!(!value.is_nan());
    }

    #[test]
    fn test_unfairness_never_negative_for_larger_deficit() {
        let stats = DiscomfortStats::new(3.0, 2.0);
        let value = unfairness(&stats, 3);
        assert_eq!(value, 0.0);
    }

    #[test]
    fn test_complex_objective() {
        let weights = Weights::new(0.25, 0.5);
        // unfairness 0 (identical discomforts), local cost 1
        let value = Scalarization::Complex.apply(&weights, &factors(8.0, 2.0, 2.0, 2));
        assert!((value - (0.25 * 8.0 + 0.5 * 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_complex_inactive_without_weights() {
        assert!(!Scalarization::Complex.is_active(&Weights::new(0.0, 0.0)));
        assert!(Scalarization::Complex.is_active(&Weights::new(0.0, 0.1)));
        assert!(!Scalarization::ComplementaryRank.is_active(&Weights::new(0.5, 0.0)));
    }

    #[test]
    fn test_rank_variants() {
        let weights = Weights {
            alpha: 0.0,
            beta: 0.0,
            lambda: 0.5,
        };
        let f = Factors {
            rank: 0.5,
            cost_std: 2.0,
            cost_mean: 4.0,
            ..factors(10.0, 0.0, 0.0, 1)
        };
        assert_eq!(Scalarization::WeightedStd.apply(&weights, &f), 10.5);
        assert_eq!(Scalarization::ComplementaryStd.apply(&weights, &f), 5.5);
        assert_eq!(Scalarization::ComplementaryMean.apply(&weights, &f), 6.0);
        assert_eq!(Scalarization::ComplementaryRank.apply(&weights, &f), 5.25);
    }
}
