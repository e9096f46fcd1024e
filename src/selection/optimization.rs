use super::{Factors, Scalarization, Weights};
use crate::data::{DiscomfortStats, Plan, Vector};
use crate::func::{CostFunction, PlanCostFunction};

/// A possible aggregate: response plus the discomfort statistics behind it
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub response: Vector,
    pub discomfort: DiscomfortStats,
}

impl Candidate {
    pub fn new(response: Vector, discomfort: DiscomfortStats) -> Self {
        Self {
            response,
            discomfort,
        }
    }
}

/// Scalarized objective of one node for the current iteration
pub struct Objective<'a> {
    pub cost: &'a dyn CostFunction,
    pub scalarization: Scalarization,
    pub weights: Weights,
    pub num_agents: usize,
}

impl<'a> Objective<'a> {
    /// Scalarized value of each candidate, in candidate order
    pub fn evaluate(&self, candidates: &[Candidate]) -> Vec<f64> {
        let costs: Vec<f64> = candidates
            .iter()
            .map(|c| self.cost.calc_cost(&c.response))
            .collect();
        if !self.scalarization.is_active(&self.weights) {
            return costs;
        }

        let n = costs.len().max(1) as f64;
        let cost_mean = costs.iter().sum::<f64>() / n;
        let cost_std = (costs
            .iter()
            .map(|c| (c - cost_mean) * (c - cost_mean))
            .sum::<f64>()
            / n)
            .sqrt();

        costs
            .iter()
            .zip(candidates)
            .enumerate()
            .map(|(i, (cost, candidate))| {
                let factors = Factors {
                    global_cost: *cost,
                    discomfort: candidate.discomfort,
                    num_agents: self.num_agents,
                    rank: i as f64 / n,
                    cost_std,
                    cost_mean,
                };
                self.scalarization.apply(&self.weights, &factors)
            })
            .collect()
    }

    /// Index of the candidate with the lowest objective. The first minimum
    /// wins; NaN values never win.
    pub fn argmin(&self, candidates: &[Candidate]) -> Option<usize> {
        first_min(&self.evaluate(candidates))
    }

    /// Best plan given everything else in the system (`others`, `others_stats`)
    pub fn select_plan(
        &self,
        plans: &[Plan],
        local_cost: &dyn PlanCostFunction,
        others: &Vector,
        others_stats: DiscomfortStats,
    ) -> Option<usize> {
        let candidates: Vec<Candidate> = plans
            .iter()
            .map(|plan| {
                let mut discomfort = others_stats;
                discomfort.add_discomfort(local_cost.calc_cost(plan));
                Candidate::new(Vector::sum_of(others, plan.value()), discomfort)
            })
            .collect();
        self.argmin(&candidates)
    }

    /// Best mix of previous (`choices[i][0]`) and current (`choices[i][1]`)
    /// child contributions. Returns one approval flag per child.
    pub fn select_combination(
        &self,
        others: &Vector,
        others_stats: DiscomfortStats,
        choices: &[[Candidate; 2]],
    ) -> Option<Vec<bool>> {
        let combinations = all_combinations(others, others_stats, choices);
        let selected = self.argmin(&combinations)?;
        Some(combination_to_selections(selected, choices.len()))
    }
}

/// Every way of picking one of two contributions per child, added onto the
/// constant part. Child `i` takes its second choice in combination `c` iff
/// bit `i` of `c` is set.
pub fn all_combinations(
    constant: &Vector,
    constant_stats: DiscomfortStats,
    choices: &[[Candidate; 2]],
) -> Vec<Candidate> {
    let count = 1usize << choices.len();
    (0..count)
        .map(|c| {
            let mut combination = Candidate::new(constant.clone(), constant_stats);
            for (i, options) in choices.iter().enumerate() {
                let chosen = &options[(c >> i) & 1];
                combination.response.add(&chosen.response);
                combination.discomfort += chosen.discomfort;
            }
            combination
        })
        .collect()
}

pub fn combination_to_selections(combination: usize, num_children: usize) -> Vec<bool> {
    (0..num_children)
        .map(|i| (combination >> i) & 1 == 1)
        .collect()
}

fn first_min(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, value) in values.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, min)) if *value >= min => {}
            _ => best = Some((i, *value)),
        }
    }
    // all NaN: fall back to the first candidate
    best.map(|(i, _)| i).or(if values.is_empty() { None } else { Some(0) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::{DiscomfortCost, VarianceCost};

    fn v(values: &[f64]) -> Vector {
        Vector::from_values(values.to_vec())
    }

    fn objective(cost: &dyn CostFunction, weights: Weights, num_agents: usize) -> Objective<'_> {
        Objective {
            cost,
            scalarization: Scalarization::Complex,
            weights,
            num_agents,
        }
    }

    #[test]
    fn test_select_plan_minimizes_variance_of_sum() {
        let plans = vec![
            Plan::new(0, v(&[2.0, 0.0]), 0.0),
            Plan::new(1, v(&[0.0, 2.0]), 0.0),
        ];
        let others = v(&[3.0, 1.0]);
        let obj = objective(&VarianceCost, Weights::default(), 2);
        let selected = obj.select_plan(&plans, &DiscomfortCost, &others, DiscomfortStats::default());
        assert_eq!(selected, Some(1));
    }

    #[test]
    fn test_ties_pick_first_candidate() {
        let plans = vec![
            Plan::new(0, v(&[1.0, 1.0]), 0.0),
            Plan::new(1, v(&[2.0, 2.0]), 0.0),
            Plan::new(2, v(&[0.0, 0.0]), 0.0),
        ];
        let obj = objective(&VarianceCost, Weights::default(), 1);
        let selected = obj.select_plan(&plans, &DiscomfortCost, &v(&[0.0, 0.0]), DiscomfortStats::default());
        assert_eq!(selected, Some(0));
    }

    #[test]
    fn test_local_cost_weight_prefers_low_discomfort() {
        let plans = vec![
            Plan::new(0, v(&[1.0, 1.0]), 0.9),
            Plan::new(1, v(&[2.0, 0.0]), 0.1),
        ];
        let others = v(&[0.0, 0.0]);
        let none = objective(&VarianceCost, Weights::default(), 1);
        assert_eq!(
            none.select_plan(&plans, &DiscomfortCost, &others, DiscomfortStats::default()),
            Some(0)
        );

        let local = objective(&VarianceCost, Weights::new(0.0, 1.0), 1);
        assert_eq!(
            local.select_plan(&plans, &DiscomfortCost, &others, DiscomfortStats::default()),
            Some(1)
        );
    }

    #[test]
    fn test_empty_candidates() {
        let obj = objective(&VarianceCost, Weights::default(), 1);
        assert_eq!(obj.argmin(&[]), None);
    }

    #[test]
    fn test_nan_never_wins() {
        assert_eq!(first_min(&[f64::NAN, 3.0, 1.0]), Some(2));
        assert_eq!(first_min(&[f64::NAN]), Some(0));
    }

    #[test]
    fn test_combination_encoding() {
        let choices = vec![
            [
                Candidate::new(v(&[1.0]), DiscomfortStats::single(1.0)),
                Candidate::new(v(&[10.0]), DiscomfortStats::single(2.0)),
            ],
            [
                Candidate::new(v(&[100.0]), DiscomfortStats::single(3.0)),
                Candidate::new(v(&[1000.0]), DiscomfortStats::single(4.0)),
            ],
        ];
        let combos = all_combinations(&v(&[0.0]), DiscomfortStats::default(), &choices);
        let sums: Vec<f64> = combos.iter().map(|c| c.response.get(0)).collect();
        assert_eq!(sums, vec![101.0, 110.0, 1001.0, 1010.0]);
        assert_eq!(combos[3].discomfort, DiscomfortStats::new(6.0, 20.0));
        assert_eq!(combination_to_selections(2, 2), vec![false, true]);
    }

    #[test]
    fn test_select_combination_rejects_harmful_child() {
        // the second child's new contribution would unbalance the response
        let choices = vec![
            [
                Candidate::new(v(&[1.0, 0.0]), DiscomfortStats::default()),
                Candidate::new(v(&[0.0, 1.0]), DiscomfortStats::default()),
            ],
            [
                Candidate::new(v(&[1.0, 1.0]), DiscomfortStats::default()),
                Candidate::new(v(&[2.0, 0.0]), DiscomfortStats::default()),
            ],
        ];
        let obj = objective(&VarianceCost, Weights::default(), 2);
        let approvals = obj
            .select_combination(&v(&[1.0, 0.0]), DiscomfortStats::default(), &choices)
            .unwrap();
        assert_eq!(approvals, vec![true, false]);
    }
}
