use super::PlanCostFunction;
use crate::data::Plan;

/// Local cost equal to the plan's discomfort score (unknown scores cost 0)
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscomfortCost;

impl PlanCostFunction for DiscomfortCost {
    fn calc_cost(&self, plan: &Plan) -> f64 {
        if plan.score.is_nan() {
            0.0
        } else {
            plan.score
        }
    }

    fn label(&self) -> &'static str {
        "DISC"
    }
}

/// Local cost for data sources that encode a preference instead of a
/// discomfort: `1 - score`
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferenceCost;

impl PlanCostFunction for PreferenceCost {
    fn calc_cost(&self, plan: &Plan) -> f64 {
        if plan.score.is_nan() {
            0.0
        } else {
            1.0 - plan.score
        }
    }

    fn label(&self) -> &'static str {
        "PREF"
    }
}

/// Local cost equal to the plan's position in the candidate list
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexCost;

impl PlanCostFunction for IndexCost {
    fn calc_cost(&self, plan: &Plan) -> f64 {
        plan.index as f64
    }

    fn label(&self) -> &'static str {
        "INDEX"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Vector;

    #[test]
    fn test_discomfort_and_preference_are_dual() {
        let plan = Plan::new(2, Vector::new(3), 0.3);
        assert_eq!(DiscomfortCost.calc_cost(&plan), 0.3);
        assert!((PreferenceCost.calc_cost(&plan) - 0.7).abs() < 1e-12);
        assert_eq!(IndexCost.calc_cost(&plan), 2.0);
    }

    #[test]
    fn test_unknown_score_costs_nothing() {
        let blank = Plan::new(0, Vector::new(3), 0.0).clone_new();
        assert_eq!(DiscomfortCost.calc_cost(&blank), 0.0);
        assert_eq!(PreferenceCost.calc_cost(&blank), 0.0);
    }
}
