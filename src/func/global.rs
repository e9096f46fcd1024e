use super::{CostFunction, DifferentiableCostFunction};
use crate::data::{Normalization, Vector, EPSILON};

/// Population variance of the response
#[derive(Debug, Clone, Copy, Default)]
pub struct VarianceCost;

impl CostFunction for VarianceCost {
    fn calc_cost(&self, value: &Vector) -> f64 {
        value.variance()
    }

    fn label(&self) -> &'static str {
        "VAR"
    }
}

impl DifferentiableCostFunction for VarianceCost {
    fn calc_gradient(&self, value: &Vector) -> Vector {
        let mut gradient = value.clone();
        gradient.subtract_scalar(value.avg());
        gradient.multiply_scalar(2.0 / (value.dim() as f64 - 1.0));
        gradient
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StdDevCost;

impl CostFunction for StdDevCost {
    fn calc_cost(&self, value: &Vector) -> f64 {
        value.std()
    }

    fn label(&self) -> &'static str {
        "STD"
    }
}

impl DifferentiableCostFunction for StdDevCost {
    fn calc_gradient(&self, value: &Vector) -> Vector {
        let mut gradient = value.clone();
        gradient.subtract_scalar(value.avg());
        let length = gradient.norm();
        if length == 0.0 {
            gradient.reset();
        } else {
            gradient.multiply_scalar(1.0 / length / (value.dim() as f64 - 1.0).sqrt());
        }
        gradient
    }
}

/// Dot product with a cost vector
#[derive(Debug, Clone)]
pub struct DotCost {
    cost_vector: Vector,
}

impl DotCost {
    pub fn new(cost_vector: Vector) -> Self {
        Self { cost_vector }
    }
}

impl CostFunction for DotCost {
    fn calc_cost(&self, value: &Vector) -> f64 {
        self.cost_vector.dot(value)
    }

    fn label(&self) -> &'static str {
        "DOT"
    }
}

impl DifferentiableCostFunction for DotCost {
    fn calc_gradient(&self, _value: &Vector) -> Vector {
        self.cost_vector.clone()
    }
}

/// Squared euclidean distance to a target
#[derive(Debug, Clone)]
pub struct SqrDistCost {
    target: Vector,
}

impl SqrDistCost {
    pub fn new(target: Vector) -> Self {
        Self { target }
    }
}

impl CostFunction for SqrDistCost {
    fn calc_cost(&self, value: &Vector) -> f64 {
        value.residual_sum_of_squares(&self.target)
    }

    fn label(&self) -> &'static str {
        "SQR"
    }
}

impl DifferentiableCostFunction for SqrDistCost {
    fn calc_gradient(&self, value: &Vector) -> Vector {
        let mut gradient = value.clone();
        gradient.subtract(&self.target);
        gradient.multiply_scalar(2.0);
        gradient
    }
}

/// RMSE against the goal after rescaling the goal to the response's mean
/// and standard deviation, so only the shape is compared.
#[derive(Debug, Clone)]
pub struct RmseCost {
    goal: Vector,
    goal_mean: f64,
    goal_std: f64,
}

impl RmseCost {
    pub fn new(goal: Vector) -> Self {
        let goal_mean = goal.avg();
        let goal_std = goal.std();
        Self {
            goal,
            goal_mean,
            goal_std,
        }
    }
}

impl CostFunction for RmseCost {
    fn calc_cost(&self, value: &Vector) -> f64 {
        let mut replica = self.goal.clone();
        replica.subtract_scalar(self.goal_mean);
        replica.multiply_scalar(value.std() / (self.goal_std + EPSILON));
        replica.add_scalar(value.avg());
        replica.root_mean_square_error(value)
    }

    fn label(&self) -> &'static str {
        "RMSE"
    }
}

impl DifferentiableCostFunction for RmseCost {
    fn calc_gradient(&self, value: &Vector) -> Vector {
        let mut gradient = value.clone();
        gradient.subtract(&self.goal);
        gradient.multiply_scalar(value.dim() as f64 / self.calc_cost(value));
        gradient
    }
}

/// Residual sum of squares between the normalized response and the
/// normalized goal
#[derive(Debug, Clone)]
pub struct ResidualSumOfSquaresCost {
    goal: Vector,
    goal_normalized: Vector,
    normalization: Normalization,
}

impl ResidualSumOfSquaresCost {
    pub fn new(goal: Vector, normalization: Normalization) -> Self {
        let goal_normalized = normalization.apply(&goal);
        Self {
            goal,
            goal_normalized,
            normalization,
        }
    }
}

impl CostFunction for ResidualSumOfSquaresCost {
    fn calc_cost(&self, value: &Vector) -> f64 {
        self.normalization
            .apply(value)
            .residual_sum_of_squares(&self.goal_normalized)
    }

    fn label(&self) -> &'static str {
        "RSS"
    }
}

impl DifferentiableCostFunction for ResidualSumOfSquaresCost {
    fn calc_gradient(&self, value: &Vector) -> Vector {
        let mut gradient = value.clone();
        gradient.subtract(&self.goal);
        gradient.multiply_scalar(2.0);
        gradient
    }
}

/// Negated cross-correlation with the goal. The sliding variant takes the
/// peak of the circular cross-correlation over all shifts.
#[derive(Debug, Clone)]
pub struct CrossCorrelationCost {
    goal: Vector,
    sliding: bool,
}

impl CrossCorrelationCost {
    pub fn new(goal: Vector, sliding: bool) -> Self {
        Self { goal, sliding }
    }

    fn coefficient(&self, response: &Vector) -> f64 {
        let mut goal = self.goal.clone();
        let mut response_centered = response.clone();
        goal.subtract_scalar(self.goal.avg());
        response_centered.subtract_scalar(response.avg());
        let total = response_centered.dot(&goal);
        let stdevs = response.dim() as f64 * self.goal.std() * response.std() + EPSILON;
        total / stdevs
    }

    fn sliding_peak(&self, response: &Vector) -> f64 {
        let scale = 1.0 / (response.std() * self.goal.std() + EPSILON);
        let mut response_n = response.clone();
        response_n.subtract_scalar(response.avg());
        response_n.multiply_scalar(scale);
        let mut goal_n = self.goal.clone();
        goal_n.subtract_scalar(self.goal.avg());
        goal_n.multiply_scalar(scale);

        let correlation = goal_n.cross_correlation(&response_n);
        Vector::from_real_parts(&correlation, correlation.len()).max()
    }
}

impl CostFunction for CrossCorrelationCost {
    fn calc_cost(&self, value: &Vector) -> f64 {
        if self.sliding {
            -self.sliding_peak(value)
        } else {
            -self.coefficient(value)
        }
    }

    fn label(&self) -> &'static str {
        "XCORR"
    }
}

/// Largest element of the response (peak load)
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxCost;

impl CostFunction for MaxCost {
    fn calc_cost(&self, value: &Vector) -> f64 {
        value.max()
    }

    fn label(&self) -> &'static str {
        "MAX"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(values: &[f64]) -> Vector {
        Vector::from_values(values.to_vec())
    }

    #[test]
    fn test_variance_cost_and_gradient() {
        let response = v(&[1.0, 2.0, 3.0]);
        assert!((VarianceCost.calc_cost(&response) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(VarianceCost.calc_gradient(&response), v(&[-1.0, 0.0, 1.0]));
    }

    #[test]
    fn test_std_dev_gradient_of_flat_signal_is_zero() {
        let flat = v(&[2.0, 2.0, 2.0]);
        assert_eq!(StdDevCost.calc_cost(&flat), 0.0);
        assert_eq!(StdDevCost.calc_gradient(&flat), v(&[0.0, 0.0, 0.0]));
    }

    #[test]
    fn test_goal_matching_costs() {
        let goal = v(&[1.0, 2.0, 3.0]);
        let dot = DotCost::new(goal.clone());
        assert_eq!(dot.calc_cost(&v(&[1.0, 1.0, 1.0])), 6.0);
        assert_eq!(dot.calc_gradient(&v(&[0.0, 0.0, 0.0])), goal);

        let sqr = SqrDistCost::new(goal.clone());
        assert_eq!(sqr.calc_cost(&v(&[1.0, 2.0, 5.0])), 4.0);
        assert_eq!(sqr.calc_gradient(&v(&[1.0, 2.0, 5.0])), v(&[0.0, 0.0, 4.0]));
    }

    #[test]
    fn test_rmse_ignores_offset_and_scale() {
        let cost = RmseCost::new(v(&[1.0, 2.0, 3.0, 2.0]));
        let same_shape = v(&[10.0, 30.0, 50.0, 30.0]);
        assert!(cost.calc_cost(&same_shape) < 1e-6);

        let other_shape = v(&[50.0, 30.0, 10.0, 30.0]);
        assert!(cost.calc_cost(&other_shape) > 1.0);
    }

    #[test]
    fn test_rss_compares_normalized_signals() {
        let cost = ResidualSumOfSquaresCost::new(v(&[0.0, 1.0, 2.0]), Normalization::MinMax);
        assert_eq!(cost.calc_cost(&v(&[5.0, 10.0, 15.0])), 0.0);
        assert!(cost.calc_cost(&v(&[15.0, 10.0, 5.0])) > 0.0);
    }

    #[test]
    fn test_cross_correlation_prefers_matching_shape() {
        let cost = CrossCorrelationCost::new(v(&[1.0, 3.0, 2.0, 4.0]), false);
        let matching = cost.calc_cost(&v(&[2.0, 6.0, 4.0, 8.0]));
        let inverted = cost.calc_cost(&v(&[4.0, 2.0, 3.0, 1.0]));
        assert!((matching + 1.0).abs() < 1e-6);
        assert!(inverted > matching);
    }

    #[test]
    fn test_sliding_cross_correlation_tolerates_shift() {
        let goal = v(&[0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let shifted = v(&[0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        let static_cost = CrossCorrelationCost::new(goal.clone(), false).calc_cost(&shifted);
        let sliding_cost = CrossCorrelationCost::new(goal, true).calc_cost(&shifted);
        assert!(sliding_cost < static_cost);
    }

    #[test]
    fn test_max_cost() {
        assert_eq!(MaxCost.calc_cost(&v(&[-1.0, 7.0, 3.0])), 7.0);
    }
}
