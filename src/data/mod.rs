//! Plan and vector model shared by every agent.

mod plan;
mod vector;

pub use plan::Plan;
pub use vector::{Complex, Normalization, Vector, EPSILON};

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Running discomfort sums of a subtree (or of the whole population at the root)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DiscomfortStats {
    pub sum: f64,
    pub sum_sqr: f64,
}

impl DiscomfortStats {
    pub fn new(sum: f64, sum_sqr: f64) -> Self {
        Self { sum, sum_sqr }
    }

    /// Statistics of a single selected plan with the given discomfort
    pub fn single(discomfort: f64) -> Self {
        Self::new(discomfort, discomfort * discomfort)
    }

    pub fn add_discomfort(&mut self, discomfort: f64) {
        self.sum += discomfort;
        self.sum_sqr += discomfort * discomfort;
    }

    pub fn subtract(&mut self, other: &DiscomfortStats) {
        self.sum -= other.sum;
        self.sum_sqr -= other.sum_sqr;
    }
}

impl AddAssign for DiscomfortStats {
    fn add_assign(&mut self, other: Self) {
        self.sum += other.sum;
        self.sum_sqr += other.sum_sqr;
    }
}
