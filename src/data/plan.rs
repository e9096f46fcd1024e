use serde::{Deserialize, Serialize};

use super::Vector;

/// One candidate plan of an agent.
///
/// `score` is the discomfort (or preference, depending on the local cost
/// function) supplied by the data source. `index` is the plan's position in
/// the owning agent's candidate list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    value: Vector,
    pub index: usize,
    pub score: f64,
}

impl Plan {
    pub fn new(index: usize, value: Vector, score: f64) -> Self {
        Self {
            value,
            index,
            score,
        }
    }

    /// Plan with a zero score, for data sources that carry no discomfort
    pub fn from_value(index: usize, value: Vector) -> Self {
        Self::new(index, value, 0.0)
    }

    pub fn value(&self) -> &Vector {
        &self.value
    }

    pub fn dim(&self) -> usize {
        self.value.dim()
    }

    /// Zero plan of the same dimension; the score is unknown (NaN)
    pub fn clone_new(&self) -> Self {
        Self {
            value: self.value.clone_new(),
            index: 0,
            score: f64::NAN,
        }
    }
}
