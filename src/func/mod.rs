//! Cost functions: global cost over an aggregated response and local cost
//! over a single plan.

mod global;
mod local;

pub use global::{
    CrossCorrelationCost, DotCost, MaxCost, ResidualSumOfSquaresCost, RmseCost, SqrDistCost,
    StdDevCost, VarianceCost,
};
pub use local::{DiscomfortCost, IndexCost, PreferenceCost};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::data::{Normalization, Plan, Vector};
use crate::error::{IeposError, Result};

/// Cost of an aggregated (global) response
pub trait CostFunction: Send + Sync + fmt::Debug {
    fn calc_cost(&self, value: &Vector) -> f64;

    /// Short label used in measurements and logs
    fn label(&self) -> &'static str;
}

/// Global cost with an analytic gradient
pub trait DifferentiableCostFunction: CostFunction {
    fn calc_gradient(&self, value: &Vector) -> Vector;
}

/// Cost of a single plan (local cost / discomfort)
pub trait PlanCostFunction: Send + Sync + fmt::Debug {
    fn calc_cost(&self, plan: &Plan) -> f64;

    fn label(&self) -> &'static str;
}

/// Global cost function selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalCostKind {
    #[default]
    Variance,
    StdDev,
    Dot,
    SqrDist,
    Rmse,
    Rss,
    CrossCorrelation,
    SlidingCrossCorrelation,
    Max,
}

impl GlobalCostKind {
    /// Whether the function compares the response against a goal signal
    pub fn needs_goal(&self) -> bool {
        matches!(
            self,
            GlobalCostKind::Dot
                | GlobalCostKind::SqrDist
                | GlobalCostKind::Rmse
                | GlobalCostKind::Rss
                | GlobalCostKind::CrossCorrelation
                | GlobalCostKind::SlidingCrossCorrelation
        )
    }

    pub fn build(
        &self,
        goal: Option<&Vector>,
        normalization: Normalization,
    ) -> Result<Arc<dyn CostFunction>> {
        let require_goal = || {
            goal.cloned().ok_or_else(|| {
                IeposError::Config(format!("global cost '{}' requires a goal signal", self))
            })
        };
        let cost: Arc<dyn CostFunction> = match self {
            GlobalCostKind::Variance => Arc::new(VarianceCost),
            GlobalCostKind::StdDev => Arc::new(StdDevCost),
            GlobalCostKind::Dot => Arc::new(DotCost::new(require_goal()?)),
            GlobalCostKind::SqrDist => Arc::new(SqrDistCost::new(require_goal()?)),
            GlobalCostKind::Rmse => Arc::new(RmseCost::new(require_goal()?)),
            GlobalCostKind::Rss => Arc::new(ResidualSumOfSquaresCost::new(require_goal()?, normalization)),
            GlobalCostKind::CrossCorrelation => Arc::new(CrossCorrelationCost::new(require_goal()?, false)),
            GlobalCostKind::SlidingCrossCorrelation => {
                Arc::new(CrossCorrelationCost::new(require_goal()?, true))
            }
            GlobalCostKind::Max => Arc::new(MaxCost),
        };
        Ok(cost)
    }
}

impl fmt::Display for GlobalCostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlobalCostKind::Variance => write!(f, "variance"),
            GlobalCostKind::StdDev => write!(f, "std_dev"),
            GlobalCostKind::Dot => write!(f, "dot"),
            GlobalCostKind::SqrDist => write!(f, "sqr_dist"),
            GlobalCostKind::Rmse => write!(f, "rmse"),
            GlobalCostKind::Rss => write!(f, "rss"),
            GlobalCostKind::CrossCorrelation => write!(f, "cross_correlation"),
            GlobalCostKind::SlidingCrossCorrelation => write!(f, "sliding_cross_correlation"),
            GlobalCostKind::Max => write!(f, "max"),
        }
    }
}

/// Local cost function selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalCostKind {
    #[default]
    Discomfort,
    Preference,
    Index,
}

impl LocalCostKind {
    pub fn build(&self) -> Arc<dyn PlanCostFunction> {
        match self {
            LocalCostKind::Discomfort => Arc::new(DiscomfortCost),
            LocalCostKind::Preference => Arc::new(PreferenceCost),
            LocalCostKind::Index => Arc::new(IndexCost),
        }
    }
}

impl fmt::Display for LocalCostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalCostKind::Discomfort => write!(f, "discomfort"),
            LocalCostKind::Preference => write!(f, "preference"),
            LocalCostKind::Index => write!(f, "index"),
        }
    }
}
