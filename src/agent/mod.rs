//! Per-agent iteration engine and reorganization strategies.

mod core;
mod engine;
mod reorganization;

pub use self::core::AgentCore;
pub use engine::Agent;
pub use reorganization::{
    Convergence, ReorganizationHost, ReorganizationKind, ReorganizationStrategy,
};

use std::fmt;
use std::sync::Arc;

use crate::func::{CostFunction, PlanCostFunction};
use crate::measurement::MeasurementSink;
use crate::selection::{Scalarization, Weights};

/// Run-wide settings shared by every agent
#[derive(Clone)]
pub struct AgentContext {
    pub num_iterations: usize,
    pub global_cost: Arc<dyn CostFunction>,
    pub local_cost: Arc<dyn PlanCostFunction>,
    pub weights: Weights,
    pub scalarization: Scalarization,
    pub sink: Arc<dyn MeasurementSink>,
}

impl fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentContext")
            .field("num_iterations", &self.num_iterations)
            .field("global_cost", &self.global_cost.label())
            .field("local_cost", &self.local_cost.label())
            .field("weights", &self.weights)
            .field("scalarization", &self.scalarization)
            .finish()
    }
}

/// Where an agent is in its iteration cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    /// Constructed, view not yet requested
    Idle,
    /// Waiting for the first tree view
    AwaitingView,
    /// Waiting for one contribution from every child
    AwaitingChildren,
    /// Contribution sent, waiting for the parent's broadcast
    AwaitingParent,
    /// Waiting for a replacement tree view
    Reorganizing,
    /// View has neither parent nor children
    Disconnected,
    Finished,
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentPhase::Idle => write!(f, "IDLE"),
            AgentPhase::AwaitingView => write!(f, "AWAITING_VIEW"),
            AgentPhase::AwaitingChildren => write!(f, "AWAIT_CHILDREN"),
            AgentPhase::AwaitingParent => write!(f, "AWAIT_PARENT"),
            AgentPhase::Reorganizing => write!(f, "REORGANIZING"),
            AgentPhase::Disconnected => write!(f, "DISCONNECTED"),
            AgentPhase::Finished => write!(f, "FINISHED"),
        }
    }
}
