//! Reorganization strategies: when to rebuild the tree, and how an agent
//! picks its plan around a rebuild.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::data::Vector;
use crate::dataset::PredefinedSelection;
use crate::error::{IeposError, Result};

/// The agent state a strategy reads and drives
pub trait ReorganizationHost {
    fn iteration(&self) -> usize;

    /// Iteration at which the last tree view was requested
    fn reorganization_iteration(&self) -> usize;

    fn is_iteration_after_reorganization(&self) -> bool {
        self.iteration() == self.reorganization_iteration() + 1
    }

    /// Position of the agent in the population
    fn agent_index(&self) -> usize;

    fn selected_plan(&self) -> Option<usize>;

    fn global_response(&self) -> &Vector;

    fn global_cost(&self) -> f64;

    /// Pick and select the plan minimizing the objective
    fn optimize_plan(&mut self) -> Result<usize>;

    fn set_selected_plan(&mut self, index: usize) -> Result<()>;

    /// Only takes effect at the root
    fn force_reorganization(&mut self);
}

/// Strategy selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReorganizationKind {
    #[default]
    Never,
    Periodically,
    OnConvergence,
    #[serde(alias = "convergence_short")]
    GlobalCostReduction,
    Predefined,
}

impl fmt::Display for ReorganizationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReorganizationKind::Never => write!(f, "never"),
            ReorganizationKind::Periodically => write!(f, "periodically"),
            ReorganizationKind::OnConvergence => write!(f, "on_convergence"),
            ReorganizationKind::GlobalCostReduction => write!(f, "global_cost_reduction"),
            ReorganizationKind::Predefined => write!(f, "predefined"),
        }
    }
}

/// State shared by the convergence-based strategies
#[derive(Debug, Clone, Default)]
pub struct Convergence {
    memorization_offset: usize,
    previous_response: Option<Vector>,
    /// Plan to resume from on the iteration after a reorganization
    memorized: Option<usize>,
    reorganizations: usize,
}

impl Convergence {
    pub fn new(memorization_offset: usize) -> Self {
        Self {
            memorization_offset,
            ..Self::default()
        }
    }

    pub fn memorized(&self) -> Option<usize> {
        self.memorized
    }

    fn on_root_iteration_end(&mut self, host: &mut dyn ReorganizationHost) {
        let response = host.global_response();
        let converged = self.previous_response.as_ref() == Some(response);
        if !host.is_iteration_after_reorganization() && converged {
            self.reorganizations += 1;
            info!(
                "Global response unchanged at iteration {}, reorganizing",
                host.iteration()
            );
            host.force_reorganization();
        }
        self.previous_response = Some(host.global_response().clone());
    }

    fn select_plan(&mut self, host: &mut dyn ReorganizationHost) -> Result<()> {
        if host.iteration() == 0 || !host.is_iteration_after_reorganization() {
            host.optimize_plan()?;
        } else if let Some(memorized) = self.memorized {
            debug!("Resuming from memorized plan {}", memorized);
            host.set_selected_plan(memorized)?;
        }
        Ok(())
    }

    fn screenshot(&mut self, host: &dyn ReorganizationHost) {
        let iteration = host.iteration();
        let at_offset = iteration == self.memorization_offset;
        if !at_offset && iteration != host.reorganization_iteration() + self.memorization_offset {
            return;
        }
        let selected = host.selected_plan();
        let changed = self.memorized.is_some() && self.memorized != selected;
        self.memorized = if changed || at_offset { selected } else { None };
    }

    fn prepare_for_reorganization(&mut self, host: &dyn ReorganizationHost) {
        let iteration = host.iteration();
        if iteration < self.memorization_offset
            || iteration < host.reorganization_iteration() + self.memorization_offset
        {
            self.memorized = None;
        }
        // the next root compares against responses of the new tree only
        self.previous_response = None;
    }
}

/// Decides at the root whether to reorganize and, at every agent, how the
/// plan is chosen in each iteration
#[derive(Debug, Clone)]
pub enum ReorganizationStrategy {
    /// Never reorganize, always re-optimize
    Never,
    /// Reorganize every `period` iterations; re-optimize only on iteration 0
    /// and right after a reorganization
    Periodically { period: usize, reorganizations: usize },
    /// Reorganize when the global response stops changing
    OnConvergence(Convergence),
    /// Reorganize when the relative global cost change is in `(0, tolerance]`
    GlobalCostReduction {
        tolerance: f64,
        previous_cost: Option<f64>,
        reorganizations: usize,
    },
    /// Start from a previously converged selection, then behave like
    /// `OnConvergence`
    Predefined {
        selection: Arc<PredefinedSelection>,
        convergence: Convergence,
    },
}

impl ReorganizationStrategy {
    pub fn periodically(period: usize) -> Self {
        Self::Periodically {
            period: period.max(1),
            reorganizations: 0,
        }
    }

    pub fn on_convergence(memorization_offset: usize) -> Self {
        Self::OnConvergence(Convergence::new(memorization_offset))
    }

    pub fn global_cost_reduction(tolerance: f64) -> Self {
        Self::GlobalCostReduction {
            tolerance,
            previous_cost: None,
            reorganizations: 0,
        }
    }

    pub fn predefined(selection: Arc<PredefinedSelection>, memorization_offset: usize) -> Self {
        Self::Predefined {
            selection,
            convergence: Convergence::new(memorization_offset),
        }
    }

    pub fn kind(&self) -> ReorganizationKind {
        match self {
            Self::Never => ReorganizationKind::Never,
            Self::Periodically { .. } => ReorganizationKind::Periodically,
            Self::OnConvergence(_) => ReorganizationKind::OnConvergence,
            Self::GlobalCostReduction { .. } => ReorganizationKind::GlobalCostReduction,
            Self::Predefined { .. } => ReorganizationKind::Predefined,
        }
    }

    /// Called at the root once the global response of the iteration is known
    pub fn on_root_iteration_end(&mut self, host: &mut dyn ReorganizationHost) {
        match self {
            Self::Never => {}
            Self::Periodically {
                period,
                reorganizations,
            } => {
                let iteration = host.iteration();
                if iteration != 0 && iteration % *period == 0 {
                    *reorganizations += 1;
                    info!("Periodic reorganization at iteration {}", iteration);
                    host.force_reorganization();
                }
            }
            Self::OnConvergence(convergence)
            | Self::Predefined { convergence, .. } => convergence.on_root_iteration_end(host),
            Self::GlobalCostReduction {
                tolerance,
                previous_cost,
                reorganizations,
            } => {
                let cost = host.global_cost();
                let close = match *previous_cost {
                    Some(previous) if previous != 0.0 => {
                        let change = (previous - cost).abs() / previous;
                        change > 0.0 && change <= *tolerance
                    }
                    _ => false,
                };
                if !host.is_iteration_after_reorganization() && close {
                    *reorganizations += 1;
                    info!(
                        "Global cost change within tolerance at iteration {}, reorganizing",
                        host.iteration()
                    );
                    host.force_reorganization();
                }
                *previous_cost = Some(cost);
            }
        }
    }

    /// Choose this iteration's plan
    pub fn select_plan(&mut self, host: &mut dyn ReorganizationHost) -> Result<()> {
        match self {
            Self::Never => {
                host.optimize_plan()?;
            }
            Self::Periodically { .. } => {
                if host.iteration() == 0 || host.is_iteration_after_reorganization() {
                    host.optimize_plan()?;
                }
            }
            Self::OnConvergence(convergence) => convergence.select_plan(host)?,
            Self::GlobalCostReduction { .. } => {
                if host.iteration() == 0 || !host.is_iteration_after_reorganization() {
                    host.optimize_plan()?;
                }
            }
            Self::Predefined {
                selection,
                convergence,
            } => {
                if host.iteration() == 0 {
                    let agent = host.agent_index();
                    let plan = selection.plan_for(agent).ok_or_else(|| {
                        IeposError::Config(format!("no predefined plan for agent {agent}"))
                    })?;
                    host.set_selected_plan(plan)?;
                } else {
                    convergence.select_plan(host)?;
                }
            }
        }
        Ok(())
    }

    /// Called by every agent after its down phase
    pub fn screenshot_after_down_phase(&mut self, host: &dyn ReorganizationHost) {
        match self {
            Self::OnConvergence(convergence) | Self::Predefined { convergence, .. } => {
                convergence.screenshot(host)
            }
            _ => {}
        }
    }

    /// Called by every agent right before it requests a new view
    pub fn prepare_for_reorganization(&mut self, host: &dyn ReorganizationHost) {
        match self {
            Self::OnConvergence(convergence) | Self::Predefined { convergence, .. } => {
                convergence.prepare_for_reorganization(host)
            }
            Self::GlobalCostReduction { previous_cost, .. } => *previous_cost = None,
            _ => {}
        }
    }

    /// Reorganizations this instance triggered while its agent was root.
    /// The root moves between rebuilds, so the run total is the sum over
    /// all agents' strategies, or any agent's `Agent::num_reorganizations`.
    pub fn num_reorganizations(&self) -> usize {
        match self {
            Self::Never => 0,
            Self::Periodically {
                reorganizations, ..
            }
            | Self::GlobalCostReduction {
                reorganizations, ..
            } => *reorganizations,
            Self::OnConvergence(convergence) | Self::Predefined { convergence, .. } => {
                convergence.reorganizations
            }
        }
    }

    pub fn reset_counter(&mut self) {
        match self {
            Self::Never => {}
            Self::Periodically {
                reorganizations, ..
            }
            | Self::GlobalCostReduction {
                reorganizations, ..
            } => *reorganizations = 0,
            Self::OnConvergence(convergence) | Self::Predefined { convergence, .. } => {
                convergence.reorganizations = 0
            }
        }
    }

    /// Table of converged plans, for the predefined strategy
    pub fn predefined_selection(&self) -> Option<&PredefinedSelection> {
        match self {
            Self::Predefined { selection, .. } => Some(selection),
            _ => None,
        }
    }

    /// Plan memorized for the next reorganization, if any
    pub fn memorized_plan(&self) -> Option<usize> {
        match self {
            Self::OnConvergence(convergence) | Self::Predefined { convergence, .. } => {
                convergence.memorized()
            }
            _ => None,
        }
    }
}
