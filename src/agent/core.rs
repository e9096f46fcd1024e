//! Per-agent optimization state and the numeric steps of an iteration.

use std::sync::Arc;
use tracing::{debug, warn};

use super::{AgentContext, AgentPhase, ReorganizationHost};
use crate::data::{DiscomfortStats, Plan, Vector};
use crate::error::{IeposError, Result};
use crate::measurement::{Tag, TerminationTracker};
use crate::message::{DownMessage, Message, UpMessage};
use crate::selection::{self, Candidate, Objective};
use crate::topology::{Address, PeerId, TopologyClient, TreeView};
use crate::transport::Transport;

/// Everything an agent owns apart from its reorganization strategy
pub struct AgentCore {
    pub(super) id: PeerId,
    pub(super) plans: Vec<Plan>,
    pub(super) ctx: AgentContext,
    pub(super) client: TopologyClient,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) phase: AgentPhase,

    pub(super) iteration: usize,
    /// Iteration at which the last view was requested
    pub(super) reorganization_iteration: usize,
    /// First iteration run on the current view
    pub(super) view_iteration: usize,
    pub(super) num_agents: usize,
    pub(super) num_reorganizations: usize,
    pub(super) reorganize_requested: bool,
    pub(super) optimized: bool,

    pub(super) parent: Option<PeerId>,
    pub(super) children: Vec<PeerId>,

    pub(super) selected: Option<usize>,
    pub(super) prev_selected: Option<usize>,
    pub(super) aggregated: Candidate,
    pub(super) prev_aggregated: Candidate,
    /// Contributions of the children, in `children` order
    pub(super) subtree: Vec<Candidate>,
    pub(super) prev_subtree: Vec<Candidate>,
    pub(super) approvals: Vec<bool>,
    pub(super) subtree_size: usize,

    pub(super) global_response: Vector,
    pub(super) global_discomfort: DiscomfortStats,

    pub(super) termination: TerminationTracker,
}

impl AgentCore {
    pub(super) fn new(
        id: PeerId,
        plans: Vec<Plan>,
        ctx: AgentContext,
        client: TopologyClient,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let dim = match plans.first() {
            Some(plan) => plan.dim(),
            None => {
                return Err(IeposError::Config(format!(
                    "{} has no candidate plans",
                    id
                )))
            }
        };
        if let Some(odd) = plans.iter().find(|p| p.dim() != dim) {
            return Err(IeposError::Config(format!(
                "{}: plan {} has dimension {}, expected {}",
                id,
                odd.index,
                odd.dim(),
                dim
            )));
        }

        let empty = Candidate::new(Vector::new(dim), DiscomfortStats::default());
        Ok(Self {
            id,
            plans,
            ctx,
            client,
            transport,
            phase: AgentPhase::Idle,
            iteration: 0,
            reorganization_iteration: 0,
            view_iteration: 0,
            num_agents: 1,
            num_reorganizations: 0,
            reorganize_requested: false,
            optimized: false,
            parent: None,
            children: Vec::new(),
            selected: None,
            prev_selected: None,
            aggregated: empty.clone(),
            prev_aggregated: empty,
            subtree: Vec::new(),
            prev_subtree: Vec::new(),
            approvals: Vec::new(),
            subtree_size: 1,
            global_response: Vector::new(dim),
            global_discomfort: DiscomfortStats::default(),
            termination: TerminationTracker::new(),
        })
    }

    pub fn dim(&self) -> usize {
        self.global_response.dim()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none() && !self.children.is_empty()
    }

    fn plan(&self, index: Option<usize>) -> Option<&Plan> {
        index.and_then(|i| self.plans.get(i))
    }

    fn discomfort_of(&self, index: Option<usize>) -> Option<f64> {
        self.plan(index).map(|p| self.ctx.local_cost.calc_cost(p))
    }

    fn objective(&self) -> Objective<'_> {
        Objective {
            cost: self.ctx.global_cost.as_ref(),
            scalarization: self.ctx.scalarization,
            weights: self.ctx.weights,
            num_agents: self.num_agents,
        }
    }

    /// Adopt a new view and forget everything computed on the old tree.
    /// The selected plan is kept.
    pub(super) fn adopt_view(&mut self, view: TreeView) {
        self.parent = view.parent;
        self.children = view.children;
        self.view_iteration = self.iteration;

        let empty = Candidate::new(Vector::new(self.dim()), DiscomfortStats::default());
        self.global_response = empty.response.clone();
        self.global_discomfort = DiscomfortStats::default();
        self.aggregated = empty.clone();
        self.prev_aggregated = empty;
        self.subtree.clear();
        self.prev_subtree.clear();
        self.approvals.clear();
        self.prev_selected = None;
    }

    /// Roll this iteration's values into the "previous" snapshots
    pub(super) fn init_iteration(&mut self) {
        self.optimized = false;
        if self.iteration > self.view_iteration {
            self.prev_selected = self.selected;
            self.prev_aggregated = self.aggregated.clone();
            self.prev_subtree = std::mem::take(&mut self.subtree);
        }
        self.subtree.clear();
        self.approvals.clear();
    }

    /// Store the children's contributions (in `children` order) and decide
    /// which of them to accept
    pub(super) fn aggregate(&mut self, contributions: Vec<UpMessage>) {
        self.subtree_size = 1 + contributions.iter().map(|c| c.subtree_size).sum::<usize>();
        if self.iteration == 0 {
            self.num_agents = self.subtree_size;
        }
        self.subtree = contributions
            .into_iter()
            .map(|c| Candidate::new(c.subtree_response, c.discomfort))
            .collect();

        let fresh = self.iteration == self.view_iteration;
        if fresh || self.prev_subtree.len() != self.subtree.len() {
            if !fresh {
                warn!(
                    "{}: no previous contributions for {} children, accepting all",
                    self.id,
                    self.subtree.len()
                );
            }
            self.approvals = vec![true; self.subtree.len()];
        } else if !self.subtree.is_empty() {
            let mut others = self.global_response.clone();
            let mut others_stats = self.global_discomfort;
            for prev in &self.prev_subtree {
                others.subtract(&prev.response);
                others_stats.subtract(&prev.discomfort);
            }
            let choices: Vec<[Candidate; 2]> = self
                .prev_subtree
                .iter()
                .cloned()
                .zip(self.subtree.iter().cloned())
                .map(|(prev, current)| [prev, current])
                .collect();
            self.approvals = self
                .objective()
                .select_combination(&others, others_stats, &choices)
                .unwrap_or_else(|| vec![true; choices.len()]);
        }

        // rejected children keep contributing their previous subtree
        let mut aggregated = Candidate::new(Vector::new(self.dim()), DiscomfortStats::default());
        for (i, approved) in self.approvals.iter().enumerate() {
            if !*approved {
                self.subtree[i] = self.prev_subtree[i].clone();
            }
            let chosen = &self.subtree[i];
            aggregated.response.add(&chosen.response);
            aggregated.discomfort += chosen.discomfort;
        }
        self.aggregated = aggregated;
    }

    /// Best plan against the counterfactual global response: what the
    /// system would look like with this subtree's current aggregate and
    /// without this agent's previous plan
    pub(super) fn optimal_plan(&self) -> Result<usize> {
        let mut others = self.global_response.clone();
        let mut others_stats = self.global_discomfort;

        if let Some(prev) = self.plan(self.prev_selected) {
            others.subtract(prev.value());
        }
        others.subtract(&self.prev_aggregated.response);
        others.add(&self.aggregated.response);

        others_stats.subtract(&self.prev_aggregated.discomfort);
        others_stats += self.aggregated.discomfort;
        if let Some(prev) = self.discomfort_of(self.prev_selected) {
            others_stats.subtract(&DiscomfortStats::single(prev));
        }

        self.objective()
            .select_plan(
                &self.plans,
                self.ctx.local_cost.as_ref(),
                &others,
                others_stats,
            )
            .ok_or_else(|| IeposError::Internal(format!("{}: no plan to select", self.id)))
    }

    /// Aggregate of the whole subtree including this agent's selected plan
    pub(super) fn subtree_total(&self) -> Result<Candidate> {
        let plan = self.plan(self.selected).ok_or_else(|| {
            IeposError::Protocol(format!(
                "{} has no selected plan at iteration {}",
                self.id, self.iteration
            ))
        })?;
        let mut total = self.aggregated.clone();
        total.response.add(plan.value());
        total
            .discomfort
            .add_discomfort(self.ctx.local_cost.calc_cost(plan));
        Ok(total)
    }

    pub(super) fn inform_parent(&self, parent: PeerId) -> Result<()> {
        let total = self.subtree_total()?;
        let up = UpMessage {
            iteration: self.iteration,
            subtree_response: total.response,
            discomfort: total.discomfort,
            subtree_size: self.subtree_size,
        };
        debug!("{} -> {}: up(iteration={})", self.id, parent, self.iteration);
        self.transport.send(Address::Peer(parent), Message::Up(up))
    }

    /// The root's view of the finished bottom-up phase
    pub(super) fn complete_at_root(&mut self) -> Result<()> {
        let total = self.subtree_total()?;
        self.global_response = total.response;
        self.global_discomfort = total.discomfort;
        self.num_agents = self.subtree_size;

        let cost = self.ctx.global_cost.calc_cost(&self.global_response);
        let termination = self.termination.observe(
            self.iteration,
            cost,
            self.is_iteration_after_reorganization(),
        );

        let unfairness = selection::unfairness(&self.global_discomfort, self.num_agents);
        let local_cost = selection::local_cost(&self.global_discomfort, self.num_agents);
        let weights = self.ctx.weights;
        let complex =
            weights.global() * cost + weights.alpha * unfairness + weights.beta * local_cost;

        let sink = &self.ctx.sink;
        sink.record(self.id, self.iteration, Tag::GlobalCost, cost);
        sink.record(self.id, self.iteration, Tag::GlobalComplexCost, complex);
        sink.record(self.id, self.iteration, Tag::Unfairness, unfairness);
        sink.record(self.id, self.iteration, Tag::LocalCost, local_cost);
        sink.record(self.id, self.iteration, Tag::Termination, termination as f64);
        debug!(
            "{} iteration {}: global cost {:.6}, unfairness {:.6}, local cost {:.6}",
            self.id, self.iteration, cost, unfairness, local_cost
        );
        Ok(())
    }

    /// Down message the root sends to itself
    pub(super) fn root_down_message(&self) -> DownMessage {
        DownMessage {
            iteration: self.iteration,
            global_response: self.global_response.clone(),
            global_discomfort: self.global_discomfort,
            approved: true,
            num_agents: self.num_agents,
            reorganize: self.reorganize_requested,
        }
    }

    /// Take the iteration's outcome from the parent; a rejection rolls this
    /// agent (and, through the approvals, its subtree) back to the previous
    /// iteration
    pub(super) fn apply_down(&mut self, down: &DownMessage) {
        self.num_agents = down.num_agents;
        self.global_response = down.global_response.clone();
        self.global_discomfort = down.global_discomfort;

        if !down.approved {
            debug!("{}: contribution rejected at iteration {}", self.id, self.iteration);
            if self.prev_selected.is_some() {
                self.selected = self.prev_selected;
            }
            self.aggregated = self.prev_aggregated.clone();
            self.subtree = self.prev_subtree.clone();
            self.approvals.iter_mut().for_each(|a| *a = false);
        }
    }

    pub(super) fn inform_children(&self, down: &DownMessage) -> Result<()> {
        for (i, child) in self.children.iter().enumerate() {
            let message = DownMessage {
                approved: self.approvals.get(i).copied().unwrap_or(true),
                ..down.clone()
            };
            self.transport
                .send(Address::Peer(*child), Message::Down(message))?;
        }
        Ok(())
    }

    pub(super) fn record_selection(&self) {
        let sink = &self.ctx.sink;
        if let Some(selected) = self.selected {
            sink.record(self.id, self.iteration, Tag::SelectedPlan, selected as f64);
        }
        if self.optimized {
            sink.record(self.id, self.iteration, Tag::PlanOptimized, 1.0);
        }
    }

    /// Forget the current tree and ask the broker for a new one
    pub(super) fn begin_reorganization(&mut self) -> Result<()> {
        self.num_reorganizations += 1;
        if self.is_root() {
            self.ctx.sink.record(
                self.id,
                self.iteration,
                Tag::Reorganizations,
                self.num_reorganizations as f64,
            );
        }
        self.reorganize_requested = false;
        self.reorganization_iteration = self.iteration;
        self.parent = None;
        self.children.clear();
        self.phase = AgentPhase::Reorganizing;
        self.client.request_new_tree_view()
    }
}

impl ReorganizationHost for AgentCore {
    fn iteration(&self) -> usize {
        self.iteration
    }

    fn reorganization_iteration(&self) -> usize {
        self.reorganization_iteration
    }

    fn agent_index(&self) -> usize {
        self.id.index()
    }

    fn selected_plan(&self) -> Option<usize> {
        self.selected
    }

    fn global_response(&self) -> &Vector {
        &self.global_response
    }

    fn global_cost(&self) -> f64 {
        self.ctx.global_cost.calc_cost(&self.global_response)
    }

    fn optimize_plan(&mut self) -> Result<usize> {
        let selected = self.optimal_plan()?;
        self.selected = Some(selected);
        self.optimized = true;
        Ok(selected)
    }

    fn set_selected_plan(&mut self, index: usize) -> Result<()> {
        if index >= self.plans.len() {
            return Err(IeposError::InvalidPlan {
                index,
                available: self.plans.len(),
            });
        }
        self.selected = Some(index);
        Ok(())
    }

    fn force_reorganization(&mut self) {
        if self.is_root() {
            self.reorganize_requested = true;
        } else {
            debug!("{}: reorganization can only be forced at the root", self.id);
        }
    }
}
