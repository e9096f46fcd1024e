//! Message-driven iteration loop of a single agent.
//!
//! An agent only reacts to messages: a tree view starts (or restarts) an
//! iteration, the last child contribution triggers the bottom-up step and
//! the parent's broadcast triggers the top-down step. Up messages that
//! arrive early are deferred until the agent reaches their iteration.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::core::AgentCore;
use super::{AgentContext, AgentPhase, ReorganizationHost, ReorganizationStrategy};
use crate::data::{Plan, Vector};
use crate::error::{IeposError, Result};
use crate::message::{DownMessage, Message, UpMessage};
use crate::topology::{Address, PeerDescriptor, PeerId, TopologyClient, TreeView};
use crate::transport::Transport;

pub struct Agent {
    core: AgentCore,
    strategy: ReorganizationStrategy,
    /// Contributions of the current iteration, by child
    inbox: BTreeMap<PeerId, UpMessage>,
    /// Contributions for iterations this agent has not started yet
    deferred: Vec<(PeerId, UpMessage)>,
}

impl Agent {
    pub fn new(
        descriptor: PeerDescriptor,
        plans: Vec<Plan>,
        ctx: AgentContext,
        strategy: ReorganizationStrategy,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let id = descriptor.id;
        let client = TopologyClient::new(descriptor, transport.clone());
        let core = AgentCore::new(id, plans, ctx, client, transport)?;
        Ok(Self {
            core,
            strategy,
            inbox: BTreeMap::new(),
            deferred: Vec::new(),
        })
    }

    pub fn id(&self) -> PeerId {
        self.core.id
    }

    pub fn phase(&self) -> AgentPhase {
        self.core.phase
    }

    pub fn iteration(&self) -> usize {
        self.core.iteration
    }

    pub fn num_iterations(&self) -> usize {
        self.core.ctx.num_iterations
    }

    /// Every configured iteration has been run
    pub fn is_finished(&self) -> bool {
        self.core.iteration >= self.core.ctx.num_iterations
    }

    pub fn is_root(&self) -> bool {
        self.core.is_root()
    }

    /// The root is where the global response is first known
    pub fn is_representative(&self) -> bool {
        self.is_root()
    }

    pub fn view(&self) -> TreeView {
        TreeView::new(self.core.parent, self.core.children.clone())
    }

    pub fn selected_plan(&self) -> Option<usize> {
        self.core.selected
    }

    pub fn plans(&self) -> &[Plan] {
        &self.core.plans
    }

    pub fn global_response(&self) -> &Vector {
        &self.core.global_response
    }

    pub fn num_agents(&self) -> usize {
        self.core.num_agents
    }

    /// Reorganizations this agent has taken part in
    pub fn num_reorganizations(&self) -> usize {
        self.core.num_reorganizations
    }

    pub fn strategy(&self) -> &ReorganizationStrategy {
        &self.strategy
    }

    pub fn set_selected_plan(&mut self, index: usize) -> Result<()> {
        self.core.set_selected_plan(index)
    }

    /// Request a reorganization after the current iteration; ignored
    /// anywhere but at the root
    pub fn force_reorganization(&mut self) {
        self.core.force_reorganization();
    }

    /// Ask the broker for the initial view
    pub fn start(&mut self) -> Result<()> {
        if self.core.phase != AgentPhase::Idle {
            warn!("{} already started ({})", self.core.id, self.core.phase);
            return Ok(());
        }
        self.core.phase = AgentPhase::AwaitingView;
        self.core.client.request_new_tree_view()
    }

    /// Dispatch an inbound message
    pub fn handle(&mut self, from: Address, message: Message) -> Result<()> {
        match message {
            Message::ViewReply(view) => self.on_view(view),
            Message::Up(up) => match from {
                Address::Peer(child) => self.on_up(child, up),
                Address::Broker => {
                    error!("{}: up message from the broker dropped", self.core.id);
                    Ok(())
                }
            },
            Message::Down(down) => self.on_down(from, down),
            Message::ViewRequest(descriptor) => {
                error!(
                    "{}: view request from {} sent to a peer",
                    self.core.id, descriptor.id
                );
                Ok(())
            }
            Message::Stop => Ok(()),
        }
    }

    fn on_view(&mut self, view: TreeView) -> Result<()> {
        let view = self.core.client.on_view(view);
        if self.is_finished() {
            // view requested by a reorganization in the last iteration
            self.core.parent = view.parent;
            self.core.children = view.children;
            self.core.phase = AgentPhase::Finished;
            return Ok(());
        }
        if matches!(
            self.core.phase,
            AgentPhase::AwaitingChildren | AgentPhase::AwaitingParent
        ) {
            warn!(
                "{}: view replaced during iteration {}, restarting it",
                self.core.id, self.core.iteration
            );
        }

        let disconnected = view.is_disconnected();
        self.core.adopt_view(view);
        self.inbox.clear();

        if disconnected {
            self.core.phase = AgentPhase::Disconnected;
            return Ok(());
        }
        self.start_iteration()
    }

    fn start_iteration(&mut self) -> Result<()> {
        self.core.init_iteration();
        self.core.phase = AgentPhase::AwaitingChildren;
        self.inbox.clear();

        let iteration = self.core.iteration;
        for (child, up) in std::mem::take(&mut self.deferred) {
            if up.iteration < iteration {
                warn!(
                    "{}: stale up(iteration={}) from {} dropped",
                    self.core.id, up.iteration, child
                );
            } else if up.iteration > iteration {
                self.deferred.push((child, up));
            } else {
                self.accept_up(child, up);
            }
        }
        self.try_go_up()
    }

    fn on_up(&mut self, child: PeerId, up: UpMessage) -> Result<()> {
        let iteration = self.core.iteration;
        match self.core.phase {
            AgentPhase::AwaitingChildren if up.iteration == iteration => {
                self.accept_up(child, up);
                self.try_go_up()
            }
            AgentPhase::Finished => {
                warn!("{}: up from {} after the run finished", self.core.id, child);
                Ok(())
            }
            _ if up.iteration > iteration => {
                self.deferred.push((child, up));
                Ok(())
            }
            AgentPhase::Idle
            | AgentPhase::AwaitingView
            | AgentPhase::Reorganizing
            | AgentPhase::Disconnected
                if up.iteration == iteration =>
            {
                self.deferred.push((child, up));
                Ok(())
            }
            _ => {
                warn!(
                    "{}: stale up(iteration={}) from {} dropped at iteration {}",
                    self.core.id, up.iteration, child, iteration
                );
                Ok(())
            }
        }
    }

    fn accept_up(&mut self, child: PeerId, up: UpMessage) {
        if !self.core.children.contains(&child) {
            error!(
                "{}: up message from {} which is not a child",
                self.core.id, child
            );
            return;
        }
        if up.subtree_response.dim() != self.core.dim() {
            error!(
                "{}: up message from {} has dimension {}, expected {}",
                self.core.id,
                child,
                up.subtree_response.dim(),
                self.core.dim()
            );
            return;
        }
        if self.inbox.contains_key(&child) {
            warn!(
                "{}: duplicate up(iteration={}) from {} dropped",
                self.core.id, up.iteration, child
            );
            return;
        }
        self.inbox.insert(child, up);
    }

    fn try_go_up(&mut self) -> Result<()> {
        if self.core.phase == AgentPhase::AwaitingChildren
            && self.inbox.len() == self.core.children.len()
        {
            self.go_up()
        } else {
            Ok(())
        }
    }

    fn go_up(&mut self) -> Result<()> {
        let contributions = self
            .core
            .children
            .iter()
            .map(|child| self.inbox.remove(child))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                IeposError::Internal(format!("{}: missing child contribution", self.core.id))
            })?;

        self.core.aggregate(contributions);
        self.strategy.select_plan(&mut self.core)?;

        match self.core.parent {
            Some(parent) => {
                self.core.inform_parent(parent)?;
                self.core.phase = AgentPhase::AwaitingParent;
                Ok(())
            }
            None => {
                self.core.complete_at_root()?;
                self.strategy.on_root_iteration_end(&mut self.core);
                let down = self.core.root_down_message();
                self.go_down(down)
            }
        }
    }

    fn on_down(&mut self, from: Address, down: DownMessage) -> Result<()> {
        if self.core.phase != AgentPhase::AwaitingParent {
            warn!(
                "{}: unexpected {} in phase {}",
                self.core.id,
                Message::Down(down),
                self.core.phase
            );
            return Ok(());
        }
        if self.core.parent.map(Address::Peer) != Some(from) {
            error!("{}: down message from {} which is not the parent", self.core.id, from);
            return Ok(());
        }
        if down.global_response.dim() != self.core.dim() {
            error!(
                "{}: down message has dimension {}, expected {}",
                self.core.id,
                down.global_response.dim(),
                self.core.dim()
            );
            return Ok(());
        }
        if down.iteration != self.core.iteration {
            warn!(
                "{}: down(iteration={}) dropped at iteration {}",
                self.core.id, down.iteration, self.core.iteration
            );
            return Ok(());
        }
        self.go_down(down)
    }

    fn go_down(&mut self, down: DownMessage) -> Result<()> {
        self.core.apply_down(&down);
        self.core.inform_children(&down)?;
        self.strategy.screenshot_after_down_phase(&self.core);
        self.core.record_selection();

        if down.reorganize {
            debug!(
                "{}: reorganizing after iteration {}",
                self.core.id, self.core.iteration
            );
            self.strategy.prepare_for_reorganization(&self.core);
            self.core.begin_reorganization()?;
            self.core.iteration += 1;
            return Ok(());
        }

        self.core.iteration += 1;
        if self.is_finished() {
            self.core.phase = AgentPhase::Finished;
            if self.core.is_root() {
                info!(
                    "{} finished {} iterations with {} agents",
                    self.core.id, self.core.iteration, self.core.num_agents
                );
            }
            Ok(())
        } else {
            self.start_iteration()
        }
    }
}
