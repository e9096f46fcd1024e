use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::RunSetup;
use crate::agent::{Agent, AgentPhase};
use crate::error::{IeposError, Result};
use crate::message::Envelope;
use crate::topology::{Address, PeerId, TopologyBroker};
use crate::transport::QueueTransport;

/// Deterministic discrete-event driver: every envelope goes through one
/// FIFO queue and is delivered on the caller's thread
pub struct LocalRuntime {
    broker: TopologyBroker,
    agents: Vec<Agent>,
    queue: mpsc::UnboundedReceiver<Envelope>,
    delivered: usize,
    started: bool,
}

impl LocalRuntime {
    pub fn new(setup: RunSetup) -> Result<Self> {
        setup.validate()?;
        let (tx, queue) = mpsc::unbounded_channel();
        let broker = setup.broker(Arc::new(QueueTransport::new(Address::Broker, tx.clone())));
        let agents = (0..setup.num_agents())
            .map(|i| {
                let transport = QueueTransport::new(Address::Peer(PeerId(i)), tx.clone());
                setup.agent(i, Arc::new(transport))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            broker,
            agents,
            queue,
            delivered: 0,
            started: false,
        })
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agents_mut(&mut self) -> &mut [Agent] {
        &mut self.agents
    }

    pub fn into_agents(self) -> Vec<Agent> {
        self.agents
    }

    pub fn broker(&self) -> &TopologyBroker {
        &self.broker
    }

    /// Envelopes delivered so far
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Open the broker and let every agent request its first view
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        self.broker.start();
        for agent in &mut self.agents {
            agent.start()?;
        }
        Ok(())
    }

    /// Deliver the next envelope; `false` once the queue is empty
    pub fn step(&mut self) -> Result<bool> {
        let Ok(envelope) = self.queue.try_recv() else {
            return Ok(false);
        };
        self.delivered += 1;
        let Envelope { from, to, message } = envelope;
        match to {
            Address::Broker => self.broker.on_message(from, message)?,
            Address::Peer(id) => match self.agents.get_mut(id.index()) {
                Some(agent) => agent.handle(from, message)?,
                None => error!("Dropped {} from {} to unknown {}", message, from, id),
            },
        }
        Ok(true)
    }

    /// Run until no message is in flight
    pub fn run(&mut self) -> Result<()> {
        self.start()?;
        while self.step()? {}

        let unfinished = self
            .agents
            .iter()
            .filter(|a| a.phase() != AgentPhase::Finished)
            .count();
        debug!(
            "Local run drained after {} messages, {} agents unfinished",
            self.delivered, unfinished
        );
        if unfinished > 0 {
            for agent in self.agents.iter().filter(|a| a.phase() != AgentPhase::Finished) {
                error!(
                    "{} stalled in {} at iteration {}",
                    agent.id(),
                    agent.phase(),
                    agent.iteration()
                );
            }
            return Err(IeposError::Stalled { unfinished });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentContext, ReorganizationStrategy};
    use crate::dataset::{Dataset, InMemoryDataset, PredefinedSelection};
    use crate::func::{DiscomfortCost, VarianceCost};
    use crate::measurement::MeasurementLog;
    use crate::selection::{Scalarization, Weights};
    use crate::topology::TopologyGenerator;

    fn setup(dataset: &InMemoryDataset, iterations: usize, log: Arc<MeasurementLog>) -> RunSetup {
        RunSetup {
            ctx: AgentContext {
                num_iterations: iterations,
                global_cost: Arc::new(VarianceCost),
                local_cost: Arc::new(DiscomfortCost),
                weights: Weights::default(),
                scalarization: Scalarization::Complex,
                sink: log,
            },
            strategy: ReorganizationStrategy::Never,
            generator: TopologyGenerator::default(),
            reorganization_seed: 0,
            max_children: 2,
            plans: (0..dataset.num_agents())
                .map(|i| dataset.plans(i).unwrap())
                .collect(),
        }
    }

    #[test]
    fn test_run_completes() {
        let dataset = InMemoryDataset::from_values(vec![
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            vec![vec![2.0, 0.0], vec![0.0, 2.0]],
            vec![vec![1.0, 1.0]],
        ]);
        let log = Arc::new(MeasurementLog::new());
        let mut runtime = LocalRuntime::new(setup(&dataset, 3, log)).unwrap();
        runtime.run().unwrap();

        assert!(runtime.delivered() > 0);
        assert!(runtime
            .agents()
            .iter()
            .all(|a| a.phase() == AgentPhase::Finished));
        assert_eq!(runtime.agents().iter().filter(|a| a.is_root()).count(), 1);
    }

    #[test]
    fn test_single_agent_stalls() {
        let dataset = InMemoryDataset::from_values(vec![vec![vec![1.0]]]);
        let log = Arc::new(MeasurementLog::new());
        let mut runtime = LocalRuntime::new(setup(&dataset, 3, log)).unwrap();
        assert!(matches!(
            runtime.run(),
            Err(IeposError::Stalled { unfinished: 1 })
        ));
        assert_eq!(runtime.agents()[0].phase(), AgentPhase::Disconnected);
    }

    #[test]
    fn test_predefined_table_is_checked_at_startup() {
        let dataset = InMemoryDataset::from_values(vec![
            vec![vec![1.0], vec![2.0]],
            vec![vec![1.0], vec![2.0]],
            vec![vec![3.0]],
        ]);
        let log = Arc::new(MeasurementLog::new());
        let with_table = |plans: Vec<usize>| {
            let mut setup = setup(&dataset, 3, log.clone());
            setup.strategy = ReorganizationStrategy::predefined(
                Arc::new(PredefinedSelection::from_plans(plans)),
                2,
            );
            setup
        };

        // one agent short
        assert!(matches!(
            LocalRuntime::new(with_table(vec![1, 0])),
            Err(IeposError::Config(_))
        ));
        // agent 2 has a single plan
        assert!(matches!(
            LocalRuntime::new(with_table(vec![1, 0, 1])),
            Err(IeposError::Config(_))
        ));

        let mut runtime = LocalRuntime::new(with_table(vec![1, 0, 0])).unwrap();
        runtime.run().unwrap();
        assert!(runtime
            .agents()
            .iter()
            .all(|a| a.phase() == AgentPhase::Finished));
    }

    #[test]
    fn test_agent_without_plans_is_rejected() {
        let dataset = InMemoryDataset::from_values(vec![vec![vec![1.0]], vec![]]);
        let log = Arc::new(MeasurementLog::new());
        assert!(matches!(
            LocalRuntime::new(setup(&dataset, 3, log)),
            Err(IeposError::Config(_))
        ));
    }
}
