//! Drivers that wire agents and the broker together and run them to
//! completion.

mod actor;
mod local;

pub use actor::ActorRuntime;
pub use local::LocalRuntime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::agent::{Agent, AgentContext, ReorganizationStrategy};
use crate::config::{AppConfig, RunMode};
use crate::data::{Plan, Vector};
use crate::dataset::Dataset;
use crate::error::Result;
use crate::measurement::{MeasurementLog, MeasurementSink, Tag, Tee, TracingSink};
use crate::topology::{PeerDescriptor, PeerId, TopologyBroker, TopologyGenerator};
use crate::transport::Transport;

/// Everything needed to instantiate a population of agents
#[derive(Clone)]
pub struct RunSetup {
    pub ctx: AgentContext,
    /// Template cloned into every agent
    pub strategy: ReorganizationStrategy,
    pub generator: TopologyGenerator,
    pub reorganization_seed: u64,
    pub max_children: usize,
    /// Candidate plans, one list per agent
    pub plans: Vec<Vec<Plan>>,
}

impl RunSetup {
    pub fn from_config(
        config: &AppConfig,
        dataset: &dyn Dataset,
        sink: Arc<dyn MeasurementSink>,
    ) -> Result<Self> {
        let plans = (0..dataset.num_agents())
            .map(|agent| dataset.plans(agent))
            .collect::<Result<Vec<_>>>()?;
        let setup = Self {
            ctx: config.agent_context(sink)?,
            strategy: config.strategy()?,
            generator: config.generator(),
            reorganization_seed: config.topology.reorganization_seed,
            max_children: config.topology.max_children,
            plans,
        };
        setup.validate()?;
        Ok(setup)
    }

    pub fn num_agents(&self) -> usize {
        self.plans.len()
    }

    /// Startup checks that need the actual plans
    pub fn validate(&self) -> Result<()> {
        if let Some(selection) = self.strategy.predefined_selection() {
            let plan_counts: Vec<usize> = self.plans.iter().map(Vec::len).collect();
            selection.validate(&plan_counts)?;
        }
        Ok(())
    }

    pub(crate) fn broker(&self, transport: Arc<dyn Transport>) -> TopologyBroker {
        TopologyBroker::new(
            self.num_agents(),
            self.generator.clone(),
            self.reorganization_seed,
            transport,
        )
    }

    pub(crate) fn agent(&self, index: usize, transport: Arc<dyn Transport>) -> Result<Agent> {
        let id = PeerId(index);
        let descriptor = PeerDescriptor::new(id, index as f64, self.max_children);
        let plans = self.plans.get(index).cloned().unwrap_or_default();
        Agent::new(
            descriptor,
            plans,
            self.ctx.clone(),
            self.strategy.clone(),
            transport,
        )
    }
}

/// Outcome of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub num_agents: usize,
    pub num_iterations: usize,
    /// Root measurements, by iteration
    pub global_cost: Vec<f64>,
    pub unfairness: Vec<f64>,
    pub local_cost: Vec<f64>,
    /// Last iteration (+1) at which the global cost improved
    pub termination: usize,
    pub num_reorganizations: usize,
    /// Final plan of every agent, by agent index
    pub selected_plans: Vec<Option<usize>>,
    pub global_response: Vector,
}

impl RunReport {
    pub fn collect(started_at: DateTime<Utc>, log: &MeasurementLog, agents: &[Agent]) -> Self {
        let by_iteration = |tag: Tag| -> Vec<f64> {
            log.with_tag(tag)
                .into_iter()
                .map(|m| (m.epoch, m.value))
                .collect::<BTreeMap<_, _>>()
                .into_values()
                .collect()
        };

        let global_response = agents
            .iter()
            .find(|a| a.is_root())
            .or_else(|| agents.first())
            .map(|a| a.global_response().clone())
            .unwrap_or_default();

        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            num_agents: agents.len(),
            num_iterations: agents.first().map(|a| a.num_iterations()).unwrap_or(0),
            global_cost: by_iteration(Tag::GlobalCost),
            unfairness: by_iteration(Tag::Unfairness),
            local_cost: by_iteration(Tag::LocalCost),
            termination: log
                .with_tag(Tag::Termination)
                .last()
                .map(|m| m.value as usize)
                .unwrap_or(0),
            num_reorganizations: agents
                .iter()
                .map(|a| a.num_reorganizations())
                .max()
                .unwrap_or(0),
            selected_plans: agents.iter().map(|a| a.selected_plan()).collect(),
            global_response,
        }
    }

    pub fn final_global_cost(&self) -> Option<f64> {
        self.global_cost.last().copied()
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Build the population described by `config` and run it in the
/// configured mode
pub async fn run_configured(config: &AppConfig, dataset: &dyn Dataset) -> Result<RunReport> {
    let log = Arc::new(MeasurementLog::new());
    let sink = Arc::new(Tee::new(vec![log.clone(), Arc::new(TracingSink)]));
    let setup = RunSetup::from_config(config, dataset, sink)?;
    let started_at = Utc::now();

    info!(
        agents = setup.num_agents(),
        iterations = config.run.num_iterations,
        mode = ?config.run.mode,
        strategy = %setup.strategy.kind(),
        "starting run"
    );

    let agents = match config.run.mode {
        RunMode::Local => {
            let mut runtime = LocalRuntime::new(setup)?;
            runtime.run()?;
            runtime.into_agents()
        }
        RunMode::Actors => {
            ActorRuntime::new(setup, Duration::from_millis(config.run.timeout_ms))
                .run()
                .await?
        }
    };

    let report = RunReport::collect(started_at, &log, &agents);
    info!(
        run_id = %report.run_id,
        global_cost = report.final_global_cost().unwrap_or(f64::NAN),
        reorganizations = report.num_reorganizations,
        "run finished"
    );
    Ok(report)
}
