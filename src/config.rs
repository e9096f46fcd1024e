use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agent::{AgentContext, ReorganizationKind, ReorganizationStrategy};
use crate::data::{Normalization, Vector};
use crate::dataset::{GaussianDataset, PredefinedSelection};
use crate::error::{IeposError, Result};
use crate::func::{GlobalCostKind, LocalCostKind};
use crate::measurement::MeasurementSink;
use crate::selection::{Scalarization, Weights};
use crate::topology::{BalanceMode, DescriptorType, RankPriority, TopologyGenerator, TreeShape};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub optimization: OptimizationConfig,
    #[serde(default)]
    pub reorganization: ReorganizationConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How the agents are driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Deterministic single-threaded message queue
    #[default]
    Local,
    /// One tokio task per agent
    Actors,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_num_agents")]
    pub num_agents: usize,
    #[serde(default = "default_num_iterations")]
    pub num_iterations: usize,
    /// Seed of the random tree shape
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub mode: RunMode,
    /// Upper bound of an actor run
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_num_agents() -> usize {
    100
}

fn default_num_iterations() -> usize {
    40
}

fn default_timeout_ms() -> u64 {
    60_000
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_agents: default_num_agents(),
            num_iterations: default_num_iterations(),
            seed: 0,
            mode: RunMode::default(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Children per node
    #[serde(default = "default_max_children")]
    pub max_children: usize,
    #[serde(default)]
    pub priority: RankPriority,
    #[serde(default)]
    pub descriptor: DescriptorType,
    #[serde(default)]
    pub shape: TreeShape,
    #[serde(default)]
    pub balance: BalanceMode,
    /// Seed of the broker's reshuffles
    #[serde(default)]
    pub reorganization_seed: u64,
}

fn default_max_children() -> usize {
    2
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            max_children: default_max_children(),
            priority: RankPriority::default(),
            descriptor: DescriptorType::default(),
            shape: TreeShape::default(),
            balance: BalanceMode::default(),
            reorganization_seed: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// Weight of unfairness
    #[serde(default)]
    pub alpha: f64,
    /// Weight of local cost
    #[serde(default)]
    pub beta: f64,
    /// Weight of the rank term in the alternative scalarizations
    #[serde(default)]
    pub lambda: f64,
    #[serde(default)]
    pub global_cost: GlobalCostKind,
    #[serde(default)]
    pub local_cost: LocalCostKind,
    #[serde(default)]
    pub scalarization: Scalarization,
    /// Target signal of the goal-matching cost functions
    #[serde(default)]
    pub goal: Option<Vec<f64>>,
    #[serde(default)]
    pub normalization: Normalization,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorganizationConfig {
    #[serde(default)]
    pub strategy: ReorganizationKind,
    #[serde(default = "default_period")]
    pub period: usize,
    #[serde(default = "default_memorization_offset")]
    pub memorization_offset: usize,
    #[serde(default = "default_convergence_tolerance")]
    pub convergence_tolerance: f64,
    /// Table of converged plan ids, for the predefined strategy
    #[serde(default)]
    pub predefined_path: Option<PathBuf>,
}

fn default_period() -> usize {
    3
}

fn default_memorization_offset() -> usize {
    5
}

fn default_convergence_tolerance() -> f64 {
    0.5
}

impl Default for ReorganizationConfig {
    fn default() -> Self {
        Self {
            strategy: ReorganizationKind::default(),
            period: default_period(),
            memorization_offset: default_memorization_offset(),
            convergence_tolerance: default_convergence_tolerance(),
            predefined_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default = "default_num_plans")]
    pub num_plans: usize,
    #[serde(default = "default_plan_dim")]
    pub plan_dim: usize,
    #[serde(default)]
    pub mean: f64,
    #[serde(default = "default_std")]
    pub std: f64,
    #[serde(default)]
    pub seed: u64,
}

fn default_num_plans() -> usize {
    16
}

fn default_plan_dim() -> usize {
    100
}

fn default_std() -> f64 {
    1.0
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            num_plans: default_num_plans(),
            plan_dim: default_plan_dim(),
            mean: 0.0,
            std: default_std(),
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory of the daily rolling log file
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        Self::load_with(config_dir, None)
    }

    /// Layer `<dir>/default.toml`, an optional explicit file and the
    /// environment (IEPOS__RUN__NUM_AGENTS, ...)
    pub fn load_with<P: AsRef<Path>>(
        config_dir: P,
        file: Option<&Path>,
    ) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let mut builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("run.mode", "local")?
            .add_source(File::from(config_dir.join("default.toml")).required(false));

        if let Some(file) = file {
            builder = builder.add_source(File::from(file));
        }

        builder
            .add_source(
                Environment::with_prefix("IEPOS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.run.num_agents == 0 {
            errors.push("run.num_agents must be positive".to_string());
        }
        if self.run.num_iterations == 0 {
            errors.push("run.num_iterations must be positive".to_string());
        }
        if self.run.mode == RunMode::Actors && self.run.timeout_ms == 0 {
            errors.push("run.timeout_ms must be positive in actors mode".to_string());
        }

        if self.topology.max_children == 0 {
            errors.push("topology.max_children must be at least 1".to_string());
        }

        let opt = &self.optimization;
        for (name, weight) in [("alpha", opt.alpha), ("beta", opt.beta), ("lambda", opt.lambda)] {
            if !(0.0..=1.0).contains(&weight) {
                errors.push(format!("optimization.{name} must be between 0 and 1, got {weight}"));
            }
        }
        if opt.alpha + opt.beta > 1.0 {
            errors.push(format!(
                "optimization.alpha + optimization.beta must not exceed 1, got {}",
                opt.alpha + opt.beta
            ));
        }
        match &opt.goal {
            None if opt.global_cost.needs_goal() => {
                errors.push(format!(
                    "optimization.goal is required by global cost '{}'",
                    opt.global_cost
                ));
            }
            Some(goal) if goal.len() != self.dataset.plan_dim => {
                errors.push(format!(
                    "optimization.goal has {} values, plans have {}",
                    goal.len(),
                    self.dataset.plan_dim
                ));
            }
            _ => {}
        }

        let reorg = &self.reorganization;
        if reorg.strategy == ReorganizationKind::Periodically && reorg.period == 0 {
            errors.push("reorganization.period must be at least 1".to_string());
        }
        if reorg.strategy == ReorganizationKind::GlobalCostReduction
            && reorg.convergence_tolerance <= 0.0
        {
            errors.push("reorganization.convergence_tolerance must be positive".to_string());
        }
        if reorg.strategy == ReorganizationKind::Predefined && reorg.predefined_path.is_none() {
            errors.push(
                "reorganization.predefined_path is required by the predefined strategy".to_string(),
            );
        }

        if self.dataset.num_plans == 0 {
            errors.push("dataset.num_plans must be positive".to_string());
        }
        if self.dataset.plan_dim == 0 {
            errors.push("dataset.plan_dim must be positive".to_string());
        }
        if self.dataset.std < 0.0 {
            errors.push("dataset.std must not be negative".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn weights(&self) -> Weights {
        Weights {
            alpha: self.optimization.alpha,
            beta: self.optimization.beta,
            lambda: self.optimization.lambda,
        }
    }

    /// Run-wide agent settings, with cost functions built from their kinds
    pub fn agent_context(&self, sink: Arc<dyn MeasurementSink>) -> Result<AgentContext> {
        let opt = &self.optimization;
        let goal = opt.goal.clone().map(Vector::from_values);
        Ok(AgentContext {
            num_iterations: self.run.num_iterations,
            global_cost: opt.global_cost.build(goal.as_ref(), opt.normalization)?,
            local_cost: opt.local_cost.build(),
            weights: self.weights(),
            scalarization: opt.scalarization,
            sink,
        })
    }

    pub fn generator(&self) -> TopologyGenerator {
        let t = &self.topology;
        TopologyGenerator::new(t.priority, t.descriptor, t.shape, t.balance, self.run.seed)
    }

    /// Fresh strategy instance; every agent gets its own
    pub fn strategy(&self) -> Result<ReorganizationStrategy> {
        let reorg = &self.reorganization;
        let strategy = match reorg.strategy {
            ReorganizationKind::Never => ReorganizationStrategy::Never,
            ReorganizationKind::Periodically => ReorganizationStrategy::periodically(reorg.period),
            ReorganizationKind::OnConvergence => {
                ReorganizationStrategy::on_convergence(reorg.memorization_offset)
            }
            ReorganizationKind::GlobalCostReduction => {
                ReorganizationStrategy::global_cost_reduction(reorg.convergence_tolerance)
            }
            ReorganizationKind::Predefined => {
                let path = reorg.predefined_path.as_deref().ok_or_else(|| {
                    IeposError::Config("predefined strategy without predefined_path".into())
                })?;
                let selection = PredefinedSelection::load(path)?;
                selection.validate(&vec![self.dataset.num_plans; self.run.num_agents])?;
                let selection = Arc::new(selection);
                ReorganizationStrategy::predefined(selection, reorg.memorization_offset)
            }
        };
        Ok(strategy)
    }

    pub fn dataset(&self) -> GaussianDataset {
        let d = &self.dataset;
        GaussianDataset::new(self.run.num_agents, d.num_plans, d.plan_dim)
            .with_distribution(d.mean, d.std)
            .with_seed(d.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::TracingSink;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.run.num_agents, 100);
        assert_eq!(config.run.num_iterations, 40);
        assert_eq!(config.run.mode, RunMode::Local);
        assert_eq!(config.topology.max_children, 2);
        assert_eq!(config.topology.shape, TreeShape::SortedHighToLow);
        assert_eq!(config.reorganization.strategy, ReorganizationKind::Never);
        assert_eq!(config.reorganization.period, 3);
        assert_eq!(config.reorganization.memorization_offset, 5);
        assert_eq!(config.dataset.num_plans, 16);
        assert_eq!(config.dataset.plan_dim, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_missing_dir_uses_defaults() {
        let config = AppConfig::load_from("/nonexistent/iepos-config").unwrap();
        assert_eq!(config.run.num_iterations, 40);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.optimization.global_cost, GlobalCostKind::Variance);
    }

    #[test]
    fn test_shipped_default_toml_parses() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("config");
        let config = AppConfig::load_from(dir).unwrap();
        assert_eq!(config.topology.max_children, 2);
        assert_eq!(config.topology.shape, TreeShape::SortedHighToLow);
        assert_eq!(config.reorganization.strategy, ReorganizationKind::Never);
        assert_eq!(config.optimization.scalarization, Scalarization::Complex);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_sections() {
        let toml = r#"
            [run]
            num_agents = 7
            mode = "actors"

            [topology]
            balance = "list"
            shape = "random"

            [optimization]
            alpha = 0.2
            beta = 0.3
            global_cost = "rmse"
            goal = [1.0, 2.0]

            [reorganization]
            strategy = "convergence_short"
            convergence_tolerance = 0.1

            [dataset]
            plan_dim = 2
        "#;
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.run.num_agents, 7);
        assert_eq!(config.run.num_iterations, 40);
        assert_eq!(config.run.mode, RunMode::Actors);
        assert_eq!(config.topology.balance, BalanceMode::List);
        assert_eq!(config.topology.shape, TreeShape::Random);
        assert_eq!(
            config.reorganization.strategy,
            ReorganizationKind::GlobalCostReduction
        );
        assert!(config.validate().is_ok());

        let ctx = config.agent_context(Arc::new(TracingSink)).unwrap();
        assert_eq!(ctx.global_cost.label(), "RMSE");
        assert_eq!(ctx.weights.alpha, 0.2);
        assert_eq!(
            config.strategy().unwrap().kind(),
            ReorganizationKind::GlobalCostReduction
        );
    }

    #[test]
    fn test_validate_collects_every_violation() {
        let mut config = AppConfig::default();
        config.run.num_agents = 0;
        config.optimization.alpha = 0.7;
        config.optimization.beta = 0.6;
        config.optimization.global_cost = GlobalCostKind::Dot;
        config.reorganization.strategy = ReorganizationKind::Predefined;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.contains("num_agents")));
        assert!(errors.iter().any(|e| e.contains("alpha + optimization.beta")));
        assert!(errors.iter().any(|e| e.contains("goal")));
        assert!(errors.iter().any(|e| e.contains("predefined_path")));
    }

    #[test]
    fn test_goal_cost_without_goal_fails_to_build() {
        let mut config = AppConfig::default();
        config.optimization.global_cost = GlobalCostKind::SqrDist;
        assert!(matches!(
            config.agent_context(Arc::new(TracingSink)),
            Err(IeposError::Config(_))
        ));
    }

    #[test]
    fn test_dataset_and_generator_follow_config() {
        let mut config = AppConfig::default();
        config.run.num_agents = 3;
        config.dataset.num_plans = 4;
        config.dataset.plan_dim = 5;
        let dataset = config.dataset();
        assert_eq!(dataset.num_agents, 3);
        assert_eq!(dataset.num_plans, 4);

        config.topology.balance = BalanceMode::List;
        assert_eq!(config.generator().balance, BalanceMode::List);
    }
}
