//! Candidate plan sources and previously converged selections.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use tracing::debug;

use crate::data::{Plan, Vector};
use crate::error::{IeposError, Result};

/// Supplies the candidate plans of every agent
pub trait Dataset: Send + Sync {
    fn num_agents(&self) -> usize;

    fn plans(&self, agent: usize) -> Result<Vec<Plan>>;
}

/// Synthetic plans with normally distributed elements.
///
/// Every agent draws from its own generator seeded with `seed + agent`, so
/// an agent's plans do not depend on how many agents are generated.
#[derive(Debug, Clone)]
pub struct GaussianDataset {
    pub num_agents: usize,
    pub num_plans: usize,
    pub plan_dim: usize,
    pub mean: f64,
    pub std: f64,
    pub seed: u64,
}

impl GaussianDataset {
    pub fn new(num_agents: usize, num_plans: usize, plan_dim: usize) -> Self {
        Self {
            num_agents,
            num_plans,
            plan_dim,
            mean: 0.0,
            std: 1.0,
            seed: 0,
        }
    }

    pub fn with_distribution(mut self, mean: f64, std: f64) -> Self {
        self.mean = mean;
        self.std = std;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn sample(&self, rng: &mut StdRng) -> f64 {
        // Box-Muller; u1 in (0, 1] keeps ln finite
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        self.mean + self.std * z
    }
}

impl Dataset for GaussianDataset {
    fn num_agents(&self) -> usize {
        self.num_agents
    }

    fn plans(&self, agent: usize) -> Result<Vec<Plan>> {
        if agent >= self.num_agents {
            return Err(IeposError::Config(format!(
                "agent {} outside dataset of {} agents",
                agent, self.num_agents
            )));
        }
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(agent as u64));
        let plans = (0..self.num_plans)
            .map(|index| {
                let values = (0..self.plan_dim).map(|_| self.sample(&mut rng)).collect();
                let score = index as f64 / self.num_plans as f64;
                Plan::new(index, Vector::from_values(values), score)
            })
            .collect();
        Ok(plans)
    }
}

/// Explicit plan lists, one per agent
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    agents: Vec<Vec<Plan>>,
}

impl InMemoryDataset {
    pub fn new(agents: Vec<Vec<Plan>>) -> Self {
        Self { agents }
    }

    /// Build from raw values; plan `i` of every agent gets index `i` and
    /// score `i / len`
    pub fn from_values(agents: Vec<Vec<Vec<f64>>>) -> Self {
        let agents = agents
            .into_iter()
            .map(|plans| {
                let len = plans.len().max(1) as f64;
                plans
                    .into_iter()
                    .enumerate()
                    .map(|(i, values)| Plan::new(i, Vector::from_values(values), i as f64 / len))
                    .collect()
            })
            .collect();
        Self { agents }
    }
}

impl Dataset for InMemoryDataset {
    fn num_agents(&self) -> usize {
        self.agents.len()
    }

    fn plans(&self, agent: usize) -> Result<Vec<Plan>> {
        self.agents.get(agent).cloned().ok_or_else(|| {
            IeposError::Config(format!(
                "agent {} outside dataset of {} agents",
                agent,
                self.agents.len()
            ))
        })
    }
}

/// Plan ids every agent selected in an earlier converged run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredefinedSelection {
    plans: Vec<usize>,
}

impl PredefinedSelection {
    pub fn from_plans(plans: Vec<usize>) -> Self {
        Self { plans }
    }

    /// Parse a selection table. Header lines start with `Iteration`; the
    /// last remaining line holds the iteration number followed by one plan
    /// id per agent.
    pub fn parse(text: &str) -> Result<Self> {
        let line = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with("Iteration"))
            .last()
            .ok_or_else(|| IeposError::Config("predefined selection table is empty".into()))?;

        let plans = line
            .split(',')
            .skip(1)
            .enumerate()
            .map(|(agent, cell)| {
                cell.trim().parse::<usize>().map_err(|e| {
                    IeposError::Config(format!(
                        "predefined selection: bad plan id {:?} for agent {}: {}",
                        cell.trim(),
                        agent,
                        e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if plans.is_empty() {
            return Err(IeposError::Config(
                "predefined selection table has no agent columns".into(),
            ));
        }
        debug!("Loaded predefined selection for {} agents", plans.len());
        Ok(Self { plans })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn plan_for(&self, agent: usize) -> Option<usize> {
        self.plans.get(agent).copied()
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Check the table against a population; `plan_counts[i]` is the
    /// number of candidate plans of agent `i`
    pub fn validate(&self, plan_counts: &[usize]) -> Result<()> {
        if self.plans.len() < plan_counts.len() {
            return Err(IeposError::Config(format!(
                "predefined selection covers {} agents, population has {}",
                self.plans.len(),
                plan_counts.len()
            )));
        }
        for (agent, (plan, available)) in self.plans.iter().zip(plan_counts).enumerate() {
            if plan >= available {
                return Err(IeposError::Config(format!(
                    "predefined plan {} of agent {} outside its {} plans",
                    plan, agent, available
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_is_deterministic_per_agent() {
        let small = GaussianDataset::new(3, 4, 10).with_seed(42);
        let large = GaussianDataset::new(50, 4, 10).with_seed(42);

        let a = small.plans(2).unwrap();
        let b = large.plans(2).unwrap();
        assert_eq!(a.len(), 4);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.value(), y.value());
            assert_eq!(x.dim(), 10);
        }
        assert_ne!(small.plans(0).unwrap()[0].value(), a[0].value());
        assert_eq!(a[1].score, 0.25);
        assert_eq!(a[3].index, 3);
    }

    #[test]
    fn test_gaussian_moments() {
        let dataset = GaussianDataset::new(1, 1, 20_000)
            .with_distribution(5.0, 2.0)
            .with_seed(7);
        let plan = &dataset.plans(0).unwrap()[0];
        assert!((plan.value().avg() - 5.0).abs() < 0.1);
        assert!((plan.value().std() - 2.0).abs() < 0.1);
    }

    #[test]
    fn test_out_of_range_agent() {
        let dataset = GaussianDataset::new(2, 2, 2);
        assert!(matches!(dataset.plans(2), Err(IeposError::Config(_))));
        let memory = InMemoryDataset::from_values(vec![vec![vec![1.0]]]);
        assert!(memory.plans(1).is_err());
        assert_eq!(memory.plans(0).unwrap()[0].value().values(), &[1.0]);
    }

    #[test]
    fn test_parse_selection_uses_last_row() {
        let table = "Iteration,agent-0,agent-1,agent-2\n0,1,2,3\n1,4,5,6\n";
        let selection = PredefinedSelection::parse(table).unwrap();
        assert_eq!(selection.len(), 3);
        assert_eq!(selection.plan_for(0), Some(4));
        assert_eq!(selection.plan_for(2), Some(6));
        assert_eq!(selection.plan_for(3), None);
    }

    #[test]
    fn test_selection_must_cover_population() {
        let selection = PredefinedSelection::from_plans(vec![1, 0]);
        assert!(selection.validate(&[2, 2]).is_ok());
        assert!(selection.validate(&[2]).is_ok());
        assert!(matches!(
            selection.validate(&[2, 2, 2]),
            Err(IeposError::Config(_))
        ));
    }

    #[test]
    fn test_selection_plan_outside_candidates() {
        let selection = PredefinedSelection::from_plans(vec![0, 3]);
        assert!(matches!(
            selection.validate(&[4, 3]),
            Err(IeposError::Config(_))
        ));
        assert!(selection.validate(&[4, 4]).is_ok());
    }

    #[test]
    fn test_malformed_selection_is_config_error() {
        assert!(matches!(
            PredefinedSelection::parse("Iteration,a\n"),
            Err(IeposError::Config(_))
        ));
        assert!(matches!(
            PredefinedSelection::parse("3,1,x\n"),
            Err(IeposError::Config(_))
        ));
        assert!(matches!(
            PredefinedSelection::parse("3\n"),
            Err(IeposError::Config(_))
        ));
    }
}
