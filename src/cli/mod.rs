//! `iepos` command line.
//!
//! Commands:
//! - `iepos run` - run a configured population to completion
//! - `iepos topology` - print the tree the broker would generate

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{AppConfig, RunMode};
use crate::logging::init_logging;
use crate::runtime::{self, RunReport};
use crate::topology::{BalanceMode, PeerDescriptor, PeerId, TopologyGenerator, TreeShape};

/// Decentralized iterative plan selection over a reorganizing tree
#[derive(Parser, Debug)]
#[command(name = "iepos")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a population of agents with synthetic plans
    Run {
        /// Config file layered over <config-dir>/default.toml
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory holding default.toml
        #[arg(long, default_value = "config")]
        config_dir: PathBuf,

        /// Override run.mode
        #[arg(short, long, value_enum)]
        mode: Option<RunMode>,

        /// Override run.num_agents
        #[arg(long)]
        agents: Option<usize>,

        /// Override run.num_iterations
        #[arg(long)]
        iterations: Option<usize>,

        /// Write the JSON run report here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the tree generated for N peers
    Topology {
        #[arg(short = 'n', long)]
        agents: usize,

        #[arg(long, default_value = "2")]
        max_children: usize,

        #[arg(long, value_enum, default_value = "weight-balanced")]
        balance: BalanceMode,

        #[arg(long, value_enum, default_value = "sorted-high-to-low")]
        shape: TreeShape,

        /// Seed of the random shape
        #[arg(long, default_value = "0")]
        seed: u64,
    },
}

/// `iepos run`
pub async fn run_simulation(
    config_file: Option<PathBuf>,
    config_dir: PathBuf,
    mode: Option<RunMode>,
    agents: Option<usize>,
    iterations: Option<usize>,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut config = AppConfig::load_with(&config_dir, config_file.as_deref())
        .with_context(|| format!("loading configuration from {}", config_dir.display()))?;
    if let Some(mode) = mode {
        config.run.mode = mode;
    }
    if let Some(agents) = agents {
        config.run.num_agents = agents;
    }
    if let Some(iterations) = iterations {
        config.run.num_iterations = iterations;
    }
    config
        .validate()
        .map_err(|errors| anyhow!("invalid configuration:\n  {}", errors.join("\n  ")))?;

    init_logging(&config.logging);

    let dataset = config.dataset();
    let report = runtime::run_configured(&config, &dataset).await?;
    print_report(&report);

    if let Some(path) = output {
        report
            .write_json(&path)
            .with_context(|| format!("writing run report to {}", path.display()))?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Run {}", report.run_id);
    println!(
        "  agents: {}  iterations: {}  reorganizations: {}",
        report.num_agents, report.num_iterations, report.num_reorganizations
    );
    for (iteration, cost) in report.global_cost.iter().enumerate() {
        let unfairness = report.unfairness.get(iteration).copied().unwrap_or(f64::NAN);
        let local = report.local_cost.get(iteration).copied().unwrap_or(f64::NAN);
        println!(
            "  {:>4}  global {:>14.6}  unfairness {:>10.6}  local {:>10.6}",
            iteration, cost, unfairness, local
        );
    }
    println!("  termination: {}", report.termination);
    println!(
        "  elapsed: {} ms",
        (report.finished_at - report.started_at).num_milliseconds()
    );
}

/// `iepos topology`
pub fn print_topology(
    agents: usize,
    max_children: usize,
    balance: BalanceMode,
    shape: TreeShape,
    seed: u64,
) -> Result<()> {
    let generator = TopologyGenerator {
        balance,
        shape,
        seed,
        ..TopologyGenerator::default()
    };
    let peers: Vec<PeerDescriptor> = (0..agents)
        .map(|i| PeerDescriptor::new(PeerId(i), i as f64, max_children))
        .collect();
    let topology = generator.generate(&peers)?;

    println!(
        "{} peers, {} / {}, depth {}",
        topology.len(),
        balance,
        shape,
        topology.depth()
    );
    for (peer, view) in topology.iter() {
        let parent = view
            .parent
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let children: Vec<String> = view.children.iter().map(|c| c.to_string()).collect();
        println!(
            "  {:<10} parent {:<10} children [{}]",
            peer.to_string(),
            parent,
            children.join(", ")
        );
    }
    Ok(())
}
