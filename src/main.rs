use clap::Parser;
use iepos::cli::{self, Cli, Commands};
use iepos::logging::init_logging_simple;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            config_dir,
            mode,
            agents,
            iterations,
            output,
        } => cli::run_simulation(config, config_dir, mode, agents, iterations, output).await,
        Commands::Topology {
            agents,
            max_children,
            balance,
            shape,
            seed,
        } => {
            init_logging_simple();
            cli::print_topology(agents, max_children, balance, shape, seed)
        }
    }
}
