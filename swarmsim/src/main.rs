//! swarmsim command line entry point.

use std::io::{self, Write};

use clap::{Parser, ValueEnum};
use swarmsim::{CatalogConfig, Duration, GridLayout, ScenarioBuilder, SimulationResult};
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TopologyArg {
    /// 5-wide grid, 5 m by 10 m spacing, 25 m radio range
    Grid,
    FullyConnected,
    Chain,
    Star,
    /// Unit square with about five neighbors per node
    RandomGeometric,
}

#[derive(Debug, Parser)]
#[command(name = "swarmsim", about = "Simulate swarmcast file dissemination")]
struct Cli {
    #[arg(long, default_value_t = 25)]
    nodes: usize,

    #[arg(long, default_value_t = 900)]
    duration_secs: u64,

    /// Files in the shared catalog
    #[arg(long, default_value_t = 100)]
    catalog_size: u32,

    #[arg(long, default_value_t = 10)]
    max_files_per_node: usize,

    #[arg(long, default_value_t = 1000)]
    file_size_kb: u32,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Per-link loss probability
    #[arg(long, default_value_t = 0.0)]
    loss_rate: f64,

    #[arg(long, value_enum, default_value_t = TopologyArg::Grid)]
    topology: TopologyArg,

    /// Keep running after every node holds every file
    #[arg(long)]
    full_duration: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    info!(?cli, "swarmsim starting");

    let catalog = CatalogConfig {
        catalog_size: cli.catalog_size,
        max_files_per_node: cli.max_files_per_node,
        file_size_kb: cli.file_size_kb,
        ..CatalogConfig::default()
    };
    let builder = ScenarioBuilder::new(cli.nodes)
        .with_seed(cli.seed)
        .with_catalog(catalog)
        .with_loss_rate(cli.loss_rate)
        .with_snapshot_interval(Duration::from_secs(10));
    let builder = match cli.topology {
        TopologyArg::Grid => builder.grid(GridLayout::default()),
        TopologyArg::FullyConnected => builder.fully_connected(),
        TopologyArg::Chain => builder.chain_topology(),
        TopologyArg::Star => builder.star_topology(),
        TopologyArg::RandomGeometric => builder.random_geometric_adaptive(),
    };

    let (mut sim, _) = builder.build()?;
    let deadline = sim
        .current_time()
        .saturating_add(Duration::from_secs(cli.duration_secs));
    let result = if cli.full_duration {
        sim.run_until(deadline)
    } else {
        sim.run_until_converged(deadline)
    };

    print_summary(&result, &mut io::stdout().lock())?;
    Ok(())
}

fn print_summary(result: &SimulationResult, out: &mut impl Write) -> io::Result<()> {
    let metrics = &result.metrics;
    writeln!(out, "simulated time:     {:.3} s", result.end_time.as_secs_f64())?;
    writeln!(out, "nodes:              {}", result.node_count)?;
    writeln!(out, "files in play:      {}", result.catalog_len)?;
    writeln!(
        out,
        "complete nodes:     {}/{}",
        result.final_complete_nodes(),
        result.node_count
    )?;
    if let Some(snapshot) = metrics.latest_snapshot() {
        writeln!(
            out,
            "full files/node:    min {} mean {:.1}",
            snapshot.min_full_files(),
            snapshot.mean_full_files()
        )?;
    }
    writeln!(
        out,
        "broadcasts:         {} ({} adv, {} req, {} reply), {} bytes",
        metrics.messages_sent,
        metrics.sent_by_kind.advertisements,
        metrics.sent_by_kind.requests,
        metrics.sent_by_kind.replies,
        metrics.bytes_sent
    )?;
    writeln!(
        out,
        "receptions:         {} delivered, {} lost",
        metrics.messages_delivered, metrics.messages_dropped
    )?;
    writeln!(
        out,
        "files replicated:   {}/{}",
        metrics.full_replication.len(),
        result.catalog_len
    )?;
    match metrics.full_replication_time(result.catalog_len) {
        Some(t) => writeln!(out, "full replication:   {:.3} s", t.as_secs_f64())?,
        None => writeln!(out, "full replication:   not reached")?,
    }
    writeln!(out, "halted nodes:       {}", result.halted_count())
}
