use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;

use multilevel_layout::graph::GraphSnapshot;
use multilevel_layout::{
    GraphData, Hierarchy, LayoutConfig, LayoutEngine, LayoutMode, NodePosition, PositionBuffer,
    TickOutcome,
};

/// Multilevel force-directed graph layout.
#[derive(Parser)]
#[command(name = "mlayout")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Layout configuration (.yaml, .yml or .json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Seed for matching order and jitter
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Lay out a graph to convergence and write the positions
    Layout {
        /// Input graph (.json)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file for positions; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the configured layout mode
        #[arg(short, long)]
        mode: Option<ModeArg>,

        /// Give up after this many steps
        #[arg(long, default_value = "100000")]
        max_ticks: usize,
    },
    /// Drive the layout in real time at the configured tick interval
    Run {
        /// Input graph (.json)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file for positions; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the configured layout mode
        #[arg(short, long)]
        mode: Option<ModeArg>,

        /// Stop after this many seconds even if still active
        #[arg(long)]
        duration: Option<f32>,
    },
    /// Print the coarsening hierarchy of a graph
    Hierarchy {
        /// Input graph (.json)
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Multilevel,
    Simple,
    Collision,
    Auto,
}

impl From<ModeArg> for LayoutMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Multilevel => LayoutMode::Multilevel,
            ModeArg::Simple => LayoutMode::Simple,
            ModeArg::Collision => LayoutMode::Collision,
            ModeArg::Auto => LayoutMode::Auto,
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli, mode: Option<ModeArg>) -> anyhow::Result<LayoutConfig> {
    let mut config = match &cli.config {
        Some(path) => LayoutConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => LayoutConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.driver.seed = seed;
    }
    if let Some(mode) = mode {
        config.mode = mode.into();
    }
    Ok(config)
}

fn load_graph(input: &Path) -> anyhow::Result<GraphData> {
    GraphData::load(input).with_context(|| format!("reading graph from {}", input.display()))
}

fn write_positions(positions: &[NodePosition], output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(positions)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("writing positions to {}", path.display()))?;
            println!("Wrote {} positions to {}", positions.len(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn layout(
    config: LayoutConfig,
    input: &Path,
    output: Option<&Path>,
    max_ticks: usize,
) -> anyhow::Result<()> {
    let graph = load_graph(input)?;
    let engine = LayoutEngine::new(config, graph, PositionBuffer::new())?;
    engine.initialize();

    let ticks = engine.run_to_convergence(max_ticks);
    if engine.is_active() {
        tracing::warn!(ticks, "stopped before convergence");
    }
    let status = engine.status();
    tracing::info!(ticks, levels = status.level_sizes.len(), "layout finished");

    let sink = engine.shutdown();
    write_positions(sink.positions(), output)
}

async fn run(
    config: LayoutConfig,
    input: &Path,
    output: Option<&Path>,
    duration: Option<f32>,
) -> anyhow::Result<()> {
    let graph = load_graph(input)?;
    let interval = Duration::from_secs_f32(config.driver.tick_interval);
    let engine = Arc::new(LayoutEngine::new(config, graph, PositionBuffer::new())?);
    engine.initialize();

    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs_f32(secs.max(0.0)));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut inflight = JoinSet::new();
    let mut last = Instant::now();

    while engine.is_active() {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last).as_secs_f32();
                last = now;

                let engine = Arc::clone(&engine);
                inflight.spawn_blocking(move || engine.tick(dt));
                while let Some(done) = inflight.try_join_next() {
                    if let Ok(TickOutcome::LevelChanged { to, .. }) = done {
                        tracing::info!(level = to, "refining");
                    }
                }

                if deadline.is_some_and(|d| now >= d) {
                    tracing::info!("duration elapsed");
                    break;
                }
            }
            _ = &mut ctrl_c => {
                tracing::info!("interrupted, clearing");
                engine.clear();
                break;
            }
        }
    }

    while inflight.join_next().await.is_some() {}

    let status = engine.status();
    tracing::info!(
        ticks = status.ticks,
        dropped = status.dropped_ticks,
        active = status.active,
        "run finished"
    );
    let positions = engine.with_sink(|sink| sink.positions().to_vec());
    write_positions(&positions, output)
}

fn hierarchy(config: &LayoutConfig, input: &Path) -> anyhow::Result<()> {
    let graph = load_graph(input)?;
    let snapshot = GraphSnapshot::capture(&graph, config.plane);
    let mut rng = StdRng::seed_from_u64(config.driver.seed);
    let hierarchy = Hierarchy::build(
        &snapshot.positions,
        &snapshot.edges,
        &config.hierarchy,
        &mut rng,
    );
    print!("{hierarchy}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Layout {
            input,
            output,
            mode,
            max_ticks,
        } => {
            let config = load_config(&cli, *mode)?;
            layout(config, input, output.as_deref(), *max_ticks)?;
        }
        Commands::Run {
            input,
            output,
            mode,
            duration,
        } => {
            let config = load_config(&cli, *mode)?;
            run(config, input, output.as_deref(), *duration).await?;
        }
        Commands::Hierarchy { input } => {
            let config = load_config(&cli, None)?;
            hierarchy(&config, input)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_layout_subcommand() {
        let cli = Cli::try_parse_from([
            "mlayout", "layout", "--input", "graph.json", "--output", "out.json",
        ])
        .unwrap();
        match cli.command {
            Commands::Layout {
                input,
                output,
                mode,
                max_ticks,
            } => {
                assert_eq!(input, PathBuf::from("graph.json"));
                assert_eq!(output, Some(PathBuf::from("out.json")));
                assert!(mode.is_none());
                assert_eq!(max_ticks, 100_000);
            }
            _ => panic!("Expected Layout command"),
        }
    }

    #[test]
    fn cli_parses_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "mlayout", "run", "-i", "g.json", "--mode", "collision", "--seed", "7", "-vv",
            "--config", "layout.yaml", "--duration", "2.5",
        ])
        .unwrap();
        assert_eq!(cli.seed, Some(7));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("layout.yaml")));
        match cli.command {
            Commands::Run { mode, duration, .. } => {
                assert_eq!(mode, Some(ModeArg::Collision));
                assert_eq!(duration, Some(2.5));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn cli_requires_a_subcommand() {
        assert!(Cli::try_parse_from(["mlayout"]).is_err());
    }

    #[test]
    fn cli_overrides_apply_to_config() {
        let cli =
            Cli::try_parse_from(["mlayout", "--seed", "42", "hierarchy", "-i", "g.json"]).unwrap();
        let config = load_config(&cli, Some(ModeArg::Simple)).unwrap();
        assert_eq!(config.driver.seed, 42);
        assert_eq!(config.mode, LayoutMode::Simple);
    }
}
