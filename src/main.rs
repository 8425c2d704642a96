// Copyright 2025 Servus Altissimi (Pseudonym)

// Permission is hereby granted, free of charge, to any person obtaining a copy of this software and associated documentation files (the "Software"), to deal in the Software without restriction, including without limitation the rights to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is furnished to do so, subject to the following conditions:
// The above copyright notice and this permission notice shall be included in all copies or substantial portions of the Software.
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use collabnet::metrics::analyzer::{
    self, AnalysisReport, CombinedReport, EquilibriumAnalyzer, EquilibriumPhase, EquilibriumSchedule,
};
use collabnet::metrics::logger;
use collabnet::prelude::*;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args, Clone)]
struct SimArgs {
    /// JSON config file; the flags below are ignored when given, but the
    /// strategy being run still overrides the file's
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short = 'n', long, default_value_t = 3)]
    agents: u32,
    /// Network capacities in Mbps, e.g. "4,7,22"
    #[arg(short = 'b', long, default_value = "4,7,22")]
    capacities: String,
    #[arg(short, long, default_value_t = 300)]
    ticks: u32,
    #[arg(long, default_value_t = 1)]
    sub_ticks: u32,
    #[arg(short, long, default_value_t = 2)]
    delay: u32,
    #[arg(short, long, default_value_t = 20.0)]
    eta: f64,
    #[arg(short, long, default_value_t = 0.1)]
    gamma: f64,
    #[arg(long = "pt", default_value_t = 0.5)]
    transmit: f64,
    #[arg(long = "pl", default_value_t = 0.5)]
    listen: f64,
    #[arg(long, default_value_t = 10)]
    max_unheard: u32,
    #[arg(long, default_value = "static")]
    scenario: String,
    /// Admissible equilibrium states, e.g. "0_0_3;1_1_1"; derived when omitted
    #[arg(long)]
    equilibria: Option<String>,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Subcommand)]
enum Commands {
    Run {
        /// Defaults to the config file's strategy, else collaborative-ewa
        #[arg(short, long)]
        strategy: Option<String>,
        #[command(flatten)]
        sim: SimArgs,
        #[arg(short, long, default_value = "results")]
        output: PathBuf,
        #[arg(long)]
        no_save: bool,
    },

    Compare {
        #[arg(short, long, default_value = "collaborative-ewa,full-information")]
        strategies: String,
        #[arg(short, long, default_value_t = 3)]
        repetitions: u32,
        #[arg(short, long, default_value_t = 20)]
        window: usize,
        #[command(flatten)]
        sim: SimArgs,
    },

    /// Distance to equilibrium of a saved network.csv (or run directory)
    Analyze {
        path: PathBuf,
        #[arg(short = 'b', long, default_value = "4,7,22")]
        capacities: String,
        #[arg(long)]
        equilibria: Option<String>,
        #[arg(short, long, default_value_t = 20)]
        window: usize,
    },

    /// Every equilibrium occupancy for a population and set of networks
    Equilibria {
        #[arg(short = 'n', long)]
        agents: usize,
        #[arg(short = 'b', long, default_value = "4,7,22")]
        capacities: String,
    },

    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let program_start = Instant::now();

    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run { strategy, sim, output, no_save } => {
            run_single_simulation(strategy.as_deref(), &sim, &output, no_save).await?;
        }

        Commands::Compare { strategies, repetitions, window, sim } => {
            compare_strategies(&strategies, repetitions, window, &sim, program_start).await?;
        }

        Commands::Analyze { path, capacities, equilibria, window } => {
            analyze_results(&path, &capacities, equilibria.as_deref(), window)?;
        }

        Commands::Equilibria { agents, capacities } => {
            let capacities = parse_capacities(&capacities)?;
            let states = analyzer::nash_equilibria(agents, &capacities);
            println!("\n{} equilibrium state(s) for {} agents on {:?}:", states.len(), agents, capacities);
            for state in &states {
                println!("  {}", state.iter().map(|s| s.to_string()).collect::<Vec<_>>().join("_"));
            }
            println!();
        }

        Commands::List => {
            println!("\nAvailable Selection Strategies");
            for strategy in StrategyRegistry::global().list() {
                println!("  - {}", strategy);
            }
            println!("\nScenarios: static, half-leave, temporary-join, mobility (custom via --config)");
            println!("\nUsage: cargo run -- run --strategy <name>");
            println!("Example: cargo run -- run --strategy full-information -n 20 -b 4,7,22\n");
        }
    }

    let total_time = program_start.elapsed();
    info!("Total runtime: {:.2}s", total_time.as_secs_f64());

    Ok(())
}

/// Resolves the run config. A config file replaces every sim flag, while the
/// strategy, when given, always wins over the file's.
fn build_config(strategy: Option<&str>, args: &SimArgs) -> Result<SimConfig> {
    if let Some(path) = &args.config {
        let mut config = SimConfig::from_json_file(path).with_context(|| format!("reading {}", path.display()))?;
        if let Some(strategy) = strategy {
            config = config.with_strategy(strategy);
        }
        config.validate()?;
        return Ok(config);
    }

    let mut config = SimConfig::default()
        .with_strategy(strategy.unwrap_or("collaborative-ewa"))
        .with_agents(args.agents)
        .with_capacities(parse_capacities(&args.capacities)?)
        .with_ticks(args.ticks)
        .with_learning(args.eta, args.gamma)
        .with_gossip(args.transmit, args.listen, args.delay)
        .with_scenario(parse_scenario(&args.scenario)?)
        .with_seed(args.seed);
    config.sub_ticks = args.sub_ticks;
    config.max_unheard = args.max_unheard;
    if let Some(states) = &args.equilibria {
        config = config.with_equilibria(vec![EquilibriumPhase {
            from_tick: 0,
            states: parse_states(states)?,
        }]);
    }
    config.validate()?;
    Ok(config)
}

async fn run_single_simulation(strategy: Option<&str>, args: &SimArgs, output: &Path, no_save: bool) -> Result<()> {
    let config = build_config(strategy, args)?;
    let name = format!("{}_{}", config.strategy_name, config.scenario.name());
    let config = config.with_name(name);

    info!("CollabNet: Single Run");

    let mut sim = Simulation::new(config);
    let token = sim.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current tick");
            token.cancel();
        }
    });

    let report = sim.run().await?;
    if !no_save {
        let dir = sim.save_results(&report, output)?;
        info!("Run directory: {}", dir.display());
    }
    Ok(())
}

#[derive(Serialize)]
struct StrategyComparison {
    strategy: String,
    ticks: u32,
    combined: Option<CombinedReport>,
    mean_gain: f64,
    switches: f64,
    explorations: f64,
}

async fn compare_strategies(
    strategies: &str,
    repetitions: u32,
    window: usize,
    args: &SimArgs,
    global_start: Instant,
) -> Result<()> {
    let strategy_names: Vec<&str> = strategies.split(',').map(|s| s.trim()).collect();

    info!("CollabNet: Comparison");
    info!("Strategies: {}", strategy_names.join(", "));
    info!("Repetitions: {}", repetitions);

    let mut comparisons = Vec::new();
    for strategy in strategy_names {
        info!("Testing: {}", strategy);

        let mut analyses: Vec<AnalysisReport> = Vec::new();
        let mut gains = Vec::new();
        let mut switches = Vec::new();
        let mut explorations = Vec::new();
        let mut ticks = 0;

        for rep in 1..=repetitions {
            let elapsed = global_start.elapsed();
            info!("  [{}] Run {}/{}", format_time(elapsed), rep, repetitions);

            let mut config = build_config(Some(strategy), args)?.with_name(format!("{}_{}", strategy, rep));
            config.seed = config.seed.wrapping_add(u64::from(rep - 1));
            ticks = config.ticks;

            let mut sim = Simulation::new(config).with_progress(false);
            let report = sim.run().await?;
            gains.push(report.summary.mean_gain);
            switches.push(report.summary.switches as f64);
            explorations.push(report.summary.explorations as f64);
            if let Some(analysis) = report.analysis {
                analyses.push(analysis);
            }
        }

        let combined = (!analyses.is_empty()).then(|| {
            let mut combined = analyzer::combine_runs(&analyses);
            combined.mean_distance_per_tick = analyzer::moving_average(&combined.mean_distance_per_tick, window);
            combined
        });
        comparisons.push(StrategyComparison {
            strategy: strategy.to_string(),
            ticks,
            combined,
            mean_gain: mean(&gains),
            switches: mean(&switches),
            explorations: mean(&explorations),
        });
    }

    comparison_table(&comparisons);

    std::fs::create_dir_all("results")?;
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let comparison_path = format!("results/comparison_{}.json", timestamp);
    std::fs::write(&comparison_path, serde_json::to_string_pretty(&comparisons)?)?;
    info!("Comparison saved to: {}", comparison_path);

    Ok(())
}

fn analyze_results(path: &Path, capacities: &str, equilibria: Option<&str>, window: usize) -> Result<()> {
    let file = if path.is_dir() { logger::network_file(path) } else { path.to_path_buf() };
    info!("Analyzing: {}", file.display());

    let series = logger::load_occupancy(&file)?;
    let Some((_, first)) = series.first() else {
        info!("No ticks recorded.");
        return Ok(());
    };
    let capacities = parse_capacities(capacities)?;
    if first.len() != capacities.len() {
        bail!("{} has {} networks but {} capacities were given", file.display(), first.len(), capacities.len());
    }

    let schedule = match equilibria {
        Some(states) => {
            let states = parse_states(states)?;
            check_states(&states, capacities.len())?;
            EquilibriumSchedule::single(states)
        }
        None => {
            let population: usize = first.iter().sum();
            warn!("No equilibria given; assuming a fixed population of {}", population);
            EquilibriumSchedule::single(analyzer::nash_equilibria(population, &capacities))
        }
    };
    let report = EquilibriumAnalyzer::new(capacities, schedule).with_window(window).analyze(&series);

    println!("\nTicks:                 {}", report.ticks);
    println!("At equilibrium:        {} ({:.1}%)", report.ticks_at_equilibrium, report.percent_at_equilibrium);
    println!("Mean distance:         {:.2}%", report.mean_distance);
    println!("Final {:>3} ticks mean:  {:.2}%\n", window, report.final_window_mean_distance);

    let out = file.with_file_name("distance.json");
    std::fs::write(&out, serde_json::to_string_pretty(&report)?)?;
    info!("Analysis saved to: {}", out.display());
    Ok(())
}

fn parse_capacities(raw: &str) -> Result<Vec<f64>> {
    raw.split([',', '_'])
        .map(|s| s.trim().parse::<f64>().with_context(|| format!("bad capacity '{}'", s)))
        .collect()
}

fn parse_states(raw: &str) -> Result<Vec<Vec<usize>>> {
    raw.split(';')
        .map(|state| {
            state
                .split([',', '_'])
                .map(|s| s.trim().parse::<usize>().with_context(|| format!("bad state entry '{}'", s)))
                .collect()
        })
        .collect()
}

fn check_states(states: &[Vec<usize>], networks: usize) -> Result<()> {
    if let Some(state) = states.iter().find(|s| s.len() != networks) {
        bail!("equilibrium state {:?} has {} entries for {} networks", state, state.len(), networks);
    }
    Ok(())
}

fn parse_scenario(name: &str) -> Result<Scenario> {
    match name.to_lowercase().as_str() {
        "static" => Ok(Scenario::Static),
        "half-leave" => Ok(Scenario::HalfLeave),
        "temporary-join" => Ok(Scenario::TemporaryJoin),
        "mobility" => Ok(Scenario::Mobility),
        _ => bail!("Unknown scenario: {} (custom scenarios need --config)", name),
    }
}

fn format_time(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn comparison_table(comparisons: &[StrategyComparison]) {
    println!("\n╔═══════════════════════════════════════════════════════════════════════════╗");
    println!("║                           STRATEGY COMPARISON                             ║");
    println!("╠════════════════════╦═════════════╦═════════════╦═══════════╦══════════════╣");
    println!("║ Strategy           ║ At NE       ║ Final dist. ║ Mean gain ║ Switches     ║");
    println!("║                    ║ (% ticks)   ║ (%)         ║ (Mbps)    ║ (per run)    ║");
    println!("╠════════════════════╬═════════════╬═════════════╬═══════════╬══════════════╣");

    for c in comparisons {
        let (at_ne, final_distance) = match &c.combined {
            Some(combined) => (
                combined.average_ticks_at_equilibrium * 100.0 / f64::from(c.ticks.max(1)),
                combined.mean_distance_per_tick.last().copied().unwrap_or(0.0),
            ),
            None => (f64::NAN, f64::NAN),
        };
        println!(
            "║ {:<18} ║ {:>10.1}% ║ {:>10.2}% ║ {:>9.2} ║ {:>12.1} ║",
            c.strategy, at_ne, final_distance, c.mean_gain, c.switches,
        );
    }

    println!("╚════════════════════╩═════════════╩═════════════╩═══════════╩══════════════╝\n");

    if let Some(best) = comparisons
        .iter()
        .filter_map(|c| c.combined.as_ref().map(|r| (c, r)))
        .max_by(|a, b| a.1.average_ticks_at_equilibrium.total_cmp(&b.1.average_ticks_at_equilibrium))
    {
        println!(
            "Most time at equilibrium: {} ({:.1} ticks on average)",
            best.0.strategy, best.1.average_ticks_at_equilibrium
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compare_args(extra: &[&str]) -> SimArgs {
        let base = ["collabnet", "compare"];
        let argv = base.iter().chain(extra).copied();
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Compare { sim, .. } => sim,
            _ => unreachable!(),
        }
    }

    #[test]
    fn strategy_wins_over_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.json");
        std::fs::write(&path, r#"{ "strategy_name": "collaborative-ewa", "ticks": 77 }"#).unwrap();
        let args = compare_args(&["--config", path.to_str().unwrap()]);

        let config = build_config(Some("full-information"), &args).unwrap();
        assert_eq!(config.strategy_name, "full-information");
        assert_eq!(config.ticks, 77);

        let from_file = build_config(None, &args).unwrap();
        assert_eq!(from_file.strategy_name, "collaborative-ewa");
        assert_eq!(from_file.ticks, 77);
    }

    #[test]
    fn flags_apply_without_a_config_file() {
        let args = compare_args(&["-n", "5", "-t", "40", "--scenario", "half-leave"]);
        let config = build_config(None, &args).unwrap();
        assert_eq!(config.strategy_name, "collaborative-ewa");
        assert_eq!(config.num_agents, 5);
        assert_eq!(config.ticks, 40);
        assert_eq!(config.scenario, Scenario::HalfLeave);
    }

    #[test]
    fn equilibrium_states_must_cover_every_network() {
        let states = parse_states("0_3;0_0_3").unwrap();
        assert!(check_states(&states, 3).is_err());
        assert!(check_states(&states[1..], 3).is_ok());
    }
}
