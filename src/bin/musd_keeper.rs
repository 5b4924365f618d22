//! mUSD peg keeper CLI
//!
//! Plans corrective trades, validates keeper configuration and runs the
//! keeper against a seeded in-memory deployment.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use musd::cli::{
    parse_wad, plan_for, sample_config, KeeperConfig, OutputFormat, OutputFormatter, Simulation,
};
use musd::core::address::Address;
use musd::core::config::PegTarget;
use musd::peg::planner::PoolState;
use musd::utils::constants::{DEFAULT_CORRECTION_FRACTION_BPS, DEFAULT_SWAP_FEE_BPS, DEFAULT_TRIGGER_BPS};

/// mUSD keeper - peg stabilization for mUSD pools
#[derive(Parser)]
#[command(name = "musd-keeper")]
#[command(author = "mUSD Team")]
#[command(version = musd::VERSION)]
#[command(about = "Peg keeper for the mUSD exchange engine", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format (text, json, json-pretty)
    #[arg(short, long, env = "MUSD_OUTPUT", default_value = "text")]
    format: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an example keeper configuration
    Init {
        /// Destination file
        #[arg(short, long, default_value = "musd-keeper.json")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a keeper configuration file
    CheckConfig {
        /// Configuration file
        #[arg(short, long, env = "MUSD_KEEPER_CONFIG")]
        config: PathBuf,
    },

    /// Plan a correction for explicit pool reserves
    Plan {
        /// Symbol shown in the output
        #[arg(long, default_value = "TOKEN")]
        symbol: String,

        /// Token reserve (decimal, 18 decimals)
        #[arg(long)]
        token_reserve: String,

        /// Stablecoin reserve (decimal, 18 decimals)
        #[arg(long)]
        stable_reserve: String,

        /// Target price in stablecoin per token (decimal)
        #[arg(long)]
        target: String,

        /// Pool swap fee
        #[arg(long, default_value_t = DEFAULT_SWAP_FEE_BPS)]
        fee_bps: u64,

        /// Deviation that triggers a correction
        #[arg(long, default_value_t = DEFAULT_TRIGGER_BPS)]
        trigger_bps: u64,

        /// Share of the full correction to trade
        #[arg(long, default_value_t = DEFAULT_CORRECTION_FRACTION_BPS)]
        fraction_bps: u64,

        /// Largest input per correction (decimal)
        #[arg(long)]
        max_action: Option<String>,

        /// Smallest input worth trading (decimal)
        #[arg(long)]
        min_action: Option<String>,
    },

    /// Run the keeper against a seeded in-memory deployment
    Simulate {
        /// Configuration file; the built-in example when omitted
        #[arg(short, long, env = "MUSD_KEEPER_CONFIG")]
        config: Option<PathBuf>,

        /// Stop after this many cycles
        #[arg(short = 'n', long)]
        cycles: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut output = OutputFormatter::new(cli.format);
    if cli.no_color {
        output = output.without_color();
    }

    match cli.command {
        Commands::Init { output: path, force } => {
            if path.exists() && !force {
                bail!("{} already exists, use --force to overwrite", path.display());
            }
            sample_config()
                .save(&path)
                .with_context(|| format!("writing {}", path.display()))?;
            output.success(&format!("Wrote example configuration to {}", path.display()));
        }

        Commands::CheckConfig { config } => {
            let loaded = KeeperConfig::load_with_env(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            if let Err(e) = loaded.validate() {
                output.error(&format!("[{}] {}", e.code(), e));
                bail!("invalid configuration {}", config.display());
            }
            let peg = loaded.peg_config();
            output.success(&format!(
                "{} is valid: {} peg target(s), {} simulated market(s)",
                config.display(),
                peg.targets.len(),
                loaded.simulation.markets.len()
            ));
            if peg.targets.is_empty() {
                output.warning("no peg targets configured; the keeper will idle");
            }
        }

        Commands::Plan {
            symbol,
            token_reserve,
            stable_reserve,
            target,
            fee_bps,
            trigger_bps,
            fraction_bps,
            max_action,
            min_action,
        } => {
            let pool = PoolState {
                token_reserve: parse_wad(&token_reserve)?,
                stable_reserve: parse_wad(&stable_reserve)?,
                swap_fee_bps: fee_bps,
            };
            let mut peg = PegTarget::new(symbol.clone(), Address::from_label(&symbol), parse_wad(&target)?);
            peg.trigger_bps = trigger_bps;
            peg.correction_fraction_bps = fraction_bps;
            if let Some(max) = max_action {
                peg.max_action_amount = parse_wad(&max)?;
            }
            if let Some(min) = min_action {
                peg.min_action_amount = parse_wad(&min)?;
            }
            let decision = plan_for(&peg, &pool).context("planning correction")?;
            output.print_plan(&peg, &pool, &decision);
        }

        Commands::Simulate { config, cycles } => {
            let mut loaded = match &config {
                Some(path) => KeeperConfig::load_with_env(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => {
                    let mut sample = sample_config();
                    sample
                        .apply_overrides(|name| std::env::var(name).ok())
                        .context("applying environment overrides")?;
                    sample
                }
            };
            if let Some(n) = cycles {
                loaded.keeper.max_cycles = Some(n);
            }
            if loaded.keeper.max_cycles.is_none() && loaded.kill_switch_file.is_none() {
                output.warning("no max cycles or kill switch file; interrupt to stop");
            }

            let mut simulation = Simulation::build(&loaded).context("seeding simulation")?;
            let report = simulation.run().await.context("running keeper")?;
            output.print_simulation(&report);
        }
    }

    Ok(())
}
