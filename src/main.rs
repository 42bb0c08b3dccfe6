use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cdp_session::{SessionConfig, SessionManager};
use network_tap::TapConfig;
use pagecarbon::{
    run_analysis, AnalysisOptions, AnalysisResult, AnalysisRuntime, DeviceType, InMemoryCache,
    InteractionLevel, StaticGreenHosting, SustainableWebModel,
};
use resource_ledger::ResourceKind;

#[derive(Parser)]
#[command(
    name = "pagecarbon",
    version,
    about = "Estimates the carbon cost of loading a web page"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a page in a headless browser and estimate its carbon cost.
    Analyze(AnalyzeArgs),
}

#[derive(clap::Args)]
struct AnalyzeArgs {
    /// Page to analyze, including the scheme.
    url: String,

    /// Device class to emulate.
    #[arg(long, default_value = "desktop")]
    device: DeviceType,

    /// How aggressively to exercise the page: minimal, default or thorough.
    #[arg(long, default_value = "default")]
    level: InteractionLevel,

    /// Cap on element interactions, overriding the level's bound.
    #[arg(long)]
    max_interactions: Option<usize>,

    /// Cap on scroll steps, overriding the level's bound.
    #[arg(long)]
    max_scroll_steps: Option<usize>,

    /// Navigation deadline, e.g. "30s".
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    nav_timeout: Duration,

    /// Budget for everything after navigation, e.g. "2m".
    #[arg(long, default_value = "120s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Chromium binary to launch; auto-detected when omitted.
    #[arg(long)]
    chrome: Option<PathBuf>,

    /// Emit the full result as JSON instead of the summary.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Analyze(args) => analyze(args).await,
    }
}

async fn analyze(args: AnalyzeArgs) -> Result<()> {
    let mut session_config = SessionConfig::default();
    if let Some(chrome) = args.chrome {
        session_config.executable = chrome;
    }
    anyhow::ensure!(
        !session_config.executable.as_os_str().is_empty(),
        "no Chromium binary found; install one or pass --chrome"
    );

    let runtime = AnalysisRuntime {
        sessions: SessionManager::new(session_config),
        tap: TapConfig::default(),
        emissions: Box::new(SustainableWebModel::default()),
        green_hosting: Box::new(StaticGreenHosting::default()),
    };
    let cache = InMemoryCache::default();
    let options = AnalysisOptions {
        device: args.device,
        interaction_level: args.level,
        max_interactions: args.max_interactions,
        max_scroll_steps: args.max_scroll_steps,
        navigation_timeout: args.nav_timeout,
        overall_timeout: args.timeout,
    };

    info!(target: "pagecarbon", url = %args.url, device = args.device.as_str(), "starting analysis");
    let result = run_analysis(&runtime, &cache, &args.url, &options)
        .await
        .with_context(|| format!("analysis of {} failed", args.url))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }
    Ok(())
}

fn print_summary(result: &AnalysisResult) {
    println!("{}", result.url);
    println!(
        "  transferred  {} across {} resources",
        format_bytes(result.tally.total_bytes),
        result.resource_count
    );
    for kind in ResourceKind::ALL {
        let tally = result.tally.kind(kind);
        if tally.count > 0 {
            println!(
                "    {:<10} {:>10}  ({} files)",
                kind.as_str(),
                format_bytes(tally.bytes),
                tally.count
            );
        }
    }
    println!(
        "  interactions {} attempted, {} succeeded, {} triggered traffic",
        result.interactions.attempted,
        result.interactions.succeeded,
        result.interactions.triggered_network
    );
    println!(
        "  emissions    {:.3} g CO2e{}",
        result.emissions_grams,
        if result.green_hosting {
            " (green hosting)"
        } else {
            ""
        }
    );
    println!(
        "  took {:.1}s{}",
        result.duration.as_secs_f64(),
        if result.from_cache { " (cached)" } else { "" }
    );
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
