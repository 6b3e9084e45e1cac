//! `picker` - daily equity scanner CLI.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use picker_common::config::{Config, FeedKind};
use picker_common::logging::init_logging_with_exclusions;
use picker_scanner::data::{HttpFeed, MarketDataFeed, StaticFeed, StaticUniverse, UniverseSource};
use picker_scanner::plan::RiskConfig;
use picker_scanner::report::{ReportFormat, ScanReport};
use picker_scanner::scheduler::ScanScheduler;
use picker_scanner::screener::{FilterCriteria, ScanConfig};
use picker_scanner::session::ScanSession;

/// Picker - scan, rank and plan daily equity setups.
#[derive(Parser, Debug)]
#[command(name = "picker")]
#[command(version)]
#[command(about = "Daily equity scanner, ranker and trade-plan engine", long_about = None)]
struct Cli {
    /// Config file (default: ~/.picker/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Feed and universe selection shared by `scan` and `watch`.
#[derive(clap::Args, Debug, Clone, Default)]
struct FeedArgs {
    /// JSON fixture for the static feed
    #[arg(long)]
    fixture: Option<PathBuf>,

    /// Comma-separated symbols to scan instead of the feed's universe
    #[arg(long)]
    symbols: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one scan and print or save the report
    Scan {
        #[command(flatten)]
        feed: FeedArgs,

        /// Report format (markdown, json)
        #[arg(long, default_value = "markdown")]
        format: String,

        /// Write the report here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long)]
        min_price: Option<f64>,
        #[arg(long)]
        max_price: Option<f64>,
        #[arg(long)]
        min_volume: Option<f64>,
        /// Minimum absolute deviation from the previous close (%)
        #[arg(long)]
        min_deviation: Option<f64>,
        #[arg(long)]
        min_relative_volume: Option<f64>,
        #[arg(long)]
        min_atr_ratio: Option<f64>,
        /// Let the pre-market range satisfy --min-deviation while closed
        #[arg(long)]
        include_premarket: bool,

        #[arg(long)]
        account_size: Option<f64>,
        /// Dollar risk per trade
        #[arg(long)]
        max_risk: Option<f64>,
    },

    /// Run scans on the configured cron schedule until interrupted
    Watch {
        #[command(flatten)]
        feed: FeedArgs,

        /// Scan once immediately before waiting for the schedule
        #[arg(long)]
        now: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.apply_env_overrides();
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    match cli.command {
        Commands::Scan {
            feed,
            format,
            output,
            min_price,
            max_price,
            min_volume,
            min_deviation,
            min_relative_volume,
            min_atr_ratio,
            include_premarket,
            account_size,
            max_risk,
        } => {
            let format: ReportFormat = format.parse().map_err(|e: String| anyhow!(e))?;

            let scan_config = ScanConfig::from_config(&config);
            let criteria = FilterCriteria {
                min_price: min_price.or(scan_config.criteria.min_price),
                max_price: max_price.or(scan_config.criteria.max_price),
                min_volume: min_volume.or(scan_config.criteria.min_volume),
                min_deviation_pct: min_deviation.or(scan_config.criteria.min_deviation_pct),
                min_relative_volume: min_relative_volume
                    .or(scan_config.criteria.min_relative_volume),
                min_atr_ratio: min_atr_ratio.or(scan_config.criteria.min_atr_ratio),
                include_premarket: include_premarket || scan_config.criteria.include_premarket,
            };

            let mut risk = RiskConfig::from_config(&config);
            if let Some(size) = account_size {
                risk.account_size = size;
            }
            if let Some(max_risk) = max_risk {
                risk.max_risk_per_trade = max_risk;
            }

            run_scan(&config, scan_config, &feed, &criteria, &risk, format, output).await
        }

        Commands::Watch { feed, now } => run_watch(&config, &feed, now).await,

        Commands::Config => {
            let effective = serde_json::json!({
                "config": config,
                "scan": ScanConfig::from_config(&config),
                "risk": RiskConfig::from_config(&config),
            });
            println!("{}", serde_json::to_string_pretty(&effective)?);
            Ok(())
        }
    }
}

async fn run_scan(
    config: &Config,
    scan_config: ScanConfig,
    args: &FeedArgs,
    criteria: &FilterCriteria,
    risk: &RiskConfig,
    format: ReportFormat,
    output: Option<PathBuf>,
) -> Result<()> {
    let (feed, universe) = build_feed(config, &scan_config, args)?;
    let session = ScanSession::new(feed, scan_config);

    let result = session.run_scan(universe.as_ref(), criteria, risk).await?;
    let report = ScanReport::new(result);

    match output {
        Some(path) => {
            let path = report.save_to_file(&path, format)?;
            info!(path = %path.display(), "Report written");
        }
        None => println!("{}", report.generate(format)),
    }

    Ok(())
}

async fn run_watch(config: &Config, args: &FeedArgs, now: bool) -> Result<()> {
    let scan_config = ScanConfig::from_config(config);
    let criteria = scan_config.criteria.clone();
    let risk = RiskConfig::from_config(config);

    let (feed, universe) = build_feed(config, &scan_config, args)?;
    let session = Arc::new(ScanSession::new(feed, scan_config));

    if !config.schedule.enabled {
        info!("Schedule disabled in config, watching anyway");
    }
    let scheduler = ScanScheduler::new(session, universe, criteria, risk, &config.schedule)?
        .with_output(config.output.clone());

    if now {
        let result = scheduler.trigger_scan().await?;
        println!("{}", result.summary());
    }

    tokio::select! {
        result = scheduler.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping scheduler");
            scheduler.stop().await;
            Ok(())
        }
    }
}

/// Pick the feed from config and flags, and the universe it scans.
fn build_feed(
    config: &Config,
    scan_config: &ScanConfig,
    args: &FeedArgs,
) -> Result<(Arc<dyn MarketDataFeed>, Arc<dyn UniverseSource>)> {
    let explicit_universe = match args.symbols {
        Some(ref list) => Some(StaticUniverse::parse(list)),
        None if !scan_config.symbols.is_empty() => {
            Some(StaticUniverse::new(&scan_config.symbols))
        }
        None => None,
    };

    let kind = if args.fixture.is_some() {
        FeedKind::Static
    } else {
        config.feed.kind
    };

    let (feed, feed_universe): (Arc<dyn MarketDataFeed>, Arc<dyn UniverseSource>) = match kind {
        FeedKind::Static => {
            let path = args
                .fixture
                .clone()
                .or_else(|| {
                    config
                        .feed
                        .fixture_path
                        .as_deref()
                        .map(picker_common::config::expand_path)
                })
                .context("No fixture given; pass --fixture or set feed.fixture_path")?;
            let feed = Arc::new(StaticFeed::load(&path)?);
            let as_feed: Arc<dyn MarketDataFeed> = feed.clone();
            let as_universe: Arc<dyn UniverseSource> = feed;
            (as_feed, as_universe)
        }
        FeedKind::Http => {
            let Some(feed) = HttpFeed::from_config(&config.feed) else {
                bail!("HTTP feed selected but feed.base_url is not set");
            };
            let feed = Arc::new(feed);
            let as_feed: Arc<dyn MarketDataFeed> = feed.clone();
            let as_universe: Arc<dyn UniverseSource> = feed;
            (as_feed, as_universe)
        }
    };

    info!(feed = %feed.name(), "Feed ready");

    let universe = match explicit_universe {
        Some(universe) => Arc::new(universe) as Arc<dyn UniverseSource>,
        None => feed_universe,
    };
    Ok((feed, universe))
}
