use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use crossbot::api::AlpacaClient;
use crossbot::config::{load_settings, Settings};
use crossbot::execution::{DryRunSink, ExecutionLoop, MarketDataProvider, OrderSink};
use crossbot::indicators::sma_series;
use crossbot::models::MarketSnapshot;
use crossbot::server;
use crossbot::strategy::crossover::CrossoverStrategy;
use crossbot::Strategy;
use std::io::Read;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "crossbot", about = "Moving average crossover trading bot")]
struct Cli {
    /// Settings file (defaults to ./crossbot.toml if present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll prices and place orders on signal transitions
    Run {
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        quantity: Option<u32>,
        /// Stop after this many cycles instead of running until Ctrl+C
        #[arg(long)]
        cycles: Option<u64>,
        /// Log orders instead of sending them
        #[arg(long)]
        dry_run: bool,
    },
    /// Fetch prices once and print the current signal
    Status {
        #[arg(long)]
        symbol: Option<String>,
        /// Trailing rows of price and averages to print
        #[arg(long, default_value_t = 10)]
        rows: usize,
    },
    /// Classify closing prices given as arguments or on stdin (oldest first)
    Signal { prices: Vec<f64> },
    /// Serve `POST /trade/{symbol}` classifying posted closing prices
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let mut settings =
        load_settings(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            symbol,
            quantity,
            cycles,
            dry_run,
        } => {
            if let Some(symbol) = symbol {
                settings.trading.symbol = symbol;
            }
            if let Some(quantity) = quantity {
                settings.trading.quantity = quantity;
            }
            settings.validate(true).context("Invalid configuration")?;
            run(settings, cycles, dry_run).await
        }
        Command::Status { symbol, rows } => {
            if let Some(symbol) = symbol {
                settings.trading.symbol = symbol;
            }
            settings.validate(true).context("Invalid configuration")?;
            status(settings, rows).await
        }
        Command::Signal { prices } => {
            settings.validate(false).context("Invalid configuration")?;
            classify_prices(&settings, prices)
        }
        Command::Serve { host, port } => {
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            settings.validate(false).context("Invalid configuration")?;
            let strategy = CrossoverStrategy::new(settings.crossover_config());
            server::run(&settings.server, strategy)
                .await
                .context("Signal server failed")
        }
    }
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("crossbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(settings: Settings, cycles: Option<u64>, dry_run: bool) -> anyhow::Result<()> {
    tracing::info!("🚀 Crossbot starting");

    let client = Arc::new(AlpacaClient::new(settings.alpaca.clone())?);
    let sink: Arc<dyn OrderSink> = if dry_run {
        Arc::new(DryRunSink)
    } else {
        client.clone()
    };

    let crossover = settings.crossover_config();
    let mut execution = ExecutionLoop::new(
        settings.execution_config(),
        Box::new(CrossoverStrategy::new(crossover)),
        client,
        sink,
    );

    let config = execution.config();
    tracing::info!("📊 Configuration:");
    tracing::info!("  Symbol: {}", config.symbol);
    tracing::info!("  Quantity: {}", config.quantity);
    tracing::info!(
        "  Windows: {}/{} days",
        crossover.short_window,
        crossover.long_window
    );
    tracing::info!("  Poll interval: {:?}", config.poll_interval);
    tracing::info!("  Order state policy: {:?}", config.order_state_policy);
    tracing::info!("  Trading endpoint: {}", settings.alpaca.trading_url);
    if dry_run {
        tracing::info!("  🧪 Dry run: orders are logged, not sent");
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("⚠️  Received Ctrl+C, shutting down...");
        }
        summary = execution.run(cycles) => {
            tracing::info!(
                "Completed {} cycles ({} orders submitted)",
                summary.cycles,
                summary.orders_submitted
            );
        }
    }

    tracing::info!("👋 Crossbot stopped");
    Ok(())
}

async fn status(settings: Settings, rows: usize) -> anyhow::Result<()> {
    let client = AlpacaClient::new(settings.alpaca.clone())?;
    let config = settings.execution_config();
    let strategy = CrossoverStrategy::new(settings.crossover_config());

    let bars = config
        .history_bars
        .max(strategy.min_prices_required() + rows);
    let history = client
        .fetch_history(&config.symbol, bars)
        .await
        .with_context(|| format!("Failed to fetch prices for {}", config.symbol))?;

    let closes = history.closes();
    let signal = strategy.classify(&closes);

    println!("{} Trading Signal: {}", config.symbol, signal);
    if let Some(snapshot) = strategy.snapshot(&closes) {
        print_levels(&snapshot);
    }

    let short_series = sma_series(&closes, strategy.config().short_window);
    let long_series = sma_series(&closes, strategy.config().long_window);
    let start = history.len().saturating_sub(rows);

    println!();
    println!(
        "{:<12} {:>10} {:>10} {:>10}",
        "Date",
        "Close",
        format!("{}d MA", strategy.config().short_window),
        format!("{}d MA", strategy.config().long_window)
    );
    for i in start..history.len() {
        println!(
            "{:<12} {:>10.2} {:>10} {:>10}",
            history.bars[i].timestamp.format("%Y-%m-%d"),
            history.bars[i].close,
            format_level(short_series[i]),
            format_level(long_series[i])
        );
    }

    Ok(())
}

fn classify_prices(settings: &Settings, mut prices: Vec<f64>) -> anyhow::Result<()> {
    if prices.is_empty() {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("Failed to read prices from stdin")?;
        prices = parse_prices(&input)?;
    }

    if let Some(bad) = prices.iter().find(|p| !p.is_finite() || **p <= 0.0) {
        bail!("Prices must be positive, got {}", bad);
    }

    let strategy = CrossoverStrategy::new(settings.crossover_config());
    let signal = strategy.classify(&prices);

    println!("{} Signal: {}", settings.trading.symbol.to_uppercase(), signal);
    if let Some(snapshot) = strategy.snapshot(&prices) {
        print_levels(&snapshot);
    }

    Ok(())
}

fn parse_prices(input: &str) -> anyhow::Result<Vec<f64>> {
    input
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<f64>()
                .with_context(|| format!("Invalid price: {}", token))
        })
        .collect()
}

/// Print price and averages least to greatest
fn print_levels(snapshot: &MarketSnapshot) {
    let levels = snapshot.levels();
    println!("Levels (least → greatest):");
    for (kind, value) in levels {
        println!("  {:<3} {:.2}", kind.to_string(), value);
    }
}

fn format_level(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prices_mixed_separators() {
        let prices = parse_prices("150.0, 151.5\n152\t153.25\n").unwrap();
        assert_eq!(prices, vec![150.0, 151.5, 152.0, 153.25]);
    }

    #[test]
    fn test_parse_prices_rejects_garbage() {
        let err = parse_prices("150.0 abc").unwrap_err();
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_format_level() {
        assert_eq!(format_level(None), "-");
        assert_eq!(format_level(Some(150.456)), "150.46");
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from(["crossbot", "run", "--cycles", "3", "--dry-run"]).unwrap();
        match cli.command {
            Command::Run {
                cycles, dry_run, ..
            } => {
                assert_eq!(cycles, Some(3));
                assert!(dry_run);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_cli_parses_serve_flags() {
        let cli = Cli::try_parse_from(["crossbot", "serve", "--port", "9000"]).unwrap();
        match cli.command {
            Command::Serve { host, port } => {
                assert_eq!(host, None);
                assert_eq!(port, Some(9000));
            }
            _ => panic!("expected serve command"),
        }
    }
}
