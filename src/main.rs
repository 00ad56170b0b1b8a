use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use rust_decimal::Decimal;
use tokio::io::{AsyncBufReadExt, BufReader};

use depthsync_rs::config::Settings;
use depthsync_rs::market_data::adapters::binance::BinanceDepthAdapter;
use depthsync_rs::session::{SessionManager, SessionUpdate};
use depthsync_rs::telemetry;

#[derive(Debug, Parser)]
#[command(name = "depthsync", about = "Live order book and mid price for one instrument")]
struct Args {
    /// Instrument to open on start, e.g. BTC
    #[arg(short, long)]
    symbol: Option<String>,

    /// Settings file (defaults to ./depthsync.toml when present)
    #[arg(short, long)]
    config: Option<String>,

    /// Overrides log.filter from settings
    #[arg(long)]
    log_filter: Option<String>,

    /// Prometheus exporter port (metrics-exporter feature)
    #[arg(long, default_value_t = 9000)]
    metrics_port: u16,
}

// Helper function to print one side of the book with running totals
fn print_side(label: &str, update: &SessionUpdate, asks: bool) {
    let side = if asks { update.asks() } else { update.bids() };
    println!("{:<6} {:>16} {:>16} {:>16}", label, "price", "size", "total");
    let mut rows = side.cumulative();
    if asks {
        // asks are shown worst-first so the spread sits in the middle
        rows.reverse();
    }
    for (level, total) in rows {
        println!("{:<6} {:>16} {:>16} {:>16}", "", level.price, level.quantity, total);
    }
}

// Helper function to print the book state summary
fn print_book(update: &SessionUpdate, reference_price: Option<Decimal>) {
    println!("\n=== {} [{}] gen {} ===", update.symbol, update.state, update.generation);
    if let Some(err) = &update.error {
        println!("Error: {}", err);
    }
    print_side("ASKS", update, true);
    match update.display_price(reference_price) {
        Some(price) if update.mid_price.is_some() => println!("------ mid {}", price),
        Some(price) => println!("------ ref {} (book one-sided)", price),
        None => println!("------ -.--"),
    }
    print_side("BIDS", update, false);
    if let Some(spread) = update.book.spread() {
        println!("Spread: {}", spread);
    }
    println!("========================\n");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env
    let args = Args::parse();

    let settings = Settings::load(args.config.as_deref())?;
    let filter = args.log_filter.as_deref().unwrap_or(&settings.log.filter);
    telemetry::init_tracing(filter);
    telemetry::init_metrics(args.metrics_port)?;

    let transport = Arc::new(BinanceDepthAdapter::new(&settings.feed));
    let manager = SessionManager::from_settings(transport, &settings);
    let mut reference_price: Option<Decimal> = None;

    if let Some(symbol) = args.symbol.as_deref() {
        let handle = manager.open(symbol);
        println!("Opened {} (gen {})", handle.symbol(), handle.generation());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\ndepthsync> ");
        io::stdout().flush()?;

        let Some(input) = lines.next_line().await? else {
            break;
        };
        let mut parts = input.split_whitespace();
        let command = parts.next().unwrap_or("").to_lowercase();

        match command.as_str() {
            "help" | "h" => {
                println!("Available commands:");
                println!("  select <symbol>   - Stream the book for an instrument (e.g. BTC)");
                println!("  clear             - Deselect the instrument and close the feed");
                println!("  retry             - Re-open the current instrument after an error");
                println!("  book              - Show the current book and mid price");
                println!("  price <value>     - Reference price shown while the book is one-sided");
                println!("  state             - Show the session state");
                println!("  quit, q           - Exit");
            }
            "select" | "s" => match parts.next() {
                Some(symbol) => {
                    let handle = manager.select(Some(symbol));
                    println!("Opened {} (gen {})", handle.symbol(), handle.generation());
                }
                None => println!("Usage: select <symbol>"),
            },
            "clear" => {
                manager.select(None);
                println!("No instrument selected");
            }
            "retry" => match manager.retry() {
                Some(handle) => println!("Re-opened {} (gen {})", handle.symbol(), handle.generation()),
                None => println!("Nothing to retry"),
            },
            "book" | "b" => match manager.current() {
                Some(handle) => print_book(&handle.latest(), reference_price),
                None => println!("Select an instrument to see the order book."),
            },
            "price" => match parts.next().map(Decimal::from_str) {
                Some(Ok(price)) => {
                    reference_price = Some(price);
                    println!("Reference price set to {}", price);
                }
                Some(Err(_)) => println!("Invalid price"),
                None => {
                    reference_price = None;
                    println!("Reference price cleared");
                }
            },
            "state" => match manager.current() {
                Some(handle) => println!("{} gen {}: {}", handle.symbol(), handle.generation(), handle.state()),
                None => println!("IDLE"),
            },
            "quit" | "q" | "exit" => {
                println!("Goodbye!");
                break;
            }
            "" => continue,
            _ => {
                println!("Unknown command. Type 'help' for available commands.");
            }
        }
    }

    manager.close_current();
    Ok(())
}
