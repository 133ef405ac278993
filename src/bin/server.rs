//! Exchange server entry point.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use flux_exchange::{Exchange, ExchangeConfig};

#[derive(Parser, Debug)]
#[command(name = "server", about = "Single-symbol limit order book exchange")]
struct Args {
    /// Address to listen on (port 0 picks a free port)
    #[arg(long, default_value = "127.0.0.1:12345")]
    addr: String,

    /// Lowest admissible price
    #[arg(long, default_value_t = flux_exchange::types::DEFAULT_PRICE_FLOOR)]
    price_floor: u64,

    /// Highest admissible price
    #[arg(long, default_value_t = flux_exchange::types::DEFAULT_PRICE_CEILING)]
    price_ceiling: u64,

    /// Directory for the event, trade, and per-client report logs
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Stop after this many seconds; runs until killed when omitted
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Pin the matching thread to the last CPU core
    #[arg(long)]
    pin: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let addr = match args.addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(addr = %args.addr, error = %e, "invalid listen address");
            std::process::exit(1);
        }
    };

    let config = ExchangeConfig {
        addr,
        price_floor: args.price_floor,
        price_ceiling: args.price_ceiling,
        log_dir: args.log_dir,
        pin_engine: args.pin,
    };

    let exchange = match Exchange::init(config) {
        Ok(exchange) => exchange,
        Err(e) => {
            error!(error = %e, "exchange failed to start");
            std::process::exit(1);
        }
    };

    exchange.open();

    match args.duration_secs {
        Some(secs) => {
            info!(secs, "running for a fixed duration");
            thread::sleep(Duration::from_secs(secs));
        }
        None => loop {
            thread::sleep(Duration::from_secs(1));
        },
    }

    exchange.shutdown();
}
