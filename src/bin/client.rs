//! Simulated trading client.
//!
//! Connects to the exchange, logs in, and submits a clamped random-walk
//! order flow around a drifting fair price: mostly passive quotes away from
//! the touch, a minority of aggressive orders crossing it, plus periodic
//! cancellations of recent orders. Execution reports are tallied by type
//! and summarised on exit.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::thread;
use std::time::Duration;

use clap::Parser;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use flux_exchange::types::{make_order_id, DEFAULT_PRICE_CEILING, DEFAULT_PRICE_FLOOR};
use flux_exchange::wire;
use flux_exchange::{ExecType, Order, OrderType, Price, Side, TimeInForce};

#[derive(Parser, Debug)]
#[command(name = "client", about = "Random-walk trading client")]
struct Args {
    /// Exchange address
    #[arg(long, default_value = "127.0.0.1:12345")]
    addr: String,

    /// Number of orders to submit
    #[arg(long, default_value_t = 10_000)]
    orders: u64,

    /// Microseconds to sleep between orders
    #[arg(long, default_value_t = 500)]
    rate_us: u64,

    /// Send a cancel after every N orders
    #[arg(long, default_value_t = 20)]
    cancel_every: u64,

    /// Lowest admissible price (must match the server)
    #[arg(long, default_value_t = DEFAULT_PRICE_FLOOR)]
    price_floor: u64,

    /// Highest admissible price (must match the server)
    #[arg(long, default_value_t = DEFAULT_PRICE_CEILING)]
    price_ceiling: u64,

    /// RNG seed; random when omitted
    #[arg(long)]
    seed: Option<u64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!(error = %e, "client failed");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(&args.addr)?;
    stream.set_nodelay(true).ok();

    // Login: the server speaks first.
    let mut login = [0u8; wire::LOGIN_RESPONSE_LEN];
    stream.read_exact(&mut login)?;
    let client_id = match wire::decode_login(&login) {
        Ok(id) => id,
        Err(e) => {
            error!(error = %e, "bad login response");
            return Err(std::io::ErrorKind::InvalidData.into());
        }
    };
    info!(client_id, "logged in");

    let reader = {
        let stream = stream.try_clone()?;
        thread::spawn(move || read_reports(stream))
    };

    let seed = args.seed.unwrap_or_else(rand::random);
    info!(seed, "order flow seed");
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mid = (args.price_floor + args.price_ceiling) / 2;
    let mut fair: Price = mid;
    let mut local_id: u64 = 1;

    for _ in 0..args.orders {
        // Fair price takes a small clamped random-walk step each order.
        let step = rng.gen_range(-5i64..=5);
        fair = fair
            .saturating_add_signed(step)
            .clamp(args.price_floor, args.price_ceiling);

        let side = if rng.gen_bool(0.5) { Side::Bid } else { Side::Ask };
        let spread = rng.gen_range(10..60) as u64;
        // Makers quote away from fair, takers cross it.
        let is_maker = rng.gen_bool(0.6);
        let price = match (is_maker, side) {
            (true, Side::Bid) | (false, Side::Ask) => fair.saturating_sub(spread),
            (true, Side::Ask) | (false, Side::Bid) => fair.saturating_add(spread),
        }
        .clamp(args.price_floor, args.price_ceiling);

        let order = Order {
            order_id: make_order_id(client_id, local_id),
            price,
            quantity: rng.gen_range(1..=500),
            side,
            order_type: OrderType::Limit,
            tif: TimeInForce::Gtc,
        };
        local_id += 1;
        stream.write_all(&wire::encode_order(&order))?;

        if local_id % args.cancel_every == 0 {
            let recent = local_id - rng.gen_range(1..args.cancel_every);
            let cancel_id = make_order_id(client_id, recent);
            stream.write_all(&wire::encode_cancel(cancel_id))?;
        }

        if args.rate_us > 0 {
            thread::sleep(Duration::from_micros(args.rate_us));
        }
    }

    // Give in-flight reports a moment, then close and let the reader finish.
    thread::sleep(Duration::from_millis(200));
    stream.shutdown(Shutdown::Both).ok();
    match reader.join() {
        Ok(tally) => info!(
            new = tally.new,
            trades = tally.trades,
            canceled = tally.canceled,
            rejected = tally.rejected,
            expired = tally.expired,
            "session summary"
        ),
        Err(_) => error!("report reader panicked"),
    }
    Ok(())
}

#[derive(Default)]
struct Tally {
    new: u64,
    trades: u64,
    canceled: u64,
    rejected: u64,
    expired: u64,
}

fn read_reports(mut stream: TcpStream) -> Tally {
    let mut tally = Tally::default();
    let mut tag = [0u8; 1];
    loop {
        if stream.read_exact(&mut tag).is_err() {
            break;
        }
        let Some(len) = wire::frame_len(tag[0]) else {
            error!(tag = tag[0], "server sent an unknown tag");
            break;
        };
        let mut frame = vec![0u8; len];
        frame[0] = tag[0];
        if stream.read_exact(&mut frame[1..]).is_err() {
            break;
        }
        if tag[0] != wire::MessageType::ExecReport as u8 {
            continue;
        }
        match wire::decode_execution_report(&frame) {
            Ok(report) => match report.exec_type {
                ExecType::New => tally.new += 1,
                ExecType::Trade => tally.trades += 1,
                ExecType::Canceled => tally.canceled += 1,
                ExecType::Rejected => tally.rejected += 1,
                ExecType::Expired => tally.expired += 1,
            },
            Err(e) => {
                error!(error = %e, "undecodable execution report");
                break;
            }
        }
    }
    tally
}
