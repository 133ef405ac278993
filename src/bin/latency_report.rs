//! Synchronous engine latency report.
//!
//! Drives the matching core directly (no sockets, no queues) with a mixed
//! place/cancel workload and prints an hdrhistogram percentile breakdown.

use std::time::Instant;

use hdrhistogram::Histogram;

use flux_exchange::types::{DEFAULT_PRICE_CEILING, DEFAULT_PRICE_FLOOR};
use flux_exchange::{ClientRequest, Engine, Order, OrderType, Side, TimeInForce};

fn main() {
    println!("Preparing latency benchmark...");

    let mut engine = Engine::new(DEFAULT_PRICE_FLOOR, DEFAULT_PRICE_CEILING);
    let mut histogram =
        Histogram::<u64>::new_with_bounds(1, 1_000_000, 3).expect("histogram bounds");

    const ITERATIONS: u64 = 1_000_000;
    const WARMUP: u64 = 10_000;

    let request = |order_id: u64| {
        let side = if order_id % 2 == 0 { Side::Bid } else { Side::Ask };
        ClientRequest::new_order(
            (order_id % 8) as u32 + 1,
            0,
            Order {
                order_id,
                price: 9_950 + (order_id % 100),
                quantity: 10,
                side,
                order_type: OrderType::Limit,
                tif: TimeInForce::Gtc,
            },
        )
    };

    println!("Warming up ({WARMUP} ops)...");
    for i in 0..WARMUP {
        let mut req = request(i);
        std::hint::black_box(engine.process(&mut req));
    }

    println!("Running {ITERATIONS} iterations...");
    let mut total = std::time::Duration::ZERO;
    for i in 0..ITERATIONS {
        let mut req = request(WARMUP + i);

        let start = Instant::now();
        std::hint::black_box(engine.process(&mut req));
        let elapsed = start.elapsed();

        histogram.record(elapsed.as_nanos() as u64).unwrap_or(());
        total += elapsed;
    }

    println!("\n=== Latency Report (ns) ===");
    println!("Total Ops:  {ITERATIONS}");
    println!(
        "Throughput: {:.2} ops/sec",
        ITERATIONS as f64 / total.as_secs_f64()
    );
    println!("---------------------------");
    println!("Min:    {:6} ns", histogram.min());
    println!("P50:    {:6} ns", histogram.value_at_quantile(0.50));
    println!("P90:    {:6} ns", histogram.value_at_quantile(0.90));
    println!("P99:    {:6} ns", histogram.value_at_quantile(0.99));
    println!("P99.9:  {:6} ns", histogram.value_at_quantile(0.999));
    println!("P99.99: {:6} ns", histogram.value_at_quantile(0.9999));
    println!("Max:    {:6} ns", histogram.max());
    println!("---------------------------");
    println!("Resting orders at exit: {}", engine.book().order_count());
}
