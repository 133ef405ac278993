//! Stress Tests - Push the engine to its limits.
//!
//! Correctness under extreme conditions: deep books, heavy churn at a
//! single level, arena slot recycling, boundary prices, and IOC storms.

use flux_exchange::{
    ClientRequest, Engine, EngineEvent, ExecType, Order, OrderId, OrderType, Price, Quantity,
    Side, TimeInForce,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

fn engine() -> Engine {
    Engine::new(9_500, 10_500)
}

fn place(
    engine: &mut Engine,
    client: u32,
    order_id: OrderId,
    side: Side,
    price: Price,
    qty: Quantity,
    tif: TimeInForce,
) -> Vec<EngineEvent> {
    let mut req = ClientRequest::new_order(
        client,
        0,
        Order {
            order_id,
            price,
            quantity: qty,
            side,
            order_type: OrderType::Limit,
            tif,
        },
    );
    engine.process(&mut req)
}

fn cancel(engine: &mut Engine, client: u32, order_id: OrderId) -> Vec<EngineEvent> {
    let mut req = ClientRequest::cancel(client, 0, order_id);
    engine.process(&mut req)
}

fn count_exec(events: &[EngineEvent], exec_type: ExecType) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, EngineEvent::Report(r) if r.exec_type == exec_type))
        .count()
}

// ============================================================================
// Capacity / churn
// ============================================================================

#[test]
fn test_large_book_then_full_sweep() {
    let mut engine = engine();

    // 1000 asks spread over 100 levels.
    for i in 0..1_000u64 {
        place(
            &mut engine,
            1,
            i,
            Side::Ask,
            10_000 + (i % 100),
            10,
            TimeInForce::Gtc,
        );
    }
    assert_eq!(engine.book().order_count(), 1_000);

    // One enormous bid sweeps everything (10 500 against 10 000 resting).
    let events = place(
        &mut engine,
        2,
        100_000,
        Side::Bid,
        10_500,
        10_500,
        TimeInForce::Gtc,
    );
    let trades = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::TradePrint(_)))
        .count();
    assert_eq!(trades, 1_000);

    // All asks gone; only the residual bid remains.
    assert_eq!(engine.book().order_count(), 1);
    assert_eq!(engine.book().best_ask(), None);
    assert_eq!(engine.book().best_bid(), Some(10_500));
    assert_eq!(engine.book().depth_at(Side::Bid, 10_500), (500, 1));
    engine.book().check_consistency().expect("book consistent");
}

#[test]
fn test_slot_reuse_after_cancel_storm() {
    let mut engine = engine();

    // Fill, cancel everything, refill with new ids: recycled slots must not
    // leak any stale identity.
    for round in 0..10u64 {
        let base = round * 1_000;
        for i in 0..500u64 {
            place(
                &mut engine,
                1,
                base + i,
                Side::Bid,
                9_900 + (i % 50),
                10,
                TimeInForce::Gtc,
            );
        }
        assert_eq!(engine.book().order_count(), 500);
        for i in 0..500u64 {
            let events = cancel(&mut engine, 1, base + i);
            assert_eq!(count_exec(&events, ExecType::Canceled), 1);
        }
        assert!(engine.book().is_empty());
        // Cancelling the same ids again must miss: no stale references.
        for i in (0..500u64).step_by(97) {
            let events = cancel(&mut engine, 1, base + i);
            assert_eq!(count_exec(&events, ExecType::Rejected), 1);
        }
    }
    engine.book().check_consistency().expect("book consistent");
}

// ============================================================================
// Single-level contention
// ============================================================================

#[test]
fn test_single_price_level_contention() {
    let mut engine = engine();
    const ORDERS: u64 = 2_000;

    for i in 0..ORDERS {
        place(&mut engine, 1, i, Side::Ask, 10_000, 1, TimeInForce::Gtc);
    }
    assert_eq!(engine.book().depth_at(Side::Ask, 10_000), (ORDERS, ORDERS as u32));

    // Cancel every third order, then match the rest in one bid.
    let mut cancelled = 0u64;
    for i in (0..ORDERS).step_by(3) {
        cancel(&mut engine, 1, i);
        cancelled += 1;
    }
    let remaining = ORDERS - cancelled;

    let events = place(
        &mut engine,
        2,
        ORDERS + 1,
        Side::Bid,
        10_000,
        remaining as u32,
        TimeInForce::Gtc,
    );
    let trades: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::TradePrint(t) => Some(t),
            _ => None,
        })
        .collect();
    assert_eq!(trades.len(), remaining as usize);

    // FIFO held across the cancellation holes.
    let makers: Vec<u64> = trades.iter().map(|t| t.maker_order_id).collect();
    let mut sorted = makers.clone();
    sorted.sort_unstable();
    assert_eq!(makers, sorted, "makers must fill in arrival order");

    assert!(engine.book().is_empty());
    engine.book().check_consistency().expect("book consistent");
}

// ============================================================================
// Boundary prices and quantities
// ============================================================================

#[test]
fn test_boundary_prices_trade() {
    let mut engine = engine();

    place(&mut engine, 1, 1, Side::Ask, 9_500, 10, TimeInForce::Gtc);
    place(&mut engine, 1, 2, Side::Bid, 10_500, 10, TimeInForce::Gtc);
    assert_eq!(engine.book().order_count(), 0, "floor ask and ceiling bid crossed");

    place(&mut engine, 1, 3, Side::Bid, 9_500, 10, TimeInForce::Gtc);
    place(&mut engine, 1, 4, Side::Ask, 10_500, 10, TimeInForce::Gtc);
    assert_eq!(engine.book().best_bid(), Some(9_500));
    assert_eq!(engine.book().best_ask(), Some(10_500));
    engine.book().check_consistency().expect("book consistent");
}

#[test]
fn test_max_quantity_orders() {
    let mut engine = engine();

    place(&mut engine, 1, 1, Side::Ask, 10_000, u32::MAX, TimeInForce::Gtc);
    let events = place(&mut engine, 2, 2, Side::Bid, 10_000, u32::MAX, TimeInForce::Gtc);

    let trades: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::TradePrint(t) => Some(t),
            _ => None,
        })
        .collect();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].quantity, u32::MAX);
    assert!(engine.book().is_empty());
}

// ============================================================================
// IOC storms
// ============================================================================

#[test]
fn test_ioc_storm_leaves_no_residue() {
    let mut engine = engine();

    place(&mut engine, 1, 1, Side::Ask, 10_000, 100, TimeInForce::Gtc);

    // 100 IOC bids for more than is available: each takes what it can;
    // none may ever rest.
    let mut total_filled = 0u64;
    for i in 0..100u64 {
        let events = place(&mut engine, 2, 10 + i, Side::Bid, 10_000, 7, TimeInForce::Ioc);
        total_filled += events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::TradePrint(t) => Some(t.quantity as u64),
                _ => None,
            })
            .sum::<u64>();
        assert_eq!(engine.book().depth_at(Side::Bid, 10_000).1, 0);
    }
    assert_eq!(total_filled, 100, "exactly the resting liquidity traded");
    assert!(engine.book().is_empty());

    // Once the book is empty, IOC orders expire in full.
    let events = place(&mut engine, 2, 500, Side::Bid, 10_000, 7, TimeInForce::Ioc);
    assert_eq!(count_exec(&events, ExecType::Expired), 1);
    engine.book().check_consistency().expect("book consistent");
}

// ============================================================================
// Randomized churn
// ============================================================================

#[test]
fn test_random_churn_keeps_invariants() {
    const SEED: u64 = 0x5EED;
    const OPS: usize = 20_000;

    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let mut engine = engine();
    let mut active: Vec<u64> = Vec::new();
    let mut next_id = 1u64;

    for i in 0..OPS {
        if active.is_empty() || rng.gen_bool(0.65) {
            let id = next_id;
            next_id += 1;
            let side = if rng.gen_bool(0.5) { Side::Bid } else { Side::Ask };
            let tif = if rng.gen_bool(0.85) {
                TimeInForce::Gtc
            } else {
                TimeInForce::Ioc
            };
            place(
                &mut engine,
                rng.gen_range(1..6),
                id,
                side,
                rng.gen_range(9_500..=10_500),
                rng.gen_range(1..1_000),
                tif,
            );
            active.push(id);
        } else {
            let idx = rng.gen_range(0..active.len());
            let id = active.swap_remove(idx);
            cancel(&mut engine, rng.gen_range(1..6), id);
        }

        if i % 1_000 == 0 {
            engine.book().check_consistency().expect("book consistent");
        }
    }
    engine.book().check_consistency().expect("book consistent");
}
