//! Fuzz Test - Compares the engine against a reference implementation.
//!
//! A naive but correct BTreeMap book (with the same self-trade skip rule)
//! verifies the optimized engine's best prices, order counts, and traded
//! volume over randomized workloads. Book invariants are re-checked along
//! the way.

use flux_exchange::{
    ClientId, ClientRequest, Engine, EngineEvent, Order, OrderType, Quantity, Side, TimeInForce,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};

/// Simple reference book: price -> FIFO of (order_id, client_id, qty)
struct ReferenceBook {
    bids: BTreeMap<u64, Vec<(u64, ClientId, Quantity)>>,
    asks: BTreeMap<u64, Vec<(u64, ClientId, Quantity)>>,
    orders: HashMap<u64, (Side, u64)>,
}

impl ReferenceBook {
    fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            orders: HashMap::new(),
        }
    }

    fn best_bid(&self) -> Option<u64> {
        self.bids.keys().next_back().copied()
    }

    fn best_ask(&self) -> Option<u64> {
        self.asks.keys().next().copied()
    }

    fn place(
        &mut self,
        order_id: u64,
        client: ClientId,
        side: Side,
        price: u64,
        mut qty: Quantity,
    ) -> u64 {
        let mut traded = 0u64;

        let crossing: Vec<u64> = match side {
            Side::Bid => self.asks.range(..=price).map(|(p, _)| *p).collect(),
            Side::Ask => self.bids.range(price..).rev().map(|(p, _)| *p).collect(),
        };

        for level_price in crossing {
            if qty == 0 {
                break;
            }
            let book = match side {
                Side::Bid => &mut self.asks,
                Side::Ask => &mut self.bids,
            };
            let level = book.get_mut(&level_price).unwrap();
            let mut i = 0;
            while i < level.len() && qty > 0 {
                // Same client: skip, keep matching behind it.
                if level[i].1 == client {
                    i += 1;
                    continue;
                }
                let trade_qty = level[i].2.min(qty);
                level[i].2 -= trade_qty;
                qty -= trade_qty;
                traded += trade_qty as u64;
                if level[i].2 == 0 {
                    let (maker_id, _, _) = level.remove(i);
                    self.orders.remove(&maker_id);
                } else {
                    // Maker partially filled means the taker is done.
                    debug_assert_eq!(qty, 0);
                }
            }
            if level.is_empty() {
                book.remove(&level_price);
            }
        }

        if qty > 0 {
            let book = match side {
                Side::Bid => &mut self.bids,
                Side::Ask => &mut self.asks,
            };
            book.entry(price).or_default().push((order_id, client, qty));
            self.orders.insert(order_id, (side, price));
        }

        traded
    }

    fn cancel(&mut self, order_id: u64) -> bool {
        let Some((side, price)) = self.orders.remove(&order_id) else {
            return false;
        };
        let book = match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        if let Some(level) = book.get_mut(&price) {
            level.retain(|(id, _, _)| *id != order_id);
            if level.is_empty() {
                book.remove(&price);
            }
        }
        true
    }

    fn order_count(&self) -> usize {
        self.orders.len()
    }
}

fn random_order(rng: &mut ChaCha8Rng, order_id: u64) -> (ClientId, Order) {
    let client = rng.gen_range(1..5);
    (
        client,
        Order {
            order_id,
            price: rng.gen_range(9_800..=10_200),
            quantity: rng.gen_range(1..200),
            side: if rng.gen_bool(0.5) { Side::Bid } else { Side::Ask },
            order_type: OrderType::Limit,
            tif: TimeInForce::Gtc,
        },
    )
}

fn traded_volume(events: &[EngineEvent]) -> u64 {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::TradePrint(t) => Some(t.quantity as u64),
            _ => None,
        })
        .sum()
}

#[test]
fn test_fuzz_best_prices_and_counts() {
    const SEED: u64 = 0xFEEDFACE;
    const OPS: usize = 10_000;

    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let mut engine = Engine::new(9_500, 10_500);
    let mut reference = ReferenceBook::new();

    let mut next_order_id = 1u64;
    let mut active_orders: Vec<u64> = Vec::new();

    for i in 0..OPS {
        // 70% place, 30% cancel
        if active_orders.is_empty() || rng.gen_bool(0.7) {
            let (client, order) = random_order(&mut rng, next_order_id);
            next_order_id += 1;

            let mut req = ClientRequest::new_order(client, 0, order);
            engine.process(&mut req);
            reference.place(order.order_id, client, order.side, order.price, order.quantity);
            active_orders.push(order.order_id);
        } else {
            let idx = rng.gen_range(0..active_orders.len());
            let order_id = active_orders.swap_remove(idx);

            let mut req = ClientRequest::cancel(1, 0, order_id);
            engine.process(&mut req);
            reference.cancel(order_id);
        }

        assert_eq!(
            engine.book().best_bid(),
            reference.best_bid(),
            "best bid mismatch at op {i}"
        );
        assert_eq!(
            engine.book().best_ask(),
            reference.best_ask(),
            "best ask mismatch at op {i}"
        );

        if i % 500 == 0 {
            assert_eq!(
                engine.book().order_count(),
                reference.order_count(),
                "order count mismatch at op {i}"
            );
            engine.book().check_consistency().expect("book consistent");
        }
    }

    assert_eq!(engine.book().order_count(), reference.order_count());
    engine.book().check_consistency().expect("book consistent");
}

#[test]
fn test_fuzz_trade_volume() {
    const SEED: u64 = 0x12345678;
    const OPS: u64 = 5_000;

    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let mut engine = Engine::new(9_500, 10_500);
    let mut reference = ReferenceBook::new();

    let mut engine_traded = 0u64;
    let mut reference_traded = 0u64;

    for i in 1..=OPS {
        let (client, order) = random_order(&mut rng, i);

        let mut req = ClientRequest::new_order(client, 0, order);
        let events = engine.process(&mut req);
        engine_traded += traded_volume(&events);
        reference_traded +=
            reference.place(order.order_id, client, order.side, order.price, order.quantity);
    }

    assert_eq!(
        engine_traded, reference_traded,
        "total traded volume mismatch"
    );
    assert_eq!(engine.book().order_count(), reference.order_count());
    engine.book().check_consistency().expect("book consistent");
}

#[test]
fn test_fuzz_heavy_self_trading() {
    // A single client on both sides: nothing may ever trade, and every
    // resting order must survive untouched.
    const SEED: u64 = 0xBADC0DE;
    const OPS: u64 = 2_000;

    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let mut engine = Engine::new(9_500, 10_500);
    let mut resting = 0usize;

    for i in 1..=OPS {
        let (_, order) = random_order(&mut rng, i);
        let mut req = ClientRequest::new_order(9, 0, order);
        let events = engine.process(&mut req);
        assert_eq!(traded_volume(&events), 0, "self-trades must never print");
        resting += 1;
        assert_eq!(engine.book().order_count(), resting);
    }
    engine.book().check_consistency().expect("book consistent");
}
