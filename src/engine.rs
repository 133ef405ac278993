//! Matching engine - the single-threaded authority over the book.
//!
//! `process` is the synchronous core (used directly by tests and benches);
//! `run` wraps it in the event loop that drains the ingress queue, stamps
//! authoritative timestamps, and fans results out to the report queue, the
//! trade tape, and the processed-events feed.

use std::time::Instant;

use tracing::{info, warn};

use crate::exchange::Signals;
use crate::order_book::{MatchEvent, OrderBook};
use crate::queue::{EventQueue, SpscRing};
use crate::types::{
    ClientId, ClientRequest, ExecType, ExecutionReport, Order, OrderId, OrderType, Price,
    RejectReason, Request, Side, TimeInForce, TimeStamp, Trade,
};

/// Steady-clock nanoseconds since engine construction. All book timestamps
/// come from this clock, assigned on the matching thread, so they are
/// strictly monotonic regardless of producer skew.
pub struct SteadyClock {
    origin: Instant,
}

impl SteadyClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    #[inline]
    pub fn now(&self) -> TimeStamp {
        self.origin.elapsed().as_nanos() as TimeStamp
    }
}

impl Default for SteadyClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything one request can produce, in emission order.
#[derive(Clone, Copy, Debug)]
pub enum EngineEvent {
    Report(ExecutionReport),
    TradePrint(Trade),
}

/// The matching engine. Sole mutator of the order book; everything it emits
/// is a value copied out to the queues, so no other thread ever touches book
/// state.
pub struct Engine {
    book: OrderBook,
    clock: SteadyClock,
    match_buf: Vec<MatchEvent>,
    processed: u64,
    dropped_trades: u64,
    dropped_events: u64,
}

impl Engine {
    pub fn new(price_floor: Price, price_ceiling: Price) -> Self {
        Self {
            book: OrderBook::new(price_floor, price_ceiling),
            clock: SteadyClock::new(),
            match_buf: Vec::with_capacity(128),
            processed: 0,
            dropped_trades: 0,
            dropped_events: 0,
        }
    }

    #[inline]
    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    #[inline]
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Process one request. The request's timestamp is overwritten with the
    /// engine clock before anything else happens.
    pub fn process(&mut self, req: &mut ClientRequest) -> Vec<EngineEvent> {
        let now = self.clock.now();
        req.time_stamp = now;
        self.processed += 1;

        let mut out = Vec::new();
        match req.request {
            Request::New(order) => self.handle_new(req.client_id, order, now, &mut out),
            Request::Cancel(order_id) => self.handle_cancel(req.client_id, order_id, &mut out),
        }
        out
    }

    fn handle_new(
        &mut self,
        client_id: ClientId,
        mut order: Order,
        now: TimeStamp,
        out: &mut Vec<EngineEvent>,
    ) {
        if order.quantity == 0 {
            out.push(EngineEvent::Report(reject(
                client_id,
                &order,
                RejectReason::QuantityInvalid,
            )));
            return;
        }
        // Market orders carry no meaningful price; limit prices must be
        // admissible before any matching happens.
        if order.order_type == OrderType::Limit && !self.book.in_range(order.price) {
            out.push(EngineEvent::Report(reject(
                client_id,
                &order,
                RejectReason::PriceInvalid,
            )));
            return;
        }
        if self.book.contains_order(order.order_id) {
            out.push(EngineEvent::Report(reject(client_id, &order, RejectReason::None)));
            return;
        }

        out.push(EngineEvent::Report(ExecutionReport {
            client_id,
            order_id: order.order_id,
            price: order.price,
            last_quantity: 0,
            remaining_quantity: order.quantity,
            exec_type: ExecType::New,
            reason: RejectReason::None,
            side: order.side,
        }));

        match (order.tif, order.order_type) {
            (TimeInForce::Gtc, OrderType::Limit) => {
                self.match_and_report(client_id, &mut order, now, out);
                if order.quantity > 0 && self.book.add(client_id, now, &order).is_err() {
                    out.push(EngineEvent::Report(reject(
                        client_id,
                        &order,
                        RejectReason::PriceInvalid,
                    )));
                }
            }
            (TimeInForce::Gtc, OrderType::Market) => {
                // Market orders are inherently immediate; GTC makes no sense.
                out.push(EngineEvent::Report(reject(
                    client_id,
                    &order,
                    RejectReason::InvalidOrderType,
                )));
            }
            (TimeInForce::Ioc, OrderType::Limit) => {
                self.match_and_report(client_id, &mut order, now, out);
                if order.quantity > 0 {
                    out.push(EngineEvent::Report(expired(client_id, &order)));
                }
            }
            (TimeInForce::Ioc, OrderType::Market) => {
                // Normalize to a sweep-guaranteeing limit price so the same
                // matching routine handles it.
                order.price = match order.side {
                    Side::Bid => self.book.price_ceiling(),
                    Side::Ask => self.book.price_floor(),
                };
                self.match_and_report(client_id, &mut order, now, out);
                if order.quantity > 0 {
                    out.push(EngineEvent::Report(expired(client_id, &order)));
                }
            }
        }
    }

    fn match_and_report(
        &mut self,
        client_id: ClientId,
        order: &mut Order,
        now: TimeStamp,
        out: &mut Vec<EngineEvent>,
    ) {
        self.match_buf.clear();
        let mut match_buf = std::mem::take(&mut self.match_buf);
        self.book
            .match_incoming(client_id, order, now, &mut match_buf);

        for event in &match_buf {
            match *event {
                MatchEvent::Fill(fill) => {
                    out.push(EngineEvent::TradePrint(fill.trade));
                    // Taker first, then maker, as each fill happens.
                    out.push(EngineEvent::Report(ExecutionReport {
                        client_id,
                        order_id: fill.trade.taker_order_id,
                        price: fill.trade.price,
                        last_quantity: fill.trade.quantity,
                        remaining_quantity: fill.taker_remaining,
                        exec_type: ExecType::Trade,
                        reason: RejectReason::None,
                        side: fill.trade.aggressor_side,
                    }));
                    out.push(EngineEvent::Report(ExecutionReport {
                        client_id: fill.maker_client,
                        order_id: fill.trade.maker_order_id,
                        price: fill.trade.price,
                        last_quantity: fill.trade.quantity,
                        remaining_quantity: fill.maker_remaining,
                        exec_type: ExecType::Trade,
                        reason: RejectReason::None,
                        side: fill.trade.aggressor_side.opposite(),
                    }));
                }
                MatchEvent::SelfTradeSkip { remaining } => {
                    out.push(EngineEvent::Report(ExecutionReport {
                        client_id,
                        order_id: order.order_id,
                        price: order.price,
                        last_quantity: 0,
                        remaining_quantity: remaining,
                        exec_type: ExecType::Rejected,
                        reason: RejectReason::SelfTrade,
                        side: order.side,
                    }));
                }
            }
        }

        self.match_buf = match_buf;
    }

    fn handle_cancel(&mut self, client_id: ClientId, order_id: OrderId, out: &mut Vec<EngineEvent>) {
        match self.book.cancel(order_id) {
            Some(resting) => out.push(EngineEvent::Report(ExecutionReport {
                client_id: resting.client_id,
                order_id: resting.order_id,
                price: resting.price,
                last_quantity: 0,
                remaining_quantity: resting.quantity,
                exec_type: ExecType::Canceled,
                reason: RejectReason::None,
                side: resting.side,
            })),
            None => out.push(EngineEvent::Report(ExecutionReport {
                client_id,
                order_id,
                price: 0,
                last_quantity: 0,
                remaining_quantity: 0,
                exec_type: ExecType::Rejected,
                reason: RejectReason::OrderNotFound,
                side: Side::Bid,
            })),
        }
    }

    /// The matching thread's hot loop. Drains the ingress queue until
    /// shutdown, then finishes whatever is still queued and exits.
    pub fn run(
        &mut self,
        requests: &EventQueue<ClientRequest>,
        reports: &EventQueue<ExecutionReport>,
        tape: &SpscRing<Trade>,
        processed_events: &SpscRing<ClientRequest>,
        signals: &Signals,
        pin_to_core: bool,
    ) {
        if pin_to_core {
            Self::pin_to_core();
        }
        signals.wait_open();
        info!("matching engine running");

        loop {
            if let Some(mut req) = requests.try_pop() {
                let events = self.process(&mut req);
                if !processed_events.try_push(req) {
                    self.dropped_events += 1;
                }
                for event in events {
                    match event {
                        EngineEvent::Report(report) => reports.push(report),
                        EngineEvent::TradePrint(trade) => {
                            if !tape.try_push(trade) {
                                self.dropped_trades += 1;
                            }
                        }
                    }
                }
                if self.processed % 100_000 == 0 {
                    info!(processed = self.processed, "engine progress");
                }
            } else if signals.is_running() {
                std::hint::spin_loop();
            } else {
                break;
            }
        }

        // Tell the log writers no more ring pushes can arrive.
        signals.finish();

        if self.dropped_events > 0 || self.dropped_trades > 0 {
            warn!(
                dropped_events = self.dropped_events,
                dropped_trades = self.dropped_trades,
                "log rings overflowed; entries were dropped"
            );
        }
        info!(processed = self.processed, "matching engine stopped");
    }

    /// Pin the current thread to the last available CPU core, which is the
    /// one most likely to be isolated from OS interrupts.
    pub fn pin_to_core() {
        if let Some(core_ids) = core_affinity::get_core_ids() {
            if let Some(last_core) = core_ids.last() {
                core_affinity::set_for_current(*last_core);
            }
        }
    }

    /// Hash of observable book state, for determinism testing.
    pub fn state_hash(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        self.book.best_bid().hash(&mut hasher);
        self.book.best_ask().hash(&mut hasher);
        self.book.order_count().hash(&mut hasher);
        hasher.finish()
    }
}

fn reject(client_id: ClientId, order: &Order, reason: RejectReason) -> ExecutionReport {
    ExecutionReport {
        client_id,
        order_id: order.order_id,
        price: order.price,
        last_quantity: 0,
        remaining_quantity: order.quantity,
        exec_type: ExecType::Rejected,
        reason,
        side: order.side,
    }
}

fn expired(client_id: ClientId, order: &Order) -> ExecutionReport {
    ExecutionReport {
        client_id,
        order_id: order.order_id,
        price: order.price,
        last_quantity: 0,
        remaining_quantity: order.quantity,
        exec_type: ExecType::Expired,
        reason: RejectReason::None,
        side: order.side,
    }
}
