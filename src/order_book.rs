//! Order Book - The central limit order book data structure.
//!
//! Price levels are dense arrays indexed by `price - price_floor`, which the
//! bounded admissible price range turns into O(1) level access. Two flat
//! maps track every resting order: `OrderId -> ArenaIndex` and
//! `OrderId -> LevelHandle` (side, level, node), and the arena owns the
//! orders themselves. The matching algorithm walks the opposite side's
//! levels best-first and each level's FIFO earliest-first.

use crate::arena::{Arena, ArenaIndex, RestingOrder, NULL_INDEX};
use crate::flat_map::FlatMap;
use crate::price_level::PriceLevel;
use crate::types::{ClientId, Order, OrderId, Price, Quantity, Side, TimeStamp, Trade};

/// Where a resting order lives: which side, which level, which arena node.
/// The node index doubles as the FIFO iterator - erasure by handle is O(1).
#[derive(Clone, Copy, Debug)]
pub struct LevelHandle {
    pub side: Side,
    pub level: u32,
    pub node: ArenaIndex,
}

impl Default for LevelHandle {
    fn default() -> Self {
        Self {
            side: Side::Bid,
            level: 0,
            node: NULL_INDEX,
        }
    }
}

/// Why `add` refused an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddError {
    PriceOutOfRange,
    DuplicateOrder,
}

/// One fill produced by the matching loop, with enough context for the
/// logger to report to both parties.
#[derive(Clone, Copy, Debug)]
pub struct Fill {
    pub trade: Trade,
    pub maker_client: ClientId,
    /// Maker's quantity after this fill (0 means it left the book)
    pub maker_remaining: Quantity,
    /// Taker's quantity after this fill
    pub taker_remaining: Quantity,
}

/// Everything the matching loop can surface to the engine, in order.
#[derive(Clone, Copy, Debug)]
pub enum MatchEvent {
    Fill(Fill),
    /// A resting order of the same client was skipped (self-trade
    /// prevention); `remaining` is the incoming quantity at the skip.
    SelfTradeSkip { remaining: Quantity },
}

/// Dense price-bucketed limit order book for one symbol.
pub struct OrderBook {
    price_floor: Price,
    price_ceiling: Price,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    /// Level index of the highest occupied bid, if any
    best_bid: Option<u32>,
    /// Level index of the lowest occupied ask, if any
    best_ask: Option<u32>,
    arena: Arena,
    arena_idx: FlatMap<OrderId, ArenaIndex>,
    level_idx: FlatMap<OrderId, LevelHandle>,
}

impl OrderBook {
    /// Create a book covering the inclusive price range
    /// `[price_floor, price_ceiling]`.
    pub fn new(price_floor: Price, price_ceiling: Price) -> Self {
        assert!(price_floor <= price_ceiling, "inverted price range");
        let levels = (price_ceiling - price_floor + 1) as usize;
        Self {
            price_floor,
            price_ceiling,
            bids: vec![PriceLevel::new(); levels],
            asks: vec![PriceLevel::new(); levels],
            best_bid: None,
            best_ask: None,
            arena: Arena::with_capacity(4096),
            arena_idx: FlatMap::new(),
            level_idx: FlatMap::new(),
        }
    }

    #[inline]
    pub fn price_floor(&self) -> Price {
        self.price_floor
    }

    #[inline]
    pub fn price_ceiling(&self) -> Price {
        self.price_ceiling
    }

    #[inline]
    pub fn in_range(&self, price: Price) -> bool {
        (self.price_floor..=self.price_ceiling).contains(&price)
    }

    /// Best bid price (highest buy), if any bid is resting.
    #[inline]
    pub fn best_bid(&self) -> Option<Price> {
        self.best_bid.map(|lvl| self.price_floor + lvl as Price)
    }

    /// Best ask price (lowest sell), if any ask is resting.
    #[inline]
    pub fn best_ask(&self) -> Option<Price> {
        self.best_ask.map(|lvl| self.price_floor + lvl as Price)
    }

    pub fn spread(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) if ask > bid => Some(ask - bid),
            _ => None,
        }
    }

    /// Number of resting orders.
    #[inline]
    pub fn order_count(&self) -> usize {
        self.arena_idx.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order_count() == 0
    }

    #[inline]
    pub fn contains_order(&self, order_id: OrderId) -> bool {
        self.arena_idx.contains(&order_id)
    }

    /// Resting quantity and order count at a price.
    pub fn depth_at(&self, side: Side, price: Price) -> (u64, u32) {
        if !self.in_range(price) {
            return (0, 0);
        }
        let lvl = (price - self.price_floor) as usize;
        let level = match side {
            Side::Bid => &self.bids[lvl],
            Side::Ask => &self.asks[lvl],
        };
        (level.total_qty, level.count)
    }

    /// Remaining quantity of a resting order, if it is on the book.
    pub fn resting_quantity(&self, order_id: OrderId) -> Option<Quantity> {
        let idx = *self.arena_idx.get(&order_id)?;
        Some(self.arena.get(idx).quantity)
    }

    /// Rest an order on the book.
    ///
    /// The caller has already matched; `order.quantity` is the residual.
    /// Postconditions: the order is in the arena, in both maps, and at the
    /// tail of its price level's FIFO.
    pub fn add(
        &mut self,
        client_id: ClientId,
        time_stamp: TimeStamp,
        order: &Order,
    ) -> Result<(), AddError> {
        if !self.in_range(order.price) {
            return Err(AddError::PriceOutOfRange);
        }
        if self.arena_idx.contains(&order.order_id) {
            return Err(AddError::DuplicateOrder);
        }

        let lvl = (order.price - self.price_floor) as u32;
        let node = self.arena.alloc(RestingOrder {
            order_id: order.order_id,
            client_id,
            time_stamp,
            price: order.price,
            quantity: order.quantity,
            side: order.side,
            order_type: order.order_type,
            tif: order.tif,
            next: NULL_INDEX,
            prev: NULL_INDEX,
        });
        self.arena_idx.insert(order.order_id, node);

        let book = match order.side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        book[lvl as usize].push_back(&mut self.arena, node);
        self.level_idx.insert(
            order.order_id,
            LevelHandle {
                side: order.side,
                level: lvl,
                node,
            },
        );

        match order.side {
            Side::Bid => {
                if self.best_bid.map_or(true, |best| lvl > best) {
                    self.best_bid = Some(lvl);
                }
            }
            Side::Ask => {
                if self.best_ask.map_or(true, |best| lvl < best) {
                    self.best_ask = Some(lvl);
                }
            }
        }
        Ok(())
    }

    /// Match an incoming order against the opposite side.
    ///
    /// Walks opposite levels from the best occupied one while quantities
    /// remain and prices cross; within a level, earliest orders first.
    /// Resting orders of the same client are skipped and surfaced as
    /// [`MatchEvent::SelfTradeSkip`]. Partially-filled makers keep their
    /// queue position; fully-filled makers leave the FIFO, both maps, and
    /// the arena. The caller decides what to do with any residual.
    pub fn match_incoming(
        &mut self,
        client_id: ClientId,
        order: &mut Order,
        now: TimeStamp,
        events: &mut Vec<MatchEvent>,
    ) {
        if order.quantity == 0 {
            return;
        }
        let opposite = order.side.opposite();
        let Self {
            price_floor,
            bids,
            asks,
            best_bid,
            best_ask,
            arena,
            arena_idx,
            level_idx,
            ..
        } = self;
        let floor = *price_floor;
        // Asks are swept ascending from the best (lowest), bids descending.
        let (book, best, direction): (&mut Vec<PriceLevel>, &mut Option<u32>, i64) = match opposite
        {
            Side::Ask => (asks, best_ask, 1),
            Side::Bid => (bids, best_bid, -1),
        };

        let Some(start) = *best else { return };
        let mut lvl = start as i64;

        while order.quantity > 0 && lvl >= 0 && (lvl as usize) < book.len() {
            let level_price = floor + lvl as Price;
            if !price_crosses(order.side, order.price, level_price) {
                break;
            }

            let level = &mut book[lvl as usize];
            let mut node = level.peek_head();
            while node != NULL_INDEX && order.quantity > 0 {
                let resting = *arena.get(node);
                if resting.client_id == client_id {
                    events.push(MatchEvent::SelfTradeSkip {
                        remaining: order.quantity,
                    });
                    node = resting.next;
                    continue;
                }

                let trade_qty = resting.quantity.min(order.quantity);
                order.quantity -= trade_qty;
                let maker_remaining = resting.quantity - trade_qty;
                arena.get_mut(node).quantity = maker_remaining;

                let trade = Trade {
                    maker_order_id: resting.order_id,
                    taker_order_id: order.order_id,
                    time_stamp: now,
                    price: resting.price,
                    quantity: trade_qty,
                    aggressor_side: order.side,
                };
                events.push(MatchEvent::Fill(Fill {
                    trade,
                    maker_client: resting.client_id,
                    maker_remaining,
                    taker_remaining: order.quantity,
                }));

                // The node's quantity is already decremented, so the level
                // total is adjusted here; a full fill's erase then unlinks
                // a zero-quantity node.
                level.subtract_qty(trade_qty as u64);
                if maker_remaining == 0 {
                    let filled = node;
                    node = level.erase(arena, filled);
                    arena_idx.remove(&resting.order_id);
                    level_idx.remove(&resting.order_id);
                    arena.free(filled);
                }
                // A partial fill stays put: queue position preserved.
            }

            // Level exhausted for us (emptied, or only same-client orders
            // remain); move to the next level away from the touch.
            lvl += direction;
        }

        *best = scan_best(book, *best, direction);
    }

    /// Remove a resting order.
    ///
    /// Returns the order as it rested, or `None` when the id is unknown.
    /// Inconsistent index state (stale node, id mismatch, empty level) is
    /// repaired by erasing the offending map entries and reported as
    /// not-found.
    pub fn cancel(&mut self, order_id: OrderId) -> Option<RestingOrder> {
        let handle = *self.level_idx.get(&order_id)?;
        let book = match handle.side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        let level = &mut book[handle.level as usize];

        if level.is_empty()
            || !self.arena.is_active(handle.node)
            || self.arena.get(handle.node).order_id != order_id
        {
            self.level_idx.remove(&order_id);
            self.arena_idx.remove(&order_id);
            return None;
        }

        let resting = *self.arena.get(handle.node);
        level.erase(&mut self.arena, handle.node);
        let level_emptied = level.is_empty();
        self.level_idx.remove(&order_id);
        self.arena_idx.remove(&order_id);
        self.arena.free(handle.node);

        if level_emptied {
            match handle.side {
                Side::Bid => {
                    if self.best_bid == Some(handle.level) {
                        self.best_bid = scan_best(&self.bids, self.best_bid, -1);
                    }
                }
                Side::Ask => {
                    if self.best_ask == Some(handle.level) {
                        self.best_ask = scan_best(&self.asks, self.best_ask, 1);
                    }
                }
            }
        }
        Some(resting)
    }

    /// Verify every structural invariant; used by the fuzz and scenario
    /// tests. Returns a description of the first violation found.
    pub fn check_consistency(&self) -> Result<(), String> {
        if self.arena.live() as usize != self.arena_idx.len() {
            return Err(format!(
                "arena live {} != arena_idx len {}",
                self.arena.live(),
                self.arena_idx.len()
            ));
        }
        if self.arena_idx.len() != self.level_idx.len() {
            return Err(format!(
                "arena_idx len {} != level_idx len {}",
                self.arena_idx.len(),
                self.level_idx.len()
            ));
        }

        let mut mapped: Vec<ArenaIndex> = Vec::new();
        for (order_id, idx) in self.arena_idx.iter() {
            if !self.arena.is_active(*idx) {
                return Err(format!("order {order_id} maps to inactive slot {idx}"));
            }
            if self.arena.get(*idx).order_id != *order_id {
                return Err(format!("order {order_id} maps to a slot holding another order"));
            }
            let Some(handle) = self.level_idx.get(order_id) else {
                return Err(format!("order {order_id} missing from level_idx"));
            };
            if handle.node != *idx {
                return Err(format!("order {order_id} level handle disagrees with arena_idx"));
            }
            let resting = self.arena.get(*idx);
            if handle.side != resting.side
                || self.price_floor + handle.level as Price != resting.price
            {
                return Err(format!("order {order_id} level handle points at the wrong level"));
            }
            mapped.push(*idx);
        }
        let mut active: Vec<ArenaIndex> = self.arena.active_indices().collect();
        mapped.sort_unstable();
        active.sort_unstable();
        if mapped != active {
            return Err("active arena slots differ from the mapped set".to_string());
        }

        for (side, levels) in [(Side::Bid, &self.bids), (Side::Ask, &self.asks)] {
            for (lvl, level) in levels.iter().enumerate() {
                let mut count = 0u32;
                let mut qty = 0u64;
                for node in level.iter(&self.arena) {
                    let resting = self.arena.get(node);
                    if resting.side != side {
                        return Err(format!("order on the wrong side at level {lvl}"));
                    }
                    if resting.price != self.price_floor + lvl as Price {
                        return Err(format!("order at level {lvl} with mismatched price"));
                    }
                    count += 1;
                    qty += resting.quantity as u64;
                }
                if count != level.count || qty != level.total_qty {
                    return Err(format!(
                        "level {lvl} bookkeeping off: counted {count}/{qty}, recorded {}/{}",
                        level.count, level.total_qty
                    ));
                }
            }
        }

        let highest_bid = (0..self.bids.len())
            .rev()
            .find(|lvl| !self.bids[*lvl].is_empty())
            .map(|lvl| lvl as u32);
        if self.best_bid != highest_bid {
            return Err(format!(
                "best_bid cache {:?} != actual {:?}",
                self.best_bid, highest_bid
            ));
        }
        let lowest_ask = (0..self.asks.len())
            .find(|lvl| !self.asks[*lvl].is_empty())
            .map(|lvl| lvl as u32);
        if self.best_ask != lowest_ask {
            return Err(format!(
                "best_ask cache {:?} != actual {:?}",
                self.best_ask, lowest_ask
            ));
        }
        Ok(())
    }

    /// Corrupt a level handle so tests can drive the defensive cancel path.
    #[cfg(test)]
    pub(crate) fn poison_handle(&mut self, order_id: OrderId) {
        if let Some(handle) = self.level_idx.get_mut(&order_id) {
            handle.node = NULL_INDEX - 1;
        }
    }
}

#[inline]
fn price_crosses(aggressor: Side, taker_price: Price, maker_price: Price) -> bool {
    match aggressor {
        Side::Bid => taker_price >= maker_price,
        Side::Ask => taker_price <= maker_price,
    }
}

/// Scan from `from` in `direction` for the first occupied level.
fn scan_best(book: &[PriceLevel], from: Option<u32>, direction: i64) -> Option<u32> {
    let mut lvl = from? as i64;
    while lvl >= 0 && (lvl as usize) < book.len() {
        if !book[lvl as usize].is_empty() {
            return Some(lvl as u32);
        }
        lvl += direction;
    }
    None
}

impl std::fmt::Debug for OrderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBook")
            .field("best_bid", &self.best_bid())
            .field("best_ask", &self.best_ask())
            .field("order_count", &self.order_count())
            .finish()
    }
}
