//! Core domain types shared across the exchange.
//!
//! All message structs are `Copy`: they move through lock-free rings and
//! condvar queues by value, and the matching thread mutates only the copies
//! it owns.

/// Globally unique order identifier. Clients build theirs as
/// `(client_id << LOCAL_ORDER_BITS) | local_counter`.
pub type OrderId = u64;

/// Server-assigned connection identifier, handed out at login.
pub type ClientId = u32;

/// Fixed-point price in ticks.
pub type Price = u64;

/// Order quantity.
pub type Quantity = u32;

/// Steady-clock nanoseconds, assigned by the matching thread on dequeue.
pub type TimeStamp = u64;

/// Number of low bits of an [`OrderId`] reserved for the per-client counter.
pub const LOCAL_ORDER_BITS: u32 = 48;

/// Lowest admissible price (default; the server CLI can override).
pub const DEFAULT_PRICE_FLOOR: Price = 9_500;

/// Highest admissible price (default; the server CLI can override).
pub const DEFAULT_PRICE_CEILING: Price = 10_500;

/// Order side (bid = buy, ask = sell)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Side {
    /// Buy side (bids)
    Bid = 0,
    /// Sell side (asks)
    Ask = 1,
}

impl Side {
    /// Returns the opposite side
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    pub(crate) fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Side::Bid),
            1 => Some(Side::Ask),
            _ => None,
        }
    }
}

/// Order type determines matching behavior
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum OrderType {
    /// Limit order - execute at the limit price or better (default)
    #[default]
    Limit = 0,
    /// Market order - execute at the best available price. Only valid with
    /// IOC; the engine normalizes it to an extreme-priced limit order.
    Market = 1,
}

impl OrderType {
    pub(crate) fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(OrderType::Limit),
            1 => Some(OrderType::Market),
            _ => None,
        }
    }
}

/// Time in force
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TimeInForce {
    /// Good-till-cancelled: any residual rests on the book (default)
    #[default]
    Gtc = 0,
    /// Immediate-or-cancel: any residual is dropped after matching
    Ioc = 1,
}

impl TimeInForce {
    pub(crate) fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(TimeInForce::Gtc),
            1 => Some(TimeInForce::Ioc),
            _ => None,
        }
    }
}

/// What happened to an order, from the client's point of view
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecType {
    /// Order accepted
    New = 0,
    /// Order successfully cancelled
    Canceled = 1,
    /// Order rejected; see [`RejectReason`]
    Rejected = 2,
    /// Partial or full fill
    Trade = 3,
    /// IOC residual dropped unfilled
    Expired = 4,
}

impl ExecType {
    pub(crate) fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ExecType::New),
            1 => Some(ExecType::Canceled),
            2 => Some(ExecType::Rejected),
            3 => Some(ExecType::Trade),
            4 => Some(ExecType::Expired),
            _ => None,
        }
    }
}

/// Why an order was rejected
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RejectReason {
    #[default]
    None = 0,
    OrderNotFound = 1,
    PriceInvalid = 2,
    QuantityInvalid = 3,
    MarketClosed = 4,
    SelfTrade = 5,
    InvalidOrderType = 6,
}

impl RejectReason {
    pub(crate) fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(RejectReason::None),
            1 => Some(RejectReason::OrderNotFound),
            2 => Some(RejectReason::PriceInvalid),
            3 => Some(RejectReason::QuantityInvalid),
            4 => Some(RejectReason::MarketClosed),
            5 => Some(RejectReason::SelfTrade),
            6 => Some(RejectReason::InvalidOrderType),
            _ => None,
        }
    }
}

/// A new-order submission. `quantity` is the only field that changes over
/// the order's lifetime, and it only ever decreases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Order {
    pub order_id: OrderId,
    pub price: Price,
    pub quantity: Quantity,
    pub side: Side,
    pub order_type: OrderType,
    pub tif: TimeInForce,
}

/// The two request kinds a client can submit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Request {
    New(Order),
    Cancel(OrderId),
}

/// What the matching engine consumes: a request plus its ingress context.
/// `time_stamp` is assigned at ingress and overwritten by the matching
/// thread on dequeue, which is the authoritative ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientRequest {
    pub client_id: ClientId,
    pub time_stamp: TimeStamp,
    pub request: Request,
}

impl ClientRequest {
    #[inline]
    pub const fn new_order(client_id: ClientId, time_stamp: TimeStamp, order: Order) -> Self {
        Self {
            client_id,
            time_stamp,
            request: Request::New(order),
        }
    }

    #[inline]
    pub const fn cancel(client_id: ClientId, time_stamp: TimeStamp, order_id: OrderId) -> Self {
        Self {
            client_id,
            time_stamp,
            request: Request::Cancel(order_id),
        }
    }
}

/// A match on the public tape. `price` is always the maker's price
/// (price improvement goes to the aggressor).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Trade {
    pub maker_order_id: OrderId,
    pub taker_order_id: OrderId,
    pub time_stamp: TimeStamp,
    pub price: Price,
    pub quantity: Quantity,
    pub aggressor_side: Side,
}

/// Per-client notification of anything that happened to one of its orders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionReport {
    pub client_id: ClientId,
    pub order_id: OrderId,
    /// Last price filled, or 0 when no fill is involved
    pub price: Price,
    /// Quantity filled in this event
    pub last_quantity: Quantity,
    /// Remaining quantity, if any
    pub remaining_quantity: Quantity,
    pub exec_type: ExecType,
    pub reason: RejectReason,
    pub side: Side,
}

/// Build an order id the way clients do.
#[inline]
pub const fn make_order_id(client_id: ClientId, local: u64) -> OrderId {
    ((client_id as u64) << LOCAL_ORDER_BITS) | (local & ((1 << LOCAL_ORDER_BITS) - 1))
}
