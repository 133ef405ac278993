//! # Flux-Exchange
//!
//! A single-symbol limit order book exchange with a binary TCP gateway.
//!
//! ## Design Principles
//!
//! - **Single-Writer**: the matching thread exclusively owns the book,
//!   the arena, and both order-id indices (no locks on the hot path)
//! - **Price-Time Priority**: dense per-price FIFO levels, earliest first
//! - **Arena Allocation**: resting orders live in index-addressed slots;
//!   matching and cancelling never touch the heap
//! - **Deterministic**: identical input order produces identical trades,
//!   reports, and log files
//!
//! ## Architecture
//!
//! ```text
//! [Reader Threads] --> [Event Queue] --> [Matching Thread]
//!                                              |
//!                       [Reports] --> [Dispatcher] --> sockets
//!                       [Tape Ring] ----> [Trade Log Writer]
//!                       [Events Ring] --> [Event Log Writer]
//! ```

pub mod arena;
pub mod engine;
pub mod exchange;
pub mod flat_map;
pub mod gateway;
pub mod logger;
pub mod order_book;
pub mod price_level;
pub mod queue;
pub mod types;
pub mod wire;

// Re-exports for convenience
pub use arena::{Arena, ArenaIndex, RestingOrder, NULL_INDEX};
pub use engine::{Engine, EngineEvent, SteadyClock};
pub use exchange::{Exchange, ExchangeConfig, ExchangeError, Signals};
pub use flat_map::FlatMap;
pub use order_book::{AddError, Fill, MatchEvent, OrderBook};
pub use price_level::PriceLevel;
pub use queue::{EventQueue, SpscRing};
pub use types::{
    ClientId, ClientRequest, ExecType, ExecutionReport, Order, OrderId, OrderType, Price,
    Quantity, RejectReason, Request, Side, TimeInForce, TimeStamp, Trade,
};
