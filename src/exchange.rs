//! Exchange - wires queues, book, gateway, and log writers into threads.
//!
//! Thread fabric:
//!
//! ```text
//! reader threads --> [event queue]  --> matching --> [reports]  --> dispatcher --> sockets
//!                                             |----> [tape ring] --> trade log writer
//!                                             |----> [events ring] --> event log writer
//! ```
//!
//! Two process-wide latches steer every worker: `start` flips false->true
//! exactly once when the exchange opens (workers spin-yield on it with
//! acquire loads), and `running` flips true->false at shutdown (checked
//! relaxed per iteration). Shutdown is cooperative: each thread drains its
//! pending work and exits, and the owner joins them all.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::gateway::Gateway;
use crate::logger::{EventLogWriter, TradeLogWriter};
use crate::queue::{EventQueue, SpscRing};
use crate::types::{
    ClientRequest, ExecutionReport, Price, Trade, DEFAULT_PRICE_CEILING, DEFAULT_PRICE_FLOOR,
};

/// Capacity of the two log rings.
const LOG_RING_CAPACITY: usize = 1 << 17;

/// Process-wide start/stop latches. Created before any worker spawns,
/// dropped after every join.
///
/// `finished` is the drain handshake: the matching thread sets it after its
/// final event, so the log writers know no more ring pushes can arrive.
pub struct Signals {
    start: AtomicBool,
    running: AtomicBool,
    finished: AtomicBool,
}

impl Signals {
    pub fn new() -> Self {
        Self {
            start: AtomicBool::new(false),
            running: AtomicBool::new(true),
            finished: AtomicBool::new(false),
        }
    }

    /// Open the exchange. Transitions false -> true exactly once.
    pub fn open(&self) {
        self.start.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.start.load(Ordering::Acquire)
    }

    /// Spin-yield until the exchange opens (or shuts down before opening).
    pub fn wait_open(&self) {
        while !self.is_open() {
            if !self.is_running() {
                return;
            }
            thread::yield_now();
        }
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Set by the matching thread once it has drained its final event.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

impl Default for Signals {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("invalid price range [{floor}, {ceiling}]")]
    PriceRange { floor: Price, ceiling: Price },
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("failed to prepare log directory {path}: {source}")]
    LogDir { path: String, source: io::Error },
    #[error("failed to spawn {name} thread: {source}")]
    Spawn { name: &'static str, source: io::Error },
}

#[derive(Clone, Debug)]
pub struct ExchangeConfig {
    pub addr: SocketAddr,
    pub price_floor: Price,
    pub price_ceiling: Price,
    pub log_dir: PathBuf,
    /// Pin the matching thread to the last CPU core.
    pub pin_engine: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:12345".parse().expect("static addr"),
            price_floor: DEFAULT_PRICE_FLOOR,
            price_ceiling: DEFAULT_PRICE_CEILING,
            log_dir: PathBuf::from("logs"),
            pin_engine: false,
        }
    }
}

/// A running exchange: five worker threads plus per-connection readers
/// owned by the gateway.
pub struct Exchange {
    signals: Arc<Signals>,
    requests: Arc<EventQueue<ClientRequest>>,
    reports: Arc<EventQueue<ExecutionReport>>,
    local_addr: SocketAddr,
    /// Worker handles; the matching thread is always first.
    threads: Vec<JoinHandle<()>>,
}

impl Exchange {
    /// Bind the listener, create the queues and log files, and spawn every
    /// worker thread. Workers idle on the start latch until [`Exchange::open`].
    pub fn init(config: ExchangeConfig) -> Result<Self, ExchangeError> {
        if config.price_floor > config.price_ceiling {
            return Err(ExchangeError::PriceRange {
                floor: config.price_floor,
                ceiling: config.price_ceiling,
            });
        }
        std::fs::create_dir_all(&config.log_dir).map_err(|source| ExchangeError::LogDir {
            path: config.log_dir.display().to_string(),
            source,
        })?;

        let signals = Arc::new(Signals::new());
        let requests: Arc<EventQueue<ClientRequest>> = Arc::new(EventQueue::new());
        let reports: Arc<EventQueue<ExecutionReport>> = Arc::new(EventQueue::new());
        let tape: Arc<SpscRing<Trade>> = Arc::new(SpscRing::with_capacity(LOG_RING_CAPACITY));
        let processed: Arc<SpscRing<ClientRequest>> =
            Arc::new(SpscRing::with_capacity(LOG_RING_CAPACITY));

        let gateway = Arc::new(
            Gateway::bind(config.addr, Arc::clone(&requests), Arc::clone(&signals)).map_err(
                |source| ExchangeError::Bind {
                    addr: config.addr,
                    source,
                },
            )?,
        );
        let local_addr = gateway.local_addr();

        let event_writer = EventLogWriter::new(Arc::clone(&processed), &config.log_dir).map_err(
            |source| ExchangeError::LogDir {
                path: config.log_dir.display().to_string(),
                source,
            },
        )?;
        let trade_writer = TradeLogWriter::new(Arc::clone(&tape), &config.log_dir).map_err(
            |source| ExchangeError::LogDir {
                path: config.log_dir.display().to_string(),
                source,
            },
        )?;

        let mut threads = Vec::new();

        {
            let requests = Arc::clone(&requests);
            let reports = Arc::clone(&reports);
            let tape = Arc::clone(&tape);
            let processed = Arc::clone(&processed);
            let signals = Arc::clone(&signals);
            let (floor, ceiling, pin) = (config.price_floor, config.price_ceiling, config.pin_engine);
            threads.push(spawn_worker("matching", move || {
                let mut engine = Engine::new(floor, ceiling);
                engine.run(&requests, &reports, &tape, &processed, &signals, pin);
            })?);
        }

        {
            let gateway = Arc::clone(&gateway);
            let reports = Arc::clone(&reports);
            let log_dir = config.log_dir.clone();
            threads.push(spawn_worker("dispatcher", move || {
                gateway.dispatch_loop(reports, log_dir);
            })?);
        }

        {
            let gateway = Arc::clone(&gateway);
            threads.push(spawn_worker("accept", move || {
                gateway.accept_loop();
            })?);
        }

        {
            let signals = Arc::clone(&signals);
            threads.push(spawn_worker("event-log", move || {
                event_writer.run(&signals);
            })?);
        }

        {
            let signals = Arc::clone(&signals);
            threads.push(spawn_worker("trade-log", move || {
                trade_writer.run(&signals);
            })?);
        }

        info!(addr = %local_addr, "exchange initialised");
        Ok(Self {
            signals,
            requests,
            reports,
            local_addr,
            threads,
        })
    }

    /// Open for business: releases every worker's start latch.
    pub fn open(&self) {
        self.signals.open();
        info!(addr = %self.local_addr, "exchange open");
    }

    /// The bound address; useful when the config asked for port 0.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Cooperative shutdown: flip the run latch, wake the queues, join
    /// everything. Pending work is drained on the way out.
    pub fn shutdown(mut self) {
        self.signals.shutdown();
        self.requests.close();

        // The matching thread drains the request queue first; joining it
        // guarantees every report and trade has been enqueued, so closing
        // the report queue afterwards lets the dispatcher drain to empty
        // and exit without losing anything.
        let matching = self.threads.remove(0);
        if matching.join().is_err() {
            warn!("matching thread panicked during shutdown");
        }
        self.reports.close();

        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
        info!("exchange closed");
    }
}

fn spawn_worker(
    name: &'static str,
    body: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>, ExchangeError> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|source| ExchangeError::Spawn { name, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signals_protocol() {
        let signals = Signals::new();
        assert!(!signals.is_open());
        assert!(signals.is_running());

        signals.open();
        assert!(signals.is_open());
        signals.wait_open(); // must not block once open

        signals.shutdown();
        assert!(!signals.is_running());

        assert!(!signals.is_finished());
        signals.finish();
        assert!(signals.is_finished());
    }

    #[test]
    fn test_wait_open_bails_after_shutdown() {
        let signals = Signals::new();
        signals.shutdown();
        // Never opened; must return rather than spin forever.
        signals.wait_open();
    }

    #[test]
    fn test_init_rejects_inverted_price_range() {
        let config = ExchangeConfig {
            price_floor: 10_500,
            price_ceiling: 9_500,
            ..Default::default()
        };
        assert!(matches!(
            Exchange::init(config),
            Err(ExchangeError::PriceRange { .. })
        ));
    }
}
