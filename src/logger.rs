//! Logger - batched append-only text logs for processed events and trades.
//!
//! The matching thread feeds two bounded rings; one writer thread per file
//! drains its ring into a buffered appender only when the ring crosses a
//! high-water mark or shutdown is in progress. That keeps file I/O out of
//! the hot path entirely: under pathological pressure entries are dropped
//! and counted rather than ever stalling matching.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::exchange::Signals;
use crate::queue::SpscRing;
use crate::types::{
    ClientRequest, ExecType, ExecutionReport, OrderType, RejectReason, Request, Side, TimeInForce,
    Trade,
};

/// Drain the ring once it holds this many entries.
pub const LOG_HIGH_WATER: usize = 8_192;

const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// One line per execution report, in the exchange's canonical text form.
/// Shared by the dispatcher's per-client report files.
pub fn format_report(report: &ExecutionReport) -> String {
    let side = match report.side {
        Side::Bid => "BUY",
        Side::Ask => "SELL",
    };
    let exec = match report.exec_type {
        ExecType::New => "NEW".to_string(),
        ExecType::Canceled => "CANCELED".to_string(),
        ExecType::Trade => "TRADE".to_string(),
        ExecType::Expired => "EXPIRED".to_string(),
        ExecType::Rejected => format!("REJECTED - {}", reason_name(report.reason)),
    };
    format!(
        "CLIENT {} ORDER ID {} PRICE {} LAST QUANTITY {} REMAINING QUANTITY {} {} EXEC TYPE {}",
        report.client_id,
        report.order_id,
        report.price,
        report.last_quantity,
        report.remaining_quantity,
        side,
        exec
    )
}

fn reason_name(reason: RejectReason) -> &'static str {
    match reason {
        RejectReason::None => "NONE",
        RejectReason::OrderNotFound => "ORDER_NOT_FOUND",
        RejectReason::PriceInvalid => "PRICE_INVALID",
        RejectReason::QuantityInvalid => "QUANTITY_INVALID",
        RejectReason::MarketClosed => "MARKET_CLOSED",
        RejectReason::SelfTrade => "SELF_TRADE",
        RejectReason::InvalidOrderType => "INVALID_ORDER_TYPE",
    }
}

fn format_event(event: &ClientRequest) -> String {
    match event.request {
        Request::New(order) => format!(
            "Client {}: ORDER ID {} {} {} @ {} {} {} TIMESTAMP-{}",
            event.client_id,
            order.order_id,
            match order.side {
                Side::Bid => "BUY",
                Side::Ask => "SELL",
            },
            order.quantity,
            order.price,
            match order.order_type {
                OrderType::Limit => "LIMIT",
                OrderType::Market => "MARKET",
            },
            match order.tif {
                TimeInForce::Gtc => "GTC",
                TimeInForce::Ioc => "IOC",
            },
            event.time_stamp
        ),
        Request::Cancel(order_id) => format!(
            "Client {}: CANCEL ORDER ID {} TIMESTAMP-{}",
            event.client_id, order_id, event.time_stamp
        ),
    }
}

fn format_trade(trade: &Trade) -> String {
    format!(
        "MAKER: {} TAKER: {} {} @ {} TIMESTAMP-{}",
        trade.maker_order_id, trade.taker_order_id, trade.quantity, trade.price, trade.time_stamp
    )
}

fn open_log(path: &Path, header: &str) -> std::io::Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{header}")?;
    Ok(writer)
}

/// Generic batched ring-to-file appender; the two concrete writers only
/// differ in their line formatter.
struct RingWriter<T: Copy> {
    ring: Arc<SpscRing<T>>,
    writer: BufWriter<File>,
    path: PathBuf,
    format: fn(&T) -> String,
    written: u64,
    write_errors: u64,
}

impl<T: Copy> RingWriter<T> {
    fn new(
        ring: Arc<SpscRing<T>>,
        path: PathBuf,
        header: &str,
        format: fn(&T) -> String,
    ) -> std::io::Result<Self> {
        let writer = open_log(&path, header)?;
        Ok(Self {
            ring,
            writer,
            path,
            format,
            written: 0,
            write_errors: 0,
        })
    }

    fn drain(&mut self) {
        while let Some(item) = self.ring.try_pop() {
            let line = (self.format)(&item);
            if writeln!(self.writer, "{line}").is_err() {
                self.write_errors += 1;
            } else {
                self.written += 1;
            }
        }
        if self.writer.flush().is_err() {
            self.write_errors += 1;
        }
    }

    /// Worker loop: wait for the exchange to open, then drain on the
    /// high-water mark until the matching thread reports itself finished,
    /// then drain whatever remains.
    fn run(&mut self, signals: &Signals) {
        signals.wait_open();
        while !signals.is_finished() {
            if self.ring.len() >= LOG_HIGH_WATER {
                self.drain();
            } else {
                thread::sleep(IDLE_SLEEP);
            }
        }
        self.drain();
        if self.write_errors > 0 {
            warn!(
                path = %self.path.display(),
                errors = self.write_errors,
                "log writes failed and were dropped"
            );
        }
        info!(path = %self.path.display(), lines = self.written, "log writer finished");
    }
}

/// Batched appender for the processed-events log.
pub struct EventLogWriter {
    inner: RingWriter<ClientRequest>,
}

impl EventLogWriter {
    pub fn new(ring: Arc<SpscRing<ClientRequest>>, log_dir: &Path) -> std::io::Result<Self> {
        Ok(Self {
            inner: RingWriter::new(
                ring,
                log_dir.join("processed_events.txt"),
                "Processed Events by Engine",
                format_event,
            )?,
        })
    }

    pub fn run(mut self, signals: &Signals) {
        self.inner.run(signals);
    }
}

/// Batched appender for the public trade tape.
pub struct TradeLogWriter {
    inner: RingWriter<Trade>,
}

impl TradeLogWriter {
    pub fn new(ring: Arc<SpscRing<Trade>>, log_dir: &Path) -> std::io::Result<Self> {
        Ok(Self {
            inner: RingWriter::new(
                ring,
                log_dir.join("processed_trades.txt"),
                "Processed Trades",
                format_trade,
            )?,
        })
    }

    pub fn run(mut self, signals: &Signals) {
        self.inner.run(signals);
    }
}
