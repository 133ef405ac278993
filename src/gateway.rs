//! Network gateway - TCP front door of the exchange.
//!
//! The accept thread assigns client ids and answers with LOGIN_RESPONSE;
//! each connection then gets a reader thread that performs non-blocking
//! reads, drains whole frames from its RX buffer, and pushes requests onto
//! the ingress queue (per-producer FIFO is all the engine needs - it
//! re-stamps on dequeue). The dispatcher thread drains execution reports,
//! appends bytes to per-connection TX buffers plus the per-client report
//! logs, and flushes sockets with non-blocking writes; a partial send just
//! leaves its offset for the next sweep.

use std::collections::hash_map::Entry;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::engine::SteadyClock;
use crate::exchange::Signals;
use crate::logger;
use crate::queue::EventQueue;
use crate::types::{ClientId, ClientRequest, ExecutionReport};
use crate::wire::{self, MessageType};

const RX_CHUNK: usize = 4096;
const DISPATCH_BATCH: usize = 128;
const IDLE_SLEEP: Duration = Duration::from_micros(200);

/// One logged-in client: its socket plus the pending egress bytes.
pub struct Connection {
    pub client_id: ClientId,
    stream: TcpStream,
    tx: Mutex<TxBuffer>,
}

struct TxBuffer {
    buf: Vec<u8>,
    /// How much of `buf` the kernel has already taken.
    offset: usize,
}

impl Connection {
    fn new(client_id: ClientId, stream: TcpStream) -> Self {
        Self {
            client_id,
            stream,
            tx: Mutex::new(TxBuffer {
                buf: Vec::with_capacity(1024),
                offset: 0,
            }),
        }
    }

    #[inline]
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.stream).read(buf)
    }

    /// Append serialized bytes for the next flush.
    pub fn queue_bytes(&self, bytes: &[u8]) {
        let mut tx = self.tx.lock().expect("tx buffer poisoned");
        tx.buf.extend_from_slice(bytes);
    }

    pub fn has_pending(&self) -> bool {
        let tx = self.tx.lock().expect("tx buffer poisoned");
        tx.offset < tx.buf.len()
    }

    /// Non-blocking drain of the TX buffer into the socket.
    ///
    /// Returns `Ok(true)` once everything queued has been sent; `Ok(false)`
    /// means the kernel buffer filled and the remainder waits for the next
    /// sweep.
    pub fn flush(&self) -> io::Result<bool> {
        let mut tx = self.tx.lock().expect("tx buffer poisoned");
        while tx.offset < tx.buf.len() {
            let offset = tx.offset;
            match (&self.stream).write(&tx.buf[offset..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(sent) => tx.offset += sent,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        tx.buf.clear();
        tx.offset = 0;
        Ok(true)
    }
}

type ClientMap = RwLock<FxHashMap<ClientId, Arc<Connection>>>;

/// TCP listener plus the shared connection registry.
pub struct Gateway {
    listener: TcpListener,
    local_addr: SocketAddr,
    next_id: AtomicU32,
    clients: Arc<ClientMap>,
    requests: Arc<EventQueue<ClientRequest>>,
    signals: Arc<Signals>,
}

impl Gateway {
    pub fn bind(
        addr: SocketAddr,
        requests: Arc<EventQueue<ClientRequest>>,
        signals: Arc<Signals>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            next_id: AtomicU32::new(1),
            clients: Arc::new(RwLock::new(FxHashMap::default())),
            requests,
            signals,
        })
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept thread body. Runs until shutdown, then joins every reader.
    pub fn accept_loop(&self) {
        self.signals.wait_open();
        info!(addr = %self.local_addr, "gateway accepting connections");

        let mut readers: Vec<JoinHandle<()>> = Vec::new();
        while self.signals.is_running() {
            match self.listener.accept() {
                Ok((stream, peer)) => match self.register(stream, peer) {
                    Ok(handle) => readers.push(handle),
                    Err(e) => warn!(error = %e, "failed to register connection"),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    thread::sleep(Duration::from_millis(10));
                }
            }
        }

        for handle in readers {
            if handle.join().is_err() {
                warn!("reader thread panicked");
            }
        }
        info!("gateway stopped");
    }

    fn register(&self, mut stream: TcpStream, peer: SocketAddr) -> io::Result<JoinHandle<()>> {
        stream.set_nodelay(true).ok();
        let client_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // Login response goes out before the socket turns non-blocking, so
        // the 5 bytes cannot short-write.
        stream.write_all(&wire::encode_login(client_id))?;
        stream.set_nonblocking(true)?;

        let conn = Arc::new(Connection::new(client_id, stream));
        self.clients
            .write()
            .expect("client map poisoned")
            .insert(client_id, Arc::clone(&conn));
        info!(client_id, %peer, "client connected");

        let clients = Arc::clone(&self.clients);
        let requests = Arc::clone(&self.requests);
        let signals = Arc::clone(&self.signals);
        thread::Builder::new()
            .name(format!("reader-{client_id}"))
            .spawn(move || reader_loop(conn, clients, requests, signals))
    }

    /// Dispatcher thread body: reports out to sockets and per-client logs.
    pub fn dispatch_loop(&self, reports: Arc<EventQueue<ExecutionReport>>, log_dir: PathBuf) {
        self.signals.wait_open();
        info!("dispatcher running");
        let mut report_files: FxHashMap<ClientId, BufWriter<File>> = FxHashMap::default();

        loop {
            let mut work_done = false;

            let mut pops = 0;
            while pops < DISPATCH_BATCH {
                let Some(report) = reports.try_pop() else { break };
                pops += 1;
                work_done = true;

                let bytes = wire::encode_execution_report(&report);
                let conn = self
                    .clients
                    .read()
                    .expect("client map poisoned")
                    .get(&report.client_id)
                    .cloned();
                if let Some(conn) = conn {
                    conn.queue_bytes(&bytes);
                }
                append_report_line(&mut report_files, &log_dir, &report);
            }

            {
                let clients = self.clients.read().expect("client map poisoned");
                for conn in clients.values() {
                    if !conn.has_pending() {
                        continue;
                    }
                    work_done = true;
                    if let Err(e) = conn.flush() {
                        debug!(client_id = conn.client_id, error = %e, "egress flush failed");
                    }
                }
            }

            // The owner closes the report queue only after the matching
            // thread has been joined, so closed + empty means done.
            if reports.is_closed() && reports.is_empty() {
                break;
            }
            if !work_done {
                thread::sleep(IDLE_SLEEP);
            }
        }

        // Best-effort final flush of anything still buffered for a socket.
        {
            let clients = self.clients.read().expect("client map poisoned");
            for conn in clients.values() {
                if conn.has_pending() {
                    conn.flush().ok();
                }
            }
        }
        for writer in report_files.values_mut() {
            if writer.flush().is_err() {
                warn!("failed to flush a client report log");
            }
        }
        info!("dispatcher stopped");
    }
}

fn append_report_line(
    files: &mut FxHashMap<ClientId, BufWriter<File>>,
    log_dir: &Path,
    report: &ExecutionReport,
) {
    let writer = match files.entry(report.client_id) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => {
            let path = log_dir.join(format!("execution_reports_client_{}.txt", report.client_id));
            match OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)
            {
                Ok(file) => {
                    let mut writer = BufWriter::new(file);
                    let _ = writeln!(writer, "Execution Reports for Client {}", report.client_id);
                    entry.insert(writer)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot open client report log");
                    return;
                }
            }
        }
    };
    // Degraded log writes are dropped, never retried.
    let _ = writeln!(writer, "{}", logger::format_report(report));
}

fn reader_loop(
    conn: Arc<Connection>,
    clients: Arc<ClientMap>,
    requests: Arc<EventQueue<ClientRequest>>,
    signals: Arc<Signals>,
) {
    let clock = SteadyClock::new();
    let mut rx: Vec<u8> = Vec::with_capacity(RX_CHUNK);
    let mut chunk = [0u8; RX_CHUNK];

    while signals.is_running() {
        match conn.read(&mut chunk) {
            Ok(0) => {
                info!(client_id = conn.client_id, "client disconnected");
                break;
            }
            Ok(n) => {
                rx.extend_from_slice(&chunk[..n]);
                if !drain_frames(conn.client_id, &mut rx, &clock, &requests) {
                    // Protocol error: close, no retry.
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_micros(100));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(client_id = conn.client_id, error = %e, "read failed");
                break;
            }
        }
    }

    clients
        .write()
        .expect("client map poisoned")
        .remove(&conn.client_id);
}

/// Consume as many whole frames as the RX buffer holds. Returns false on a
/// protocol violation (unknown or unexpected tag, undecodable payload).
fn drain_frames(
    client_id: ClientId,
    rx: &mut Vec<u8>,
    clock: &SteadyClock,
    requests: &EventQueue<ClientRequest>,
) -> bool {
    while !rx.is_empty() {
        let tag = rx[0];
        let Some(len) = wire::frame_len(tag) else {
            warn!(client_id, tag, "unknown message tag, closing connection");
            return false;
        };
        if rx.len() < len {
            // Whole frame not buffered yet.
            break;
        }

        let now = clock.now();
        let accepted = match MessageType::from_tag(tag) {
            Some(MessageType::OrderNew) => match wire::decode_order(&rx[..len]) {
                Ok(order) => {
                    requests.push(ClientRequest::new_order(client_id, now, order));
                    true
                }
                Err(e) => {
                    warn!(client_id, error = %e, "malformed order frame");
                    false
                }
            },
            Some(MessageType::OrderCancel) => match wire::decode_cancel(&rx[..len]) {
                Ok(order_id) => {
                    requests.push(ClientRequest::cancel(client_id, now, order_id));
                    true
                }
                Err(e) => {
                    warn!(client_id, error = %e, "malformed cancel frame");
                    false
                }
            },
            _ => {
                warn!(client_id, tag, "client sent a server-side tag");
                false
            }
        };
        if !accepted {
            return false;
        }
        rx.drain(..len);
    }
    true
}
