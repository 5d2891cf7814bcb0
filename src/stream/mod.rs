//! The core TLS stream state machine.
//!
//! Drives a `std::net::TcpStream` placed in non-blocking mode through TCP
//! connect, TLS handshake, and full-duplex encrypted I/O, directly pumping
//! a `rustls` connection's `read_tls`/`write_tls`/`process_new_packets`
//! cycle the way [the pump in `other_examples`](../../examples) does,
//! generalized to track the directional want state a caller's external
//! poll loop needs.

pub mod client;
pub mod listener;

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use rustls::{ClientConnection, ServerConnection};

use crate::bootstrap;
use crate::error::{Error, Result};
use crate::ratelimit::{rate_limited_warn, RateLimiter};
use crate::wait::{Want, WaitEvent};

/// Which side of the handshake a stream plays. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// The stream's position in its connect/handshake/open lifecycle.
/// Transitions are monotonic: a stream never moves back to an earlier
/// phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    TcpConnecting,
    TlsHandshake,
    Open,
    Closed,
}

static IO_ERRORS: RateLimiter = RateLimiter::new();

/// Either half of a `rustls` connection. The two sides share almost every
/// operation the pump loop needs; this just avoids duplicating the stream
/// state machine for client vs. server.
enum Engine {
    Client(Box<ClientConnection>),
    Server(Box<ServerConnection>),
}

impl Engine {
    fn wants_read(&self) -> bool {
        match self {
            Engine::Client(c) => c.wants_read(),
            Engine::Server(c) => c.wants_read(),
        }
    }

    fn wants_write(&self) -> bool {
        match self {
            Engine::Client(c) => c.wants_write(),
            Engine::Server(c) => c.wants_write(),
        }
    }

    fn is_handshaking(&self) -> bool {
        match self {
            Engine::Client(c) => c.is_handshaking(),
            Engine::Server(c) => c.is_handshaking(),
        }
    }

    fn read_tls(&mut self, sock: &mut TcpStream) -> std::io::Result<usize> {
        match self {
            Engine::Client(c) => c.read_tls(sock),
            Engine::Server(c) => c.read_tls(sock),
        }
    }

    fn write_tls(&mut self, sock: &mut TcpStream) -> std::io::Result<usize> {
        match self {
            Engine::Client(c) => c.write_tls(sock),
            Engine::Server(c) => c.write_tls(sock),
        }
    }

    fn process_new_packets(&mut self) -> std::result::Result<rustls::IoState, rustls::Error> {
        match self {
            Engine::Client(c) => c.process_new_packets(),
            Engine::Server(c) => c.process_new_packets(),
        }
    }

    fn reader_read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Engine::Client(c) => c.reader().read(buf),
            Engine::Server(c) => c.reader().read(buf),
        }
    }

    fn writer_write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Engine::Client(c) => c.writer().write(buf),
            Engine::Server(c) => c.writer().write(buf),
        }
    }

    fn send_close_notify(&mut self) {
        match self {
            Engine::Client(c) => c.send_close_notify(),
            Engine::Server(c) => c.send_close_notify(),
        }
    }

    fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        match self {
            Engine::Client(c) => c.peer_certificates(),
            Engine::Server(c) => c.peer_certificates(),
        }
    }

    /// Requests a TLS 1.3 key update from the peer, the modern stand-in
    /// for TLS 1.2 renegotiation: it forces a sub-handshake exchange
    /// concurrent with whatever application data is in flight, which is
    /// exactly the scenario the `rx_want`/`tx_want` clearing discipline
    /// exists to survive. Only used by tests.
    #[cfg(test)]
    fn refresh_traffic_keys(&mut self) -> std::result::Result<(), rustls::Error> {
        match self {
            Engine::Client(c) => c.refresh_traffic_keys(),
            Engine::Server(c) => c.refresh_traffic_keys(),
        }
    }
}

/// An opaque snapshot of the engine's progress, compared before/after a
/// read or write to decide whether the *other* direction's want should be
/// cleared (see the module docs on the rx_want/tx_want discipline). rustls
/// exposes no single integer for "has the handshake state machine
/// advanced," so this is synthesized from whether the engine is still
/// handshaking plus a monotonic counter of packets successfully processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EngineState {
    handshaking: bool,
    packets_processed: u64,
}

/// The capability trait exposed to the (out-of-scope) stream framework:
/// connect, full-duplex I/O, and wait computation for an external poll
/// loop. Every method is non-blocking and edge-triggered; callers retry
/// on [`Error::WouldBlock`] once the `WaitEvent` it implies is satisfied.
pub trait Stream {
    /// Drives TCP connect and the TLS handshake forward. Idempotent;
    /// callers invoke it until it returns `Ok(())` or a hard error.
    fn connect(&mut self) -> Result<()>;

    /// Reads decrypted application data. `Ok(0)` means the peer closed the
    /// connection cleanly (EOF); it is never reported as an error.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Queues `data` for transmission. Returns the number of bytes
    /// accepted (always `data.len()` on success, `0` on `WouldBlock`).
    /// A second call while a send is already queued returns `WouldBlock`
    /// without touching the queued buffer.
    fn send(&mut self, data: &[u8]) -> Result<usize>;

    /// Drains any queued TLS record I/O without requiring new application
    /// data; the counterpart to `send`'s "may finish in the background"
    /// contract.
    fn run(&mut self) -> Result<()>;

    /// Runs `run` and reports whether the caller should wait before
    /// calling again.
    fn run_wait(&mut self) -> WaitEvent;

    fn wait_connect(&self) -> WaitEvent;
    fn wait_recv(&self) -> WaitEvent;
    fn wait_send(&self) -> WaitEvent;

    /// Sends a TLS close_notify (best-effort) and releases the socket.
    fn close(&mut self);
}

/// A single TLS connection: the Rust realization of the original
/// adapter's `ssl` vtable.
pub struct TlsStream {
    socket: TcpStream,
    engine: Engine,
    role: Role,
    phase: Phase,
    rx_want: Want,
    tx_want: Want,
    txbuf: Option<Vec<u8>>,
    name: String,
    /// Captured at construction, not re-derived from global state: true
    /// only if this session itself was opened while bootstrap mode was
    /// pending.
    opened_in_bootstrap_mode: bool,
    packets_processed: u64,
}

impl TlsStream {
    pub(crate) fn new_client(
        socket: TcpStream,
        conn: ClientConnection,
        name: String,
        opened_in_bootstrap_mode: bool,
        already_connected: bool,
    ) -> Self {
        TlsStream {
            socket,
            engine: Engine::Client(Box::new(conn)),
            role: Role::Client,
            phase: if already_connected { Phase::TlsHandshake } else { Phase::TcpConnecting },
            rx_want: Want::Nothing,
            tx_want: Want::Nothing,
            txbuf: None,
            name,
            opened_in_bootstrap_mode,
            packets_processed: 0,
        }
    }

    pub(crate) fn new_server(socket: TcpStream, conn: ServerConnection, name: String) -> Self {
        TlsStream {
            socket,
            engine: Engine::Server(Box::new(conn)),
            role: Role::Server,
            phase: Phase::TlsHandshake,
            rx_want: Want::Nothing,
            tx_want: Want::Nothing,
            txbuf: None,
            name,
            opened_in_bootstrap_mode: false,
            packets_processed: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    fn engine_state(&self) -> EngineState {
        EngineState { handshaking: self.engine.is_handshaking(), packets_processed: self.packets_processed }
    }

    /// One iteration of the raw non-blocking pump: write any pending TLS
    /// records, then read and process whatever is available. Returns the
    /// engine's want-read/want-write state *after* pumping, for the
    /// caller to translate into a `Want`.
    fn pump(&mut self) -> Result<()> {
        if self.engine.wants_write() {
            match self.engine.write_tls(&mut self.socket) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(map_io_error(e)),
            }
        }

        if self.engine.wants_read() {
            match self.engine.read_tls(&mut self.socket) {
                Ok(0) => return Err(Error::protocol("unexpected close during TLS record read")),
                Ok(_) => {
                    self.engine.process_new_packets().map_err(|e| {
                        rate_limited_warn!(IO_ERRORS, error = %e, stream = %self.name, "TLS protocol error");
                        Error::from(e)
                    })?;
                    self.packets_processed = self.packets_processed.wrapping_add(1);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(map_io_error(e)),
            }
        }

        Ok(())
    }

    fn current_want(&self) -> Want {
        match (self.engine.wants_read(), self.engine.wants_write()) {
            (true, _) => Want::Reading,
            (false, true) => Want::Writing,
            (false, false) => Want::Nothing,
        }
    }

    fn drive_handshake(&mut self) -> Result<()> {
        self.pump()?;

        if self.engine.is_handshaking() {
            self.rx_want = self.current_want();
            return Err(Error::WouldBlock);
        }

        if self.opened_in_bootstrap_mode {
            let chain = self.engine.peer_certificates().map(<[_]>::to_vec);
            return Err(bootstrap::complete(chain.as_deref()));
        }

        if crate::config::is_bootstrap_pending() {
            // Another connection won the bootstrap race while we were
            // mid-handshake; we never get to keep this session.
            return Err(Error::protocol("bootstrap completed on another connection; reconnect"));
        }

        self.phase = Phase::Open;
        Ok(())
    }
}

#[cfg(test)]
impl TlsStream {
    /// Test-only hook to kick off a TLS 1.3 key update mid-stream, the
    /// modern stand-in for a TLS 1.2-style renegotiation trigger.
    pub(crate) fn request_key_update(&mut self) -> Result<()> {
        self.engine.refresh_traffic_keys().map_err(Error::from)
    }

    pub(crate) fn rx_want(&self) -> Want {
        self.rx_want
    }

    pub(crate) fn tx_want(&self) -> Want {
        self.tx_want
    }
}

fn map_io_error(e: std::io::Error) -> Error {
    Error::Io(e)
}

impl Stream for TlsStream {
    fn connect(&mut self) -> Result<()> {
        match self.phase {
            Phase::TcpConnecting => {
                match self.socket.take_error() {
                    Ok(None) => {
                        self.phase = Phase::TlsHandshake;
                        self.drive_handshake()
                    }
                    Ok(Some(e)) => Err(Error::Io(e)),
                    Err(e) => Err(Error::Io(e)),
                }
            }
            Phase::TlsHandshake => self.drive_handshake(),
            Phase::Open => Ok(()),
            Phase::Closed => Err(Error::protocol("stream is closed")),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        debug_assert!(!buf.is_empty(), "recv called with a zero-length buffer");
        if buf.is_empty() {
            return Ok(0);
        }
        if self.phase != Phase::Open {
            return Err(Error::protocol("recv called before handshake completed"));
        }

        let before = self.engine_state();
        let result = self.pump().and_then(|()| match self.engine.reader_read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(Error::WouldBlock),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(0),
            Err(e) => Err(map_io_error(e)),
        });

        let after = self.engine_state();
        if after != before {
            self.tx_want = Want::Nothing;
        }

        match result {
            Ok(n) => {
                self.rx_want = Want::Nothing;
                Ok(n)
            }
            Err(Error::WouldBlock) => {
                self.rx_want = self.current_want();
                Err(Error::WouldBlock)
            }
            Err(e) => {
                self.rx_want = Want::Nothing;
                Err(e)
            }
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<usize> {
        if self.phase != Phase::Open {
            return Err(Error::protocol("send called before handshake completed"));
        }
        if self.txbuf.is_some() {
            return Err(Error::WouldBlock);
        }
        self.txbuf = Some(data.to_vec());
        match self.drain_txbuf() {
            Ok(()) => Ok(data.len()),
            Err(Error::WouldBlock) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn run(&mut self) -> Result<()> {
        if self.phase != Phase::Open {
            return self.connect();
        }
        self.drain_txbuf()
    }

    fn run_wait(&mut self) -> WaitEvent {
        match self.run() {
            Ok(()) => WaitEvent::Immediate,
            Err(Error::WouldBlock) => self.wait_send(),
            Err(_) => WaitEvent::None,
        }
    }

    fn wait_connect(&self) -> WaitEvent {
        match self.phase {
            Phase::TcpConnecting => WaitEvent::Writable(self.fd()),
            Phase::TlsHandshake => self.rx_want.to_wait_event(self.fd()),
            Phase::Open => WaitEvent::Immediate,
            Phase::Closed => WaitEvent::None,
        }
    }

    fn wait_recv(&self) -> WaitEvent {
        if self.phase == Phase::Closed {
            return WaitEvent::None;
        }
        self.rx_want.to_wait_event(self.fd())
    }

    fn wait_send(&self) -> WaitEvent {
        if self.phase == Phase::Closed {
            return WaitEvent::None;
        }
        self.tx_want.to_wait_event(self.fd())
    }

    fn close(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        self.engine.send_close_notify();
        let _ = self.pump();
        let _ = self.socket.shutdown(std::net::Shutdown::Both);
        self.phase = Phase::Closed;
    }
}

impl TlsStream {
    /// Hands as much of `txbuf` as possible to the TLS engine and pumps the
    /// socket, exactly mirroring `recv`'s discipline with the directions
    /// swapped: the engine-state snapshot spans the same `pump` call that
    /// actually touches the socket (not just the plaintext buffering call),
    /// since that's where a renegotiation sub-handshake can genuinely make
    /// progress — and `tx_want` is set on every return path, not just the
    /// would-block one, so a completed drain can't leave a stale want
    /// behind for a later `wait_send` to misreport.
    ///
    /// Reports success only once the engine has *no* outbound TLS records
    /// left to write, not merely once `txbuf` is empty: a `send` can buffer
    /// plaintext into the engine faster than the socket accepts it, and
    /// `run`/`run_wait` are the only thing that ever comes back to flush
    /// what's left once `txbuf` itself has already gone to `None`.
    fn drain_txbuf(&mut self) -> Result<()> {
        loop {
            if let Some(buf) = self.txbuf.as_ref() {
                if buf.is_empty() {
                    self.txbuf = None;
                    continue;
                }

                let before = self.engine_state();
                let write_result = self.engine.writer_write(buf);
                let pump_result = self.pump();
                let after = self.engine_state();
                if after != before {
                    self.rx_want = Want::Nothing;
                }

                if let Err(e) = pump_result {
                    self.txbuf = None;
                    self.tx_want = Want::Nothing;
                    return Err(e);
                }

                match write_result {
                    // rustls signals a full outbound buffer (its default
                    // 64 KiB cap) with `Ok(0)`, not `WouldBlock`. That's
                    // the engine blocking just as surely as a socket
                    // `WouldBlock`; treating it as progress would spin
                    // this loop forever over an unchanged buffer.
                    Ok(0) => {
                        self.tx_want = self.current_want();
                        return Err(Error::WouldBlock);
                    }
                    Ok(n) => {
                        if let Some(buf) = self.txbuf.as_mut() {
                            buf.drain(..n);
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        self.tx_want = self.current_want();
                        return Err(Error::WouldBlock);
                    }
                    Err(e) => {
                        self.txbuf = None;
                        self.tx_want = Want::Nothing;
                        return Err(map_io_error(e));
                    }
                }
                continue;
            }

            // No new plaintext queued. The engine may still be holding TLS
            // records an earlier call only partially flushed to the
            // socket; keep pumping until it genuinely has nothing left to
            // write, or a `send` that returned 0 can stall forever with no
            // caller left holding a `txbuf` to retry draining.
            if !self.engine.wants_write() {
                self.tx_want = Want::Nothing;
                return Ok(());
            }

            let before = self.engine_state();
            let pump_result = self.pump();
            let after = self.engine_state();
            if after != before {
                self.rx_want = Want::Nothing;
            }
            if let Err(e) = pump_result {
                self.tx_want = Want::Nothing;
                return Err(e);
            }

            if self.engine.wants_write() {
                self.tx_want = self.current_want();
                return Err(Error::WouldBlock);
            }
            self.tx_want = Want::Nothing;
            return Ok(());
        }
    }
}

pub(crate) fn crypto_provider_arc() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(crate::context::crypto_provider())
}
