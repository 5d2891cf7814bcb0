//! Passive TLS listener: the Rust realization of the original adapter's
//! `pssl` vtable.

use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use rustls::server::WebPkiClientVerifier;
use rustls::ServerConnection;

use crate::context;
use crate::error::{Error, Result};
use crate::util::format_peer_name;
use crate::wait::WaitEvent;

use super::TlsStream;

/// A passive acceptor: binds once, accepts many non-blocking connections.
pub trait PassiveStream {
    /// Accepts one pending connection, if any, and wraps it as a
    /// server-role [`TlsStream`] in [`super::Phase::TlsHandshake`]. Returns
    /// [`Error::WouldBlock`] if nothing is pending.
    fn accept(&self) -> Result<TlsStream>;

    /// What the external poll loop should wait for before calling
    /// `accept` again.
    fn wait(&self) -> WaitEvent;

    fn close(self);
}

pub struct TlsListener {
    listener: TcpListener,
    name: String,
}

impl TlsListener {
    /// Binds `addr` and switches the listening socket to non-blocking
    /// mode. The listener's own diagnostic name is read back from the
    /// socket via `local_addr` — the actual bound address, rather than
    /// the caller-requested one — so a request to bind `0.0.0.0:0` or
    /// port `0` reports the address the kernel actually assigned.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let bound = listener.local_addr()?;
        Ok(TlsListener { listener, name: format_peer_name("pssl", bound) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

impl PassiveStream for TlsListener {
    fn accept(&self) -> Result<TlsStream> {
        let (socket, _) = match self.listener.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Err(Error::WouldBlock),
            Err(e) => return Err(Error::Io(e)),
        };

        socket.set_nonblocking(true)?;
        socket.set_nodelay(true)?;
        let peer = socket.peer_addr()?;
        let name = format_peer_name("ssl", peer);

        context::require_configured()?;
        let config = build_server_config()?;
        let conn = ServerConnection::new(config).map_err(Error::from)?;

        Ok(TlsStream::new_server(socket, conn, name))
    }

    fn wait(&self) -> WaitEvent {
        WaitEvent::Readable(self.fd())
    }

    fn close(self) {
        drop(self.listener);
    }
}

fn build_server_config() -> Result<Arc<rustls::ServerConfig>> {
    let inner = context::context().read().unwrap();
    let mut certified_key = inner
        .certified_key
        .clone()
        .ok_or(Error::NotConfigured("no server certificate configured"))?;
    certified_key.cert.extend(inner.extra_chain_certs.iter().cloned());
    let provider = Arc::new(context::crypto_provider());

    let client_verifier = WebPkiClientVerifier::builder_with_provider(
        Arc::new(inner.root_store.clone()),
        provider.clone(),
    )
    .build()
    .map_err(|e| Error::fatal(format!("could not build client verifier: {e}")))?;

    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| Error::fatal(format!("unsupported protocol version set: {e}")))?
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(certified_key.cert.clone(), certified_key.key.clone())
        .map_err(|e| Error::protocol(format!("could not build server config: {e}")))?;

    Ok(Arc::new(config))
}
