//! Active stream construction: resolve a target, start a non-blocking TCP
//! connect, and wrap it in a TLS client session.

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use rustls::ClientConnection;
use socket2::{Domain, Protocol, Socket, Type};

use crate::bootstrap;
use crate::context;
use crate::error::{Error, Result};
use crate::util::{format_peer_name, parse_target, DEFAULT_OFP_SSL_PORT};

use super::TlsStream;

/// Creates a socket in non-blocking mode and starts (but does not wait
/// out) a TCP connect to `addr`: `socket()`, then non-blocking mode, then
/// `connect()`, accepting `EINPROGRESS`/`WouldBlock` as "in progress, not
/// an error." `std::net::TcpStream::connect` alone can't express this — it
/// blocks until the handshake completes or fails, which is exactly the
/// blocking call this adapter exists to avoid.
fn nonblocking_connect(addr: SocketAddr) -> Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
        Err(e) => return Err(Error::Io(e)),
    }
    Ok(socket.into())
}

/// Opens an active TLS stream to `target` (`host[:port]`, default port
/// [`DEFAULT_OFP_SSL_PORT`]).
///
/// Fails immediately with [`Error::NotConfigured`] if the process-wide
/// context lacks a key, certificate, or (non-bootstrap) trust anchor.
/// Otherwise starts a non-blocking connect and returns a stream in
/// [`super::Phase::TcpConnecting`] (or already in
/// [`super::Phase::TlsHandshake`], for the rare case a loopback connect
/// completes synchronously).
pub fn open(target: &str) -> Result<TlsStream> {
    open_with_port(target, DEFAULT_OFP_SSL_PORT)
}

pub fn open_with_port(target: &str, default_port: u16) -> Result<TlsStream> {
    context::require_configured()?;

    let addr = parse_target(target, default_port)?;
    let socket = nonblocking_connect(addr)?;
    socket.set_nodelay(true)?;

    let peer = socket.peer_addr().unwrap_or(addr);
    let name = format_peer_name("ssl", peer);

    let bootstrap_pending = crate::config::is_bootstrap_pending();
    let conn = if bootstrap_pending {
        let certified_key = context::context().read().unwrap().certified_key.clone();
        let config = bootstrap::danger_client_config(super::crypto_provider_arc(), certified_key)?;
        build_client_connection(Arc::new(config), &addr)?
    } else {
        let config = build_verified_client_config()?;
        build_client_connection(config, &addr)?
    };

    // A non-blocking connect still frequently completes synchronously for
    // loopback/local targets; detect that by checking for a pending
    // `SO_ERROR` rather than assuming it's always still in progress.
    let already_connected = socket.take_error()?.is_none();

    Ok(TlsStream::new_client(socket, conn, name, bootstrap_pending, already_connected))
}

fn build_client_connection(config: Arc<rustls::ClientConfig>, addr: &std::net::SocketAddr) -> Result<ClientConnection> {
    let server_name = rustls::pki_types::ServerName::IpAddress(addr.ip().into());
    ClientConnection::new(config, server_name).map_err(Error::from)
}

fn build_verified_client_config() -> Result<Arc<rustls::ClientConfig>> {
    let inner = context::context().read().unwrap();
    let provider = super::crypto_provider_arc();
    let mut certified_key = inner
        .certified_key
        .clone()
        .ok_or(Error::NotConfigured("no client certificate configured"))?;
    certified_key.cert.extend(inner.extra_chain_certs.iter().cloned());

    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| Error::fatal(format!("unsupported protocol version set: {e}")))?
        .with_root_certificates(inner.root_store.clone())
        .with_client_auth_cert(certified_key.cert.clone(), certified_key.key.clone())
        .map_err(|e| Error::protocol(format!("could not build client config: {e}")))?;
    config.enable_sni = true;

    Ok(Arc::new(config))
}
