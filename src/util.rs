//! Small helpers shared by the active and passive stream constructors.

use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::{Error, Result};

/// The conventional OpenFlow-over-TLS port.
pub const DEFAULT_OFP_SSL_PORT: u16 = 6633;

/// Parses a `host[:port]` suffix, applying `default_port` when no port is
/// given, and resolves it to a concrete socket address.
///
/// Accepts bracketed IPv6 literals (`[::1]:6633`) as well as bare
/// hostnames and IPv4 literals.
pub fn parse_target(target: &str, default_port: u16) -> Result<SocketAddr> {
    let with_port = if target.starts_with('[') && !target.contains("]:") {
        // A bracketed IPv6 literal with no port, e.g. `[::1]`.
        format!("{target}:{default_port}")
    } else if !target.starts_with('[') && target.matches(':').count() > 1 {
        // An unbracketed IPv6 literal with no port, e.g. `::1`. Bracket it
        // so appending `:<port>` doesn't produce an unparseable address.
        format!("[{target}]:{default_port}")
    } else {
        match target.rsplit_once(':') {
            Some((_host, port)) if port.parse::<u16>().is_ok() => target.to_string(),
            _ => format!("{target}:{default_port}"),
        }
    };

    with_port
        .to_socket_addrs()
        .map_err(Error::Io)?
        .next()
        .ok_or_else(|| Error::protocol(format!("could not resolve `{target}`")))
}

/// Formats a human-readable connection name from a local/peer address pair,
/// in the `class:peer-ip:peer-port` shape the stream framework expects for
/// diagnostics.
///
/// The caller must pass an address obtained from the socket itself (e.g.
/// `TcpStream::peer_addr` or `TcpListener::local_addr`), never one computed
/// before the socket was bound or connected, or the printed address won't
/// match what the kernel actually assigned.
pub fn format_peer_name(class: &str, peer: SocketAddr) -> String {
    format!("{class}:{ip}:{port}", ip = peer.ip(), port = peer.port())
}
