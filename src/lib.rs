//! Non-blocking TLS transport for an OpenFlow-style control channel's
//! generic byte-stream abstraction.
//!
//! This crate provides an active (client-initiated) [`stream::TlsStream`]
//! and a passive (listening) [`stream::listener::TlsListener`], both built
//! on a [`std::net::TcpStream`] placed in non-blocking mode and a `rustls`
//! connection pumped directly against it — no async runtime involved. They
//! share one process-wide [`context`] of credentials and peer-verification
//! policy, configured once through the free functions in [`config`].
//!
//! The hard part lives in [`stream`]: computing, after every read or write
//! attempt, which direction (if any) the external poll loop should wait on
//! before retrying, without either deadlocking (waiting on the wrong
//! direction forever) or livelocking (spinning because both directions
//! always look ready). See the module documentation there for the
//! `rx_want`/`tx_want` discipline that makes this safe across arbitrary
//! TLS renegotiations.
//!
//! First connections can also bootstrap trust from an as-yet-unknown peer
//! CA; see [`bootstrap`] for the one-time trust-on-first-use protocol this
//! enables.
//!
//! # Example
//!
//! ```no_run
//! use stream_ssl::{config, stream::Stream};
//!
//! config::set_private_key_file("client.key")?;
//! config::set_certificate_file("client.crt")?;
//! config::set_ca_cert_file("ca.crt", false)?;
//!
//! let mut conn = stream_ssl::stream::client::open("switch.example.com:6633")?;
//! loop {
//!     match conn.connect() {
//!         Ok(()) => break,
//!         Err(e) if e.is_would_block() => continue,
//!         Err(e) => return Err(e.into()),
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod bootstrap;
pub mod config;
mod context;
mod credentials;
pub mod error;
mod ratelimit;
pub mod stream;
pub mod util;
pub mod wait;

pub use error::{Error, Result};
pub use stream::listener::{PassiveStream, TlsListener};
pub use stream::{Stream, TlsStream};
pub use util::DEFAULT_OFP_SSL_PORT;
pub use wait::{Want, WaitEvent};
