//! Shared scaffolding for the end-to-end scenarios in `tests/`.
//!
//! Each test file in this directory is compiled as its own binary by
//! cargo, so each one gets an independent copy of the crate's
//! process-wide context — exactly one identity per test process, which
//! matches how the adapter is actually deployed (a controller process and
//! a switch process, never the same process acting as both). Where a
//! scenario needs "the other side" of a connection, these helpers drive a
//! bare `rustls` connection directly instead of a second instance of this
//! crate's context.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rcgen::{CertificateParams, DnType, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};

/// A throwaway CA plus a leaf certificate it issued, both as PEM on disk
/// and as in-memory DER for building a bare `rustls` peer.
pub struct Issued {
    pub cert_der: CertificateDer<'static>,
    pub cert_pem: String,
    pub key_der: PrivateKeyDer<'static>,
    pub key_pem: String,
}

/// A CA kept alive in its original `rcgen` form, so it can keep signing
/// leaf certificates for the lifetime of a test.
pub struct Ca {
    pub issued: Issued,
    cert: rcgen::Certificate,
    key: KeyPair,
}

pub fn generate_ca(cn: &str) -> Ca {
    let key = KeyPair::generate().expect("generate CA key");
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("CA params");
    params.distinguished_name.push(DnType::CommonName, cn);
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let cert = params.self_signed(&key).expect("self-sign CA");
    let issued = to_issued(&cert, &key);
    Ca { issued, cert, key }
}

impl Ca {
    pub fn issue_leaf(&self, cn: &str) -> Issued {
        let key = KeyPair::generate().expect("generate leaf key");
        let mut params = CertificateParams::new(vec!["127.0.0.1".to_string()]).expect("leaf params");
        params.distinguished_name.push(DnType::CommonName, cn);
        let cert = params.signed_by(&key, &self.cert, &self.key).expect("sign leaf");
        to_issued(&cert, &key)
    }
}

fn to_issued(cert: &rcgen::Certificate, key: &KeyPair) -> Issued {
    Issued {
        cert_der: cert.der().clone(),
        cert_pem: cert.pem(),
        key_der: PrivateKeyDer::Pkcs8(key.serialize_der().into()),
        key_pem: key.serialize_pem(),
    }
}

static TMP_COUNTER: AtomicU32 = AtomicU32::new(0);

/// A process-and-call unique scratch directory under the system temp dir,
/// cleaned up on drop.
pub struct TempDir(pub PathBuf);

impl TempDir {
    pub fn new() -> Self {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("stream-ssl-test-{}-{n}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create scratch dir");
        TempDir(dir)
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.0.join(name)
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

pub fn write_file(path: &Path, contents: &str) {
    std::fs::write(path, contents).expect("write fixture file");
}

/// Retries `f` until it returns `Some`, or panics after `timeout`. Stands
/// in for the external poll loop this crate doesn't provide itself.
pub fn retry_until<T>(timeout: Duration, mut f: impl FnMut() -> Option<T>) -> T {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(v) = f() {
            return v;
        }
        if Instant::now() > deadline {
            panic!("operation did not complete within {timeout:?}");
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// A bare, manually-pumped `rustls` server connection over a loopback
/// socket, playing the role of the OpenFlow switch/controller peer in
/// scenarios that exercise this crate's client side.
pub struct RawPeerServer {
    socket: TcpStream,
    conn: rustls::ServerConnection,
}

impl RawPeerServer {
    pub fn accept_one(listener: &TcpListener, cert: CertificateDer<'static>, key: PrivateKeyDer<'static>) -> Self {
        let socket = retry_until(Duration::from_secs(5), || match listener.accept() {
            Ok((socket, _)) => Some(socket),
            Err(e) if e.kind() == ErrorKind::WouldBlock => None,
            Err(e) => panic!("accept raw peer: {e}"),
        });
        socket.set_nonblocking(true).expect("nonblocking");
        Self::over(socket, cert, key)
    }

    pub fn over(socket: TcpStream, cert: CertificateDer<'static>, key: PrivateKeyDer<'static>) -> Self {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
            .expect("protocol versions")
            .with_no_client_auth()
            .with_single_cert(vec![cert], key)
            .expect("server config");

        let conn = rustls::ServerConnection::new(Arc::new(config)).expect("server conn");
        RawPeerServer { socket, conn }
    }

    pub fn pump_once(&mut self) {
        if self.conn.wants_write() {
            let _ = self.conn.write_tls(&mut self.socket);
        }
        if self.conn.wants_read() {
            match self.conn.read_tls(&mut self.socket) {
                Ok(_) => {
                    let _ = self.conn.process_new_packets();
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(_) => {}
            }
        }
    }

    pub fn drive_to_open(&mut self, timeout: Duration) {
        retry_until(timeout, || {
            self.pump_once();
            (!self.conn.is_handshaking()).then_some(())
        });
    }

    pub fn recv_exact(&mut self, len: usize, timeout: Duration) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let mut filled = 0;
        retry_until(timeout, || {
            self.pump_once();
            match self.conn.reader().read(&mut out[filled..]) {
                Ok(0) => None,
                Ok(n) => {
                    filled += n;
                    (filled == len).then_some(())
                }
                Err(_) => None,
            }
        });
        out
    }

    pub fn send_all(&mut self, data: &[u8]) {
        self.conn.writer().write_all(data).expect("queue plaintext");
        retry_until(Duration::from_secs(5), || {
            self.pump_once();
            (!self.conn.wants_write()).then_some(())
        });
    }
}

/// A bare, manually-pumped `rustls` client connection, used in scenarios
/// that exercise this crate's server (listener) side.
pub struct RawPeerClient {
    socket: TcpStream,
    conn: rustls::ClientConnection,
}

impl RawPeerClient {
    pub fn connect(addr: SocketAddr, trust: CertificateDer<'static>, cert: CertificateDer<'static>, key: PrivateKeyDer<'static>) -> Self {
        let socket = TcpStream::connect(addr).expect("connect raw peer");
        socket.set_nonblocking(true).expect("nonblocking");

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut roots = rustls::RootCertStore::empty();
        roots.add(trust).expect("trust server cert");
        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
            .expect("protocol versions")
            .with_root_certificates(roots)
            .with_client_auth_cert(vec![cert], key)
            .expect("client config");

        let conn = rustls::ClientConnection::new(Arc::new(config), ServerName::IpAddress(addr.ip().into()))
            .expect("client conn");
        RawPeerClient { socket, conn }
    }

    pub fn pump_once(&mut self) {
        if self.conn.wants_write() {
            let _ = self.conn.write_tls(&mut self.socket);
        }
        if self.conn.wants_read() {
            match self.conn.read_tls(&mut self.socket) {
                Ok(_) => {
                    let _ = self.conn.process_new_packets();
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(_) => {}
            }
        }
    }

    pub fn drive_to_open(&mut self, timeout: Duration) {
        retry_until(timeout, || {
            self.pump_once();
            (!self.conn.is_handshaking()).then_some(())
        });
    }

    pub fn recv_exact(&mut self, len: usize, timeout: Duration) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let mut filled = 0;
        retry_until(timeout, || {
            self.pump_once();
            match self.conn.reader().read(&mut out[filled..]) {
                Ok(0) => None,
                Ok(n) => {
                    filled += n;
                    (filled == len).then_some(())
                }
                Err(_) => None,
            }
        });
        out
    }

    pub fn send_all(&mut self, data: &[u8]) {
        self.conn.writer().write_all(data).expect("queue plaintext");
        retry_until(Duration::from_secs(5), || {
            self.pump_once();
            (!self.conn.wants_write()).then_some(())
        });
    }
}

pub fn free_loopback_listener() -> TcpListener {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.set_nonblocking(true).expect("nonblocking listener");
    listener
}
