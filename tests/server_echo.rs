//! End-to-end scenario: the passive (listening) side accepting a
//! mutually-authenticated TLS connection from a bare `rustls` peer and
//! exchanging data in both directions.

mod support;

use std::net::SocketAddr;
use std::time::Duration;

use stream_ssl::stream::listener::{PassiveStream, TlsListener};
use stream_ssl::{config, Error, Stream};

#[test]
fn accepts_and_echoes_with_mutual_auth() {
    let scratch = support::TempDir::new();
    let ca = support::generate_ca("test CA");
    let server_id = ca.issue_leaf("server");
    let client_id = ca.issue_leaf("client");

    support::write_file(&scratch.path("server.key"), &server_id.key_pem);
    support::write_file(&scratch.path("server.crt"), &server_id.cert_pem);
    support::write_file(&scratch.path("ca.crt"), &ca.issued.cert_pem);

    config::set_private_key_file(scratch.path("server.key")).expect("set key");
    config::set_certificate_file(scratch.path("server.crt")).expect("set cert");
    config::set_ca_cert_file(scratch.path("ca.crt"), false).expect("set ca");

    let listener = TlsListener::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap()).expect("bind");
    assert!(listener.name().starts_with("pssl:127.0.0.1:"));
    let addr: SocketAddr = listener.name().trim_start_matches("pssl:").parse().unwrap();

    let mut peer = support::RawPeerClient::connect(addr, ca.issued.cert_der, client_id.cert_der, client_id.key_der);

    let mut conn = support::retry_until(Duration::from_secs(5), || match listener.accept() {
        Ok(s) => Some(s),
        Err(e) if e.is_would_block() => None,
        Err(e) => panic!("accept failed: {e}"),
    });

    support::retry_until(Duration::from_secs(5), || {
        peer.pump_once();
        match conn.connect() {
            Ok(()) => Some(()),
            Err(e) if e.is_would_block() => None,
            Err(e) => panic!("server handshake failed: {e}"),
        }
    });
    peer.drive_to_open(Duration::from_secs(5));

    peer.send_all(b"hello server");
    let mut buf = [0u8; 32];
    let n = support::retry_until(Duration::from_secs(5), || match conn.recv(&mut buf) {
        Ok(n) => Some(n),
        Err(e) if e.is_would_block() => None,
        Err(e) => panic!("recv failed: {e}"),
    });
    assert_eq!(&buf[..n], b"hello server");

    assert_eq!(conn.send(b"hi").unwrap(), 2);
    let echoed = peer.recv_exact(2, Duration::from_secs(5));
    assert_eq!(&echoed, b"hi");

    conn.close();
    match conn.recv(&mut buf) {
        Err(Error::Protocol(_)) => {}
        other => panic!("recv on a closed stream should reject, got {other:?}"),
    }
}
