//! End-to-end scenario: two-party plaintext echo over TLS, exercising
//! this crate's active (client) side against a bare `rustls` peer.

mod support;

use std::time::Duration;

use stream_ssl::{config, stream::client, Stream};

#[test]
fn two_party_echo_over_tls() {
    let scratch = support::TempDir::new();
    let ca = support::generate_ca("test CA");
    let server_id = ca.issue_leaf("server");
    let client_id = ca.issue_leaf("client");

    support::write_file(&scratch.path("client.key"), &client_id.key_pem);
    support::write_file(&scratch.path("client.crt"), &client_id.cert_pem);
    support::write_file(&scratch.path("ca.crt"), &ca.issued.cert_pem);

    config::set_private_key_file(scratch.path("client.key")).expect("set key");
    config::set_certificate_file(scratch.path("client.crt")).expect("set cert");
    config::set_ca_cert_file(scratch.path("ca.crt"), false).expect("set ca");
    assert!(config::is_configured());

    let listener = support::free_loopback_listener();
    let addr = listener.local_addr().unwrap();

    let mut conn = client::open_with_port(&addr.to_string(), addr.port()).expect("open");
    let mut peer = support::RawPeerServer::accept_one(&listener, server_id.cert_der, server_id.key_der);

    support::retry_until(Duration::from_secs(5), || match conn.connect() {
        Ok(()) => Some(()),
        Err(e) if e.is_would_block() => None,
        Err(e) => panic!("client handshake failed: {e}"),
    });
    peer.drive_to_open(Duration::from_secs(5));

    assert_eq!(conn.send(b"ABC").unwrap(), 3);
    let received = peer.recv_exact(3, Duration::from_secs(5));
    assert_eq!(&received, b"ABC");

    peer.send_all(b"xyz\n");
    let mut buf = [0u8; 16];
    let n = support::retry_until(Duration::from_secs(5), || match conn.recv(&mut buf) {
        Ok(n) => Some(n),
        Err(e) if e.is_would_block() => None,
        Err(e) => panic!("recv failed: {e}"),
    });
    assert_eq!(&buf[..n], b"xyz\n");

    conn.close();
}
