//! Trust-on-first-use CA bootstrap.
//!
//! When a process is configured with `set_ca_cert_file(path, bootstrap:
//! true)` and `path` doesn't exist yet, the first client stream accepts
//! whatever certificate chain the peer offers, captures what it believes
//! is the peer's self-signed root, and persists it to `path` so every
//! subsequent connection (including this one's own retry) verifies
//! normally. The danger verifier below is the same shape as the
//! accept-anything verifier used to drive a raw non-blocking rustls
//! client without a trust store at all; here it's scoped to exactly one
//! session rather than the whole process.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};

use crate::context;
use crate::credentials::sha1_fingerprint;
use crate::error::{Error, Result};

/// Accepts any server certificate chain without validation. Used for
/// exactly one handshake, while a stream is in bootstrap mode; normal
/// sessions always build their `ClientConfig` with a real root store.
#[derive(Debug)]
pub(crate) struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        use SignatureScheme::*;
        vec![
            RSA_PKCS1_SHA1,
            ECDSA_SHA1_Legacy,
            RSA_PKCS1_SHA256,
            ECDSA_NISTP256_SHA256,
            RSA_PKCS1_SHA384,
            ECDSA_NISTP384_SHA384,
            RSA_PKCS1_SHA512,
            ECDSA_NISTP521_SHA512,
            RSA_PSS_SHA256,
            RSA_PSS_SHA384,
            RSA_PSS_SHA512,
            ED25519,
            ED448,
        ]
    }
}

/// Runs the bootstrap protocol against a just-completed handshake's peer
/// chain, per the stream's own `opened_in_bootstrap_mode` flag.
///
/// Always returns `Err` on success too: a won bootstrap still rejects the
/// current connection, by design, so the caller reconnects and performs a
/// fully verified session against the now-installed CA.
pub(crate) fn complete(peer_chain: Option<&[CertificateDer<'static>]>) -> Error {
    let ca_path = match context::context().read().unwrap().ca_cert_path.clone() {
        Some(p) => p,
        None => return Error::fatal("bootstrap mode active with no CA path configured"),
    };

    match try_install(&ca_path, peer_chain) {
        Ok(()) => Error::protocol("bootstrap CA installed; reconnect to verify"),
        Err(e) => {
            tracing::warn!(error = %e, "bootstrap CA install failed");
            Error::protocol(format!("bootstrap CA install failed: {e}"))
        }
    }
}

fn try_install(ca_path: &Path, peer_chain: Option<&[CertificateDer<'static>]>) -> Result<()> {
    let chain = peer_chain
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::protocol("peer presented no certificate chain during bootstrap"))?;

    // The candidate root is conventionally the last certificate in the
    // chain the peer sent (its own self-signed CA, if it sent one at all).
    let candidate = chain.last().expect("chain is non-empty");
    verify_self_signed(candidate)?;

    tracing::info!(
        fingerprint = %sha1_fingerprint(candidate.as_ref()),
        path = %ca_path.display(),
        "bootstrap candidate CA passed self-signed check"
    );

    write_ca_file_exclusive(ca_path, candidate)?;
    install_trust(ca_path)?;
    Ok(())
}

/// Confirms a candidate certificate's issuer equals its subject and that
/// its signature validates against its own public key — i.e. that it's
/// genuinely self-signed, not merely an intermediate the peer put last.
fn verify_self_signed(der: &CertificateDer<'_>) -> Result<()> {
    use x509_parser::prelude::{FromDer, X509Certificate};

    let (_, cert) = X509Certificate::from_der(der.as_ref())
        .map_err(|e| Error::protocol(format!("bootstrap candidate CA is not valid x509: {e}")))?;

    if cert.issuer() != cert.subject() {
        return Err(Error::protocol(
            "bootstrap candidate CA is not self-signed (issuer != subject); \
             peer likely omitted its root from the chain",
        ));
    }

    cert.verify_signature(None)
        .map_err(|e| Error::protocol(format!("bootstrap candidate CA signature does not validate: {e}")))?;

    Ok(())
}

/// Creates `path` with `O_CREAT|O_EXCL|O_WRONLY` mode `0o444` and writes
/// the candidate as PEM. `O_EXCL` makes exactly one concurrent bootstrap
/// attempt the winner; losers get `AlreadyExists` and are treated as "a
/// peer bootstrap won, nothing to do" rather than an error.
fn write_ca_file_exclusive(path: &Path, der: &CertificateDer<'_>) -> Result<()> {
    let mut file = match OpenOptions::new()
        .create_new(true)
        .write(true)
        .mode(0o444)
        .open(path)
    {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            tracing::info!(path = %path.display(), "bootstrap CA already installed by a concurrent winner");
            return Ok(());
        }
        Err(e) => return Err(Error::Io(e)),
    };

    let pem = pem_encode(der.as_ref());
    if let Err(e) = file.write_all(pem.as_bytes()) {
        drop(file);
        let _ = std::fs::remove_file(path);
        return Err(Error::Io(e));
    }

    Ok(())
}

fn pem_encode(der: &[u8]) -> String {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(der);
    let mut out = String::from("-----BEGIN CERTIFICATE-----\n");
    for chunk in encoded.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(chunk).expect("base64 output is ascii"));
        out.push('\n');
    }
    out.push_str("-----END CERTIFICATE-----\n");
    out
}

/// Loads the just-persisted (or concurrently-won) CA file into the global
/// trust store and flips the context out of bootstrap mode.
fn install_trust(path: &Path) -> Result<()> {
    let store = crate::credentials::load_root_store(path)?;
    let mut inner = context::context().write().unwrap();
    inner.root_store = store;
    inner.bootstrap = Some(context::BootstrapState { ca_path: Some(PathBuf::from(path)) });
    tracing::info!(path = %path.display(), "bootstrap CA installed; future connections verify normally");
    Ok(())
}

/// Builds a one-off `ClientConfig` that accepts any server certificate,
/// used only for the bootstrap session's handshake. Only the *peer*
/// verification is relaxed; this process still presents its own
/// configured client identity, same as a normal session.
pub(crate) fn danger_client_config(
    provider: Arc<rustls::crypto::CryptoProvider>,
    certified_key: Option<rustls::sign::CertifiedKey>,
) -> Result<rustls::ClientConfig> {
    let builder = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .expect("TLS12/TLS13 are both supported by the installed provider")
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert));

    let mut config = match certified_key {
        Some(key) => builder
            .with_client_auth_cert(key.cert.clone(), key.key.clone())
            .map_err(|e| Error::protocol(format!("could not build bootstrap client config: {e}")))?,
        None => builder.with_no_client_auth(),
    };
    config.enable_sni = true;
    Ok(config)
}
