//! Loading and validating the private key, leaf certificate, and CA
//! certificates that make up the process's TLS identity.
//!
//! Grounded in the same `rustls-pemfile` + `x509-parser` combination the
//! teacher's certificate resolver and parser use, generalized from a
//! single server-side cert chain to the three independent files (private
//! key, own certificate, CA certificate) the adapter is configured with.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rustls::sign::{any_supported_type, CertifiedKey};
use rustls::RootCertStore;
use sha1::{Digest, Sha1};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{Error, Result};

/// Loads every certificate in a PEM file into a `rustls` certificate chain.
pub(crate) fn load_cert_chain(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(Error::Io)
}

/// Loads the first private key found in a PEM file (PKCS#8, PKCS#1, or
/// SEC1), in whichever encoding it's stored.
pub(crate) fn load_private_key(path: &Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(Error::Io)?
        .ok_or_else(|| Error::NotConfigured("no private key found in configured key file"))
}

/// Loads a key and certificate chain pair and confirms the key signs for
/// the leaf certificate, matching the original adapter's
/// `SSL_CTX_check_private_key` call made right after the files are read.
pub(crate) fn load_certified_key(key_path: &Path, cert_path: &Path) -> Result<CertifiedKey> {
    let chain = load_cert_chain(cert_path)?;
    if chain.is_empty() {
        return Err(Error::NotConfigured("configured certificate file contains no certificates"));
    }
    let key = load_private_key(key_path)?;
    let signing_key = any_supported_type(&key)
        .map_err(|e| Error::protocol(format!("unsupported private key: {e}")))?;

    let certified = CertifiedKey::new(chain, signing_key);
    certified
        .keys_match()
        .map_err(|_| Error::NotConfigured("private key does not match configured certificate"))?;

    log_leaf_identity(&certified.cert[0]);
    Ok(certified)
}

/// Loads a PEM file of one or more CA certificates into a fresh root
/// store, logging how many anchors were accepted and skipping (with a
/// warning) any entry `webpki` rejects outright.
pub(crate) fn load_root_store(path: &Path) -> Result<RootCertStore> {
    let chain = load_cert_chain(path)?;
    let mut store = RootCertStore::empty();
    let mut rejected = 0usize;
    for cert in chain {
        if store.add(cert).is_err() {
            rejected += 1;
        }
    }

    if store.is_empty() {
        return Err(Error::NotConfigured("configured CA certificate file contains no usable anchors"));
    }
    if rejected > 0 {
        tracing::warn!(rejected, path = %path.display(), "skipped unparseable CA certificate entries");
    }
    tracing::info!(anchors = store.len(), path = %path.display(), "loaded CA trust anchors");
    Ok(store)
}

/// Logs the SHA-1 fingerprint and subject common name of a leaf
/// certificate at startup, the same diagnostic the original adapter prints
/// once per process so an operator can confirm which identity is active
/// without having to run `openssl x509` by hand.
fn log_leaf_identity(der: &rustls::pki_types::CertificateDer<'_>) {
    let fingerprint = sha1_fingerprint(der.as_ref());

    match X509Certificate::from_der(der.as_ref()) {
        Ok((_, cert)) => {
            let cn = cert
                .subject()
                .iter_common_name()
                .next()
                .and_then(|cn| cn.as_str().ok())
                .unwrap_or("<no CN>");
            tracing::info!(%fingerprint, subject_cn = cn, "configured TLS identity");
        }
        Err(_) => {
            tracing::warn!(%fingerprint, "configured TLS identity (subject unparseable)");
        }
    }
}

pub(crate) fn sha1_fingerprint(der: &[u8]) -> String {
    let digest = Sha1::digest(der);
    digest.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(":")
}
