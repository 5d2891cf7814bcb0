//! Process-wide TLS configuration, shared by every active and passive
//! stream the process opens.
//!
//! There is exactly one context per process, matching the original
//! adapter's single set of "the" private key, "the" certificate, and "the"
//! CA. It's built lazily on first use and is immutable after the fields
//! that are set have been set: nothing here is designed to be reconfigured
//! mid-run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock, RwLock};

use rustls::crypto::CryptoProvider;
use rustls::RootCertStore;

use crate::error::{Error, Result};

/// A cached record of which key-exchange groups this process would consider
/// eligible for a given modulus size, standing in for the original's DH
/// parameter pool. rustls negotiates key exchange itself; nothing here
/// gates a live handshake. It exists purely so callers migrating from the
/// modulus-size-indexed API have somewhere to land.
#[derive(Debug, Clone, Copy)]
pub struct DhParams {
    pub modulus_bits: u32,
}

pub(crate) struct BootstrapState {
    /// Set once bootstrap mode has produced (or found) a CA file on disk.
    pub(crate) ca_path: Option<PathBuf>,
}

pub(crate) struct ContextInner {
    pub(crate) private_key_path: Option<PathBuf>,
    pub(crate) certificate_path: Option<PathBuf>,
    pub(crate) ca_cert_path: Option<PathBuf>,
    pub(crate) peer_ca_cert_path: Option<PathBuf>,

    pub(crate) certified_key: Option<rustls::sign::CertifiedKey>,
    pub(crate) root_store: RootCertStore,

    /// Extra chain certificates appended to the leaf chain this process
    /// presents to a peer during the handshake, beyond what's in
    /// `certificate_path` itself. Set via
    /// [`crate::config::set_peer_ca_cert_file`].
    pub(crate) extra_chain_certs: Vec<rustls::pki_types::CertificateDer<'static>>,

    pub(crate) bootstrap: Option<BootstrapState>,

    pub(crate) dh_cache: Mutex<HashMap<u32, DhParams>>,
}

impl ContextInner {
    fn empty() -> Self {
        ContextInner {
            private_key_path: None,
            certificate_path: None,
            ca_cert_path: None,
            peer_ca_cert_path: None,
            certified_key: None,
            root_store: RootCertStore::empty(),
            extra_chain_certs: Vec::new(),
            bootstrap: None,
            dh_cache: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn is_configured(&self) -> bool {
        let ca_ready = !self.root_store.is_empty() || self.bootstrap_pending();
        self.certified_key.is_some() && ca_ready
    }

    /// True while the context is waiting on the bootstrap CA protocol to
    /// install its first trust anchor (set, file absent, not yet won).
    pub(crate) fn bootstrap_pending(&self) -> bool {
        self.bootstrap.as_ref().is_some_and(|b| b.ca_path.is_none())
    }
}

/// The process-wide context, behind a lock so configuration calls and
/// stream construction can interleave safely. `RwLock` rather than `Mutex`
/// because reads (every stream construction) vastly outnumber writes
/// (one-time `config::set_*` calls).
static CONTEXT: OnceLock<RwLock<ContextInner>> = OnceLock::new();

pub(crate) fn context() -> &'static RwLock<ContextInner> {
    CONTEXT.get_or_init(|| RwLock::new(ContextInner::empty()))
}

/// The crypto provider shared by every `rustls::ClientConfig` /
/// `ServerConfig` this crate builds. Installed once per process via
/// `CryptoProvider::install_default`, matching the pattern rustls itself
/// recommends for applications that don't otherwise pick a default.
pub(crate) fn crypto_provider() -> CryptoProvider {
    if let Some(installed) = CryptoProvider::get_default() {
        return installed.clone();
    }
    let provider = rustls::crypto::ring::default_provider();
    // `install_default` only fails if another thread won the race; either
    // way there is now a default installed, so fetch it back out.
    let _ = CryptoProvider::install_default(provider);
    CryptoProvider::get_default()
        .expect("a default crypto provider is installed immediately above")
        .clone()
}

/// Prefills the DH-parameter-eligibility cache for the modulus sizes the
/// original adapter shipped built-in parameters for. Called once from
/// [`crate::config::init`].
pub(crate) fn prefill_dh_cache(cache: &Mutex<HashMap<u32, DhParams>>) {
    let mut cache = cache.lock().unwrap();
    for bits in [1024, 2048, 4096] {
        cache.entry(bits).or_insert(DhParams { modulus_bits: bits });
    }
}

/// Fails with [`Error::NotConfigured`] unless both a certified key and at
/// least one trust anchor have been installed.
pub(crate) fn require_configured() -> Result<()> {
    if context().read().unwrap().is_configured() {
        Ok(())
    } else {
        Err(Error::NotConfigured(
            "private key, certificate, and CA certificate must be configured before use",
        ))
    }
}
