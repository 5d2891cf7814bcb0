//! Process-wide configuration entry points.
//!
//! These mirror the original adapter's free-function configuration API
//! (`stream_ssl_set_private_key_file`, `stream_ssl_set_certificate_file`,
//! `stream_ssl_set_ca_cert_file`, `stream_ssl_set_peer_ca_cert_file`): a
//! small, order-tolerant set of setters called once at process startup,
//! well before the first stream is opened, rather than a builder passed to
//! every constructor. `init` exists to make the zero-argument bootstrap
//! case (CA discovered on first connection) ergonomic even when no paths
//! are known in advance.

use std::path::{Path, PathBuf};

use crate::context::{self, prefill_dh_cache};
use crate::credentials;
use crate::error::Result;

/// Prepares the process-wide context. Safe to call multiple times; later
/// calls are no-ops once configuration has happened. Not required before
/// calling the `set_*` functions, but calling it first ensures the
/// DH-eligibility cache (see [`context::DhParams`]) is warm before the
/// first handshake.
pub fn init() {
    let inner = context::context().read().unwrap();
    prefill_dh_cache(&inner.dh_cache);
}

/// Configures the private key used for this process's own TLS identity.
/// Takes effect the next time the certificate file is also set (or
/// immediately, if it already has been).
pub fn set_private_key_file(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref().to_path_buf();
    {
        let mut inner = context::context().write().unwrap();
        inner.private_key_path = Some(path);
    }
    try_build_certified_key()
}

/// Configures this process's own leaf certificate (and any intermediates
/// in the same file). Takes effect the next time the private key is also
/// set (or immediately, if it already has been).
pub fn set_certificate_file(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref().to_path_buf();
    {
        let mut inner = context::context().write().unwrap();
        inner.certificate_path = Some(path);
    }
    try_build_certified_key()
}

fn try_build_certified_key() -> Result<()> {
    let (key_path, cert_path) = {
        let inner = context::context().read().unwrap();
        match (&inner.private_key_path, &inner.certificate_path) {
            (Some(k), Some(c)) => (k.clone(), c.clone()),
            _ => return Ok(()),
        }
    };

    let certified = credentials::load_certified_key(&key_path, &cert_path)?;
    let mut inner = context::context().write().unwrap();
    inner.certified_key = Some(certified);
    Ok(())
}

/// Configures the CA certificate(s) this process trusts for peer
/// verification.
///
/// If `bootstrap` is true and `path` does not yet exist, this does not
/// fail: instead the context enters bootstrap mode, and the first client
/// stream opened afterward will perform the trust-on-first-use dance
/// described in [`crate::bootstrap`], eventually creating `path` itself.
/// If `path` already exists, it's loaded immediately regardless of
/// `bootstrap`, matching the original adapter's "bootstrap is a no-op
/// once the file is there" behavior.
pub fn set_ca_cert_file(path: impl AsRef<Path>, bootstrap: bool) -> Result<()> {
    let path = path.as_ref().to_path_buf();

    if bootstrap && !path.exists() {
        tracing::info!(path = %path.display(), "CA file absent, entering bootstrap mode");
        let mut inner = context::context().write().unwrap();
        inner.ca_cert_path = Some(path.clone());
        inner.bootstrap = Some(context::BootstrapState { ca_path: None });
        return Ok(());
    }

    let store = credentials::load_root_store(&path)?;
    let mut inner = context::context().write().unwrap();
    inner.ca_cert_path = Some(path);
    inner.root_store = store;
    inner.bootstrap = None;
    Ok(())
}

/// True if the context is currently waiting on the bootstrap CA protocol
/// to install its first trust anchor.
pub fn is_bootstrap_pending() -> bool {
    let inner = context::context().read().unwrap();
    inner.bootstrap.as_ref().is_some_and(|b| b.ca_path.is_none())
}

/// Configures extra certificates appended to the chain this process
/// presents to its peers, beyond the leaf chain from
/// [`set_certificate_file`]. Lets a server hand clients the intermediates
/// needed to build a path to a CA those clients trust, without having to
/// bake them into the leaf certificate file itself.
pub fn set_peer_ca_cert_file(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref().to_path_buf();
    let extra = credentials::load_cert_chain(&path)?;
    let mut inner = context::context().write().unwrap();
    inner.peer_ca_cert_path = Some(path);
    inner.extra_chain_certs = extra;
    Ok(())
}

/// True once a private key, certificate, and at least one trust anchor
/// have all been successfully configured.
pub fn is_configured() -> bool {
    context::context().read().unwrap().is_configured()
}

/// The path most recently installed as the CA trust anchor, whether set
/// explicitly or discovered through the bootstrap protocol.
pub fn ca_cert_path() -> Option<PathBuf> {
    context::context().read().unwrap().ca_cert_path.clone()
}

/// An explicit, owned description of the paths the free-function setters
/// above would otherwise apply one at a time.
///
/// Building an `Options` and calling [`Options::apply`] has exactly the
/// same effect as calling the matching `set_*` functions in sequence; this
/// exists for callers that assemble their TLS configuration from a single
/// place (an embedding application's own config struct, or a test fixture)
/// rather than as a sequence of imperative calls at startup.
#[derive(Debug, Clone, Default)]
pub struct Options {
    private_key_path: Option<PathBuf>,
    certificate_path: Option<PathBuf>,
    ca_cert_path: Option<(PathBuf, bool)>,
    peer_ca_cert_path: Option<PathBuf>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn private_key_file(mut self, path: impl AsRef<Path>) -> Self {
        self.private_key_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn certificate_file(mut self, path: impl AsRef<Path>) -> Self {
        self.certificate_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn ca_cert_file(mut self, path: impl AsRef<Path>, bootstrap: bool) -> Self {
        self.ca_cert_path = Some((path.as_ref().to_path_buf(), bootstrap));
        self
    }

    pub fn peer_ca_cert_file(mut self, path: impl AsRef<Path>) -> Self {
        self.peer_ca_cert_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Applies every path configured on this `Options` to the process-wide
    /// context, in the same key-then-cert-then-ca-then-peer-ca order a
    /// caller using the free functions directly would.
    pub fn apply(self) -> Result<()> {
        if let Some(path) = self.private_key_path {
            set_private_key_file(path)?;
        }
        if let Some(path) = self.certificate_path {
            set_certificate_file(path)?;
        }
        if let Some((path, bootstrap)) = self.ca_cert_path {
            set_ca_cert_file(path, bootstrap)?;
        }
        if let Some(path) = self.peer_ca_cert_path {
            set_peer_ca_cert_file(path)?;
        }
        Ok(())
    }
}
