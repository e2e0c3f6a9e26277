//! Additive certificate trust.
//!
//! rustls takes exactly one server certificate verifier. To trust an
//! operator-pinned certificate *in addition to* the default web roots, the
//! verifiers are composed here: a chain is trusted when any manager accepts
//! it and rejected only when all of them reject it.

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{verify_server_cert_signed_by_trust_anchor, verify_server_name};
use rustls::crypto::{
    verify_tls12_signature, verify_tls13_signature, CryptoProvider, WebPkiSupportedAlgorithms,
};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, DistinguishedName, RootCertStore,
    SignatureScheme,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("failed to parse pinned certificate: {0}")]
    Pem(String),
    #[error("pinned certificate PEM contains no certificate")]
    NoCertificate,
    #[error("pinned certificate is not usable as a trust anchor: {0}")]
    Anchor(#[source] rustls::Error),
    #[error("TLS configuration failed: {0}")]
    Config(#[source] rustls::Error),
}

/// A server certificate validator.
pub trait TrustManager: fmt::Debug + Send + Sync {
    fn check_server_trusted(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> Result<(), rustls::Error>;

    /// Subjects of the certificate authorities this manager trusts.
    fn accepted_issuers(&self) -> Vec<DistinguishedName>;
}

/// Validates chains against a root store, optionally checking the host name.
pub struct RootStoreTrustManager {
    label: &'static str,
    roots: RootCertStore,
    verify_hostname: bool,
    algorithms: WebPkiSupportedAlgorithms,
}

impl RootStoreTrustManager {
    pub fn new(
        label: &'static str,
        roots: RootCertStore,
        provider: &CryptoProvider,
        verify_hostname: bool,
    ) -> Self {
        Self {
            label,
            roots,
            verify_hostname,
            algorithms: provider.signature_verification_algorithms,
        }
    }

    /// The Mozilla root program, as shipped by `webpki-roots`.
    pub fn platform_default(provider: &CryptoProvider, verify_hostname: bool) -> Self {
        let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::new("default", roots, provider, verify_hostname)
    }
}

impl fmt::Debug for RootStoreTrustManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootStoreTrustManager")
            .field("label", &self.label)
            .field("roots", &self.roots.len())
            .field("verify_hostname", &self.verify_hostname)
            .finish()
    }
}

impl TrustManager for RootStoreTrustManager {
    fn check_server_trusted(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> Result<(), rustls::Error> {
        let cert = ParsedCertificate::try_from(end_entity)?;
        verify_server_cert_signed_by_trust_anchor(
            &cert,
            &self.roots,
            intermediates,
            now,
            self.algorithms.all,
        )?;

        if self.verify_hostname {
            verify_server_name(&cert, server_name)?;
        }

        Ok(())
    }

    fn accepted_issuers(&self) -> Vec<DistinguishedName> {
        self.roots.subjects()
    }
}

/// Trusts exactly one operator-supplied certificate: either presented as the
/// server certificate itself, or as the root the server chain leads to.
/// Never checks the host name; the pin is the identity.
#[derive(Debug)]
pub struct PinnedCertificateTrustManager {
    pinned: CertificateDer<'static>,
    store: RootStoreTrustManager,
}

impl PinnedCertificateTrustManager {
    pub fn new(pinned: CertificateDer<'static>, provider: &CryptoProvider) -> Result<Self, TrustError> {
        let mut roots = RootCertStore::empty();
        roots.add(pinned.clone()).map_err(TrustError::Anchor)?;

        Ok(Self {
            pinned,
            store: RootStoreTrustManager::new("pinned", roots, provider, false),
        })
    }

    /// Uses the first certificate in `pem`.
    pub fn from_pem(pem: &str, provider: &CryptoProvider) -> Result<Self, TrustError> {
        let pinned = CertificateDer::pem_slice_iter(pem.as_bytes())
            .next()
            .ok_or(TrustError::NoCertificate)?
            .map_err(|err| TrustError::Pem(err.to_string()))?;

        Self::new(pinned, provider)
    }
}

impl TrustManager for PinnedCertificateTrustManager {
    fn check_server_trusted(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> Result<(), rustls::Error> {
        if end_entity.as_ref() == self.pinned.as_ref() {
            return Ok(());
        }

        self.store
            .check_server_trusted(end_entity, intermediates, server_name, now)
    }

    fn accepted_issuers(&self) -> Vec<DistinguishedName> {
        self.store.accepted_issuers()
    }
}

/// Ordered managers with accept-if-any semantics.
pub struct CompositeTrustManager {
    managers: Vec<Arc<dyn TrustManager>>,
    provider: Arc<CryptoProvider>,
}

impl CompositeTrustManager {
    pub fn new(managers: Vec<Arc<dyn TrustManager>>, provider: Arc<CryptoProvider>) -> Self {
        Self { managers, provider }
    }

    /// Default trust, plus the pinned certificate when one is configured.
    /// Pinning a certificate turns host name checks off for every manager.
    pub fn for_remote(pinned_pem: Option<&str>) -> Result<Self, TrustError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let mut managers: Vec<Arc<dyn TrustManager>> = vec![Arc::new(
            RootStoreTrustManager::platform_default(&provider, pinned_pem.is_none()),
        )];

        if let Some(pem) = pinned_pem {
            managers.push(Arc::new(PinnedCertificateTrustManager::from_pem(pem, &provider)?));
        }

        Ok(Self::new(managers, provider))
    }

    pub fn managers(&self) -> &[Arc<dyn TrustManager>] {
        &self.managers
    }

    /// A TLS client configuration that verifies servers with this manager.
    pub fn into_client_config(self) -> Result<ClientConfig, TrustError> {
        let provider = Arc::clone(&self.provider);

        Ok(ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(TrustError::Config)?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(self))
            .with_no_client_auth())
    }
}

impl fmt::Debug for CompositeTrustManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeTrustManager")
            .field("managers", &self.managers)
            .finish()
    }
}

impl TrustManager for CompositeTrustManager {
    fn check_server_trusted(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> Result<(), rustls::Error> {
        let mut first_error = None;

        for manager in &self.managers {
            match manager.check_server_trusted(end_entity, intermediates, server_name, now) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    log::debug!("{manager:?} rejected certificate chain: {err}");
                    first_error.get_or_insert(err);
                }
            }
        }

        Err(first_error.unwrap_or(rustls::Error::InvalidCertificate(
            CertificateError::ApplicationVerificationFailure,
        )))
    }

    fn accepted_issuers(&self) -> Vec<DistinguishedName> {
        self.managers
            .iter()
            .flat_map(|manager| manager.accepted_issuers())
            .collect()
    }
}

impl ServerCertVerifier for CompositeTrustManager {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.check_server_trusted(end_entity, intermediates, server_name, now)
            .map(|()| ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
