use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, Error as TlsError, RootCertStore,
    SignatureScheme,
};

use crate::fingerprint::{self, CertificateFingerprints};

/// Accepts a server certificate only if its SHA-512 fingerprint matches the
/// one on record for the host.
///
/// A mismatch (or no record at all) fails the handshake and keeps the
/// presented fingerprints so the caller can turn the failure into an
/// [`UntrustedCertificate`](crate::UntrustedCertificate) signal. When a CA
/// bundle is configured the chain is validated first; failures there are
/// ordinary certificate errors, not trust questions.
#[derive(Debug)]
pub struct PinningVerifier {
    expected: Option<String>,
    chain: Option<Arc<WebPkiServerVerifier>>,
    provider: Arc<CryptoProvider>,
    rejected: Mutex<Option<CertificateFingerprints>>,
}

impl PinningVerifier {
    pub fn new(expected: Option<&str>, provider: Arc<CryptoProvider>) -> Self {
        Self {
            expected: expected.map(str::to_string),
            chain: None,
            provider,
            rejected: Mutex::new(None),
        }
    }

    pub fn with_ca_roots(mut self, roots: RootCertStore) -> Result<Self> {
        let chain = WebPkiServerVerifier::builder_with_provider(
            Arc::new(roots),
            self.provider.clone(),
        )
        .build()
        .context("failed to build CA chain verifier")?;
        self.chain = Some(chain);
        Ok(self)
    }

    /// Fingerprints of a certificate this verifier refused as unknown.
    pub fn take_rejected(&self) -> Option<CertificateFingerprints> {
        self.rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        if let Some(chain) = &self.chain {
            chain.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;
        }

        let presented = CertificateFingerprints::of(end_entity.as_ref());
        let trusted = self
            .expected
            .as_deref()
            .is_some_and(|expected| fingerprint::matches(expected, &presented.long));
        if trusted {
            return Ok(ServerCertVerified::assertion());
        }

        *self.rejected.lock().unwrap_or_else(PoisonError::into_inner) = Some(presented);
        Err(TlsError::InvalidCertificate(
            CertificateError::ApplicationVerificationFailure,
        ))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
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
    ) -> Result<HandshakeSignatureValid, TlsError> {
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

pub fn default_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

pub fn client_config(verifier: Arc<PinningVerifier>) -> Result<ClientConfig> {
    let provider = verifier.provider.clone();
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("failed to select TLS protocol versions")?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Ok(config)
}

/// Loads PEM encoded CA certificates into a root store.
pub fn load_ca_roots(path: &Path) -> Result<RootCertStore> {
    let certs = CertificateDer::pem_file_iter(path)
        .with_context(|| format!("failed to open CA bundle {}", path.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse CA bundle {}", path.display()))?;
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        anyhow::bail!(
            "CA bundle {} has no usable certificates ({ignored} ignored)",
            path.display()
        );
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verify(verifier: &PinningVerifier, der: &[u8]) -> Result<ServerCertVerified, TlsError> {
        let cert = CertificateDer::from(der.to_vec());
        let name = ServerName::try_from("irc.example.net").expect("server name");
        verifier.verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
    }

    #[test]
    fn unknown_host_is_rejected_with_fingerprints() {
        let verifier = PinningVerifier::new(None, default_provider());
        assert!(verify(&verifier, b"presented-cert").is_err());

        let rejected = verifier.take_rejected().expect("fingerprints kept");
        assert_eq!(rejected, CertificateFingerprints::of(b"presented-cert"));
        assert!(verifier.take_rejected().is_none());
    }

    #[test]
    fn matching_pin_is_accepted() {
        let pin = CertificateFingerprints::of(b"presented-cert").long;
        let verifier = PinningVerifier::new(Some(&pin), default_provider());
        assert!(verify(&verifier, b"presented-cert").is_ok());
        assert!(verifier.take_rejected().is_none());
    }

    #[test]
    fn changed_certificate_is_rejected() {
        let pin = CertificateFingerprints::of(b"old-cert").long;
        let verifier = PinningVerifier::new(Some(&pin), default_provider());
        let err = verify(&verifier, b"new-cert").err().expect("must fail");
        assert!(matches!(err, TlsError::InvalidCertificate(_)));
        assert!(verifier.take_rejected().is_some());
    }

    #[test]
    fn builds_client_config() {
        let verifier = Arc::new(PinningVerifier::new(None, default_provider()));
        assert!(client_config(verifier).is_ok());
    }
}
