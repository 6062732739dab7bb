//! TLS client configuration for outgoing dataway connections.

use std::sync::{Arc, OnceLock};

use datakit_error::{generic_error, GenericError};
use rustls::{
    client::{
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        Resumption,
    },
    crypto::{aws_lc_rs, verify_tls12_signature, verify_tls13_signature, CryptoProvider},
    pki_types::{CertificateDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use tracing::{debug, warn};

static PLATFORM_ROOT_CERT_STORE: OnceLock<Arc<RootCertStore>> = OnceLock::new();

const MAX_TLS12_RESUMPTION_SESSIONS: usize = 8;

/// A TLS client configuration builder.
///
/// All configurations use the AWS-LC cryptography provider. Server certificates are validated against the platform's
/// native root store unless another store is given, or verification is disabled entirely.
#[derive(Clone, Default)]
pub struct ClientTLSConfigBuilder {
    root_cert_store: Option<RootCertStore>,
    insecure_skip_verify: bool,
}

impl ClientTLSConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the root certificate store to validate server certificates against.
    pub fn with_root_cert_store(mut self, store: RootCertStore) -> Self {
        self.root_cert_store = Some(store);
        self
    }

    /// Disables server certificate verification.
    ///
    /// Signatures on the handshake are still checked, but any certificate chain is accepted for any server name.
    pub fn with_insecure_skip_verify(mut self, skip: bool) -> Self {
        self.insecure_skip_verify = skip;
        self
    }

    /// Builds the client TLS configuration.
    ///
    /// # Errors
    ///
    /// If the default protocol versions are not supported by the cryptography provider, an error will be returned.
    pub fn build(self) -> Result<ClientConfig, GenericError> {
        let provider = Arc::new(aws_lc_rs::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| generic_error!("Failed to select TLS protocol versions: {}", e))?;

        let mut config = if self.insecure_skip_verify {
            warn!("TLS server certificate verification is disabled.");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification { provider }))
                .with_no_client_auth()
        } else {
            let root_cert_store = match self.root_cert_store {
                Some(store) => Arc::new(store),
                None => platform_root_cert_store(),
            };
            builder.with_root_certificates(root_cert_store).with_no_client_auth()
        };

        config.resumption = Resumption::in_memory_sessions(MAX_TLS12_RESUMPTION_SESSIONS);

        Ok(config)
    }
}

/// Returns the root certificate store loaded from the platform, loading it on first use.
///
/// `SSL_CERT_FILE` and `SSL_CERT_DIR` override the platform store when set. If nothing could be loaded, an empty store
/// is used: plain HTTP destinations keep working, and HTTPS destinations fail certificate validation.
pub fn platform_root_cert_store() -> Arc<RootCertStore> {
    PLATFORM_ROOT_CERT_STORE
        .get_or_init(|| {
            let mut store = RootCertStore::empty();

            let result = rustls_native_certs::load_native_certs();
            for error in &result.errors {
                warn!(%error, "Error while loading platform root certificates.");
            }

            let (added, failed) = store.add_parsable_certificates(result.certs);
            if added == 0 {
                warn!("No platform root certificates loaded. HTTPS destinations will fail certificate validation.");
            } else {
                debug!(added, failed, "Loaded platform root certificates.");
            }

            Arc::new(store)
        })
        .clone()
}

#[derive(Debug)]
struct SkipServerVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self, _end_entity: &CertificateDer<'_>, _intermediates: &[CertificateDer<'_>], _server_name: &ServerName<'_>,
        _ocsp_response: &[u8], _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self, message: &[u8], cert: &CertificateDer<'_>, dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self, message: &[u8], cert: &CertificateDer<'_>, dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
