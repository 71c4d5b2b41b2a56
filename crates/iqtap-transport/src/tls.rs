//! Client TLS settings for `wss://` connections.
//!
//! Simulators usually serve self-signed certificates, so the server
//! certificate is accepted as-is unless a trust source is configured.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, warn};

use crate::error::{Result, TransportError};

/// How the server certificate is checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ServerVerification {
    /// Accept any server certificate.
    #[default]
    Disabled,
    /// Check against the system trust store.
    System,
    /// Check against the CA certificates in a PEM file.
    CaFile(PathBuf),
}

/// Client certificate chain and private key, both PEM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    pub verification: ServerVerification,
    pub identity: Option<ClientIdentity>,
}

impl TlsOptions {
    /// Build the rustls client configuration.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let builder = match &self.verification {
            ServerVerification::Disabled => {
                debug!("server certificate verification disabled");
                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate::new()))
            }
            ServerVerification::System => {
                let certs = rustls_native_certs::load_native_certs().map_err(|err| {
                    TransportError::Tls(format!("failed to load system certificates: {err}"))
                })?;
                let mut roots = RootCertStore::empty();
                let (added, ignored) = roots.add_parsable_certificates(certs);
                if ignored > 0 {
                    warn!(ignored, "skipped unparsable system certificates");
                }
                debug!(added, "loaded system trust store");
                ClientConfig::builder().with_root_certificates(roots)
            }
            ServerVerification::CaFile(path) => {
                let mut roots = RootCertStore::empty();
                for cert in read_certs(path)? {
                    roots.add(cert).map_err(|err| {
                        TransportError::Tls(format!("{}: {err}", path.display()))
                    })?;
                }
                ClientConfig::builder().with_root_certificates(roots)
            }
        };

        match &self.identity {
            Some(identity) => {
                let chain = read_certs(&identity.cert)?;
                let key = read_key(&identity.key)?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|err| TransportError::Tls(format!("client certificate: {err}")))
            }
            None => Ok(builder.with_no_client_auth()),
        }
    }
}

fn open_pem(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|err| TransportError::Tls(format!("{}: {err}", path.display())))
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open_pem(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|err| TransportError::Tls(format!("{}: {err}", path.display())))?;
    if certs.is_empty() {
        return Err(TransportError::Tls(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open_pem(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|err| TransportError::Tls(format!("{}: {err}", path.display())))?
        .ok_or_else(|| TransportError::Tls(format!("no private key in {}", path.display())))
}

/// Skips certificate and name checks; handshake signatures are still verified.
struct AcceptAnyCertificate {
    provider: CryptoProvider,
}

impl AcceptAnyCertificate {
    fn new() -> Self {
        Self {
            provider: crypto::ring::default_provider(),
        }
    }
}

impl fmt::Debug for AcceptAnyCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AcceptAnyCertificate")
    }
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(
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
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(
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
