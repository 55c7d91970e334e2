//! TLS parameters attached to HTTPS connections, and the BoringSSL handshake.

use crate::base::error::ConnError;
use boring::hash::MessageDigest;
use boring::ssl::{SslConnector, SslFiletype, SslMethod, SslVerifyMode, SslVersion};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_boring::SslStream;

/// Certificate verification mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CertReqs {
    /// Accept any certificate.
    None,
    /// Verify the peer chain against the CA bundle.
    #[default]
    Required,
}

/// Verification and client-certificate settings for one destination.
#[derive(Debug, Clone)]
pub struct TlsParams {
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_certs: Option<PathBuf>,
    pub cert_reqs: CertReqs,
    /// Hostname to verify against instead of the connection host.
    pub assert_hostname: Option<String>,
    /// Skip hostname verification entirely.
    pub skip_hostname_check: bool,
    /// Hex digest (md5, sha1 or sha256, colons allowed) the peer certificate must match.
    pub assert_fingerprint: Option<String>,
    /// Emit a security warning when a request goes out over an unverified connection.
    pub warn_on_unverified: bool,
}

impl Default for TlsParams {
    fn default() -> Self {
        Self {
            cert_file: None,
            key_file: None,
            ca_certs: None,
            cert_reqs: CertReqs::Required,
            assert_hostname: None,
            skip_hostname_check: false,
            assert_fingerprint: None,
            warn_on_unverified: true,
        }
    }
}

impl TlsParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ca_certs(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_certs = Some(path.into());
        self
    }

    /// Client certificate. `key` defaults to the certificate file.
    pub fn with_client_cert(mut self, cert: impl Into<PathBuf>, key: Option<PathBuf>) -> Self {
        self.cert_file = Some(cert.into());
        self.key_file = key;
        self
    }

    pub fn with_cert_reqs(mut self, reqs: CertReqs) -> Self {
        self.cert_reqs = reqs;
        self
    }

    pub fn with_assert_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.assert_hostname = Some(hostname.into());
        self
    }

    pub fn without_hostname_check(mut self) -> Self {
        self.skip_hostname_check = true;
        self
    }

    pub fn with_assert_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.assert_fingerprint = Some(fingerprint.into());
        self
    }

    pub fn warn_unverified(mut self, warn: bool) -> Self {
        self.warn_on_unverified = warn;
        self
    }

    /// A connection negotiated with these params counts as verified.
    pub fn is_verifying(&self) -> bool {
        self.cert_reqs == CertReqs::Required || self.assert_fingerprint.is_some()
    }

    /// Check if SNI (Server Name Indication) should be set for this host.
    /// Per RFC 6066, SNI MUST NOT be set for raw IP addresses.
    pub fn should_set_sni(host: &str) -> bool {
        host.parse::<std::net::IpAddr>().is_err()
    }

    fn connector(&self) -> Result<SslConnector, ConnError> {
        let mut builder = SslConnector::builder(SslMethod::tls()).map_err(tls_error)?;
        builder.set_min_proto_version(Some(SslVersion::TLS1_2)).map_err(tls_error)?;
        builder.set_max_proto_version(Some(SslVersion::TLS1_3)).map_err(tls_error)?;
        builder.set_alpn_protos(b"\x08http/1.1").map_err(tls_error)?;
        match self.cert_reqs {
            CertReqs::Required => builder.set_verify(SslVerifyMode::PEER),
            CertReqs::None => builder.set_verify(SslVerifyMode::NONE),
        }
        if let Some(ca) = &self.ca_certs {
            builder.set_ca_file(ca).map_err(tls_error)?;
        }
        if let Some(cert) = &self.cert_file {
            let key = self.key_file.as_ref().unwrap_or(cert);
            builder.set_certificate_chain_file(cert).map_err(tls_error)?;
            builder.set_private_key_file(key, SslFiletype::PEM).map_err(tls_error)?;
            builder.check_private_key().map_err(tls_error)?;
        }
        Ok(builder.build())
    }

    fn check_fingerprint<S>(&self, stream: &SslStream<S>) -> Result<(), ConnError> {
        let Some(expected) = &self.assert_fingerprint else {
            return Ok(());
        };
        let expected = expected.replace(':', "").to_ascii_lowercase();
        let digest = match expected.len() {
            32 => MessageDigest::md5(),
            40 => MessageDigest::sha1(),
            64 => MessageDigest::sha256(),
            n => {
                return Err(ConnError::Certificate(format!("fingerprint of invalid length {n}: {expected}")))
            }
        };
        let cert = stream
            .ssl()
            .peer_certificate()
            .ok_or_else(|| ConnError::Certificate("peer presented no certificate".into()))?;
        let actual: String = cert
            .digest(digest)
            .map_err(|e| ConnError::Certificate(e.to_string()))?
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        if actual != expected {
            return Err(ConnError::Certificate(format!(
                "fingerprints did not match, expected \"{expected}\", got \"{actual}\""
            )));
        }
        Ok(())
    }

    /// Run the client handshake over `stream`. Returns the stream and whether it is verified.
    pub(crate) async fn handshake<S>(&self, host: &str, stream: S) -> Result<(SslStream<S>, bool), ConnError>
    where
        S: AsyncRead + AsyncWrite + Unpin + std::fmt::Debug,
    {
        let connector = self.connector()?;
        let mut config = connector.configure().map_err(tls_error)?;
        config.set_use_server_name_indication(Self::should_set_sni(host));
        config.set_verify_hostname(self.cert_reqs == CertReqs::Required && !self.skip_hostname_check);
        let name = self.assert_hostname.as_deref().unwrap_or(host);

        let stream = tokio_boring::connect(config, name, stream).await.map_err(|e| {
            tracing::debug!(host = %host, error = %e, "TLS handshake failed");
            ConnError::Tls(e.to_string())
        })?;
        self.check_fingerprint(&stream)?;
        Ok((stream, self.is_verifying()))
    }
}

fn tls_error(e: boring::error::ErrorStack) -> ConnError {
    ConnError::Tls(e.to_string())
}
