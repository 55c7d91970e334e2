//! TLS scheme hooks.

use crate::base::error::ConnError;
use crate::connectionpool::SchemeHooks;
use crate::socket::client::Connection;
use crate::socket::tls::TlsParams;
use std::future::Future;

/// HTTPS: every handle gets a copy of the pool's [`TlsParams`].
#[derive(Debug, Clone, Default)]
pub struct Tls {
    params: TlsParams,
}

impl Tls {
    pub fn new(params: TlsParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &TlsParams {
        &self.params
    }
}

impl SchemeHooks for Tls {
    const SCHEME: &'static str = "https";
    const DEFAULT_PORT: u16 = 443;
    const POOL_NAME: &'static str = "HTTPSConnectionPool";

    fn prepare_conn<C: Connection>(&self, conn: &mut C) {
        if conn.capabilities().supports_tls {
            conn.set_tls(self.params.clone());
        }
    }

    /// Connect before the first request so the handshake (and any CONNECT
    /// tunnel) finishes up front. Warns about unverified connections unless
    /// verification was turned off with [`CertReqs::None`](crate::socket::tls::CertReqs)
    /// or the warning with [`TlsParams::warn_unverified`].
    fn validate_conn<C: Connection>(&self, conn: &mut C) -> impl Future<Output = Result<(), ConnError>> + Send {
        let warn = self.params.warn_on_unverified;
        let verifying = self.params.is_verifying();
        async move {
            if !conn.is_connected() {
                conn.connect().await?;
            }
            if !warn {
                return Ok(());
            }
            if conn.proxy_is_verified() == Some(false) {
                tracing::warn!(
                    target: "poolnet::security",
                    "unverified HTTPS connection is being made to an HTTPS proxy; adding certificate verification is strongly advised"
                );
            }
            if verifying && !conn.is_verified() {
                tracing::warn!(
                    target: "poolnet::security",
                    "unverified HTTPS request is being made; adding certificate verification is strongly advised"
                );
            }
            Ok(())
        }
    }
}
