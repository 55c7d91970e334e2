//! HTTP/1.1 connection handle over hyper.

use crate::base::error::ConnError;
use crate::base::timeout::TimeoutValue;
use crate::socket::client::{
    Capabilities, Connection, ConnectionConfig, ConnectionFactory, ResponseHead, TunnelTarget, WireRequest,
};
use crate::socket::connectjob::{authority, ConnectJob};
use crate::socket::tls::TlsParams;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::Version;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

/// Factory for [`HttpConnection`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

impl ConnectionFactory for HttpConnector {
    type Conn = HttpConnection;

    fn new_conn(&self, config: &ConnectionConfig) -> Result<HttpConnection, ConnError> {
        Ok(HttpConnection::new(config.clone()))
    }
}

/// One keep-alive HTTP/1.1 connection. Connects lazily.
pub struct HttpConnection {
    config: ConnectionConfig,
    tls: Option<TlsParams>,
    tunnel: Option<TunnelTarget>,
    read_timeout: TimeoutValue,
    sender: Option<http1::SendRequest<Full<Bytes>>>,
    pending: Option<http::Request<Full<Bytes>>>,
    body: Option<Incoming>,
    version: Option<Version>,
    verified: bool,
    proxy_verified: Option<bool>,
    connected_to_proxy: bool,
}

impl std::fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnection")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("connected", &self.is_connected())
            .field("verified", &self.verified)
            .finish()
    }
}

impl HttpConnection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            tls: None,
            tunnel: None,
            read_timeout: TimeoutValue::Default,
            sender: None,
            pending: None,
            body: None,
            version: None,
            verified: false,
            proxy_verified: None,
            connected_to_proxy: false,
        }
    }

    fn host_header(&self) -> String {
        let default_port = match self.config.scheme {
            "https" => 443,
            _ => 80,
        };
        if self.config.port != default_port {
            authority(&self.config.host, self.config.port)
        } else if self.config.host.contains(':') {
            format!("[{}]", self.config.host)
        } else {
            self.config.host.clone()
        }
    }
}

/// Map a hyper failure while waiting on a response.
fn response_error(e: hyper::Error) -> ConnError {
    if e.is_parse() {
        ConnError::BadStatusLine(e.to_string())
    } else if e.is_timeout() {
        ConnError::ReadTimeout
    } else if e.is_incomplete_message() || e.is_closed() || e.is_canceled() {
        ConnError::RemoteDisconnected
    } else {
        ConnError::Io { kind: io::ErrorKind::Other, message: e.to_string() }
    }
}

impl Connection for HttpConnection {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            exposes_socket: true,
            supports_tls: self.config.scheme == "https",
            supports_tunnel: self.config.proxy.is_some(),
        }
    }

    fn is_connected(&self) -> bool {
        self.sender.as_ref().is_some_and(|s| !s.is_closed())
    }

    async fn connect(&mut self) -> Result<(), ConnError> {
        let reached_proxy = AtomicBool::new(false);
        let job = ConnectJob {
            host: &self.config.host,
            port: self.config.port,
            source_address: self.config.source_address,
            tcp_nodelay: self.config.tcp_nodelay,
            proxy: self.config.proxy.as_ref(),
            proxy_config: &self.config.proxy_config,
            tunnel: self.tunnel.as_ref(),
            tls: self.tls.as_ref(),
            reached_proxy: &reached_proxy,
        };
        let result = match self.config.timeout.duration() {
            Some(limit) => tokio::time::timeout(limit, job.connect()).await.unwrap_or(Err(ConnError::ConnectTimeout)),
            None => job.connect().await,
        };
        // Failures from here on are between us and the destination, not the proxy.
        self.connected_to_proxy = reached_proxy.load(Ordering::Relaxed);
        let established = result?;

        let io = TokioIo::new(established.socket);
        let (sender, conn) =
            http1::handshake(io).await.map_err(|e| ConnError::NewConnection(e.to_string()))?;

        // Spawn the connection driver
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "connection driver exited");
            }
        });

        self.sender = Some(sender);
        self.verified = established.verified;
        self.proxy_verified = established.proxy_verified;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: TimeoutValue) {
        self.config.timeout = timeout;
    }

    fn set_read_timeout(&mut self, timeout: TimeoutValue) {
        self.read_timeout = timeout;
    }

    async fn request(&mut self, request: WireRequest) -> Result<(), ConnError> {
        match self.sender.as_ref().map(|s| s.is_closed()) {
            Some(true) => {
                self.close();
                return Err(ConnError::NotConnected);
            }
            Some(false) => {}
            None => self.connect().await?,
        }

        let body = Full::new(request.body.unwrap_or_default());
        let mut req = http::Request::builder()
            .method(request.method)
            .uri(request.target.as_str())
            .body(body)
            .map_err(|e| ConnError::Unexpected(format!("invalid request: {e}")))?;
        *req.headers_mut() = request.headers;
        if !req.headers().contains_key(HOST) {
            let host = HeaderValue::from_str(&self.host_header())
                .map_err(|e| ConnError::Unexpected(format!("invalid host header: {e}")))?;
            req.headers_mut().insert(HOST, host);
        }
        if request.chunked {
            req.headers_mut().remove(CONTENT_LENGTH);
            req.headers_mut().insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        }
        self.pending = Some(req);
        Ok(())
    }

    async fn get_response(&mut self) -> Result<ResponseHead, ConnError> {
        let request = self
            .pending
            .take()
            .ok_or_else(|| ConnError::Unexpected("no request pending on this connection".into()))?;
        let limit = self.read_timeout.duration();
        let sender = self.sender.as_mut().ok_or(ConnError::NotConnected)?;

        let exchange = async {
            sender.ready().await?;
            sender.send_request(request).await
        };
        let response = match limit {
            Some(limit) => tokio::time::timeout(limit, exchange).await.map_err(|_| ConnError::ReadTimeout)?,
            None => exchange.await,
        }
        .map_err(response_error)?;

        let (parts, body) = response.into_parts();
        self.version = Some(parts.version);
        self.body = Some(body);
        Ok(ResponseHead { status: parts.status, version: Some(parts.version), headers: parts.headers })
    }

    async fn read_chunk(&mut self) -> Result<Option<Bytes>, ConnError> {
        let limit = self.read_timeout.duration();
        let Some(body) = self.body.as_mut() else {
            return Ok(None);
        };
        loop {
            let next = match limit {
                Some(limit) => tokio::time::timeout(limit, body.frame()).await.map_err(|_| ConnError::ReadTimeout)?,
                None => body.frame().await,
            };
            match next {
                None => {
                    self.body = None;
                    return Ok(None);
                }
                Some(Ok(frame)) => {
                    // Trailers are skipped.
                    if let Ok(data) = frame.into_data() {
                        if !data.is_empty() {
                            return Ok(Some(data));
                        }
                    }
                }
                Some(Err(e)) => {
                    self.body = None;
                    return Err(response_error(e));
                }
            }
        }
    }

    fn close(&mut self) {
        self.sender = None;
        self.pending = None;
        self.body = None;
        self.verified = false;
        self.proxy_verified = None;
        self.connected_to_proxy = false;
    }

    fn set_tunnel(&mut self, target: TunnelTarget) {
        self.tunnel = Some(target);
    }

    fn set_tls(&mut self, params: TlsParams) {
        self.tls = Some(params);
    }

    fn is_verified(&self) -> bool {
        self.verified
    }

    fn proxy_is_verified(&self) -> Option<bool> {
        self.proxy_verified
    }

    fn has_connected_to_proxy(&self) -> bool {
        self.connected_to_proxy
    }

    fn http_version(&self) -> Option<Version> {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::proxy::ProxyConfig;

    fn config(scheme: &'static str, host: &str, port: u16) -> ConnectionConfig {
        ConnectionConfig {
            scheme,
            host: host.into(),
            port,
            timeout: TimeoutValue::Default,
            source_address: None,
            tcp_nodelay: true,
            proxy: None,
            proxy_config: ProxyConfig::default(),
        }
    }

    #[test]
    fn test_host_header_omits_default_port() {
        assert_eq!(HttpConnection::new(config("http", "example.com", 80)).host_header(), "example.com");
        assert_eq!(HttpConnection::new(config("https", "example.com", 8443)).host_header(), "example.com:8443");
        assert_eq!(HttpConnection::new(config("https", "::1", 443)).host_header(), "[::1]");
    }

    #[test]
    fn test_new_connection_is_idle() {
        let conn = HttpConnector.new_conn(&config("http", "example.com", 80)).unwrap();
        assert!(!conn.is_connected());
        assert!(conn.is_dropped());
        assert!(conn.capabilities().exposes_socket);
        assert!(!conn.capabilities().supports_tls);
    }
}
