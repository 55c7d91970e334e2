//! The connection handle contract the pool drives.
//!
//! The pool never looks inside a connection. It calls the methods of [`Connection`]
//! and reads its [`Capabilities`], which are fixed when the handle is created.

use crate::base::error::ConnError;
use crate::base::timeout::TimeoutValue;
use crate::socket::proxy::{ProxyConfig, ProxySettings};
use crate::socket::tls::TlsParams;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Version};
use std::future::Future;
use std::net::SocketAddr;

/// Optional features of a connection type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Read timeouts can be applied to an underlying socket.
    pub exposes_socket: bool,
    pub supports_tls: bool,
    pub supports_tunnel: bool,
}

/// One request as handed to [`Connection::request`].
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub method: Method,
    /// Origin-form (`/path?query`) or, when forwarding through a proxy, absolute form.
    pub target: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub chunked: bool,
}

/// Status line and headers of a response. The body is read separately.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Option<Version>,
    pub headers: HeaderMap,
}

/// Destination of a CONNECT tunnel through the proxy.
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelTarget {
    pub host: String,
    pub port: u16,
    pub headers: HeaderMap,
}

/// Everything a factory needs to build a handle for the pool's destination.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub scheme: &'static str,
    pub host: String,
    pub port: u16,
    pub timeout: TimeoutValue,
    pub source_address: Option<SocketAddr>,
    pub tcp_nodelay: bool,
    /// When set, the handle dials the proxy instead of the destination.
    pub proxy: Option<ProxySettings>,
    pub proxy_config: ProxyConfig,
}

/// A single transport connection to the pool's destination (or its proxy).
///
/// Owned by exactly one holder at a time: idle in the pool or checked out.
pub trait Connection: Send + 'static {
    fn capabilities(&self) -> Capabilities;

    fn is_connected(&self) -> bool;

    /// The peer went away while the handle sat idle.
    fn is_dropped(&self) -> bool {
        !self.is_connected()
    }

    fn connect(&mut self) -> impl Future<Output = Result<(), ConnError>> + Send;

    /// Timeout for establishing the connection.
    fn set_timeout(&mut self, timeout: TimeoutValue);

    /// Timeout for waiting on response data.
    fn set_read_timeout(&mut self, timeout: TimeoutValue);

    /// Send one request. Connects first when the handle has no live socket.
    fn request(&mut self, request: WireRequest) -> impl Future<Output = Result<(), ConnError>> + Send;

    fn get_response(&mut self) -> impl Future<Output = Result<ResponseHead, ConnError>> + Send;

    /// Next piece of the current response body, `None` at EOF.
    fn read_chunk(&mut self) -> impl Future<Output = Result<Option<Bytes>, ConnError>> + Send;

    fn close(&mut self);

    /// A closed handle can connect again. Otherwise the pool replaces it.
    fn reusable_after_close(&self) -> bool {
        true
    }

    fn set_tunnel(&mut self, _target: TunnelTarget) {}

    fn set_tls(&mut self, _params: TlsParams) {}

    fn is_verified(&self) -> bool {
        false
    }

    /// `None` when no HTTPS proxy is involved.
    fn proxy_is_verified(&self) -> Option<bool> {
        None
    }

    /// The handle finished reaching its proxy (TCP, proxy TLS and tunnel).
    fn has_connected_to_proxy(&self) -> bool {
        false
    }

    /// Protocol version negotiated on the wire, if known.
    fn http_version(&self) -> Option<Version> {
        None
    }
}

/// Builds connection handles for a pool. Construction does no I/O.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Conn: Connection;

    fn new_conn(&self, config: &ConnectionConfig) -> Result<Self::Conn, ConnError>;
}
