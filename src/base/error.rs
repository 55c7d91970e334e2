//! Error types.
//!
//! Two layers:
//! - [`ConnError`]: what a [`Connection`](crate::socket::client::Connection) reports.
//!   Every variant is a tag, so the pool never inspects message text.
//! - [`PoolError`]: what callers of the pool see, carrying the pool label and URL.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Fixed explanation attached when an HTTPS proxy answers the TLS handshake in plaintext.
pub const HTTP_ONLY_PROXY_HINT: &str =
    "Your proxy appears to only use HTTP and not HTTPS, try changing your proxy URL to be HTTP.";

/// Transport-level failure reported by a connection handle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnError {
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("read timed out")]
    ReadTimeout,
    #[error("socket operation timed out")]
    SocketTimeout,
    #[error("failed to establish a new connection: {0}")]
    NewConnection(String),
    /// The handle has no live socket (typically a stale keep-alive connection).
    #[error("socket not connected")]
    NotConnected,
    #[error("broken pipe")]
    BrokenPipe,
    #[error("bad status line: {0}")]
    BadStatusLine(String),
    #[error("remote end closed connection without response")]
    RemoteDisconnected,
    #[error("{message}")]
    Io { kind: io::ErrorKind, message: String },
    /// The proxy replied to a TLS ClientHello with a plaintext HTTP response.
    #[error("proxy answered the TLS handshake with a plaintext HTTP response")]
    ProxyTunnelRejected,
    #[error("tunnel connection failed: {0}")]
    Tunnel(String),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("certificate verification failed: {0}")]
    Certificate(String),
    /// Anything the transport cannot classify. Never retried.
    #[error("{0}")]
    Unexpected(String),
}

impl ConnError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectTimeout | Self::ReadTimeout | Self::SocketTimeout)
    }
}

impl From<io::Error> for ConnError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => ConnError::SocketTimeout,
            io::ErrorKind::BrokenPipe => ConnError::BrokenPipe,
            io::ErrorKind::NotConnected => ConnError::NotConnected,
            kind => ConnError::Io { kind, message: e.to_string() },
        }
    }
}

/// Error surfaced by the pool to its callers.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("{pool}: pool reached its maximum size and no more connections are allowed")]
    PoolFull { pool: String },
    #[error("{pool}: pool reached its maximum size, timed out waiting for a free connection")]
    PoolTimeout { pool: String },
    #[error("{pool}: connection timed out (connect timeout={timeout:?})")]
    ConnectTimeout { pool: String, timeout: Option<Duration> },
    #[error("{pool}: read timed out (read timeout={timeout:?}) for url {url}")]
    ReadTimeout { pool: String, url: String, timeout: Option<Duration> },
    #[error("{pool}: failed to establish a new connection: {message}")]
    NewConnection { pool: String, message: String },
    #[error("{pool}: connection aborted: {cause}")]
    Protocol { pool: String, cause: ConnError },
    #[error("{message}: {cause}")]
    Proxy { message: String, cause: ConnError },
    #[error("{pool}: TLS failure: {cause}")]
    Ssl { pool: String, cause: ConnError },
    #[error("{pool}: max retries exceeded with url: {url} (caused by {reason})")]
    MaxRetry {
        pool: String,
        url: String,
        #[source]
        reason: Box<PoolError>,
    },
    #[error("{pool}: too many redirects for url {url}")]
    TooManyRedirects { pool: String, url: String },
    #[error("{0}")]
    Response(String),
    #[error("{pool}: tried to open a foreign host with url {url}")]
    HostChanged { pool: String, url: String },
    #[error("failed to parse location: {0}")]
    LocationParse(String),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("unable to rewind request body: {0}")]
    UnrewindableBody(String),
    #[error("failed to read request body: {0}")]
    Body(String),
    #[error("failed to decode response body: {0}")]
    Decode(String),
    /// Transport failure outside the recognized families. Never retried.
    #[error(transparent)]
    Connection(ConnError),
}

impl PoolError {
    /// Whether `urlopen` routes this error through the retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. }
                | Self::ReadTimeout { .. }
                | Self::NewConnection { .. }
                | Self::Protocol { .. }
                | Self::Proxy { .. }
                | Self::Ssl { .. }
        )
    }

    /// Counts against the `connect` budget.
    pub(crate) fn is_connection_error(&self) -> bool {
        match self {
            Self::ConnectTimeout { .. } | Self::NewConnection { .. } => true,
            Self::Proxy { cause, .. } => {
                matches!(cause, ConnError::ConnectTimeout | ConnError::NewConnection(_))
            }
            _ => false,
        }
    }

    /// Counts against the `read` budget. Only idempotent methods are retried.
    pub(crate) fn is_read_error(&self) -> bool {
        matches!(self, Self::ReadTimeout { .. } | Self::Protocol { .. })
    }
}

/// Everything needed to turn a [`ConnError`] into a [`PoolError`] for one attempt.
#[derive(Debug, Clone)]
pub(crate) struct ErrorContext<'a> {
    pub pool: &'a str,
    pub url: &'a str,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    /// A proxy is configured and the handle has not finished reaching it.
    pub proxy_pending: bool,
}

impl ErrorContext<'_> {
    pub fn classify(&self, err: ConnError) -> PoolError {
        let pool = self.pool.to_string();
        if let ConnError::Unexpected(_) = err {
            return PoolError::Connection(err);
        }
        if self.proxy_pending {
            let message = if err == ConnError::ProxyTunnelRejected {
                format!("Unable to connect to proxy. {HTTP_ONLY_PROXY_HINT}")
            } else {
                "Unable to connect to proxy".to_string()
            };
            return PoolError::Proxy { message, cause: err };
        }
        match err {
            ConnError::ConnectTimeout => {
                PoolError::ConnectTimeout { pool, timeout: self.connect_timeout }
            }
            ConnError::ReadTimeout | ConnError::SocketTimeout => {
                PoolError::ReadTimeout { pool, url: self.url.to_string(), timeout: self.read_timeout }
            }
            ConnError::NewConnection(message) => PoolError::NewConnection { pool, message },
            ConnError::ProxyTunnelRejected => PoolError::Proxy {
                message: format!("Unable to connect to proxy. {HTTP_ONLY_PROXY_HINT}"),
                cause: err,
            },
            ConnError::Tunnel(_) => PoolError::Proxy { message: "Tunnel connection failed".to_string(), cause: err },
            ConnError::Tls(_) | ConnError::Certificate(_) => PoolError::Ssl { pool, cause: err },
            cause => PoolError::Protocol { pool, cause },
        }
    }
}
