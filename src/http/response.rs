//! HTTP Response with body access.

use crate::base::error::{ConnError, ErrorContext, PoolError};
use crate::http::retry::Retry;
use crate::socket::client::{Connection, ResponseHead};
use crate::socket::pool::PooledConn;
use bytes::{Bytes, BytesMut};
use http::header::LOCATION;
use http::{HeaderMap, StatusCode, Version};

/// Statuses that carry a redirect when a `Location` header is present.
pub const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

/// Response returned by [`ConnectionPool::urlopen`](crate::connectionpool::ConnectionPool::urlopen).
///
/// Holds its connection until the body is read to EOF, then hands it back to the
/// pool. A preloaded response has already done so.
pub struct PoolResponse<C: Connection> {
    status: StatusCode,
    version: Option<Version>,
    headers: HeaderMap,
    preloaded: Option<Bytes>,
    conn: Option<PooledConn<C>>,
    url: String,
    pool: String,
    retries: Retry,
}

impl<C: Connection> std::fmt::Debug for PoolResponse<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolResponse")
            .field("status", &self.status)
            .field("url", &self.url)
            .field("preloaded", &self.preloaded.as_ref().map(Bytes::len))
            .field("has_conn", &self.conn.is_some())
            .finish()
    }
}

impl<C: Connection> PoolResponse<C> {
    pub(crate) fn new(head: ResponseHead, conn: PooledConn<C>, url: String, pool: String, retries: Retry) -> Self {
        Self {
            status: head.status,
            version: head.version,
            headers: head.headers,
            preloaded: None,
            conn: Some(conn),
            url,
            pool,
            retries,
        }
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the HTTP version, when the connection reported one.
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// Get a reference to the headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// URL of the final request that produced this response.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Retry policy state after the call, including its history.
    pub fn retries(&self) -> &Retry {
        &self.retries
    }

    pub(crate) fn set_retries(&mut self, retries: Retry) {
        self.retries = retries;
    }

    /// `Location` target for redirect statuses.
    pub fn redirect_location(&self) -> Option<&str> {
        if !REDIRECT_STATUSES.contains(&self.status.as_u16()) {
            return None;
        }
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    /// The connection still bound to this response, if the body is unread.
    pub fn connection(&self) -> Option<&C> {
        self.conn.as_deref()
    }

    /// The response no longer holds a connection (released at EOF or discarded).
    pub fn is_released(&self) -> bool {
        self.conn.is_none()
    }

    fn map_read_error(&self, err: ConnError) -> PoolError {
        let ctx = ErrorContext {
            pool: &self.pool,
            url: &self.url,
            connect_timeout: None,
            read_timeout: None,
            proxy_pending: false,
        };
        match ctx.classify(err) {
            PoolError::Connection(cause) => PoolError::Protocol { pool: self.pool.clone(), cause },
            other => other,
        }
    }

    /// Next piece of the body, `None` at EOF.
    ///
    /// EOF hands the connection back to the pool. A read failure closes it.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, PoolError> {
        if let Some(data) = self.preloaded.take() {
            if !data.is_empty() {
                return Ok(Some(data));
            }
        }
        let Some(conn) = self.conn.as_mut() else {
            return Ok(None);
        };
        match conn.read_chunk().await {
            Ok(Some(data)) => Ok(Some(data)),
            Ok(None) => {
                if let Some(conn) = self.conn.take() {
                    conn.release();
                }
                Ok(None)
            }
            Err(e) => {
                if let Some(conn) = self.conn.take() {
                    conn.discard();
                }
                Err(self.map_read_error(e))
            }
        }
    }

    /// Read the rest of the body.
    pub async fn data(&mut self) -> Result<Bytes, PoolError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Read the whole body into memory now, releasing the connection.
    pub(crate) async fn preload(&mut self) -> Result<(), PoolError> {
        let data = self.data().await?;
        self.preloaded = Some(data);
        Ok(())
    }

    /// Convenience method to consume body as bytes.
    pub async fn bytes(mut self) -> Result<Bytes, PoolError> {
        self.data().await
    }

    /// Convenience method to consume body as text.
    pub async fn text(mut self) -> Result<String, PoolError> {
        let bytes = self.data().await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| PoolError::Decode(e.to_string()))
    }

    /// Convenience method to consume body as JSON.
    #[cfg(feature = "json")]
    pub async fn json<T: serde::de::DeserializeOwned>(mut self) -> Result<T, PoolError> {
        let bytes = self.data().await?;
        serde_json::from_slice(&bytes).map_err(|e| PoolError::Decode(e.to_string()))
    }

    /// Read and throw away the rest of the body so the connection can be reused.
    /// Errors only cost the connection.
    pub async fn drain_conn(&mut self) {
        self.preloaded = None;
        if let Err(e) = self.data().await {
            tracing::debug!(url = %self.url, error = %e, "discarding connection after failed drain");
        }
    }

    /// Read off whatever is left of the body and hand the connection back to the
    /// pool. On a read failure the connection is closed and the error returned.
    pub async fn release_conn(&mut self) -> Result<(), PoolError> {
        self.preloaded = None;
        self.data().await.map(drop)
    }

    /// Close the connection without reading the rest of the body.
    pub fn discard_conn(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.discard();
        }
    }
}
