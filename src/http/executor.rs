//! One request and one response head on a checked-out handle.

use crate::base::error::{ConnError, ErrorContext, PoolError};
use crate::base::timeout::{Timeout, TimeoutValue};
use crate::connectionpool::{ConnectionPool, SchemeHooks};
use crate::socket::client::{Connection, ConnectionFactory, ResponseHead, WireRequest};
use http::Method;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// What the trace hook sees for every completed exchange.
#[derive(Debug)]
pub struct RequestTrace<'a> {
    pub scheme: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub method: &'a Method,
    pub url: &'a str,
    /// `HTTP/1.1`, or `HTTP/?` when the connection did not say.
    pub version: &'a str,
    pub response: &'a ResponseHead,
}

pub type TraceHook = Arc<dyn Fn(&RequestTrace<'_>) + Send + Sync>;

impl<F: ConnectionFactory, S: SchemeHooks> ConnectionPool<F, S> {
    pub(crate) fn error_context<'a>(
        &'a self,
        conn: &F::Conn,
        url: &'a str,
        timeout: &Timeout,
    ) -> ErrorContext<'a> {
        ErrorContext {
            pool: &self.label,
            url,
            connect_timeout: timeout.connect_timeout().duration(),
            read_timeout: timeout.read_timeout().duration(),
            proxy_pending: self.proxy.is_some() && !conn.has_connected_to_proxy(),
        }
    }

    /// Send `request` on `conn` and read the response head.
    ///
    /// `url` is what the caller asked for and only shows up in errors and traces.
    /// A handle that turns out to be stale is reconnected and the request sent
    /// again once. On error the handle is in an unknown state and must be discarded.
    pub async fn make_request(
        &self,
        conn: &mut F::Conn,
        request: WireRequest,
        url: &str,
        timeout: &Timeout,
    ) -> Result<ResponseHead, PoolError> {
        timeout.validate()?;
        let mut timeout = timeout.clone_fresh();
        timeout.start_connect();
        conn.set_timeout(timeout.connect_timeout());

        if let Err(e) = self.hooks.validate_conn(conn).await {
            return Err(self.error_context(conn, url, &timeout).classify(e));
        }

        self.num_requests.fetch_add(1, Ordering::Relaxed);
        let method = request.method.clone();

        let sent = match conn.request(request.clone()).await {
            Err(ConnError::NotConnected) => {
                tracing::debug!(pool = %self.label, url = %url, "connection was not connected, sending again");
                conn.request(request).await
            }
            other => other,
        };
        match sent {
            // The server may have answered before closing; read the response anyway.
            Ok(()) | Err(ConnError::BrokenPipe) => {}
            Err(e) => return Err(self.error_context(conn, url, &timeout).classify(e)),
        }

        let read_timeout = timeout.read_timeout();
        if read_timeout == TimeoutValue::Finite(Duration::ZERO) {
            return Err(PoolError::ReadTimeout {
                pool: self.label.clone(),
                url: url.to_string(),
                timeout: Some(Duration::ZERO),
            });
        }
        if read_timeout != TimeoutValue::Default && conn.capabilities().exposes_socket && conn.is_connected() {
            conn.set_read_timeout(read_timeout);
        }

        let head = match conn.get_response().await {
            Ok(head) => head,
            Err(e) => return Err(self.error_context(conn, url, &timeout).classify(e)),
        };

        let version = conn
            .http_version()
            .or(head.version)
            .map_or_else(|| "HTTP/?".to_string(), |v| format!("{v:?}"));
        tracing::debug!(
            pool = %self.label,
            "{}://{}:{} \"{} {} {}\" {}",
            S::SCHEME,
            self.host,
            self.port,
            method,
            url,
            version,
            head.status.as_u16()
        );
        if let Some(hook) = &self.trace_hook {
            hook(&RequestTrace {
                scheme: S::SCHEME,
                host: &self.host,
                port: self.port,
                method: &method,
                url,
                version: &version,
                response: &head,
            });
        }
        Ok(head)
    }
}
