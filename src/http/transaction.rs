//! The `urlopen` loop: checkout, dispatch, retry, redirect.

use crate::base::error::PoolError;
use crate::base::timeout::Timeout;
use crate::connectionpool::{ConnectionPool, SchemeHooks};
use crate::http::redirect::{is_cross_origin, prepare_for_method_change, resolve_location, strip_cross_origin};
use crate::http::requestbody::{BodyPosition, RequestBody};
use crate::http::response::PoolResponse;
use crate::http::retry::{ResponseSummary, Retry};
use crate::socket::client::{Connection, ConnectionFactory, TunnelTarget, WireRequest};
use crate::socket::proxy::connection_requires_http_tunnel;
use http::header::RETRY_AFTER;
use http::{HeaderMap, Method, StatusCode};
use std::time::Duration;
use url::{Position, Url};

/// Per-call options for [`ConnectionPool::urlopen`]. Unset values fall back to the pool's.
#[derive(Debug)]
pub struct RequestOptions {
    body: RequestBody,
    headers: Option<HeaderMap>,
    retries: Option<Retry>,
    redirect: bool,
    assert_same_host: bool,
    timeout: Option<Timeout>,
    pool_timeout: Option<Duration>,
    release_conn: bool,
    chunked: bool,
    body_pos: Option<BodyPosition>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            body: RequestBody::Empty,
            headers: None,
            retries: None,
            redirect: true,
            assert_same_host: true,
            timeout: None,
            pool_timeout: None,
            release_conn: true,
            chunked: false,
            body_pos: None,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Replaces the pool's default headers for this call.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn retries(mut self, retries: Retry) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Follow redirects. When off, redirect responses are returned as is.
    pub fn redirect(mut self, redirect: bool) -> Self {
        self.redirect = redirect;
        self
    }

    /// Refuse URLs for another host with [`PoolError::HostChanged`].
    pub fn assert_same_host(mut self, assert: bool) -> Self {
        self.assert_same_host = assert;
        self
    }

    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// How long a blocking pool waits for a free connection.
    pub fn pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_timeout = Some(timeout);
        self
    }

    /// Read the body up front and return the connection to the pool. When off,
    /// the response keeps the connection until its body is read.
    pub fn release_conn(mut self, release: bool) -> Self {
        self.release_conn = release;
        self
    }

    pub fn chunked(mut self, chunked: bool) -> Self {
        self.chunked = chunked;
        self
    }

    /// Start position of a body that was already partly read.
    pub fn body_pos(mut self, pos: BodyPosition) -> Self {
        self.body_pos = Some(pos);
        self
    }
}

/// Inputs of one dispatch that stay fixed across the loop.
struct Dispatch<'a> {
    url: &'a str,
    tunnel: bool,
    timeout: &'a Timeout,
    pool_timeout: Option<Duration>,
    release_conn: bool,
}

impl<F: ConnectionFactory, S: SchemeHooks> ConnectionPool<F, S> {
    /// Send a request, retrying and following redirects as `options` and the
    /// retry policy allow.
    ///
    /// Transport failures discard the connection and consume a retry. Once the
    /// policy is exhausted the last cause comes back wrapped in
    /// [`PoolError::MaxRetry`]. Usage errors and unrecognized failures return at
    /// once without consuming retries.
    pub async fn urlopen(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<PoolResponse<F::Conn>, PoolError> {
        let RequestOptions {
            mut body,
            headers,
            retries,
            redirect,
            assert_same_host,
            timeout,
            pool_timeout,
            release_conn,
            chunked,
            mut body_pos,
        } = options;
        let timeout = timeout.unwrap_or_else(|| self.timeout.clone());
        timeout.validate()?;
        let mut retries = retries.unwrap_or_else(|| self.retries.clone());
        let mut headers = headers.unwrap_or_else(|| self.headers.clone());
        let mut method = method;
        let mut url = url.to_string();
        let base = self.base_url()?;
        let tunnel = connection_requires_http_tunnel(self.proxy.as_ref(), &self.proxy_config, S::SCHEME);
        let bound = retries.attempt_bound();
        let mut attempts = 0usize;

        loop {
            attempts += 1;
            if bound.is_some_and(|b| attempts > b) {
                return Err(PoolError::MaxRetry {
                    pool: self.label.clone(),
                    url,
                    reason: Box::new(PoolError::Response("retry attempts exceeded".into())),
                });
            }

            if assert_same_host && !self.is_same_host(&url) {
                return Err(PoolError::HostChanged { pool: self.label.clone(), url });
            }
            let full = resolve_location(&base, &url)?;
            let forwarding = self.proxy.is_some() && !tunnel;
            let target = if forwarding {
                full.as_str().to_string()
            } else {
                full[Position::BeforePath..Position::AfterQuery].to_string()
            };

            let mut send_headers = headers.clone();
            if !tunnel {
                for (name, value) in self.proxy_headers() {
                    send_headers.insert(name.clone(), value.clone());
                }
            }

            body_pos = body.set_position(body_pos)?;
            let wire = WireRequest {
                method: method.clone(),
                target,
                headers: send_headers,
                body: body.payload()?,
                chunked,
            };

            let dispatch = Dispatch { url: &url, tunnel, timeout: &timeout, pool_timeout, release_conn };
            let mut response = match self.dispatch(wire, &dispatch, &retries).await {
                Ok(response) => response,
                Err(e) if e.is_retryable() => {
                    let cause = e.to_string();
                    retries = retries.increment(&method, &url, Some(e), None, &self.label)?;
                    tracing::warn!(pool = %self.label, url = %url, retry = %retries, "retrying after connection broken by '{cause}'");
                    retries.sleep(None).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if redirect {
                if let Some(location) = response.redirect_location().map(str::to_string) {
                    let next = resolve_location(&full, &location)?;
                    if response.status() == StatusCode::SEE_OTHER && method != Method::HEAD {
                        method = Method::GET;
                        body = RequestBody::Empty;
                        body_pos = None;
                        prepare_for_method_change(&mut headers);
                    }

                    let summary = ResponseSummary { status: response.status(), redirect_location: Some(&location) };
                    retries = match retries.increment(&method, &url, None, Some(summary), &self.label) {
                        Ok(next) => next,
                        Err(e) if retries.raise_on_redirect() => {
                            response.drain_conn().await;
                            return Err(e);
                        }
                        Err(_) => {
                            response.set_retries(retries);
                            return Ok(response);
                        }
                    };

                    if is_cross_origin(&full, &next) {
                        strip_cross_origin(&mut headers, retries.remove_headers_on_redirect());
                    }
                    response.drain_conn().await;
                    retries.sleep_for_retry(response.headers()).await?;
                    tracing::debug!(pool = %self.label, url = %url, location = %next, "redirecting");
                    url = request_url(&base, &next);
                    continue;
                }
            }

            let has_retry_after = response.headers().contains_key(RETRY_AFTER);
            if retries.is_retry(&method, response.status(), has_retry_after) {
                let summary = ResponseSummary { status: response.status(), redirect_location: None };
                retries = match retries.increment(&method, &url, None, Some(summary), &self.label) {
                    Ok(next) => next,
                    Err(e) if retries.raise_on_status() => {
                        response.drain_conn().await;
                        return Err(e);
                    }
                    Err(_) => {
                        response.set_retries(retries);
                        return Ok(response);
                    }
                };
                response.drain_conn().await;
                retries.sleep(Some(response.headers())).await?;
                tracing::debug!(pool = %self.label, url = %url, status = response.status().as_u16(), "retrying on status");
                continue;
            }

            response.set_retries(retries);
            return Ok(response);
        }
    }

    /// One checkout plus exchange. Any failure leaves the handle discarded.
    async fn dispatch(
        &self,
        wire: WireRequest,
        dispatch: &Dispatch<'_>,
        retries: &Retry,
    ) -> Result<PoolResponse<F::Conn>, PoolError> {
        let mut conn = self.get_conn(dispatch.pool_timeout).await?;
        conn.set_timeout(dispatch.timeout.connect_timeout());

        if dispatch.tunnel && self.proxy.is_some() && !conn.is_connected() {
            let target = TunnelTarget { host: self.host.clone(), port: self.port, headers: self.proxy_headers().clone() };
            if let Err(e) = self.hooks.prepare_proxy(&mut *conn, target).await {
                let err = self.error_context(&conn, dispatch.url, dispatch.timeout).classify(e);
                conn.discard();
                return Err(err);
            }
        }

        let head = match self.make_request(&mut conn, wire, dispatch.url, dispatch.timeout).await {
            Ok(head) => head,
            Err(e) => {
                conn.discard();
                return Err(e);
            }
        };

        let mut response =
            PoolResponse::new(head, conn, dispatch.url.to_string(), self.label.clone(), retries.clone());
        if dispatch.release_conn {
            response.preload().await?;
        }
        Ok(response)
    }
}

/// Same-origin targets stay relative so they keep matching the pool.
fn request_url(base: &Url, next: &Url) -> String {
    if is_cross_origin(base, next) {
        next.as_str().to_string()
    } else {
        next[Position::BeforePath..Position::AfterQuery].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let options = RequestOptions::default();
        assert!(options.redirect);
        assert!(options.assert_same_host);
        assert!(options.release_conn);
        assert!(!options.chunked);
        assert!(options.body.is_empty());
    }

    #[test]
    fn test_request_url_stays_relative_for_same_origin() {
        let base = Url::parse("http://example.com/").unwrap();
        let same = Url::parse("http://example.com/a/b?c=1#frag").unwrap();
        assert_eq!(request_url(&base, &same), "/a/b?c=1");
        let other = Url::parse("https://example.com/a").unwrap();
        assert_eq!(request_url(&base, &other), "https://example.com/a");
    }
}
