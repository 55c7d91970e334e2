//! Retry policy with exponential backoff.
//!
//! [`Retry`] is an immutable value: [`Retry::increment`] returns a new policy with one
//! attempt consumed, or the terminal error once a budget is exhausted.

use crate::base::error::PoolError;
use http::header::{HeaderMap, HeaderName, AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION, RETRY_AFTER};
use http::{Method, StatusCode};
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;

/// Statuses for which a `Retry-After` header is honoured.
pub const RETRY_AFTER_STATUS_CODES: [u16; 3] = [413, 429, 503];

/// Default cap on backoff sleeps.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(120);

/// One consumed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHistory {
    pub method: Method,
    pub url: String,
    pub error: Option<String>,
    pub status: Option<StatusCode>,
    pub redirect_location: Option<String>,
}

/// The parts of a response the policy looks at.
#[derive(Debug, Clone, Copy)]
pub struct ResponseSummary<'a> {
    pub status: StatusCode,
    pub redirect_location: Option<&'a str>,
}

/// Retry configuration. `None` budgets are unlimited.
#[derive(Debug, Clone)]
pub struct Retry {
    total: Option<i32>,
    connect: Option<i32>,
    read: Option<i32>,
    redirect: Option<i32>,
    status: Option<i32>,
    other: Option<i32>,
    /// `None` retries every method.
    allowed_methods: Option<Vec<Method>>,
    status_forcelist: Vec<u16>,
    backoff_factor: f64,
    backoff_max: Duration,
    raise_on_redirect: bool,
    raise_on_status: bool,
    respect_retry_after_header: bool,
    remove_headers_on_redirect: Vec<HeaderName>,
    history: Vec<RequestHistory>,
    disabled: bool,
}

impl Default for Retry {
    fn default() -> Self {
        Self::new(10)
    }
}

impl Retry {
    /// `total` attempts in any combination of errors, redirects and statuses.
    pub fn new(total: i32) -> Self {
        Self {
            total: Some(total),
            connect: None,
            read: None,
            redirect: None,
            status: None,
            other: None,
            allowed_methods: Some(vec![
                Method::HEAD,
                Method::GET,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
                Method::TRACE,
            ]),
            status_forcelist: Vec::new(),
            backoff_factor: 0.0,
            backoff_max: DEFAULT_BACKOFF_MAX,
            raise_on_redirect: true,
            raise_on_status: true,
            respect_retry_after_header: true,
            remove_headers_on_redirect: vec![COOKIE, AUTHORIZATION, PROXY_AUTHORIZATION],
            history: Vec::new(),
            disabled: false,
        }
    }

    /// No total limit; only the per-kind budgets apply.
    pub fn unlimited() -> Self {
        Self { total: None, ..Self::new(0) }
    }

    /// Never retry: errors come back unwrapped, redirects are returned to the caller.
    pub fn disabled() -> Self {
        Self { total: Some(0), redirect: Some(0), raise_on_redirect: false, disabled: true, ..Self::new(0) }
    }

    pub fn with_connect(mut self, n: i32) -> Self {
        self.connect = Some(n);
        self
    }

    pub fn with_read(mut self, n: i32) -> Self {
        self.read = Some(n);
        self
    }

    pub fn with_redirect(mut self, n: i32) -> Self {
        self.redirect = Some(n);
        self
    }

    pub fn with_status(mut self, n: i32) -> Self {
        self.status = Some(n);
        self
    }

    pub fn with_other(mut self, n: i32) -> Self {
        self.other = Some(n);
        self
    }

    /// `None` makes every method retryable.
    pub fn with_allowed_methods(mut self, methods: Option<Vec<Method>>) -> Self {
        self.allowed_methods = methods;
        self
    }

    pub fn with_status_forcelist(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.status_forcelist = statuses.into_iter().collect();
        self
    }

    pub fn with_backoff(mut self, factor: f64, max: Duration) -> Self {
        self.backoff_factor = factor.max(0.0);
        self.backoff_max = max;
        self
    }

    pub fn with_raise_on_redirect(mut self, raise: bool) -> Self {
        self.raise_on_redirect = raise;
        self
    }

    pub fn with_raise_on_status(mut self, raise: bool) -> Self {
        self.raise_on_status = raise;
        self
    }

    pub fn with_respect_retry_after_header(mut self, respect: bool) -> Self {
        self.respect_retry_after_header = respect;
        self
    }

    pub fn with_remove_headers_on_redirect(mut self, headers: impl IntoIterator<Item = HeaderName>) -> Self {
        self.remove_headers_on_redirect = headers.into_iter().collect();
        self
    }

    pub fn total(&self) -> Option<i32> {
        self.total
    }

    pub fn redirect(&self) -> Option<i32> {
        self.redirect
    }

    pub fn history(&self) -> &[RequestHistory] {
        &self.history
    }

    pub fn raise_on_redirect(&self) -> bool {
        self.raise_on_redirect
    }

    pub fn raise_on_status(&self) -> bool {
        self.raise_on_status
    }

    pub fn remove_headers_on_redirect(&self) -> &[HeaderName] {
        &self.remove_headers_on_redirect
    }

    fn is_method_retryable(&self, method: &Method) -> bool {
        self.allowed_methods.as_ref().map_or(true, |allowed| allowed.contains(method))
    }

    /// Whether a response with `status` should be retried.
    pub fn is_retry(&self, method: &Method, status: StatusCode, has_retry_after: bool) -> bool {
        if !self.is_method_retryable(method) {
            return false;
        }
        if self.status_forcelist.contains(&status.as_u16()) {
            return true;
        }
        matches!(self.total, Some(t) if t != 0)
            && self.respect_retry_after_header
            && has_retry_after
            && RETRY_AFTER_STATUS_CODES.contains(&status.as_u16())
    }

    /// A budget went negative. Budgets sitting at zero still allow this attempt.
    pub fn is_exhausted(&self) -> bool {
        [self.total, self.connect, self.read, self.redirect, self.status, self.other]
            .into_iter()
            .flatten()
            .filter(|&n| n != 0)
            .min()
            .is_some_and(|n| n < 0)
    }

    /// Upper bound on dispatches one `urlopen` call can make under this policy.
    pub fn attempt_bound(&self) -> Option<usize> {
        if let Some(total) = self.total {
            return Some(total.max(0) as usize + 1);
        }
        let budgets = [self.connect, self.read, self.redirect, self.status, self.other];
        budgets
            .into_iter()
            .try_fold(1usize, |acc, n| n.map(|n| acc + n.max(0) as usize + 1))
    }

    /// Consume one attempt for `error` or `response`.
    ///
    /// Errors that may not be retried (read errors on non-idempotent methods, or any
    /// error when retries are disabled) come back unchanged. Exhaustion yields
    /// [`PoolError::MaxRetry`] or, for redirects, [`PoolError::TooManyRedirects`].
    pub fn increment(
        &self,
        method: &Method,
        url: &str,
        error: Option<PoolError>,
        response: Option<ResponseSummary<'_>>,
        pool: &str,
    ) -> Result<Retry, PoolError> {
        if self.disabled {
            if let Some(error) = error {
                return Err(error);
            }
        }

        let mut next = self.clone();
        next.total = self.total.map(|n| n - 1);
        let mut cause = "too many error responses".to_string();
        let mut status = None;
        let mut redirect_location = None;
        let mut redirected = false;

        let error = match error {
            Some(err) if err.is_read_error() && !self.is_method_retryable(method) => return Err(err),
            other => other,
        };

        match (error.as_ref(), response) {
            (Some(err), _) if err.is_connection_error() => {
                next.connect = self.connect.map(|n| n - 1);
            }
            (Some(err), _) if err.is_read_error() => {
                next.read = self.read.map(|n| n - 1);
            }
            (Some(_), _) => {
                next.other = self.other.map(|n| n - 1);
            }
            (None, Some(resp)) if resp.redirect_location.is_some() => {
                next.redirect = self.redirect.map(|n| n - 1);
                redirected = true;
                redirect_location = resp.redirect_location.map(str::to_string);
                status = Some(resp.status);
            }
            (None, Some(resp)) => {
                next.status = self.status.map(|n| n - 1);
                cause = format!("too many {} error responses", resp.status.as_u16());
                status = Some(resp.status);
            }
            (None, None) => {}
        }

        next.history.push(RequestHistory {
            method: method.clone(),
            url: url.to_string(),
            error: error.as_ref().map(|e| e.to_string()),
            status,
            redirect_location,
        });

        if next.is_exhausted() {
            if redirected {
                return Err(PoolError::TooManyRedirects { pool: pool.to_string(), url: url.to_string() });
            }
            let reason = error.unwrap_or(PoolError::Response(cause));
            return Err(PoolError::MaxRetry { pool: pool.to_string(), url: url.to_string(), reason: Box::new(reason) });
        }

        tracing::debug!(url = %url, retry = %next, "incremented retry");
        Ok(next)
    }

    /// Backoff before the next attempt, from consecutive errors since the last redirect.
    pub fn get_backoff_time(&self) -> Duration {
        let consecutive = self.history.iter().rev().take_while(|h| h.redirect_location.is_none()).count();
        if consecutive <= 1 {
            return Duration::ZERO;
        }
        let exponent = (consecutive - 1).min(62) as i32;
        let value = self.backoff_factor * 2f64.powi(exponent);
        Duration::try_from_secs_f64(value).unwrap_or(self.backoff_max).min(self.backoff_max)
    }

    /// Parse a `Retry-After` value: delay seconds or an IMF-fixdate.
    pub fn parse_retry_after(value: &str) -> Result<Duration, PoolError> {
        let trimmed = value.trim();
        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return trimmed
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| PoolError::InvalidHeader(format!("invalid Retry-After header: {value}")));
        }
        let invalid = || PoolError::InvalidHeader(format!("invalid Retry-After header: {value}"));
        let format = time::format_description::parse(
            "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT",
        )
        .map_err(|_| invalid())?;
        let date = time::PrimitiveDateTime::parse(trimmed, &format).map_err(|_| invalid())?.assume_utc();
        let delta = date - OffsetDateTime::now_utc();
        Ok(Duration::try_from(delta).unwrap_or(Duration::ZERO))
    }

    /// Server-requested delay from `headers`, if any.
    pub fn get_retry_after(headers: &HeaderMap) -> Result<Option<Duration>, PoolError> {
        let Some(value) = headers.get(RETRY_AFTER) else {
            return Ok(None);
        };
        let value = value
            .to_str()
            .map_err(|_| PoolError::InvalidHeader("Retry-After header is not valid ASCII".into()))?;
        Self::parse_retry_after(value).map(Some)
    }

    /// Sleep for the `Retry-After` delay. Returns whether a delay was present.
    pub async fn sleep_for_retry(&self, headers: &HeaderMap) -> Result<bool, PoolError> {
        match Self::get_retry_after(headers)? {
            Some(delay) => {
                tokio::time::sleep(delay).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Sleep before the next attempt: `Retry-After` when honoured and present, else backoff.
    pub async fn sleep(&self, headers: Option<&HeaderMap>) -> Result<(), PoolError> {
        if let Some(headers) = headers.filter(|_| self.respect_retry_after_header) {
            if self.sleep_for_retry(headers).await? {
                return Ok(());
            }
        }
        let backoff = self.get_backoff_time();
        if !backoff.is_zero() {
            tokio::time::sleep(backoff).await;
        }
        Ok(())
    }
}

impl fmt::Display for Retry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn count(n: Option<i32>) -> String {
            n.map_or_else(|| "None".to_string(), |n| n.to_string())
        }
        write!(
            f,
            "Retry(total={}, connect={}, read={}, redirect={}, status={})",
            count(self.total),
            count(self.connect),
            count(self.read),
            count(self.redirect),
            count(self.status)
        )
    }
}
