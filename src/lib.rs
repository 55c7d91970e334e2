//! # poolnet
//!
//! A connection pool for talking HTTP to one destination, in the style of a
//! browser's socket pools.
//!
//! A pool keeps up to `maxsize` keep-alive connections to a single
//! `scheme://host:port` and reuses the most recently returned one first.
//! Requests go through [`ConnectionPool::urlopen`], which retries transport
//! failures, honours `Retry-After`, and follows redirects under a [`Retry`] policy.
//!
//! ## Features
//!
//! - **Admission control**: blocking checkout with a timeout, or fail-fast with an
//!   unpooled fallback
//! - **Retries**: per-kind budgets, exponential backoff, status forcelist
//! - **Redirects**: separate budget, 303 method change, credential stripping across origins
//! - **TLS**: BoringSSL with CA bundles, client certificates, hostname override and
//!   fingerprint pinning
//! - **Proxies**: HTTP forwarding, CONNECT tunnels, HTTPS proxies
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use poolnet::{HttpConnector, PoolBuilder, RequestOptions};
//! use http::Method;
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = PoolBuilder::https("example.com").maxsize(4).build(HttpConnector);
//!     let response = pool
//!         .urlopen(Method::GET, "/", RequestOptions::default())
//!         .await
//!         .unwrap();
//!     println!("Status: {}", response.status());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error types and timeouts
//! - [`connectionpool`] - The pool, its builder and scheme hooks
//! - [`http`] - Request execution, retry policy, redirects and responses
//! - [`socket`] - Connection contract, slot pool, transport, proxy and TLS

pub mod base;
pub mod connectionpool;
pub mod http;
pub mod socket;

pub use crate::base::error::{ConnError, PoolError};
pub use crate::base::timeout::{Timeout, TimeoutValue};
pub use crate::connectionpool::{ConnectionPool, HttpConnectionPool, HttpsConnectionPool, Plain, PoolBuilder, SchemeHooks, Tls};
pub use crate::http::{PoolResponse, RequestBody, RequestOptions, Retry};
pub use crate::socket::client::{Connection, ConnectionFactory};
pub use crate::socket::connection::{HttpConnection, HttpConnector};
pub use crate::socket::proxy::{ProxyConfig, ProxySettings};
pub use crate::socket::tls::{CertReqs, TlsParams};
