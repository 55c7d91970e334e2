//! Connection handles and the slot pool.
//!
//! - [`client`]: the [`Connection`](client::Connection) contract and its factory
//! - [`pool`]: bounded LIFO slot container and checked-out leases
//! - [`connection`]: hyper HTTP/1.1 implementation of the contract
//! - [`connectjob`]: DNS → TCP → proxy TLS → CONNECT → TLS
//! - [`proxy`]: HTTP/HTTPS proxy settings
//! - [`tls`]: TLS verification parameters with BoringSSL

pub mod client;
pub mod connectjob;
pub mod connection;
pub mod pool;
pub mod proxy;
pub mod stream;
pub mod tls;
