//! Base types and error handling.
//!
//! - [`error`]: [`ConnError`](error::ConnError) transport tags and the caller-facing
//!   [`PoolError`](error::PoolError)
//! - [`timeout`]: per-request connect/read/total budgets

pub mod error;
pub mod timeout;
