pub mod executor;
pub mod redirect;
pub mod requestbody;
pub mod response;
pub mod retry;
pub mod transaction;

// Re-exports for convenience
pub use executor::{RequestTrace, TraceHook};
pub use requestbody::{BodyPosition, RequestBody};
pub use response::PoolResponse;
pub use retry::{RequestHistory, Retry};
pub use transaction::RequestOptions;
