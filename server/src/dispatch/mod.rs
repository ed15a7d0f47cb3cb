//! Query Dispatch
//!
//! Per-user single-flight registration and execution of questions against
//! the backend session.

pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod types;

pub use dispatcher::{DispatchConfig, QueryDispatcher};
pub use error::DispatchError;
pub use registry::PendingRegistry;
pub use types::{QueryRequest, QueryStatus, RequestId, Submission};
