//! Run tracking service backed by SQLite.
//!
//! # Intention
//!
//! - Store recorded runs (distance, duration, completion time, optional body
//!   weight) and derive totals and goal progress from them.
//! - Expose the operations as a typed RPC surface that never leaks storage
//!   details to callers.
//!
//! # Architectural Boundaries
//!
//! - [`gateway`] is the only code that speaks SQL; [`pool`] owns connections.
//! - [`service`] adapts RPC messages to gateway calls and maps failures to
//!   [`error::Status`]; [`rpc`] binds it to HTTP.
//! - Every operation is scoped to an explicit [`model::UserId`].

pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod pool;
pub mod rpc;
pub mod service;
pub mod sqlite;
pub mod wire;

pub use error::{Code, Status, StorageError};
pub use gateway::RunGateway;
pub use model::{Goal, Run, RunFields, Stats, UserId};
pub use pool::ConnectionPool;
pub use service::{CallContext, RunRpc, RunService};
pub use sqlite::SqliteConfig;
