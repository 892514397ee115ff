//! # Contracts
//!
//! Frozen interface contracts between the dispatch engine and its
//! collaborators. Business crates depend on this crate only; reverse
//! dependencies are prohibited.
//!
//! ## Collaborators
//! - broker: `ConsumerSession`, `Connection`, `LocalTransaction`, `XaResource`
//! - container: `EndpointFactory`, `MessageEndpoint`, `MessageListener`,
//!   `TransactionCoordinator`
//! - diagnostics: `FaultReporter`

mod blueprint;
mod dispatcher_config;
mod endpoint;
mod engine_id;
mod error;
mod message;
mod session;
mod transaction;

pub use blueprint::*;
pub use dispatcher_config::*;
pub use endpoint::*;
pub use engine_id::EngineId;
pub use error::*;
pub use message::*;
pub use session::*;
pub use transaction::*;
