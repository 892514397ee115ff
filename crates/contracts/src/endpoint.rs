//! MessageEndpoint traits - the container side of dispatch

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::{ConsumerSession, ContractError, LockedMessage, TransactionId, XaResource};

/// Name of the listener method passed to `before_delivery`
pub const ON_MESSAGE: &str = "on_message";

/// Unrecoverable termination request raised while delivering.
///
/// Never converted into a failed delivery; the dispatcher hands it back to
/// the host unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fatal termination signal: {reason}")]
pub struct FatalSignal {
    reason: String,
}

impl FatalSignal {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Error returned by a listener
#[derive(Debug, Error)]
pub enum DeliveryFailure {
    /// Ordinary failure, the message will be redelivered
    #[error("delivery failed: {0}")]
    Failed(String),

    /// Fatal signal, must be propagated
    #[error(transparent)]
    Fatal(#[from] FatalSignal),
}

impl DeliveryFailure {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Application callback receiving messages
pub trait MessageListener: Send {
    /// Deliver one message
    ///
    /// # Arguments
    /// * `message` - the locked message, may be modified by the listener
    /// * `session` - session scoped to this call; retaining and using it
    ///   afterwards fails with `SessionUnavailable`
    /// * `transaction` - transaction the delivery runs under, if any
    fn on_message<S>(
        &mut self,
        message: &mut LockedMessage,
        session: &S,
        transaction: Option<&TransactionId>,
    ) -> impl Future<Output = Result<(), DeliveryFailure>> + Send
    where
        S: ConsumerSession + Clone + 'static;
}

/// Container proxy around one listener instance
pub trait MessageEndpoint: Send {
    type Listener: MessageListener;

    /// Listener capability of this endpoint; `None` when the endpoint does
    /// not implement message delivery.
    fn listener(&mut self) -> Option<&mut Self::Listener>;

    /// Container pre-delivery hook (may begin a global transaction)
    fn before_delivery(
        &mut self,
        method: &'static str,
    ) -> impl Future<Output = Result<(), ContractError>> + Send;

    /// Container post-delivery hook (completes any transaction it began)
    fn after_delivery(&mut self) -> impl Future<Output = Result<(), ContractError>> + Send;

    /// Return the endpoint to the container
    fn release(&mut self);
}

/// Creates endpoints for dispatch cycles
pub trait EndpointFactory: Send + Sync {
    type Endpoint: MessageEndpoint;

    /// Create an endpoint, optionally enlisting the given XA resource
    fn create_endpoint(
        &self,
        xa_resource: Option<Arc<dyn XaResource>>,
    ) -> Result<Self::Endpoint, ContractError>;

    /// Whether the container delivers `method` inside a transaction
    fn is_delivery_transacted(&self, method: &'static str) -> bool;
}

/// Diagnostic sink for failures that are reported and then swallowed
pub trait FaultReporter: Send + Sync {
    /// # Arguments
    /// * `probe` - stable identifier of the reporting site
    /// * `fault` - the swallowed error
    fn report(&self, probe: &'static str, fault: &(dyn std::error::Error + 'static));
}
