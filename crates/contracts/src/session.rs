//! ConsumerSession / Connection traits - the broker side of dispatch
//!
//! The dispatch engine only consumes these capabilities; storage and locking
//! live in the broker.

use std::future::Future;
use std::sync::Arc;

use crate::{ContractError, LocalTransaction, MessageHandle, TransactionId, XaResource};

/// Broker connection owning the consumer session.
pub trait Connection: Send + Sync {
    /// Transaction type produced by `create_uncoordinated_transaction`
    type Transaction: LocalTransaction + 'static;

    /// Name of the messaging engine this connection is attached to
    fn messaging_engine_name(&self) -> &str;

    /// Clone the connection so a second holder can use (and close) it
    /// independently of this handle.
    fn clone_connection(&self) -> Result<Self, ContractError>
    where
        Self: Sized;

    /// Close this connection handle
    fn close(&self) -> impl Future<Output = Result<(), ContractError>> + Send;

    /// Create a local transaction not enlisted with any coordinator
    ///
    /// # Arguments
    /// * `register_synchronization` - expose a `Synchronization` so an ambient
    ///   coordinator can complete the transaction
    fn create_uncoordinated_transaction(
        &self,
        register_synchronization: bool,
    ) -> impl Future<Output = Result<Self::Transaction, ContractError>> + Send;

    /// XA resource for enlisting the connection in global transactions
    fn xa_resource(&self) -> Result<Arc<dyn XaResource>, ContractError>;
}

/// Consumer session holding the locks on a batch of messages.
///
/// All operations take `&self`; implementations synchronize internally.
pub trait ConsumerSession: Send + Sync {
    type Connection: Connection;

    /// Session identifier
    fn id(&self) -> u64;

    /// Destination the session consumes from
    fn destination(&self) -> Result<&str, ContractError>;

    /// Connection that created the session
    fn connection(&self) -> Result<&Self::Connection, ContractError>;

    /// Delete a set of locked messages, optionally under a transaction
    fn delete_set(
        &self,
        handles: &[MessageHandle],
        transaction: Option<&TransactionId>,
    ) -> impl Future<Output = Result<(), ContractError>> + Send;

    /// Delete a single locked message
    fn delete_message(
        &self,
        handle: &MessageHandle,
        transaction: Option<&TransactionId>,
    ) -> impl Future<Output = Result<(), ContractError>> + Send {
        self.delete_set(std::slice::from_ref(handle), transaction)
    }

    /// Release locks so the broker can redeliver the messages
    ///
    /// # Arguments
    /// * `increment_retry_count` - count the unlock as a failed delivery
    fn unlock_set(
        &self,
        handles: &[MessageHandle],
        increment_retry_count: bool,
    ) -> impl Future<Output = Result<(), ContractError>> + Send;

    /// Release every lock held by the session
    fn unlock_all(&self) -> impl Future<Output = Result<(), ContractError>> + Send;

    fn start(&self) -> impl Future<Output = Result<(), ContractError>> + Send;

    fn stop(&self) -> impl Future<Output = Result<(), ContractError>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), ContractError>> + Send;
}

/// Transaction type reachable from a session
pub type SessionTransaction<S> =
    <<S as ConsumerSession>::Connection as Connection>::Transaction;
