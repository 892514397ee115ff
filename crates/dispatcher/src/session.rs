//! ScopedConsumerSession - consumer session usable only during one delivery

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use contracts::{Connection, ConsumerSession, ContractError, MessageHandle, TransactionId};
use tracing::{debug, warn};

/// Session handed to a listener for the duration of one `on_message` call.
///
/// Holds its own clone of the connection, created up front. Once
/// `out_of_scope` has run, every delegated operation fails with
/// `SessionUnavailable`; clones retained by the listener share the flag.
pub struct ScopedConsumerSession<S: ConsumerSession> {
    inner: Arc<Scope<S>>,
}

struct Scope<S: ConsumerSession> {
    session: Arc<S>,
    connection: S::Connection,
    out_of_scope: AtomicBool,
}

impl<S: ConsumerSession> Clone for ScopedConsumerSession<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ConsumerSession> std::fmt::Debug for ScopedConsumerSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedConsumerSession")
            .field("session_id", &self.inner.session.id())
            .field("out_of_scope", &self.is_out_of_scope())
            .finish()
    }
}

impl<S: ConsumerSession> ScopedConsumerSession<S> {
    /// Wrap `session`, cloning its connection.
    ///
    /// # Errors
    /// Fails when the session has no connection or the clone fails.
    pub fn new(session: Arc<S>) -> Result<Self, ContractError> {
        let connection = session
            .connection()
            .and_then(|c| c.clone_connection())
            .map_err(|e| {
                ContractError::resource(
                    "clone_connection",
                    format!("cannot scope session {}: {e}", session.id()),
                )
            })?;
        Ok(Self {
            inner: Arc::new(Scope {
                session,
                connection,
                out_of_scope: AtomicBool::new(false),
            }),
        })
    }

    pub fn is_out_of_scope(&self) -> bool {
        self.inner.out_of_scope.load(Ordering::Acquire)
    }

    /// Close the scope and the cloned connection.
    ///
    /// Only the first call closes the connection; close failures are logged.
    pub async fn out_of_scope(&self) {
        if self.inner.out_of_scope.swap(true, Ordering::AcqRel) {
            return;
        }
        let session_id = self.inner.session.id();
        match self.inner.connection.close().await {
            Ok(()) => debug!(session_id, "Scoped session closed"),
            Err(e) => warn!(session_id, error = %e, "Failed to close scoped connection"),
        }
    }

    fn check(&self) -> Result<&S, ContractError> {
        if self.is_out_of_scope() {
            return Err(ContractError::session_unavailable(format!(
                "session {} used outside its delivery",
                self.inner.session.id()
            )));
        }
        Ok(&self.inner.session)
    }
}

impl<S: ConsumerSession> ConsumerSession for ScopedConsumerSession<S> {
    type Connection = S::Connection;

    fn id(&self) -> u64 {
        self.inner.session.id()
    }

    fn destination(&self) -> Result<&str, ContractError> {
        self.check()?.destination()
    }

    /// The scope's own connection clone, never the session's connection
    fn connection(&self) -> Result<&S::Connection, ContractError> {
        self.check()?;
        Ok(&self.inner.connection)
    }

    async fn delete_set(
        &self,
        handles: &[MessageHandle],
        transaction: Option<&TransactionId>,
    ) -> Result<(), ContractError> {
        self.check()?.delete_set(handles, transaction).await
    }

    async fn unlock_set(
        &self,
        handles: &[MessageHandle],
        increment_retry_count: bool,
    ) -> Result<(), ContractError> {
        self.check()?
            .unlock_set(handles, increment_retry_count)
            .await
    }

    async fn unlock_all(&self) -> Result<(), ContractError> {
        self.check()?.unlock_all().await
    }

    async fn start(&self) -> Result<(), ContractError> {
        self.check()?.start().await
    }

    async fn stop(&self) -> Result<(), ContractError> {
        self.check()?.stop().await
    }

    /// Closing is reserved to the session's owner
    async fn close(&self) -> Result<(), ContractError> {
        Err(ContractError::not_supported(
            "close on a session scoped to a delivery",
        ))
    }
}
