//! EndpointInvoker - calls the listener and turns the result into an outcome

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use contracts::{
    ConsumerSession, DeliveryFailure, FatalSignal, FaultReporter, LockedMessage, MessageEndpoint,
    MessageListener, TransactionId,
};
use futures::FutureExt;
use tracing::{debug, instrument, warn};

use crate::error::{DispatchError, Result};
use crate::session::ScopedConsumerSession;

const PROBE_DELIVERY_FAILED: &str = "dispatcher.invoker.delivery_failed";
const PROBE_DELIVERY_PANICKED: &str = "dispatcher.invoker.delivery_panicked";

/// Result of one listener invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationOutcome {
    /// Listener returned normally
    pub delivered: bool,
    /// Fatal signal raised by the listener, to be handed back unchanged
    pub fatal: Option<FatalSignal>,
}

impl InvocationOutcome {
    pub fn delivered() -> Self {
        Self {
            delivered: true,
            fatal: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            delivered: false,
            fatal: None,
        }
    }

    pub fn fatal(signal: FatalSignal) -> Self {
        Self {
            delivered: false,
            fatal: Some(signal),
        }
    }
}

/// Invokes endpoints on behalf of a dispatcher
#[derive(Clone)]
pub struct EndpointInvoker {
    reporter: Arc<dyn FaultReporter>,
}

impl EndpointInvoker {
    pub fn new(reporter: Arc<dyn FaultReporter>) -> Self {
        Self { reporter }
    }

    /// Deliver `message` to the endpoint's listener.
    ///
    /// The listener sees a `ScopedConsumerSession` that is taken out of scope
    /// before this returns, whatever the listener did. Errors and panics
    /// become `delivered = false`; a fatal signal, raised either way, is
    /// returned in `fatal`.
    ///
    /// # Errors
    /// - `Internal` when the endpoint has no listener
    /// - `Resource` when the session cannot be scoped
    #[instrument(
        name = "endpoint_invoker_invoke",
        skip_all,
        fields(handle = %message.handle, session_id = session.id())
    )]
    pub async fn invoke<E, S>(
        &self,
        endpoint: &mut E,
        message: &mut LockedMessage,
        session: &Arc<S>,
        transaction: Option<&TransactionId>,
    ) -> Result<InvocationOutcome>
    where
        E: MessageEndpoint,
        S: ConsumerSession + 'static,
    {
        let Some(listener) = endpoint.listener() else {
            return Err(DispatchError::internal(
                "endpoint does not implement a message listener",
            ));
        };

        let scoped = ScopedConsumerSession::new(Arc::clone(session))?;
        let result = AssertUnwindSafe(listener.on_message(message, &scoped, transaction))
            .catch_unwind()
            .await;
        scoped.out_of_scope().await;

        let outcome = match result {
            Ok(Ok(())) => InvocationOutcome::delivered(),
            Ok(Err(DeliveryFailure::Fatal(signal))) => {
                warn!(reason = signal.reason(), "Listener raised fatal signal");
                InvocationOutcome::fatal(signal)
            }
            Ok(Err(failure)) => {
                debug!(error = %failure, "Delivery failed");
                self.reporter.report(PROBE_DELIVERY_FAILED, &failure);
                InvocationOutcome::failed()
            }
            Err(payload) => self.outcome_of_panic(payload),
        };
        Ok(outcome)
    }

    fn outcome_of_panic(&self, payload: Box<dyn Any + Send>) -> InvocationOutcome {
        match payload.downcast::<FatalSignal>() {
            Ok(signal) => {
                warn!(reason = signal.reason(), "Listener panicked with fatal signal");
                InvocationOutcome::fatal(*signal)
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                let failure = DeliveryFailure::failed(format!("listener panicked: {message}"));
                self.reporter.report(PROBE_DELIVERY_PANICKED, &failure);
                InvocationOutcome::failed()
            }
        }
    }
}
