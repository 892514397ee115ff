//! Dispatcher - drives one locked batch through an endpoint

use std::collections::HashMap;
use std::sync::Arc;

use contracts::{
    Connection, ConsumerSession, DispatcherConfig, EndpointFactory, FaultReporter, MessageEndpoint,
    MessageHandle, Reliability, StrategyKind, TransactionCoordinator, ON_MESSAGE,
};
use tracing::{debug, info, instrument, warn};

use crate::cursor::LockedBatch;
use crate::error::{DispatchError, Result};
use crate::fault::LogFaultReporter;
use crate::invoker::EndpointInvoker;
use crate::metrics::DispatchMetrics;
use crate::outcomes::TransactionOutcomes;
use crate::strategy::{
    AcknowledgeStrategy, BatchDeletion, Cycle, SingleDeletion, SynchronizedTransactional,
    XaTransactional,
};
use crate::xa_resource::OutcomeTrackingXaResource;

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder<S, F> {
    session: Arc<S>,
    factory: F,
    config: DispatcherConfig,
    outcomes: Option<TransactionOutcomes>,
    coordinator: Option<Arc<dyn TransactionCoordinator>>,
    reporter: Option<Arc<dyn FaultReporter>>,
    metrics: Option<Arc<DispatchMetrics>>,
}

impl<S, F> DispatcherBuilder<S, F>
where
    S: ConsumerSession + 'static,
    F: EndpointFactory,
{
    /// Create a new DispatcherBuilder
    pub fn new(session: Arc<S>, factory: F, config: DispatcherConfig) -> Self {
        Self {
            session,
            factory,
            config,
            outcomes: None,
            coordinator: None,
            reporter: None,
            metrics: None,
        }
    }

    /// Share an outcome tracker with other dispatchers
    pub fn with_outcomes(mut self, outcomes: TransactionOutcomes) -> Self {
        self.outcomes = Some(outcomes);
        self
    }

    /// Ambient coordinator, required by the synchronized strategy
    pub fn with_coordinator(mut self, coordinator: Arc<dyn TransactionCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Sink for swallowed failures (defaults to `LogFaultReporter`)
    pub fn with_fault_reporter(mut self, reporter: Arc<dyn FaultReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Pick the acknowledgment strategy and build the dispatcher
    ///
    /// # Errors
    /// - `Configuration` for the synchronized strategy without a coordinator
    /// - `Resource` when the XA resource cannot be obtained
    #[instrument(
        name = "dispatcher_builder_build",
        skip(self),
        fields(session_id = self.session.id())
    )]
    pub fn build(self) -> Result<Dispatcher<S, F>> {
        let Self {
            session,
            factory,
            config,
            outcomes,
            coordinator,
            reporter,
            metrics,
        } = self;

        let transacted = factory.is_delivery_transacted(ON_MESSAGE);
        let kind = config.strategy_kind(transacted);
        let outcomes = outcomes.unwrap_or_default();

        let strategy = match kind {
            StrategyKind::BatchDeletion => AcknowledgeStrategy::BatchDeletion(BatchDeletion::new()),
            StrategyKind::SingleDeletion => {
                AcknowledgeStrategy::SingleDeletion(SingleDeletion::new())
            }
            StrategyKind::Transactional => {
                let delegate = session.connection()?.xa_resource()?;
                let resource = OutcomeTrackingXaResource::new(delegate, outcomes);
                AcknowledgeStrategy::Transactional(XaTransactional::new(Arc::new(resource)))
            }
            StrategyKind::Synchronized => {
                let coordinator = coordinator.ok_or_else(|| {
                    DispatchError::configuration(
                        "synchronized transaction mode requires a transaction coordinator",
                    )
                })?;
                AcknowledgeStrategy::Synchronized(SynchronizedTransactional::new(
                    coordinator,
                    outcomes,
                ))
            }
        };

        info!(strategy = %kind, transacted, "Dispatcher built");

        let reporter = reporter.unwrap_or_else(|| Arc::new(LogFaultReporter));
        Ok(Dispatcher {
            session,
            factory,
            config,
            strategy,
            invoker: EndpointInvoker::new(Arc::clone(&reporter)),
            reporter,
            metrics: metrics.unwrap_or_default(),
            reliability: HashMap::new(),
        })
    }
}

/// Delivers locked batches to endpoints of one factory and acknowledges
/// them with the configured strategy.
///
/// One batch at a time, strictly in cursor order.
pub struct Dispatcher<S: ConsumerSession, F> {
    session: Arc<S>,
    factory: F,
    config: DispatcherConfig,
    strategy: AcknowledgeStrategy<S>,
    invoker: EndpointInvoker,
    reporter: Arc<dyn FaultReporter>,
    metrics: Arc<DispatchMetrics>,
    /// Reliability of each message before it was delivered
    reliability: HashMap<MessageHandle, Reliability>,
}

impl<S, F> Dispatcher<S, F>
where
    S: ConsumerSession + 'static,
    F: EndpointFactory,
{
    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    /// Deliver every message of `batch`, then acknowledge.
    ///
    /// The batch is rewound first. Delivery stops at the first error;
    /// cleanup runs exactly once either way and the endpoint is released
    /// before returning.
    ///
    /// # Errors
    /// - `Fatal` with the listener's signal, unchanged
    /// - `Resource` from endpoint creation or a pre/post-delivery step
    /// - `Internal` for a broken collaborator contract
    #[instrument(
        name = "dispatcher_dispatch",
        skip_all,
        fields(
            session_id = self.session.id(),
            strategy = %self.strategy.kind(),
            messages = batch.len()
        )
    )]
    pub async fn dispatch(&mut self, batch: &mut LockedBatch) -> Result<()> {
        let mut endpoint = self
            .factory
            .create_endpoint(self.strategy.endpoint_xa_resource())?;
        batch.reset();

        let result = self.deliver_all(&mut endpoint, batch).await;
        if let Err(e) = &result {
            debug!(error = %e, "Delivery loop ended early");
        }

        self.cleanup().await;
        endpoint.release();
        self.reliability.clear();
        self.metrics.inc_cycles();
        result
    }

    async fn deliver_all(
        &mut self,
        endpoint: &mut F::Endpoint,
        batch: &mut LockedBatch,
    ) -> Result<()> {
        while let Some(message) = batch.next() {
            self.reliability
                .insert(message.handle.clone(), message.reliability);
            let cycle = Cycle {
                session: self.session.as_ref(),
                config: &self.config,
                reliability: &self.reliability,
                reporter: self.reporter.as_ref(),
                metrics: &self.metrics,
            };

            self.strategy
                .before_delivery(message, endpoint, &cycle)
                .await?;

            let transaction = self.strategy.current_transaction();
            let outcome = self
                .invoker
                .invoke(endpoint, message, &self.session, transaction.as_ref())
                .await?;

            if let Some(signal) = outcome.fatal {
                return Err(DispatchError::Fatal(signal));
            }
            if outcome.delivered {
                self.metrics.inc_delivered();
            } else {
                self.record_failure();
            }

            self.strategy
                .after_delivery(message, endpoint, outcome.delivered, &cycle)
                .await?;
        }
        Ok(())
    }

    fn record_failure(&self) {
        let run = self.metrics.inc_failed();
        let threshold = u64::from(self.config.sequential_failure_threshold);
        if threshold > 0 && run == threshold {
            warn!(
                session_id = self.session.id(),
                consecutive_failures = run,
                "Sequential failure threshold reached"
            );
        }
    }

    /// Run the strategy's end-of-cycle acknowledgment.
    ///
    /// Never fails; problems go to the fault reporter. Safe to call again.
    pub async fn cleanup(&mut self) {
        let cycle = Cycle {
            session: self.session.as_ref(),
            config: &self.config,
            reliability: &self.reliability,
            reporter: self.reporter.as_ref(),
            metrics: &self.metrics,
        };
        self.strategy.cleanup(&cycle).await;
    }

    /// Whether the transaction of the last delivery was rolled back.
    ///
    /// Consumes the recorded outcome: a second call answers true. Always
    /// false for non-transactional strategies.
    pub fn is_transaction_rolled_back(&self) -> bool {
        self.strategy.is_transaction_rolled_back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{
        BrokerCall, DeliveryScript, EndpointEvent, InMemoryBroker, InMemoryCoordinator,
        InMemorySession, ScriptedEndpointFactory,
    };
    use crate::session::ScopedConsumerSession;
    use contracts::{AcknowledgeMode, CompletionStatus, TransactionId, TransactionMode};

    fn config(
        acknowledge_mode: AcknowledgeMode,
        transaction_mode: TransactionMode,
    ) -> DispatcherConfig {
        DispatcherConfig {
            acknowledge_mode,
            transaction_mode,
            ..DispatcherConfig::default()
        }
    }

    fn dispatcher(
        broker: &InMemoryBroker,
        factory: ScriptedEndpointFactory,
        config: DispatcherConfig,
    ) -> Dispatcher<InMemorySession, ScriptedEndpointFactory> {
        DispatcherBuilder::new(Arc::new(broker.session(1, "orders")), factory, config)
            .build()
            .unwrap()
    }

    fn deletes(calls: &[BrokerCall]) -> Vec<&BrokerCall> {
        calls
            .iter()
            .filter(|c| matches!(c, BrokerCall::DeleteSet { .. }))
            .collect()
    }

    #[test]
    fn test_builder_selects_strategy() {
        let broker = InMemoryBroker::new("ME01");
        let plain = ScriptedEndpointFactory::new(DeliveryScript::succeed_all());

        let auto = config(AcknowledgeMode::AutoAcknowledge, TransactionMode::Xa);
        let d = dispatcher(&broker, plain.clone(), auto);
        assert_eq!(d.strategy_kind(), StrategyKind::SingleDeletion);
        let dups_ok = config(AcknowledgeMode::DupsOkAcknowledge, TransactionMode::Xa);
        let d = dispatcher(&broker, plain, dups_ok);
        assert_eq!(d.strategy_kind(), StrategyKind::BatchDeletion);

        let transacted =
            ScriptedEndpointFactory::new(DeliveryScript::succeed_all()).transacted(true);
        let d = dispatcher(&broker, transacted, DispatcherConfig::default());
        assert_eq!(d.strategy_kind(), StrategyKind::Transactional);
    }

    #[test]
    fn test_synchronized_requires_coordinator() {
        let broker = InMemoryBroker::new("ME01");
        let factory = ScriptedEndpointFactory::new(DeliveryScript::succeed_all()).transacted(true);
        let result = DispatcherBuilder::new(
            Arc::new(broker.session(1, "orders")),
            factory,
            config(AcknowledgeMode::AutoAcknowledge, TransactionMode::Synchronized),
        )
        .build();
        assert!(matches!(result, Err(DispatchError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_single_deletion_interleaves_with_delivery() {
        let broker = InMemoryBroker::new("ME01");
        let factory = ScriptedEndpointFactory::new(DeliveryScript::succeed_all());
        let mut d = dispatcher(&broker, factory.clone(), DispatcherConfig::default());
        let mut batch = broker.lock_messages(3, Reliability::ReliablePersistent);

        d.dispatch(&mut batch).await.unwrap();

        let calls = broker.calls();
        let deletes = deletes(&calls);
        assert_eq!(deletes.len(), 3);
        assert_eq!(broker.deleted(), batch.handles());
        assert_eq!(factory.events().last(), Some(&EndpointEvent::Released));
        assert_eq!(d.metrics().snapshot().delivered, 3);
    }

    #[tokio::test]
    async fn test_batch_deletion_single_bulk_delete() {
        let broker = InMemoryBroker::new("ME01");
        let factory = ScriptedEndpointFactory::new(DeliveryScript::succeed_all());
        let mut d = dispatcher(
            &broker,
            factory,
            config(AcknowledgeMode::DupsOkAcknowledge, TransactionMode::Xa),
        );
        let mut batch = broker.lock_messages(5, Reliability::ReliablePersistent);

        d.dispatch(&mut batch).await.unwrap();

        // Each delivery scopes the session; the only delete comes at cleanup
        let mut expected: Vec<BrokerCall> =
            std::iter::repeat([BrokerCall::CloneConnection, BrokerCall::CloseConnection])
                .take(5)
                .flatten()
                .collect();
        expected.push(BrokerCall::DeleteSet {
            handles: batch.handles(),
            transaction: None,
        });
        assert_eq!(broker.calls(), expected);
    }

    #[tokio::test]
    async fn test_failed_delivery_redelivered_with_retry_increment() {
        let broker = InMemoryBroker::new("ME01");
        let factory = ScriptedEndpointFactory::new(DeliveryScript::failing([2]));
        let mut d = dispatcher(&broker, factory, DispatcherConfig::default());
        let mut batch = broker.lock_messages(3, Reliability::ReliablePersistent);

        d.dispatch(&mut batch).await.unwrap();

        let failed = MessageHandle::new("ME01", 2);
        assert_eq!(broker.unlocked(), vec![failed.clone()]);
        assert_eq!(broker.retry_count(&failed), 1);
        assert_eq!(broker.deleted().len(), 2);
        let rollbacks = broker
            .calls()
            .into_iter()
            .filter(|c| matches!(c, BrokerCall::Rollback(_)))
            .count();
        assert_eq!(rollbacks, 1);
    }

    #[tokio::test]
    async fn test_fatal_signal_skips_after_delivery_and_cleans_up() {
        let broker = InMemoryBroker::new("ME01");
        let factory = ScriptedEndpointFactory::new(DeliveryScript {
            fail_handles: [1].into(),
            fatal_handle: Some(2),
            retain_sessions: true,
            ..DeliveryScript::default()
        });
        let mut d = dispatcher(
            &broker,
            factory.clone(),
            config(AcknowledgeMode::DupsOkAcknowledge, TransactionMode::Xa),
        );
        let mut batch = broker.lock_messages(3, Reliability::ReliablePersistent);

        let err = d.dispatch(&mut batch).await.unwrap_err();
        match err {
            DispatchError::Fatal(signal) => assert_eq!(signal.reason(), "fatal on message 2"),
            other => panic!("expected fatal signal, got {other:?}"),
        }

        // Message 1 failed before the fatal one and is still handed back
        assert_eq!(broker.unlocked(), vec![MessageHandle::new("ME01", 1)]);
        // Message 3 was never delivered
        assert_eq!(factory.deliveries(), 2);
        assert_eq!(factory.events().last(), Some(&EndpointEvent::Released));
        let retained = factory.retained::<ScopedConsumerSession<InMemorySession>>();
        assert!(retained.iter().all(ScopedConsumerSession::is_out_of_scope));
    }

    #[tokio::test]
    async fn test_endpoint_creation_failure_is_surfaced() {
        let broker = InMemoryBroker::new("ME01");
        let factory = ScriptedEndpointFactory::new(DeliveryScript {
            fail_create: true,
            ..DeliveryScript::default()
        });
        let mut d = dispatcher(&broker, factory, DispatcherConfig::default());
        let mut batch = broker.lock_messages(1, Reliability::ReliablePersistent);
        assert!(matches!(
            d.dispatch(&mut batch).await,
            Err(DispatchError::Resource(_))
        ));
        assert!(broker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_listener_aborts_with_internal_error() {
        let broker = InMemoryBroker::new("ME01");
        let factory = ScriptedEndpointFactory::new(DeliveryScript {
            without_listener: true,
            ..DeliveryScript::default()
        });
        let mut d = dispatcher(&broker, factory.clone(), DispatcherConfig::default());
        let mut batch = broker.lock_messages(2, Reliability::ReliablePersistent);
        let err = d.dispatch(&mut batch).await.unwrap_err();
        assert!(matches!(err, DispatchError::Internal { .. }));
        assert_eq!(factory.events().last(), Some(&EndpointEvent::Released));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let broker = InMemoryBroker::new("ME01");
        let factory = ScriptedEndpointFactory::new(DeliveryScript::fail_every(1));
        let mut d = dispatcher(&broker, factory, DispatcherConfig::default());
        d.cleanup().await;

        let mut batch = broker.lock_messages(2, Reliability::ReliablePersistent);
        d.dispatch(&mut batch).await.unwrap();
        let calls = broker.calls().len();
        d.cleanup().await;
        d.cleanup().await;
        assert_eq!(broker.calls().len(), calls);
    }

    #[tokio::test]
    async fn test_redispatch_rewinds_batch() {
        let broker = InMemoryBroker::new("ME01");
        let factory = ScriptedEndpointFactory::new(DeliveryScript::succeed_all());
        let mut d = dispatcher(&broker, factory.clone(), DispatcherConfig::default());
        let mut batch = broker.lock_messages(2, Reliability::ReliablePersistent);
        batch.next();
        batch.next();

        d.dispatch(&mut batch).await.unwrap();
        assert_eq!(factory.deliveries(), 2);
    }

    #[tokio::test]
    async fn test_reliability_snapshot_taken_before_delivery() {
        let broker = InMemoryBroker::new("ME01");
        let factory = ScriptedEndpointFactory::new(DeliveryScript {
            rewrite_reliability: Some(Reliability::AssuredPersistent),
            ..DeliveryScript::fail_every(1)
        });
        let config = DispatcherConfig {
            delete_unrecoverable_messages: true,
            ..DispatcherConfig::default()
        };
        let mut d = dispatcher(&broker, factory, config);
        let mut batch = broker.lock_messages(1, Reliability::BestEffortNonPersistent);

        d.dispatch(&mut batch).await.unwrap();
        // Best effort at read time: already resolved, never handed back
        assert!(broker.unlocked().is_empty());
        assert!(deletes(&broker.calls()).is_empty());
    }

    #[tokio::test]
    async fn test_sequential_failures_counted() {
        let broker = InMemoryBroker::new("ME01");
        let factory = ScriptedEndpointFactory::new(DeliveryScript::fail_every(1));
        let config = DispatcherConfig {
            sequential_failure_threshold: 2,
            ..DispatcherConfig::default()
        };
        let mut d = dispatcher(&broker, factory, config);
        let mut batch = broker.lock_messages(3, Reliability::ReliablePersistent);
        d.dispatch(&mut batch).await.unwrap();

        let snapshot = d.metrics().snapshot();
        assert_eq!(snapshot.failed, 3);
        assert_eq!(snapshot.consecutive_failures, 3);
        assert_eq!(snapshot.unlocked, 3);
        assert_eq!(snapshot.cycles, 1);
    }

    #[tokio::test]
    async fn test_xa_delivery_commits_delete() {
        let broker = InMemoryBroker::new("ME01");
        let factory = ScriptedEndpointFactory::new(DeliveryScript::succeed_all()).transacted(true);
        let mut d = dispatcher(&broker, factory.clone(), DispatcherConfig::default());
        let mut batch = broker.lock_messages(1, Reliability::ReliablePersistent);

        d.dispatch(&mut batch).await.unwrap();

        assert_eq!(broker.deleted(), batch.handles());
        assert!(!d.is_transaction_rolled_back());
        assert!(d.is_transaction_rolled_back());
        assert!(factory
            .events()
            .contains(&EndpointEvent::Created { xa_enlisted: true }));
        assert!(factory.events().iter().any(|e| matches!(
            e,
            EndpointEvent::Delivered {
                transaction: Some(TransactionId::Global(_)),
                ok: true,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_xa_failed_delivery_rolls_back_delete() {
        let broker = InMemoryBroker::new("ME01");
        let factory = ScriptedEndpointFactory::new(DeliveryScript::fail_every(1)).transacted(true);
        let mut d = dispatcher(&broker, factory, DispatcherConfig::default());
        let mut batch = broker.lock_messages(1, Reliability::ReliablePersistent);

        d.dispatch(&mut batch).await.unwrap();

        assert!(broker.deleted().is_empty());
        assert_eq!(broker.unlocked(), batch.handles());
        assert_eq!(broker.retry_count(&batch.handles()[0]), 1);
        assert!(d.is_transaction_rolled_back());
    }

    #[tokio::test]
    async fn test_synchronized_delivery_completed_by_coordinator() {
        let broker = InMemoryBroker::new("ME01");
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let factory = ScriptedEndpointFactory::new(DeliveryScript::succeed_all())
            .transacted(true)
            .with_coordinator(coordinator.clone());
        let mut d = DispatcherBuilder::new(
            Arc::new(broker.session(1, "orders")),
            factory,
            config(AcknowledgeMode::AutoAcknowledge, TransactionMode::Synchronized),
        )
        .with_coordinator(coordinator.clone())
        .build()
        .unwrap();
        let mut batch = broker.lock_messages(2, Reliability::ReliablePersistent);

        d.dispatch(&mut batch).await.unwrap();

        assert_eq!(coordinator.registrations(), 2);
        assert_eq!(broker.deleted(), batch.handles());
        assert!(!d.is_transaction_rolled_back());
        assert!(broker.calls().contains(&BrokerCall::CreateTransaction {
            id: TransactionId::Local(2),
            register_synchronization: true,
        }));
    }

    #[tokio::test]
    async fn test_before_delivery_failure_aborts_but_cleans_up() {
        let broker = InMemoryBroker::new("ME01");
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let factory = ScriptedEndpointFactory::new(DeliveryScript {
            fail_before_delivery: true,
            ..DeliveryScript::default()
        })
        .transacted(true);
        let mut d = DispatcherBuilder::new(
            Arc::new(broker.session(1, "orders")),
            factory.clone(),
            config(AcknowledgeMode::AutoAcknowledge, TransactionMode::Synchronized),
        )
        .with_coordinator(coordinator)
        .build()
        .unwrap();
        let mut batch = broker.lock_messages(2, Reliability::ReliablePersistent);

        assert!(d.dispatch(&mut batch).await.is_err());
        assert_eq!(factory.deliveries(), 0);
        assert_eq!(factory.events().last(), Some(&EndpointEvent::Released));
        assert_eq!(d.session().id(), 1);
    }

    #[tokio::test]
    async fn test_coordinator_rollback_reported() {
        let broker = InMemoryBroker::new("ME01");
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let factory = ScriptedEndpointFactory::new(DeliveryScript::fail_every(1))
            .transacted(true)
            .with_coordinator(coordinator.clone());
        let mut d = DispatcherBuilder::new(
            Arc::new(broker.session(1, "orders")),
            factory,
            config(AcknowledgeMode::AutoAcknowledge, TransactionMode::Synchronized),
        )
        .with_coordinator(coordinator)
        .build()
        .unwrap();
        let mut batch = broker.lock_messages(1, Reliability::ReliablePersistent);

        d.dispatch(&mut batch).await.unwrap();
        assert!(d.is_transaction_rolled_back());
        assert_eq!(broker.unlocked(), batch.handles());
    }

    #[tokio::test]
    async fn test_synchronized_fatal_cycle_leaves_no_transaction_behind() {
        let broker = InMemoryBroker::new("ME01");
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let factory = ScriptedEndpointFactory::new(DeliveryScript {
            fatal_handle: Some(1),
            ..DeliveryScript::default()
        })
        .transacted(true);
        let mut d = DispatcherBuilder::new(
            Arc::new(broker.session(1, "orders")),
            factory.clone(),
            config(AcknowledgeMode::AutoAcknowledge, TransactionMode::Synchronized),
        )
        .with_coordinator(coordinator.clone())
        .build()
        .unwrap();

        let mut first = broker.lock_messages(1, Reliability::ReliablePersistent);
        assert!(matches!(
            d.dispatch(&mut first).await,
            Err(DispatchError::Fatal(_))
        ));
        coordinator.complete(CompletionStatus::RolledBack);

        let mut second = broker.lock_messages(1, Reliability::ReliablePersistent);
        d.dispatch(&mut second).await.unwrap();

        assert!(broker.calls().contains(&BrokerCall::CreateTransaction {
            id: TransactionId::Local(2),
            register_synchronization: true,
        }));
        assert!(factory.events().contains(&EndpointEvent::Delivered {
            handle: second.handles()[0].clone(),
            transaction: Some(TransactionId::Local(2)),
            ok: true,
        }));
        coordinator.complete(CompletionStatus::Committed);
        assert_eq!(broker.deleted(), second.handles());
        assert_eq!(broker.unlocked(), first.handles());
    }

    #[tokio::test]
    async fn test_xa_fatal_cycle_leaves_no_branch_behind() {
        let broker = InMemoryBroker::new("ME01");
        let factory = ScriptedEndpointFactory::new(DeliveryScript {
            fatal_handle: Some(1),
            ..DeliveryScript::default()
        })
        .transacted(true);
        let mut d = dispatcher(&broker, factory.clone(), DispatcherConfig::default());

        let mut first = broker.lock_messages(1, Reliability::ReliablePersistent);
        assert!(d.dispatch(&mut first).await.is_err());
        assert!(d.strategy.current_transaction().is_none());

        let mut second = broker.lock_messages(1, Reliability::ReliablePersistent);
        d.dispatch(&mut second).await.unwrap();

        let transactions: Vec<Option<TransactionId>> = factory
            .events()
            .into_iter()
            .filter_map(|e| match e {
                EndpointEvent::Delivered { transaction, .. } => Some(transaction),
                _ => None,
            })
            .collect();
        assert_eq!(transactions.len(), 2);
        assert_ne!(transactions[0], transactions[1]);
        assert_eq!(broker.deleted(), second.handles());
        assert!(!d.is_transaction_rolled_back());
    }
}
