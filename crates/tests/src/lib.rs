//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 配置 -> Dispatcher -> 内存 broker 的 e2e 测试

#[cfg(test)]
mod contract_tests {
    use contracts::{AcknowledgeMode, StrategyKind, TransactionMode};

    #[test]
    fn test_contracts_compile() {
        // 验证 contracts crate 可编译
        let _ = contracts::ConfigVersion::V1;
    }

    #[test]
    fn test_strategy_table() {
        use AcknowledgeMode::{AutoAcknowledge, DupsOkAcknowledge};
        use TransactionMode::{Synchronized, Xa};

        let table = [
            (AutoAcknowledge, Xa, false, StrategyKind::SingleDeletion),
            (DupsOkAcknowledge, Xa, false, StrategyKind::BatchDeletion),
            (DupsOkAcknowledge, Xa, true, StrategyKind::Transactional),
            (AutoAcknowledge, Synchronized, true, StrategyKind::Synchronized),
        ];
        for (ack, tx, transacted, expected) in table {
            assert_eq!(StrategyKind::select(ack, tx, transacted), expected);
        }
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;

    use config_loader::{ConfigFormat, ConfigLoader, DispatchBlueprint};
    use contracts::{DeliveryContext, LockedMessage, Reliability, StrategyKind};
    use dispatcher::mock::{
        BrokerCall, DeliveryScript, EndpointEvent, InMemoryBroker, InMemoryCoordinator,
        InMemorySession, ScriptedEndpointFactory,
    };
    use dispatcher::{
        DispatchError, Dispatcher, DispatcherBuilder, LockedBatch, TokenAssembler, TokenIdentity,
        TransactionOutcomes,
    };
    use observability::{CycleStats, DispatchStatsAggregator};

    fn load(delivery: &str) -> DispatchBlueprint {
        let content = format!(
            r#"
[activation]
destination = "orders"
messaging_engine = "ME01"
target_engine = "ME02"
handler_id = "OrderListener"
session_id = 4

[delivery]
{delivery}
"#
        );
        ConfigLoader::load_from_str(&content, ConfigFormat::Toml).unwrap()
    }

    fn build(
        blueprint: &DispatchBlueprint,
        broker: &InMemoryBroker,
        factory: ScriptedEndpointFactory,
    ) -> Dispatcher<InMemorySession, ScriptedEndpointFactory> {
        let activation = &blueprint.activation;
        let session = Arc::new(broker.session(
            activation.session_id,
            activation.destination.as_str(),
        ));
        DispatcherBuilder::new(session, factory, blueprint.to_dispatcher_config())
            .build()
            .unwrap()
    }

    /// Config -> Dispatcher -> in-memory broker, batch deletion
    ///
    /// 验证：
    /// 1. 所有消息按序投递
    /// 2. 成功消息在周期末一次性删除
    /// 3. 失败消息通过事务回滚重新投递且重试计数增加
    #[tokio::test]
    async fn test_e2e_batch_deletion_with_redelivery() {
        let bp = load("acknowledge_mode = \"dups_ok_acknowledge\"\nmax_batch_size = 5");
        let broker = InMemoryBroker::new(bp.activation.messaging_engine.as_str());
        let factory = ScriptedEndpointFactory::new(DeliveryScript::failing([2, 4]));
        let mut dispatcher = build(&bp, &broker, factory.clone());
        assert_eq!(dispatcher.strategy_kind(), StrategyKind::BatchDeletion);

        let mut batch =
            broker.lock_messages(bp.delivery.max_batch_size, Reliability::ReliablePersistent);
        let handles = batch.handles();
        dispatcher.dispatch(&mut batch).await.unwrap();

        let delivered: Vec<_> = factory
            .events()
            .into_iter()
            .filter_map(|e| match e {
                EndpointEvent::Delivered { handle, .. } => Some(handle),
                _ => None,
            })
            .collect();
        assert_eq!(delivered, handles);

        assert_eq!(
            broker.deleted(),
            vec![handles[0].clone(), handles[2].clone(), handles[4].clone()]
        );
        let unlocked = broker.take_unlocked();
        assert_eq!(unlocked, vec![handles[1].clone(), handles[3].clone()]);
        assert!(unlocked.iter().all(|h| broker.retry_count(h) == 1));

        // Redelivery succeeds this time
        let script_ok = ScriptedEndpointFactory::new(DeliveryScript::succeed_all());
        let mut retry_dispatcher = build(&bp, &broker, script_ok);
        let mut retry = broker.relock(&unlocked);
        assert!(retry.iter().all(|m| m.redelivered_count == 1));
        retry_dispatcher.dispatch(&mut retry).await.unwrap();
        assert_eq!(broker.deleted().len(), 5);
        assert_eq!(broker.open_clones(), 0);

        let snapshot = dispatcher.metrics().snapshot();
        assert_eq!(snapshot.delivered, 3);
        assert_eq!(snapshot.failed, 2);
        assert!(!dispatcher.is_transaction_rolled_back());
    }

    /// 不可恢复消息在读取时已被 broker 删除，分发器不再确认
    #[tokio::test]
    async fn test_e2e_unrecoverable_messages_not_acknowledged() {
        let bp = load(concat!(
            "delete_unrecoverable_messages = true\n",
            "unrecoverable_reliability = \"express_non_persistent\"",
        ));
        let broker = InMemoryBroker::new("ME01");
        let factory = ScriptedEndpointFactory::new(DeliveryScript::failing([2]));
        let mut dispatcher = build(&bp, &broker, factory);

        let mut batch = broker.lock_batch(&[
            Reliability::BestEffortNonPersistent,
            Reliability::ExpressNonPersistent,
            Reliability::ReliablePersistent,
        ]);
        let handles = batch.handles();
        dispatcher.dispatch(&mut batch).await.unwrap();

        // Only the recoverable success is deleted; the failed express message is not redelivered
        assert_eq!(broker.deleted(), vec![handles[2].clone()]);
        assert!(broker.unlocked().is_empty());
        assert!(!broker
            .calls()
            .iter()
            .any(|c| matches!(c, BrokerCall::CreateTransaction { .. })));
    }

    /// XA: 两个分发器共享 TransactionOutcomes
    #[tokio::test]
    async fn test_e2e_xa_outcomes_shared_between_dispatchers() {
        let bp = load("transacted = true\ntransaction_mode = \"xa\"");
        let broker = InMemoryBroker::new("ME01");
        let outcomes = TransactionOutcomes::new();
        let session = Arc::new(broker.session(4, "orders"));

        // One factory so both dispatchers draw XA branches from the same sequence
        let factory = ScriptedEndpointFactory::new(DeliveryScript::failing([2])).transacted(true);
        let mut dispatchers: Vec<_> = (0..2)
            .map(|_| {
                let config = bp.to_dispatcher_config();
                DispatcherBuilder::new(Arc::clone(&session), factory.clone(), config)
                    .with_outcomes(outcomes.clone())
                    .build()
                    .unwrap()
            })
            .collect();

        let mut first = broker.lock_messages(1, Reliability::AssuredPersistent);
        dispatchers[0].dispatch(&mut first).await.unwrap();
        let mut second = broker.lock_messages(1, Reliability::AssuredPersistent);
        dispatchers[1].dispatch(&mut second).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(!dispatchers[0].is_transaction_rolled_back());
        assert!(dispatchers[1].is_transaction_rolled_back());
        assert!(outcomes.is_empty());
        // Outcome consumed: asking again reports rolled back
        assert!(dispatchers[0].is_transaction_rolled_back());

        assert_eq!(broker.deleted(), first.handles());
        assert_eq!(broker.take_unlocked(), second.handles());
        assert_eq!(broker.staged_count(), 0);
    }

    /// Synchronized: 本地事务随协调器的工作单元提交
    #[tokio::test]
    async fn test_e2e_synchronized_completes_with_coordinator() {
        let bp = load("transacted = true\ntransaction_mode = \"synchronized\"\nmax_batch_size = 3");
        let broker = InMemoryBroker::new("ME01");
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let factory = ScriptedEndpointFactory::new(DeliveryScript::failing([3]))
            .transacted(true)
            .with_coordinator(Arc::clone(&coordinator));
        let session = Arc::new(broker.session(4, "orders"));
        let mut dispatcher = DispatcherBuilder::new(session, factory, bp.to_dispatcher_config())
            .with_coordinator(coordinator.clone())
            .build()
            .unwrap();
        assert_eq!(dispatcher.strategy_kind(), StrategyKind::Synchronized);

        let mut batch = broker.lock_messages(3, Reliability::ReliablePersistent);
        let handles = batch.handles();
        dispatcher.dispatch(&mut batch).await.unwrap();

        assert_eq!(coordinator.registrations(), 3);
        assert_eq!(coordinator.pending(), 0);
        assert_eq!(broker.deleted(), handles[..2].to_vec());
        assert_eq!(broker.take_unlocked(), vec![handles[2].clone()]);
        assert!(dispatcher.is_transaction_rolled_back());
    }

    /// 致命信号原样返回，周期仍然清理
    #[tokio::test]
    async fn test_e2e_fatal_signal_surfaces_after_cleanup() {
        let bp = load("acknowledge_mode = \"dups_ok_acknowledge\"\nmax_batch_size = 4");
        let broker = InMemoryBroker::new("ME01");
        let factory = ScriptedEndpointFactory::new(DeliveryScript {
            fatal_handle: Some(3),
            ..DeliveryScript::failing([1])
        });
        let mut dispatcher = build(&bp, &broker, factory.clone());

        let mut batch = broker.lock_messages(4, Reliability::ReliablePersistent);
        let handles = batch.handles();
        let err = dispatcher.dispatch(&mut batch).await.unwrap_err();

        match err {
            DispatchError::Fatal(signal) => assert_eq!(signal.reason(), "fatal on message 3"),
            other => panic!("unexpected error: {other}"),
        }
        // Message 2 acknowledged, message 1 handed back, message 4 never delivered
        assert_eq!(broker.deleted(), vec![handles[1].clone()]);
        assert_eq!(broker.unlocked(), vec![handles[0].clone()]);
        assert_eq!(factory.deliveries(), 3);
        assert_eq!(factory.events().last(), Some(&EndpointEvent::Released));
        assert_eq!(broker.open_clones(), 0);
    }

    /// 远程投递：按分类器切分 token，可读即删的 token 一次性删除
    #[tokio::test]
    async fn test_e2e_remote_tokens() {
        let bp = load("max_batch_size = 5");
        let broker = InMemoryBroker::new("ME01");
        let session = broker.session(4, "orders");

        let identity = TokenIdentity::from_blueprint(&bp);
        assert_eq!(identity.target_engine, "ME02");
        let mut assembler = TokenAssembler::new(identity);

        let gold = DeliveryContext::canonical(Some("gold"), Some("text"));
        let silver = DeliveryContext::canonical(Some("silver"), Some("text"));
        let locked = broker.lock_batch(&[
            Reliability::BestEffortNonPersistent,
            Reliability::BestEffortNonPersistent,
            Reliability::ReliablePersistent,
            Reliability::ReliablePersistent,
        ]);
        let contexts = [&gold, &gold, &gold, &silver];
        let batch: LockedBatch = locked
            .iter()
            .zip(contexts)
            .map(|(m, context)| {
                LockedMessage::new(m.handle.clone(), m.reliability).with_context(context.clone())
            })
            .collect();

        let tokens = assembler.assemble(&batch);
        let sizes: Vec<_> = tokens.iter().map(|t| t.len()).collect();
        assert_eq!(sizes, vec![2, 1, 1]);

        let mut deleted = 0;
        for token in tokens {
            deleted += token.delete_all(&session).await.unwrap();
        }
        assert_eq!(deleted, 2);
        assert_eq!(broker.deleted(), batch.handles()[..2].to_vec());
    }

    /// Dispatcher 指标汇入 observability 聚合器
    #[tokio::test]
    async fn test_e2e_metrics_aggregation() {
        let bp = load("max_batch_size = 2");
        let broker = InMemoryBroker::new("ME01");
        let mut dispatcher = build(
            &bp,
            &broker,
            ScriptedEndpointFactory::new(DeliveryScript::fail_every(3)),
        );
        let mut aggregator = DispatchStatsAggregator::new();

        for _ in 0..3 {
            let before = dispatcher.metrics().snapshot();
            let mut batch = broker.lock_messages(2, Reliability::ReliablePersistent);
            dispatcher.dispatch(&mut batch).await.unwrap();
            let after = dispatcher.metrics().snapshot();
            aggregator.update(&CycleStats {
                batch_size: batch.len(),
                delivered: after.delivered - before.delivered,
                failed: after.failed - before.failed,
                ..Default::default()
            });
        }

        let summary = aggregator.summary();
        assert_eq!(summary.total_cycles, 3);
        assert_eq!(summary.total_messages, 6);
        assert_eq!(summary.total_delivered, 4);
        assert_eq!(summary.total_failed, 2);
        assert_eq!(dispatcher.metrics().cycles(), 3);
    }
}
