//! # Dispatcher
//!
//! 入站消息分发引擎。
//!
//! 负责：
//! - 按游标顺序把锁定的消息投递给 endpoint
//! - 按确认策略删除、解锁重投或交给事务处理
//! - 隔离 listener 的失败与 panic，原样传递致命信号

pub mod cursor;
pub mod dispatcher;
pub mod error;
pub mod fault;
pub mod invoker;
pub mod metrics;
pub mod mock;
pub mod outcomes;
pub mod session;
pub mod strategy;
pub mod token;
pub mod xa_resource;

pub use contracts::{DispatcherConfig, LockedMessage, StrategyKind};
pub use cursor::LockedBatch;
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::{DispatchError, Result};
pub use fault::LogFaultReporter;
pub use invoker::{EndpointInvoker, InvocationOutcome};
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use outcomes::TransactionOutcomes;
pub use session::ScopedConsumerSession;
pub use strategy::AcknowledgeStrategy;
pub use token::{MessageToken, TokenAssembler, TokenIdentity};
pub use xa_resource::OutcomeTrackingXaResource;
