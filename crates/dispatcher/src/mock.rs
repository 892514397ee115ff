//! In-memory broker and scripted endpoints
//!
//! Used by unit tests, the integration test crate and `dispatch-engine simulate`.
//! Every broker and endpoint interaction is recorded so tests can assert on
//! the exact sequence of calls.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use contracts::{
    CompletionStatus, Connection, ConsumerSession, ContractError, DeliveryFailure, EndpointFactory,
    EngineId, FatalSignal, LocalTransaction, LockedMessage, MessageEndpoint, MessageHandle,
    MessageListener, PrepareVote, Reliability, Synchronization, SynchronizationTier,
    TransactionCoordinator, TransactionId, XaFlags, XaResource, Xid,
};
use tracing::debug;

use crate::cursor::LockedBatch;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// One recorded broker interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    DeleteSet {
        handles: Vec<MessageHandle>,
        transaction: Option<TransactionId>,
    },
    UnlockSet {
        handles: Vec<MessageHandle>,
        increment_retry_count: bool,
    },
    UnlockAll,
    CreateTransaction {
        id: TransactionId,
        register_synchronization: bool,
    },
    Commit(TransactionId),
    Rollback(TransactionId),
    CloneConnection,
    CloseConnection,
    Start,
    Stop,
    CloseSession,
}

#[derive(Debug, Default)]
struct BrokerState {
    calls: Vec<BrokerCall>,
    locked: HashMap<MessageHandle, Reliability>,
    deleted: Vec<MessageHandle>,
    unlocked: Vec<MessageHandle>,
    retry_counts: HashMap<MessageHandle, u32>,
    staged: HashMap<TransactionId, Vec<MessageHandle>>,
    next_handle: u64,
    next_transaction: u64,
    open_clones: usize,
    fail_deletes: bool,
    fail_connection_clone: bool,
    fail_transactions: bool,
}

/// Shared broker state behind sessions, connections and transactions.
///
/// Deletes under a transaction are staged until the transaction completes:
/// commit makes them permanent, rollback hands the messages back for
/// redelivery and bumps their retry count.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    engine: EngineId,
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new(engine: impl Into<EngineId>) -> Self {
        Self {
            engine: engine.into(),
            state: Arc::new(Mutex::new(BrokerState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        guard(&self.state)
    }

    pub fn engine(&self) -> &EngineId {
        &self.engine
    }

    /// Open a consumer session on this broker
    pub fn session(&self, id: u64, destination: impl Into<String>) -> InMemorySession {
        InMemorySession {
            id,
            destination: destination.into(),
            broker: self.clone(),
            connection: InMemoryConnection::new(self.clone()),
        }
    }

    /// Lock one new message per reliability, in order
    pub fn lock_batch(&self, reliabilities: &[Reliability]) -> LockedBatch {
        let mut state = self.state();
        reliabilities
            .iter()
            .map(|&reliability| {
                state.next_handle += 1;
                let handle = MessageHandle::new(self.engine.clone(), state.next_handle);
                state.locked.insert(handle.clone(), reliability);
                LockedMessage::new(handle, reliability)
            })
            .collect()
    }

    /// Lock `count` new messages of the same reliability
    pub fn lock_messages(&self, count: usize, reliability: Reliability) -> LockedBatch {
        self.lock_batch(&vec![reliability; count])
    }

    /// Lock previously unlocked messages again, carrying their retry count
    pub fn relock(&self, handles: &[MessageHandle]) -> LockedBatch {
        let state = self.state();
        handles
            .iter()
            .map(|handle| {
                let reliability = state.locked.get(handle).copied().unwrap_or_default();
                let mut message = LockedMessage::new(handle.clone(), reliability);
                message.redelivered_count = state.retry_counts.get(handle).copied().unwrap_or(0);
                message
            })
            .collect()
    }

    pub fn calls(&self) -> Vec<BrokerCall> {
        self.state().calls.clone()
    }

    pub fn deleted(&self) -> Vec<MessageHandle> {
        self.state().deleted.clone()
    }

    pub fn unlocked(&self) -> Vec<MessageHandle> {
        self.state().unlocked.clone()
    }

    /// Drain the unlocked list
    pub fn take_unlocked(&self) -> Vec<MessageHandle> {
        std::mem::take(&mut self.state().unlocked)
    }

    pub fn retry_count(&self, handle: &MessageHandle) -> u32 {
        self.state().retry_counts.get(handle).copied().unwrap_or(0)
    }

    /// Deletes waiting for their transaction to complete
    pub fn staged_count(&self) -> usize {
        self.state().staged.values().map(Vec::len).sum()
    }

    /// Connection clones that were not closed yet
    pub fn open_clones(&self) -> usize {
        self.state().open_clones
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.state().fail_deletes = fail;
    }

    pub fn set_fail_connection_clone(&self, fail: bool) {
        self.state().fail_connection_clone = fail;
    }

    pub fn set_fail_transactions(&self, fail: bool) {
        self.state().fail_transactions = fail;
    }

    fn record(&self, call: BrokerCall) {
        self.state().calls.push(call);
    }

    fn delete(
        &self,
        handles: &[MessageHandle],
        transaction: Option<&TransactionId>,
    ) -> Result<(), ContractError> {
        let mut state = self.state();
        state.calls.push(BrokerCall::DeleteSet {
            handles: handles.to_vec(),
            transaction: transaction.cloned(),
        });
        if state.fail_deletes {
            return Err(ContractError::resource("delete_set", "injected delete failure"));
        }
        match transaction {
            Some(id) => state
                .staged
                .entry(id.clone())
                .or_default()
                .extend_from_slice(handles),
            None => state.deleted.extend_from_slice(handles),
        }
        Ok(())
    }

    fn unlock(&self, handles: &[MessageHandle], increment_retry_count: bool) {
        let mut state = self.state();
        state.calls.push(BrokerCall::UnlockSet {
            handles: handles.to_vec(),
            increment_retry_count,
        });
        Self::hand_back(&mut state, handles.to_vec(), increment_retry_count);
    }

    fn hand_back(state: &mut BrokerState, handles: Vec<MessageHandle>, increment: bool) {
        for handle in handles {
            if increment {
                *state.retry_counts.entry(handle.clone()).or_default() += 1;
            }
            state.unlocked.push(handle);
        }
    }

    fn complete(&self, id: &TransactionId, committed: bool) {
        let mut state = self.state();
        state.calls.push(if committed {
            BrokerCall::Commit(id.clone())
        } else {
            BrokerCall::Rollback(id.clone())
        });
        let staged = state.staged.remove(id).unwrap_or_default();
        if committed {
            state.deleted.extend(staged);
        } else {
            Self::hand_back(&mut state, staged, true);
        }
    }
}

/// Consumer session over an `InMemoryBroker`
#[derive(Debug)]
pub struct InMemorySession {
    id: u64,
    destination: String,
    broker: InMemoryBroker,
    connection: InMemoryConnection,
}

impl InMemorySession {
    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }
}

impl ConsumerSession for InMemorySession {
    type Connection = InMemoryConnection;

    fn id(&self) -> u64 {
        self.id
    }

    fn destination(&self) -> Result<&str, ContractError> {
        Ok(&self.destination)
    }

    fn connection(&self) -> Result<&InMemoryConnection, ContractError> {
        Ok(&self.connection)
    }

    async fn delete_set(
        &self,
        handles: &[MessageHandle],
        transaction: Option<&TransactionId>,
    ) -> Result<(), ContractError> {
        self.broker.delete(handles, transaction)
    }

    async fn unlock_set(
        &self,
        handles: &[MessageHandle],
        increment_retry_count: bool,
    ) -> Result<(), ContractError> {
        self.broker.unlock(handles, increment_retry_count);
        Ok(())
    }

    async fn unlock_all(&self) -> Result<(), ContractError> {
        self.broker.record(BrokerCall::UnlockAll);
        Ok(())
    }

    async fn start(&self) -> Result<(), ContractError> {
        self.broker.record(BrokerCall::Start);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ContractError> {
        self.broker.record(BrokerCall::Stop);
        Ok(())
    }

    async fn close(&self) -> Result<(), ContractError> {
        self.broker.record(BrokerCall::CloseSession);
        Ok(())
    }
}

/// Connection over an `InMemoryBroker`
#[derive(Debug)]
pub struct InMemoryConnection {
    broker: InMemoryBroker,
    is_clone: bool,
    closed: AtomicBool,
}

impl InMemoryConnection {
    fn new(broker: InMemoryBroker) -> Self {
        Self {
            broker,
            is_clone: false,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_clone(&self) -> bool {
        self.is_clone
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connection for InMemoryConnection {
    type Transaction = InMemoryTransaction;

    fn messaging_engine_name(&self) -> &str {
        &self.broker.engine
    }

    fn clone_connection(&self) -> Result<Self, ContractError> {
        let mut state = self.broker.state();
        state.calls.push(BrokerCall::CloneConnection);
        if state.fail_connection_clone {
            return Err(ContractError::resource(
                "clone_connection",
                "injected clone failure",
            ));
        }
        state.open_clones += 1;
        Ok(Self {
            broker: self.broker.clone(),
            is_clone: true,
            closed: AtomicBool::new(false),
        })
    }

    async fn close(&self) -> Result<(), ContractError> {
        let mut state = self.broker.state();
        state.calls.push(BrokerCall::CloseConnection);
        if self.is_clone && !self.closed.swap(true, Ordering::SeqCst) {
            state.open_clones = state.open_clones.saturating_sub(1);
        }
        Ok(())
    }

    async fn create_uncoordinated_transaction(
        &self,
        register_synchronization: bool,
    ) -> Result<InMemoryTransaction, ContractError> {
        let id = {
            let mut state = self.broker.state();
            if state.fail_transactions {
                return Err(ContractError::transaction("injected transaction failure"));
            }
            state.next_transaction += 1;
            let id = TransactionId::Local(state.next_transaction);
            state.calls.push(BrokerCall::CreateTransaction {
                id: id.clone(),
                register_synchronization,
            });
            id
        };
        let synchronization = register_synchronization.then(|| {
            Arc::new(InMemoryTransactionSync {
                id: id.clone(),
                broker: self.broker.clone(),
            }) as Arc<dyn Synchronization>
        });
        Ok(InMemoryTransaction {
            id,
            broker: self.broker.clone(),
            synchronization,
        })
    }

    fn xa_resource(&self) -> Result<Arc<dyn XaResource>, ContractError> {
        Ok(Arc::new(InMemoryXaResource::for_broker(
            format!("rm-{}", self.broker.engine),
            self.broker.clone(),
        )))
    }
}

/// Local transaction over an `InMemoryBroker`
pub struct InMemoryTransaction {
    id: TransactionId,
    broker: InMemoryBroker,
    synchronization: Option<Arc<dyn Synchronization>>,
}

impl std::fmt::Debug for InMemoryTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransaction")
            .field("id", &self.id)
            .field("synchronized", &self.synchronization.is_some())
            .finish()
    }
}

impl LocalTransaction for InMemoryTransaction {
    fn id(&self) -> TransactionId {
        self.id.clone()
    }

    fn synchronization(&self) -> Option<Arc<dyn Synchronization>> {
        self.synchronization.clone()
    }

    async fn commit(&self) -> Result<(), ContractError> {
        self.broker.complete(&self.id, true);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), ContractError> {
        self.broker.complete(&self.id, false);
        Ok(())
    }
}

/// Completes a local transaction when the coordinator's unit of work ends
#[derive(Debug)]
struct InMemoryTransactionSync {
    id: TransactionId,
    broker: InMemoryBroker,
}

impl Synchronization for InMemoryTransactionSync {
    fn before_completion(&self) {}

    fn after_completion(&self, status: CompletionStatus) {
        self.broker
            .complete(&self.id, status == CompletionStatus::Committed);
    }
}

/// XA resource; completes branches on the broker when one is attached
#[derive(Debug)]
pub struct InMemoryXaResource {
    resource_id: String,
    broker: Option<InMemoryBroker>,
    fail_commits: AtomicBool,
    timeout: AtomicU32,
}

impl InMemoryXaResource {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            broker: None,
            fail_commits: AtomicBool::new(false),
            timeout: AtomicU32::new(0),
        }
    }

    pub fn for_broker(resource_id: impl Into<String>, broker: InMemoryBroker) -> Self {
        Self {
            broker: Some(broker),
            ..Self::new(resource_id)
        }
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    fn complete(&self, xid: &Xid, committed: bool) {
        if let Some(broker) = &self.broker {
            broker.complete(&TransactionId::Global(xid.clone()), committed);
        }
    }
}

impl XaResource for InMemoryXaResource {
    fn resource_id(&self) -> &str {
        &self.resource_id
    }

    fn start(&self, _xid: &Xid, _flags: XaFlags) -> Result<(), ContractError> {
        Ok(())
    }

    fn end(&self, _xid: &Xid, _flags: XaFlags) -> Result<(), ContractError> {
        Ok(())
    }

    fn prepare(&self, _xid: &Xid) -> Result<PrepareVote, ContractError> {
        Ok(PrepareVote::Ok)
    }

    fn commit(&self, xid: &Xid, _one_phase: bool) -> Result<(), ContractError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            self.complete(xid, false);
            return Err(ContractError::transaction(format!(
                "injected commit failure for {xid}"
            )));
        }
        self.complete(xid, true);
        Ok(())
    }

    fn rollback(&self, xid: &Xid) -> Result<(), ContractError> {
        self.complete(xid, false);
        Ok(())
    }

    fn forget(&self, _xid: &Xid) -> Result<(), ContractError> {
        Ok(())
    }

    fn recover(&self, _flags: XaFlags) -> Result<Vec<Xid>, ContractError> {
        Ok(Vec::new())
    }

    fn transaction_timeout(&self) -> Result<u32, ContractError> {
        Ok(self.timeout.load(Ordering::SeqCst))
    }

    fn set_transaction_timeout(&self, seconds: u32) -> Result<bool, ContractError> {
        self.timeout.store(seconds, Ordering::SeqCst);
        Ok(true)
    }

    fn is_same_rm(&self, other: &dyn XaResource) -> Result<bool, ContractError> {
        Ok(self.resource_id == other.resource_id())
    }
}

/// Ambient coordinator with a single, explicitly completed unit of work
#[derive(Default)]
pub struct InMemoryCoordinator {
    registered: Mutex<Vec<(Arc<dyn Synchronization>, SynchronizationTier)>>,
    inactive: AtomicBool,
    registrations: AtomicU64,
}

impl InMemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Without an active unit of work registration fails
    pub fn set_active(&self, active: bool) {
        self.inactive.store(!active, Ordering::SeqCst);
    }

    pub fn pending(&self) -> usize {
        guard(&self.registered).len()
    }

    /// Total registrations accepted
    pub fn registrations(&self) -> u64 {
        self.registrations.load(Ordering::SeqCst)
    }

    /// End the unit of work, notifying synchronizations tier by tier
    pub fn complete(&self, status: CompletionStatus) {
        let mut registered = std::mem::take(&mut *guard(&self.registered));
        registered.sort_by_key(|(_, tier)| match tier {
            SynchronizationTier::Outer => 0,
            SynchronizationTier::Normal => 1,
            SynchronizationTier::Inner => 2,
        });
        if status == CompletionStatus::Committed {
            for (synchronization, _) in &registered {
                synchronization.before_completion();
            }
        }
        for (synchronization, _) in &registered {
            synchronization.after_completion(status);
        }
    }
}

impl TransactionCoordinator for InMemoryCoordinator {
    fn register_synchronization(
        &self,
        synchronization: Arc<dyn Synchronization>,
        tier: SynchronizationTier,
    ) -> Result<(), ContractError> {
        if self.inactive.load(Ordering::SeqCst) {
            return Err(ContractError::transaction("no active unit of work"));
        }
        guard(&self.registered).push((synchronization, tier));
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What a scripted listener does with each delivery
#[derive(Debug, Clone, Default)]
pub struct DeliveryScript {
    /// Every n-th delivery (counted across cycles, 1-based) fails
    pub fail_every: Option<u64>,
    /// Handle values whose delivery fails
    pub fail_handles: HashSet<u64>,
    /// Handle values whose delivery panics
    pub panic_handles: HashSet<u64>,
    /// Handle value whose delivery raises a fatal signal
    pub fatal_handle: Option<u64>,
    /// Raise the fatal signal as a panic payload instead of an error
    pub fatal_by_panic: bool,
    /// Reliability the listener writes into every message it sees
    pub rewrite_reliability: Option<Reliability>,
    /// Keep a clone of every session handed to the listener
    pub retain_sessions: bool,
    /// Endpoint exposes no listener
    pub without_listener: bool,
    /// Endpoint creation fails
    pub fail_create: bool,
    /// `before_delivery` fails
    pub fail_before_delivery: bool,
}

impl DeliveryScript {
    pub fn succeed_all() -> Self {
        Self::default()
    }

    pub fn fail_every(n: u64) -> Self {
        Self {
            fail_every: Some(n),
            ..Self::default()
        }
    }

    pub fn failing(handles: impl IntoIterator<Item = u64>) -> Self {
        Self {
            fail_handles: handles.into_iter().collect(),
            ..Self::default()
        }
    }
}

/// One recorded endpoint interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointEvent {
    Created {
        xa_enlisted: bool,
    },
    BeforeDelivery,
    Delivered {
        handle: MessageHandle,
        transaction: Option<TransactionId>,
        ok: bool,
    },
    AfterDelivery,
    Released,
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<EndpointEvent>>,
    retained: Mutex<Vec<Box<dyn Any + Send>>>,
    deliveries: AtomicU64,
    branches: AtomicU64,
}

impl Recorder {
    fn push(&self, event: EndpointEvent) {
        guard(&self.events).push(event);
    }
}

/// Factory of scripted endpoints sharing one recorder
#[derive(Clone)]
pub struct ScriptedEndpointFactory {
    script: Arc<DeliveryScript>,
    transacted: bool,
    coordinator: Option<Arc<InMemoryCoordinator>>,
    recorder: Arc<Recorder>,
}

impl ScriptedEndpointFactory {
    pub fn new(script: DeliveryScript) -> Self {
        Self {
            script: Arc::new(script),
            transacted: false,
            coordinator: None,
            recorder: Arc::new(Recorder::default()),
        }
    }

    /// Deliver inside a container transaction
    pub fn transacted(mut self, transacted: bool) -> Self {
        self.transacted = transacted;
        self
    }

    /// Complete the coordinator's unit of work in `after_delivery`
    pub fn with_coordinator(mut self, coordinator: Arc<InMemoryCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn events(&self) -> Vec<EndpointEvent> {
        guard(&self.recorder.events).clone()
    }

    pub fn deliveries(&self) -> u64 {
        self.recorder.deliveries.load(Ordering::SeqCst)
    }

    /// Sessions retained by listeners, downcast to their concrete type
    pub fn retained<T: Any + Clone>(&self) -> Vec<T> {
        guard(&self.recorder.retained)
            .iter()
            .filter_map(|s| s.downcast_ref::<T>().cloned())
            .collect()
    }
}

impl EndpointFactory for ScriptedEndpointFactory {
    type Endpoint = ScriptedEndpoint;

    fn create_endpoint(
        &self,
        xa_resource: Option<Arc<dyn XaResource>>,
    ) -> Result<ScriptedEndpoint, ContractError> {
        if self.script.fail_create {
            return Err(ContractError::endpoint("injected endpoint creation failure"));
        }
        self.recorder.push(EndpointEvent::Created {
            xa_enlisted: xa_resource.is_some(),
        });
        let listener = (!self.script.without_listener).then(|| ScriptedListener {
            script: Arc::clone(&self.script),
            recorder: Arc::clone(&self.recorder),
            last_failed: false,
        });
        Ok(ScriptedEndpoint {
            listener,
            script: Arc::clone(&self.script),
            recorder: Arc::clone(&self.recorder),
            xa_resource,
            coordinator: self.coordinator.clone(),
            branch: None,
        })
    }

    fn is_delivery_transacted(&self, _method: &'static str) -> bool {
        self.transacted
    }
}

/// Endpoint acting as its own container: starts and completes XA branches
/// or the coordinator's unit of work around each delivery.
pub struct ScriptedEndpoint {
    listener: Option<ScriptedListener>,
    script: Arc<DeliveryScript>,
    recorder: Arc<Recorder>,
    xa_resource: Option<Arc<dyn XaResource>>,
    coordinator: Option<Arc<InMemoryCoordinator>>,
    branch: Option<Xid>,
}

impl MessageEndpoint for ScriptedEndpoint {
    type Listener = ScriptedListener;

    fn listener(&mut self) -> Option<&mut ScriptedListener> {
        self.listener.as_mut()
    }

    async fn before_delivery(&mut self, _method: &'static str) -> Result<(), ContractError> {
        self.recorder.push(EndpointEvent::BeforeDelivery);
        if self.script.fail_before_delivery {
            return Err(ContractError::endpoint("injected before_delivery failure"));
        }
        if let Some(xa) = &self.xa_resource {
            let branch = self.recorder.branches.fetch_add(1, Ordering::SeqCst) + 1;
            let xid = Xid::new(0x5842, branch.to_be_bytes().to_vec(), vec![1]);
            xa.start(&xid, XaFlags::NONE)?;
            self.branch = Some(xid);
        }
        Ok(())
    }

    async fn after_delivery(&mut self) -> Result<(), ContractError> {
        self.recorder.push(EndpointEvent::AfterDelivery);
        let failed = self.listener.as_ref().is_some_and(|l| l.last_failed);
        if let (Some(xa), Some(xid)) = (&self.xa_resource, self.branch.take()) {
            if failed {
                xa.end(&xid, XaFlags::FAIL)?;
                xa.rollback(&xid)?;
            } else {
                xa.end(&xid, XaFlags::SUCCESS)?;
                xa.commit(&xid, true)?;
            }
        }
        if let Some(coordinator) = &self.coordinator {
            coordinator.complete(if failed {
                CompletionStatus::RolledBack
            } else {
                CompletionStatus::Committed
            });
        }
        Ok(())
    }

    fn release(&mut self) {
        self.recorder.push(EndpointEvent::Released);
    }
}

/// Listener following a `DeliveryScript`
pub struct ScriptedListener {
    script: Arc<DeliveryScript>,
    recorder: Arc<Recorder>,
    last_failed: bool,
}

impl MessageListener for ScriptedListener {
    async fn on_message<S>(
        &mut self,
        message: &mut LockedMessage,
        session: &S,
        transaction: Option<&TransactionId>,
    ) -> Result<(), DeliveryFailure>
    where
        S: ConsumerSession + Clone + 'static,
    {
        let count = self.recorder.deliveries.fetch_add(1, Ordering::SeqCst) + 1;
        let value = message.handle.value;
        if self.script.retain_sessions {
            guard(&self.recorder.retained).push(Box::new(session.clone()));
        }
        if let Some(reliability) = self.script.rewrite_reliability {
            message.reliability = reliability;
        }

        let result = match session.destination() {
            Err(e) => Err(DeliveryFailure::failed(e.to_string())),
            Ok(destination) => {
                debug!(destination, handle = %message.handle, "Scripted delivery");
                if self.script.fatal_handle == Some(value) {
                    let signal = FatalSignal::new(format!("fatal on message {value}"));
                    if self.script.fatal_by_panic {
                        self.last_failed = true;
                        self.record(message, transaction, false);
                        std::panic::panic_any(signal);
                    }
                    Err(DeliveryFailure::Fatal(signal))
                } else if self.script.panic_handles.contains(&value) {
                    self.last_failed = true;
                    self.record(message, transaction, false);
                    panic!("listener panicked on message {value}");
                } else if self.script.fail_handles.contains(&value)
                    || self.script.fail_every.is_some_and(|n| n > 0 && count % n == 0)
                {
                    Err(DeliveryFailure::failed(format!("rejected message {value}")))
                } else {
                    Ok(())
                }
            }
        };

        self.last_failed = result.is_err();
        self.record(message, transaction, result.is_ok());
        result
    }
}

impl ScriptedListener {
    fn record(&self, message: &LockedMessage, transaction: Option<&TransactionId>, ok: bool) {
        self.recorder.push(EndpointEvent::Delivered {
            handle: message.handle.clone(),
            transaction: transaction.cloned(),
            ok,
        });
    }
}
