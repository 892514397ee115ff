//! Transaction collaborators: local transactions, XA resources and the
//! ambient transaction coordinator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::ContractError;

/// Global transaction branch identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Xid {
    pub format_id: i32,
    pub global_id: Vec<u8>,
    pub branch_qualifier: Vec<u8>,
}

impl Xid {
    pub fn new(format_id: i32, global_id: impl Into<Vec<u8>>, branch: impl Into<Vec<u8>>) -> Self {
        Self {
            format_id,
            global_id: global_id.into(),
            branch_qualifier: branch.into(),
        }
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.format_id)?;
        for b in &self.global_id {
            write!(f, "{b:02x}")?;
        }
        f.write_str(":")?;
        for b in &self.branch_qualifier {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Identity of the transaction a broker operation runs under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionId {
    /// Uncoordinated (local) transaction created by the connection
    Local(u64),
    /// Branch of a global transaction
    Global(Xid),
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionId::Local(id) => write!(f, "local:{id}"),
            TransactionId::Global(xid) => write!(f, "xa:{xid}"),
        }
    }
}

/// Final state reported to `Synchronization::after_completion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionStatus {
    Committed,
    RolledBack,
    Unknown,
}

/// Ordering tier for registered synchronizations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SynchronizationTier {
    /// Runs before container-internal synchronizations
    #[default]
    Outer,
    /// Runs with container-internal synchronizations
    Normal,
    /// Runs after everything else
    Inner,
}

/// Observer of an ambient transaction's completion.
pub trait Synchronization: Send + Sync {
    fn before_completion(&self);

    fn after_completion(&self, status: CompletionStatus);
}

/// Ambient transaction coordinator of the hosting container.
pub trait TransactionCoordinator: Send + Sync {
    /// Register a synchronization with the current unit of work.
    ///
    /// # Errors
    /// Fails when there is no active unit of work to attach to.
    fn register_synchronization(
        &self,
        synchronization: Arc<dyn Synchronization>,
        tier: SynchronizationTier,
    ) -> Result<(), ContractError>;
}

/// Uncoordinated transaction created by a broker connection.
pub trait LocalTransaction: Send + Sync {
    fn id(&self) -> TransactionId;

    /// Synchronization the transaction exposes so an ambient coordinator can
    /// drive it. `None` when the transaction was created without
    /// synchronization support.
    fn synchronization(&self) -> Option<Arc<dyn Synchronization>>;

    fn commit(&self) -> impl Future<Output = Result<(), ContractError>> + Send;

    fn rollback(&self) -> impl Future<Output = Result<(), ContractError>> + Send;
}

/// Flags passed through the XA protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct XaFlags(pub u32);

impl XaFlags {
    pub const NONE: XaFlags = XaFlags(0);
    pub const JOIN: XaFlags = XaFlags(0x0020_0000);
    pub const RESUME: XaFlags = XaFlags(0x0800_0000);
    pub const SUCCESS: XaFlags = XaFlags(0x0400_0000);
    pub const FAIL: XaFlags = XaFlags(0x2000_0000);
    pub const SUSPEND: XaFlags = XaFlags(0x0200_0000);
    pub const START_RSCAN: XaFlags = XaFlags(0x0100_0000);
    pub const END_RSCAN: XaFlags = XaFlags(0x0080_0000);
}

/// Vote returned from the prepare phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrepareVote {
    Ok,
    ReadOnly,
}

/// Resource manager side of the XA protocol.
///
/// Called from transaction manager threads, hence synchronous and `&self`.
pub trait XaResource: Send + Sync {
    /// Identifies the resource manager, used by `is_same_rm`.
    fn resource_id(&self) -> &str;

    fn start(&self, xid: &Xid, flags: XaFlags) -> Result<(), ContractError>;

    fn end(&self, xid: &Xid, flags: XaFlags) -> Result<(), ContractError>;

    fn prepare(&self, xid: &Xid) -> Result<PrepareVote, ContractError>;

    fn commit(&self, xid: &Xid, one_phase: bool) -> Result<(), ContractError>;

    fn rollback(&self, xid: &Xid) -> Result<(), ContractError>;

    fn forget(&self, xid: &Xid) -> Result<(), ContractError>;

    fn recover(&self, flags: XaFlags) -> Result<Vec<Xid>, ContractError>;

    fn transaction_timeout(&self) -> Result<u32, ContractError>;

    fn set_transaction_timeout(&self, seconds: u32) -> Result<bool, ContractError>;

    fn is_same_rm(&self, other: &dyn XaResource) -> Result<bool, ContractError>;
}
