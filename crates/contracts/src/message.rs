//! Locked messages as handed to the dispatch engine.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::EngineId;

/// Quality-of-service class of a message, ordered from weakest to strongest.
///
/// The ordering matters: a message whose reliability is at or below the
/// configured unrecoverable threshold may be discarded instead of retried.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    /// Best effort, never persisted; deletable at read time.
    #[default]
    BestEffortNonPersistent,
    ExpressNonPersistent,
    ReliableNonPersistent,
    ReliablePersistent,
    AssuredPersistent,
}

impl Reliability {
    /// Messages of this class may be deleted as they are read.
    pub fn is_deletable_on_read(self) -> bool {
        self == Reliability::BestEffortNonPersistent
    }
}

impl fmt::Display for Reliability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reliability::BestEffortNonPersistent => "best_effort_non_persistent",
            Reliability::ExpressNonPersistent => "express_non_persistent",
            Reliability::ReliableNonPersistent => "reliable_non_persistent",
            Reliability::ReliablePersistent => "reliable_persistent",
            Reliability::AssuredPersistent => "assured_persistent",
        };
        f.write_str(name)
    }
}

/// Broker-issued handle identifying one locked message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    /// Engine that issued the handle
    pub engine: EngineId,
    /// Engine-local sequence value
    pub value: u64,
}

impl MessageHandle {
    pub fn new(engine: impl Into<EngineId>, value: u64) -> Self {
        Self {
            engine: engine.into(),
            value,
        }
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.engine, self.value)
    }
}

/// Key/value delivery context attached to a message by the broker.
///
/// The canonical shape holds exactly a classifier entry and a type entry;
/// values may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryContext(HashMap<String, Option<String>>);

impl DeliveryContext {
    /// Workload classifier key
    pub const CLASSIFIER: &'static str = "classifier";
    /// Message type key
    pub const MESSAGE_TYPE: &'static str = "message_type";

    pub fn new() -> Self {
        Self::default()
    }

    /// Build the canonical two-entry context.
    pub fn canonical(classifier: Option<&str>, message_type: Option<&str>) -> Self {
        let mut context = Self::new();
        context.insert(Self::CLASSIFIER, classifier.map(str::to_string));
        context.insert(Self::MESSAGE_TYPE, message_type.map(str::to_string));
        context
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Option<String>) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Option<String>> {
        self.0.get(key)
    }

    /// Classifier value, if the entry exists and is non-null.
    pub fn classifier(&self) -> Option<&str> {
        self.0.get(Self::CLASSIFIER).and_then(|v| v.as_deref())
    }

    /// True when the context holds exactly the classifier and type entries.
    pub fn is_canonical(&self) -> bool {
        self.0.len() == 2
            && self.0.contains_key(Self::CLASSIFIER)
            && self.0.contains_key(Self::MESSAGE_TYPE)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// A message locked by a consumer session for one dispatch cycle.
///
/// The endpoint receives `&mut LockedMessage` and may rewrite properties or
/// even the reliability, which is why the dispatcher snapshots reliability
/// before delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockedMessage {
    /// Broker handle
    pub handle: MessageHandle,

    /// Reliability class at the time of reading
    pub reliability: Reliability,

    /// Number of previous failed deliveries
    #[serde(default)]
    pub redelivered_count: u32,

    /// Delivery context supplied by the broker
    #[serde(default)]
    pub context: DeliveryContext,

    /// User properties
    #[serde(default)]
    pub properties: HashMap<String, String>,

    /// Message body
    #[serde(default)]
    pub payload: Bytes,
}

impl LockedMessage {
    pub fn new(handle: MessageHandle, reliability: Reliability) -> Self {
        Self {
            handle,
            reliability,
            redelivered_count: 0,
            context: DeliveryContext::default(),
            properties: HashMap::new(),
            payload: Bytes::new(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_context(mut self, context: DeliveryContext) -> Self {
        self.context = context;
        self
    }

    pub fn is_deletable_on_read(&self) -> bool {
        self.reliability.is_deletable_on_read()
    }
}
