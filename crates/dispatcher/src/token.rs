//! MessageToken - handles sharing one delivery context
//!
//! A token is the unit of batched delivery when messages travel to a remote
//! engine. `TokenAssembler` cuts a locked batch into tokens, keeping the
//! batch order and reusing cleared tokens between cycles.

use std::sync::Arc;

use contracts::{
    ConsumerSession, ContractError, DeliveryContext, DispatchBlueprint, LockedMessage,
    MessageHandle, Reliability,
};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::cursor::LockedBatch;

/// Fixed identity and limits shared by every token of one activation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenIdentity {
    pub source: String,
    pub target_engine: String,
    pub session_id: u64,
    pub handler_id: String,
    pub unrecovered_reliability: Reliability,
    pub max_failed_deliveries: u32,
    pub sequential_failure_threshold: u32,
}

impl TokenIdentity {
    pub fn from_blueprint(blueprint: &DispatchBlueprint) -> Self {
        let activation = &blueprint.activation;
        let delivery = &blueprint.delivery;
        Self {
            source: activation.messaging_engine.clone(),
            target_engine: activation.target_engine().to_string(),
            session_id: activation.session_id,
            handler_id: activation.handler_id.clone(),
            unrecovered_reliability: delivery.unrecoverable_reliability,
            max_failed_deliveries: delivery.max_failed_deliveries,
            sequential_failure_threshold: delivery.sequential_failure_threshold,
        }
    }
}

/// Ordered, duplicate-free set of handles with one delivery context
#[derive(Debug, Clone)]
pub struct MessageToken {
    identity: Arc<TokenIdentity>,
    handles: Vec<MessageHandle>,
    context: DeliveryContext,
    deletable_on_read: bool,
}

impl MessageToken {
    pub fn new(identity: Arc<TokenIdentity>) -> Self {
        Self {
            identity,
            handles: Vec::new(),
            context: DeliveryContext::new(),
            deletable_on_read: false,
        }
    }

    pub fn identity(&self) -> &TokenIdentity {
        &self.identity
    }

    pub fn handles(&self) -> &[MessageHandle] {
        &self.handles
    }

    pub fn context(&self) -> &DeliveryContext {
        &self.context
    }

    pub fn is_deletable_on_read(&self) -> bool {
        self.deletable_on_read
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Whether a message with this context and flag may join the token.
    ///
    /// Only the canonical context shape (classifier + message type) can
    /// match, and only on equal, non-null classifiers. Message types are not
    /// compared.
    pub fn matches(&self, context: &DeliveryContext, deletable_on_read: bool) -> bool {
        if deletable_on_read != self.deletable_on_read {
            return false;
        }
        if !self.context.is_canonical() || context.len() != self.context.len() {
            return false;
        }
        match (self.context.classifier(), context.classifier()) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => false,
        }
    }

    /// Add a handle; the first one fixes the token's context and flag.
    ///
    /// Returns false when the message does not match. A handle already in
    /// the token is accepted without being added again.
    pub fn add(
        &mut self,
        handle: MessageHandle,
        context: &DeliveryContext,
        deletable_on_read: bool,
    ) -> bool {
        if self.handles.is_empty() {
            self.context = context.clone();
            self.deletable_on_read = deletable_on_read;
        } else if !self.matches(context, deletable_on_read) {
            return false;
        } else if self.handles.contains(&handle) {
            return true;
        }
        self.handles.push(handle);
        true
    }

    /// Admit a locked message using its own context and reliability
    pub fn add_message(&mut self, message: &LockedMessage) -> bool {
        self.add(
            message.handle.clone(),
            &message.context,
            message.is_deletable_on_read(),
        )
    }

    /// Reset handles, context and flag; identity is kept
    pub fn clear(&mut self) {
        self.handles.clear();
        self.context.clear();
        self.deletable_on_read = false;
    }

    /// Delete every handle of a deletable-on-read token in one call.
    ///
    /// Returns the number of handles deleted, 0 for tokens that are not
    /// deletable on read.
    #[instrument(
        name = "message_token_delete_all",
        skip_all,
        fields(handles = self.handles.len(), session_id = session.id())
    )]
    pub async fn delete_all<S: ConsumerSession>(
        &self,
        session: &S,
    ) -> Result<usize, ContractError> {
        if !self.deletable_on_read || self.handles.is_empty() {
            return Ok(0);
        }
        session.delete_set(&self.handles, None).await?;
        debug!(count = self.handles.len(), "Token deleted on read");
        Ok(self.handles.len())
    }
}

/// Cuts locked batches into message tokens.
///
/// Consecutive messages that match share a token; a message that does not
/// match the current token opens the next one. Tokens are pooled and
/// cleared between calls.
#[derive(Debug)]
pub struct TokenAssembler {
    identity: Arc<TokenIdentity>,
    pool: Vec<MessageToken>,
}

impl TokenAssembler {
    pub fn new(identity: TokenIdentity) -> Self {
        Self {
            identity: Arc::new(identity),
            pool: Vec::new(),
        }
    }

    /// Tokens allocated so far, used or not
    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    pub fn assemble(&mut self, batch: &LockedBatch) -> &[MessageToken] {
        self.pool.iter_mut().for_each(MessageToken::clear);

        let mut used = 0;
        for message in batch.iter() {
            if used > 0 && self.pool[used - 1].add_message(message) {
                continue;
            }
            if used == self.pool.len() {
                self.pool.push(MessageToken::new(Arc::clone(&self.identity)));
            }
            self.pool[used].add_message(message);
            used += 1;
        }
        &self.pool[..used]
    }
}
