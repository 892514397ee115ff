//! LockedBatch - ordered, resettable cursor over the messages of one cycle

use contracts::{LockedMessage, MessageHandle};

/// Messages locked for one dispatch cycle, in delivery order.
///
/// Built with `add`, then consumed with `next` until it yields `None`;
/// `reset` rewinds to the first message.
#[derive(Debug, Clone, Default)]
pub struct LockedBatch {
    messages: Vec<LockedMessage>,
    position: usize,
}

impl LockedBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: Vec::with_capacity(capacity),
            position: 0,
        }
    }

    pub fn add(&mut self, message: LockedMessage) {
        self.messages.push(message);
    }

    pub fn contains(&self, handle: &MessageHandle) -> bool {
        self.messages.iter().any(|m| &m.handle == handle)
    }

    /// Next message, advancing the cursor; `None` once exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<&mut LockedMessage> {
        let message = self.messages.get_mut(self.position)?;
        self.position += 1;
        Some(message)
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.position = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Messages not yet returned by `next`
    pub fn remaining(&self) -> usize {
        self.messages.len().saturating_sub(self.position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LockedMessage> {
        self.messages.iter()
    }

    pub fn handles(&self) -> Vec<MessageHandle> {
        self.messages.iter().map(|m| m.handle.clone()).collect()
    }
}

impl From<Vec<LockedMessage>> for LockedBatch {
    fn from(messages: Vec<LockedMessage>) -> Self {
        Self {
            messages,
            position: 0,
        }
    }
}

impl FromIterator<LockedMessage> for LockedBatch {
    fn from_iter<I: IntoIterator<Item = LockedMessage>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::Reliability;

    fn message(value: u64) -> LockedMessage {
        LockedMessage::new(
            MessageHandle::new("ME01", value),
            Reliability::ReliablePersistent,
        )
    }

    #[test]
    fn test_next_until_exhausted() {
        let mut batch: LockedBatch = (1..=3).map(message).collect();
        let mut seen = Vec::new();
        while let Some(m) = batch.next() {
            seen.push(m.handle.value);
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(batch.next().is_none());
        assert_eq!(batch.remaining(), 0);
    }

    #[test]
    fn test_reset_rewinds() {
        let mut batch: LockedBatch = (1..=2).map(message).collect();
        batch.next();
        batch.next();
        batch.reset();
        assert_eq!(batch.next().map(|m| m.handle.value), Some(1));
    }

    #[test]
    fn test_construction_helpers() {
        let mut batch = LockedBatch::with_capacity(2);
        assert!(batch.is_empty());
        batch.add(message(9));
        assert!(batch.contains(&MessageHandle::new("ME01", 9)));
        assert!(!batch.contains(&MessageHandle::new("ME02", 9)));
        assert_eq!(batch.len(), 1);
        batch.clear();
        assert!(batch.is_empty());
        assert!(batch.next().is_none());
    }
}
