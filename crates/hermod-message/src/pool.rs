use std::sync::Mutex;

use crate::Message;

/// Process-wide free-list of [`Message`] instances (spec §4.1, §5).
///
/// `acquire` takes a message from the free list (or allocates a new one)
/// and assigns it the given id; `release` resets the message and returns it
/// to the pool. Callers must release on every terminal exit path (Ack, DLQ
/// commit, or drop on an error path) to keep allocation costs low under
/// sustained throughput.
#[derive(Default)]
pub struct MessagePool {
    free: Mutex<Vec<Message>>,
}

impl MessagePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, id: impl Into<String>) -> Message {
        let mut message = self
            .free
            .lock()
            .expect("pool mutex poisoned")
            .pop()
            .unwrap_or_default();
        message.reset();
        message.assign_id(id);
        message
    }

    /// Acquires a pooled slot and transplants `message`'s fields onto it
    /// (spec §4.1: "acquired from a pool at source ingest"). Used instead
    /// of plain [`MessagePool::acquire`] when the caller already has a
    /// fully-populated message (e.g. just read from a source) rather than
    /// building one up field by field.
    pub fn acquire_from(&self, message: Message) -> Message {
        let mut slot = self
            .free
            .lock()
            .expect("pool mutex poisoned")
            .pop()
            .unwrap_or_default();
        slot.absorb(message);
        slot
    }

    pub fn release(&self, mut message: Message) {
        message.reset();
        let mut free = self.free.lock().expect("pool mutex poisoned");
        free.push(message);
    }

    /// Number of messages currently held in the free list (test/metrics use).
    pub fn len(&self) -> usize {
        self.free.lock().expect("pool mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_assigns_the_requested_id() {
        let pool = MessagePool::new();
        let m = pool.acquire("A");
        assert_eq!(m.id(), "A");
    }

    #[test]
    fn acquire_from_keeps_the_given_messages_content() {
        let pool = MessagePool::new();
        let mut source_message = Message::new("m1");
        source_message.set_table("users");
        let acquired = pool.acquire_from(source_message);
        assert_eq!(acquired.id(), "m1");
        assert_eq!(acquired.table(), "users");
    }

    #[test]
    fn release_returns_message_to_pool_reset() {
        let pool = MessagePool::new();
        let mut m = pool.acquire("A");
        m.set_table("users");
        pool.release(m);
        assert_eq!(pool.len(), 1);

        let reused = pool.acquire("B");
        assert_eq!(reused.id(), "B");
        assert_eq!(reused.table(), "");
        assert_eq!(pool.len(), 0);
    }
}
