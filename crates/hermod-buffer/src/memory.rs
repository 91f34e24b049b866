use async_trait::async_trait;
use hermod_connector::Context;
use hermod_message::Message;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::{Buffer, BufferError};

/// Bounded in-memory ring (spec §4.2). Capacity is fixed at construction
/// and order is FIFO, backed directly by `tokio::sync::mpsc`'s bounded
/// channel (spec §9, "map directly to the language's bounded-queue
/// primitive"). This variant documents the spec's stated risk: a SIGKILL
/// or power loss between `put` and `get` loses whatever is still queued.
pub struct InMemoryBuffer {
    tx: Mutex<Option<mpsc::Sender<Message>>>,
    rx: Mutex<mpsc::Receiver<Message>>,
    capacity: usize,
}

impl InMemoryBuffer {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
            capacity,
        }
    }
}

#[async_trait]
impl Buffer for InMemoryBuffer {
    async fn put(&self, cx: &Context, msg: Message) -> anyhow::Result<()> {
        let tx = { self.tx.lock().await.clone() };
        let Some(tx) = tx else {
            return Err(BufferError::Closed.into());
        };
        tokio::select! {
            biased;
            _ = cx.cancelled() => Err(BufferError::Cancelled.into()),
            res = tx.send(msg) => res.map_err(|_| BufferError::Closed.into()),
        }
    }

    async fn get(&self, cx: &Context) -> anyhow::Result<Option<Message>> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            _ = cx.cancelled() => Err(BufferError::Cancelled.into()),
            item = rx.recv() => Ok(item),
        }
    }

    async fn close(&self) {
        self.tx.lock().await.take();
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermod_message::Message;

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let buf = InMemoryBuffer::new(4);
        let cx = Context::new();
        for id in ["A", "B", "C"] {
            buf.put(&cx, Message::new(id)).await.unwrap();
        }
        for id in ["A", "B", "C"] {
            let got = buf.get(&cx).await.unwrap().unwrap();
            assert_eq!(got.id(), id);
        }
    }

    #[tokio::test]
    async fn close_drains_then_returns_eof() {
        let buf = InMemoryBuffer::new(4);
        let cx = Context::new();
        buf.put(&cx, Message::new("A")).await.unwrap();
        buf.close().await;

        assert_eq!(buf.get(&cx).await.unwrap().unwrap().id(), "A");
        assert!(buf.get(&cx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_blocks_until_cancelled_when_full() {
        let buf = InMemoryBuffer::new(1);
        let cx = Context::new();
        buf.put(&cx, Message::new("A")).await.unwrap();

        let cx2 = cx.child_token();
        cx2.cancel();
        let err = buf.put(&cx2, Message::new("B")).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }
}
