//! The bounded producer/consumer queue sitting between a workflow's source
//! read and its sink fan-out (spec §4.2). Two variants are provided: an
//! in-memory ring that may lose buffered items on abnormal termination,
//! and a file-backed FIFO that fsyncs records and survives a restart.

mod file;
mod memory;

pub use file::FileBuffer;
pub use memory::InMemoryBuffer;

use async_trait::async_trait;
use hermod_connector::Context;
use hermod_message::Message;

/// Contract shared by every buffer variant (spec §4.2).
///
/// `put` blocks until space is available or `cx` cancels; `get` blocks
/// until an item is available or `cx` cancels. After [`Buffer::close`],
/// `get` continues to drain whatever remains, then returns `Ok(None)` once
/// empty (end of stream) rather than blocking forever.
#[async_trait]
pub trait Buffer: Send + Sync {
    async fn put(&self, cx: &Context, msg: Message) -> anyhow::Result<()>;

    async fn get(&self, cx: &Context) -> anyhow::Result<Option<Message>>;

    async fn close(&self);

    fn capacity(&self) -> usize;
}

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("operation was cancelled")]
    Cancelled,
    #[error("buffer is closed")]
    Closed,
}
