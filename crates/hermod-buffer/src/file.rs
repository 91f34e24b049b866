use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use hermod_connector::Context;
use hermod_message::{Message, MessageRecord};
use tokio::sync::Notify;

use crate::{Buffer, BufferError};

struct Queued {
    record_len: u64,
    message: Message,
}

struct State {
    file: File,
    checkpoint_path: PathBuf,
    pending: VecDeque<Queued>,
    consumed_bytes: u64,
    closed: bool,
}

/// File-backed FIFO buffer (spec §4.2): every `put` is fsync'd before it is
/// considered durable, and a checkpoint file tracks how many bytes have
/// been consumed so a restart replays exactly the unconsumed tail.
///
/// Records are length-prefixed (4-byte big-endian length + JSON payload)
/// rather than newline-delimited, so an embedded newline in a payload can
/// never be mistaken for a record boundary. Writes are serialized under a
/// single mutex (spec §5).
pub struct FileBuffer {
    state: Mutex<State>,
    notify_items: Notify,
    notify_space: Notify,
    capacity: usize,
}

impl FileBuffer {
    pub fn open(dir: impl AsRef<Path>, capacity: usize) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let data_path = dir.join("data.log");
        let checkpoint_path = dir.join("checkpoint");

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&data_path)?;

        let consumed_bytes = fs::read(&checkpoint_path)
            .ok()
            .and_then(|bytes| bytes.as_slice().try_into().ok())
            .map(u64::from_be_bytes)
            .unwrap_or(0);

        let pending = replay(&data_path, consumed_bytes)?;

        Ok(Self {
            state: Mutex::new(State {
                file,
                checkpoint_path,
                pending,
                consumed_bytes,
                closed: false,
            }),
            notify_items: Notify::new(),
            notify_space: Notify::new(),
            capacity,
        })
    }
}

fn replay(data_path: &Path, from_offset: u64) -> anyhow::Result<VecDeque<Queued>> {
    let mut reader = File::open(data_path)?;
    reader.seek(SeekFrom::Start(from_offset))?;
    let mut pending = VecDeque::new();

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;
        let record: MessageRecord = serde_json::from_slice(&payload)?;
        pending.push_back(Queued {
            record_len: 4 + len as u64,
            message: Message::from_record(record),
        });
    }

    Ok(pending)
}

fn write_checkpoint(path: &Path, consumed_bytes: u64) -> anyhow::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = File::create(&tmp)?;
        f.write_all(&consumed_bytes.to_be_bytes())?;
        f.sync_data()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl Buffer for FileBuffer {
    async fn put(&self, cx: &Context, msg: Message) -> anyhow::Result<()> {
        loop {
            {
                let mut state = self.state.lock().expect("buffer mutex poisoned");
                if state.closed {
                    return Err(BufferError::Closed.into());
                }
                if state.pending.len() < self.capacity {
                    let record = msg.clone().into_record();
                    let payload = serde_json::to_vec(&record)?;
                    let len = payload.len() as u32;
                    state.file.write_all(&len.to_be_bytes())?;
                    state.file.write_all(&payload)?;
                    state.file.sync_data()?;
                    state.pending.push_back(Queued {
                        record_len: 4 + payload.len() as u64,
                        message: msg,
                    });
                    self.notify_items.notify_one();
                    return Ok(());
                }
            }
            tokio::select! {
                biased;
                _ = cx.cancelled() => return Err(BufferError::Cancelled.into()),
                _ = self.notify_space.notified() => {}
            }
        }
    }

    async fn get(&self, cx: &Context) -> anyhow::Result<Option<Message>> {
        loop {
            {
                let mut state = self.state.lock().expect("buffer mutex poisoned");
                if let Some(queued) = state.pending.pop_front() {
                    state.consumed_bytes += queued.record_len;
                    write_checkpoint(&state.checkpoint_path, state.consumed_bytes)?;
                    self.notify_space.notify_one();
                    return Ok(Some(queued.message));
                }
                if state.closed {
                    return Ok(None);
                }
            }
            tokio::select! {
                biased;
                _ = cx.cancelled() => return Err(BufferError::Cancelled.into()),
                _ = self.notify_items.notified() => {}
            }
        }
    }

    async fn close(&self) {
        self.state.lock().expect("buffer mutex poisoned").closed = true;
        self.notify_items.notify_waiters();
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let buf = FileBuffer::open(dir.path(), 4).unwrap();
        let cx = Context::new();

        let mut msg = Message::new("A");
        msg.set_data("x", hermod_message::Value::Number(1.into()));
        buf.put(&cx, msg).await.unwrap();

        let got = buf.get(&cx).await.unwrap().unwrap();
        assert_eq!(got.id(), "A");
    }

    #[tokio::test]
    async fn survives_reopen_after_partial_consumption() {
        let dir = tempfile::tempdir().unwrap();
        {
            let buf = FileBuffer::open(dir.path(), 4).unwrap();
            let cx = Context::new();
            buf.put(&cx, Message::new("A")).await.unwrap();
            buf.put(&cx, Message::new("B")).await.unwrap();
            assert_eq!(buf.get(&cx).await.unwrap().unwrap().id(), "A");
            // "B" remains unconsumed when the process exits here.
        }

        let reopened = FileBuffer::open(dir.path(), 4).unwrap();
        let cx = Context::new();
        let got = reopened.get(&cx).await.unwrap().unwrap();
        assert_eq!(got.id(), "B");
    }
}
