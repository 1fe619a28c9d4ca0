use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, bounded};
use tracing::{debug, warn};

use crate::block::BlockStorage;
use crate::error::{Error, Result};
use crate::key::Layout;

/// Funnels batches of entries from any number of producers into a single
/// [`BlockStorage`], which is owned by one consumer thread.
///
/// The channel is bounded, so producers block while the consumer is busy
/// flushing. If the consumer fails, later submits are refused and
/// [`CoalescingWriter::finish`] returns the failure.
pub struct CoalescingWriter<L: Layout> {
    sender: Option<Sender<Vec<(L::Key, L::Value)>>>,
    consumer: Option<JoinHandle<Result<BlockStorage<L>>>>,
}

impl<L: Layout> CoalescingWriter<L> {
    pub fn new(mut storage: BlockStorage<L>, capacity: usize) -> Result<Self> {
        let (sender, receiver) = bounded::<Vec<(L::Key, L::Value)>>(capacity);
        let consumer = thread::Builder::new()
            .name("index-block-writer".into())
            .spawn(move || {
                let mut batches = 0u64;
                for batch in receiver {
                    for (key, value) in batch {
                        if let Err(e) = storage.add(key, value) {
                            warn!(error = %e, batches, "Block writer stopped");
                            return Err(e);
                        }
                    }
                    batches += 1;
                }
                debug!(batches, entries = storage.entry_count(), "Block writer drained");
                Ok(storage)
            })?;
        Ok(CoalescingWriter {
            sender: Some(sender),
            consumer: Some(consumer),
        })
    }

    /// Queue a batch, blocking while the channel is full.
    pub fn submit(&self, batch: Vec<(L::Key, L::Value)>) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::IllegalState("writer already finished".into()))?;
        sender
            .send(batch)
            .map_err(|_| Error::IllegalState("block writer is no longer accepting batches".into()))
    }

    /// Wait for every queued batch to be applied and hand the storage back.
    pub fn finish(mut self) -> Result<BlockStorage<L>> {
        drop(self.sender.take());
        let consumer = self
            .consumer
            .take()
            .ok_or_else(|| Error::IllegalState("writer already finished".into()))?;
        consumer
            .join()
            .map_err(|_| Error::IllegalState("block writer thread panicked".into()))?
    }
}

impl<L: Layout> Drop for CoalescingWriter<L> {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(consumer) = self.consumer.take() {
            match consumer.join() {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "Block writer failed before it was finished"),
                Err(_) => warn!("Block writer thread panicked"),
            }
        }
    }
}
