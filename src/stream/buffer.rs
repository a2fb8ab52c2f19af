use std::sync::{Mutex, MutexGuard, PoisonError};
use log::warn;
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::device::constants::FRAME_BUFFER_CAPACITY;
use crate::device::types::FramePair;
use crate::error::BufferError;

/// Bounded FIFO of frame pairs shared between the camera's producer thread and
/// the link task that drains it.
///
/// `put` is the only blocking operation. Once the buffer is closed every
/// blocked and future `put` fails with [`BufferError::Abandoned`].
pub struct FramePairBuffer {
    sender: Sender<FramePair>,
    receiver: Mutex<Receiver<FramePair>>,
}

impl FramePairBuffer {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        FramePairBuffer { sender, receiver: Mutex::new(receiver) }
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a pair, blocking the calling thread while the buffer is full.
    ///
    /// Must be called from a plain thread (such as the camera's callback
    /// thread), never from inside the async runtime.
    pub fn put(&self, pair: FramePair) -> Result<(), BufferError> {
        self.sender.blocking_send(pair).map_err(|_| {
            warn!("Unable to add incoming images to frames buffer, buffer was closed");
            BufferError::Abandoned
        })
    }

    /// The oldest pair, if any. Never blocks.
    pub fn poll_or_empty(&self) -> Option<FramePair> {
        self.lock_receiver().try_recv().ok()
    }

    /// Close the buffer: wakes blocked producers and discards what is still queued.
    /// Returns the number of discarded pairs.
    pub fn close(&self) -> usize {
        let mut receiver = self.lock_receiver();
        receiver.close();

        let mut discarded = 0;
        while receiver.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn lock_receiver(&self) -> MutexGuard<'_, Receiver<FramePair>> {
        // the guarded receiver has no invariant a panicking holder could break
        self.receiver.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FramePairBuffer {
    fn default() -> Self {
        FramePairBuffer::new(FRAME_BUFFER_CAPACITY)
    }
}
