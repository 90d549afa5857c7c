//! Outbound buffer for frames sent while no connection is open.

use crate::message::Frame;
use std::collections::VecDeque;
use tracing::warn;

/// Strict FIFO of encoded frames, optionally bounded.
#[derive(Debug, Default)]
pub struct OutboundBuffer {
    queue: VecDeque<Frame>,
    /// When set and full, the oldest frame is discarded on enqueue.
    max_len: Option<usize>,
    dropped: u64,
}

impl OutboundBuffer {
    pub fn new(max_len: Option<usize>) -> Self {
        Self {
            queue: VecDeque::new(),
            max_len,
            dropped: 0,
        }
    }

    /// Append a frame. Returns the frame discarded to make room, if any.
    pub fn enqueue(&mut self, frame: Frame) -> Option<Frame> {
        let evicted = match self.max_len {
            Some(max) if self.queue.len() >= max => {
                self.dropped += 1;
                warn!(max, dropped = self.dropped, "Outbound buffer full, dropping oldest frame");
                self.queue.pop_front()
            }
            _ => None,
        };
        self.queue.push_back(frame);
        evicted
    }

    /// Take every buffered frame, oldest first.
    ///
    /// The buffer is empty afterwards, so frames enqueued while the caller
    /// transmits the batch land behind it.
    pub fn drain(&mut self) -> VecDeque<Frame> {
        std::mem::take(&mut self.queue)
    }

    /// Put untransmitted frames back in front of anything queued since the
    /// drain, keeping their original order.
    pub fn requeue_front(&mut self, mut frames: VecDeque<Frame>) {
        frames.append(&mut self.queue);
        self.queue = frames;
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Frames discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
