//! Per-session audio flow control.
//!
//! Inbound audio arrives on the transport read loop, which must never wait.
//! While the recognition connection is not ready, chunks are held in a
//! bounded queue that drops its oldest entry when full. When a connection
//! attaches, the queue is flushed in arrival order and later chunks bypass
//! it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

use crate::codec::AudioChunk;

/// Default number of chunks held while recognition is not ready (10 s of
/// 20 ms frames).
pub const DEFAULT_QUEUE_CAPACITY: usize = 500;

/// What happened to an enqueued chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Handed straight to the recognition connection.
    Forwarded,
    /// Held until the connection is ready.
    Buffered,
    /// Held, and the oldest queued chunk was dropped to make room.
    BufferedDroppedOldest,
    /// The session is closed; the chunk was discarded.
    Discarded,
}

#[derive(Debug, Default)]
struct FlowInner {
    queue: VecDeque<AudioChunk>,
    sink: Option<mpsc::Sender<AudioChunk>>,
    closed: bool,
}

#[derive(Debug)]
pub struct AudioFlowController {
    inner: Mutex<FlowInner>,
    capacity: usize,
    dropped: AtomicU64,
}

impl AudioFlowController {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(FlowInner {
                queue: VecDeque::with_capacity(capacity.min(DEFAULT_QUEUE_CAPACITY)),
                ..FlowInner::default()
            }),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FlowInner> {
        // The guarded state stays consistent across a panic in another holder.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Accepts one inbound chunk without waiting.
    pub fn enqueue(&self, chunk: AudioChunk) -> EnqueueOutcome {
        let mut inner = self.lock();
        if inner.closed {
            return EnqueueOutcome::Discarded;
        }

        let chunk = match inner.sink.as_ref() {
            Some(sink) => match sink.try_send(chunk) {
                Ok(()) => return EnqueueOutcome::Forwarded,
                Err(mpsc::error::TrySendError::Full(chunk)) => {
                    tracing::debug!("recognition audio channel full, buffering chunk");
                    chunk
                }
                Err(mpsc::error::TrySendError::Closed(chunk)) => {
                    inner.sink = None;
                    chunk
                }
            },
            None => chunk,
        };

        self.push_bounded(&mut inner, chunk)
    }

    fn push_bounded(&self, inner: &mut FlowInner, chunk: AudioChunk) -> EnqueueOutcome {
        let mut outcome = EnqueueOutcome::Buffered;
        while inner.queue.len() >= self.capacity {
            inner.queue.pop_front();
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if total == 1 || total % 100 == 0 {
                tracing::warn!(
                    dropped_total = total,
                    capacity = self.capacity,
                    "audio queue full, dropping oldest chunk"
                );
            }
            outcome = EnqueueOutcome::BufferedDroppedOldest;
        }
        inner.queue.push_back(chunk);
        outcome
    }

    /// Connects a ready recognition connection and flushes the queue into it
    /// in arrival order. Returns the number of chunks flushed.
    ///
    /// Chunks that do not fit in the sink stay queued at the front, and the
    /// flow stays detached so ordering is preserved; the caller may retry.
    pub fn attach(&self, sink: mpsc::Sender<AudioChunk>) -> usize {
        let mut inner = self.lock();
        if inner.closed {
            return 0;
        }

        let mut flushed = 0;
        while let Some(chunk) = inner.queue.pop_front() {
            match sink.try_send(chunk) {
                Ok(()) => flushed += 1,
                Err(mpsc::error::TrySendError::Full(chunk)) => {
                    inner.queue.push_front(chunk);
                    tracing::warn!(
                        flushed,
                        remaining = inner.queue.len(),
                        "recognition audio channel full during flush"
                    );
                    return flushed;
                }
                Err(mpsc::error::TrySendError::Closed(chunk)) => {
                    inner.queue.push_front(chunk);
                    return flushed;
                }
            }
        }
        inner.sink = Some(sink);
        flushed
    }

    /// Stops forwarding; later chunks are queued again.
    pub fn detach(&self) {
        self.lock().sink = None;
    }

    /// Drops all queued audio and refuses further chunks.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.sink = None;
        inner.queue.clear();
    }

    pub fn is_forwarding(&self) -> bool {
        self.lock().sink.is_some()
    }

    pub fn queued_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total chunks dropped because the queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for AudioFlowController {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(n: u8) -> AudioChunk {
        AudioChunk::new(vec![n])
    }

    #[test]
    fn queue_is_capped_while_not_ready() {
        let flow = AudioFlowController::new(5);
        for n in 0..50u8 {
            flow.enqueue(chunk(n));
            assert!(flow.queued_len() <= 5);
        }
        assert_eq!(flow.queued_len(), 5);
        assert_eq!(flow.dropped_count(), 45);
    }

    #[test]
    fn drop_oldest_keeps_most_recent_chunks() {
        let flow = AudioFlowController::new(3);
        assert_eq!(flow.enqueue(chunk(1)), EnqueueOutcome::Buffered);
        flow.enqueue(chunk(2));
        flow.enqueue(chunk(3));
        assert_eq!(
            flow.enqueue(chunk(4)),
            EnqueueOutcome::BufferedDroppedOldest
        );

        let (tx, mut rx) = mpsc::channel(10);
        assert_eq!(flow.attach(tx), 3);
        let received: Vec<u8> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|c| c.data[0])
            .collect();
        assert_eq!(received, vec![2, 3, 4]);
    }

    #[test]
    fn attached_flow_forwards_without_queueing() {
        let flow = AudioFlowController::new(3);
        let (tx, mut rx) = mpsc::channel(10);
        flow.attach(tx);
        assert_eq!(flow.enqueue(chunk(7)), EnqueueOutcome::Forwarded);
        assert_eq!(flow.queued_len(), 0);
        assert_eq!(rx.try_recv().unwrap().data, vec![7]);
    }

    #[test]
    fn flush_preserves_order_ahead_of_new_audio() {
        let flow = AudioFlowController::new(10);
        flow.enqueue(chunk(1));
        flow.enqueue(chunk(2));
        let (tx, mut rx) = mpsc::channel(10);
        flow.attach(tx);
        flow.enqueue(chunk(3));
        let received: Vec<u8> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|c| c.data[0])
            .collect();
        assert_eq!(received, vec![1, 2, 3]);
    }

    #[test]
    fn detach_resumes_buffering_and_close_discards() {
        let flow = AudioFlowController::new(4);
        let (tx, _rx) = mpsc::channel(10);
        flow.attach(tx);
        flow.detach();
        assert_eq!(flow.enqueue(chunk(1)), EnqueueOutcome::Buffered);

        flow.close();
        assert_eq!(flow.queued_len(), 0);
        assert_eq!(flow.enqueue(chunk(2)), EnqueueOutcome::Discarded);
    }

    #[test]
    fn closed_sink_falls_back_to_queue() {
        let flow = AudioFlowController::new(4);
        let (tx, rx) = mpsc::channel(10);
        flow.attach(tx);
        drop(rx);
        assert_eq!(flow.enqueue(chunk(1)), EnqueueOutcome::Buffered);
        assert!(!flow.is_forwarding());
    }
}
