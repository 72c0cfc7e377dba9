// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event batching and flushing.
//!
//! Events are routed to a fixed number of send lanes by trace task id. Each lane is
//! a task owning a bounded queue, a buffer of encoded events and a flush schedule.
//! A lane sends its batches one after the other, so the events of one trace reach
//! the collector in the order they were reported and the retries of a batch are
//! never overtaken. Different lanes send concurrently.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::ReporterOptions;
use crate::event::Event;
use crate::retry::RetryController;
use crate::transport::Batch;

#[derive(Debug)]
enum LaneCommand {
    Event(Event),
    Flush(oneshot::Sender<()>),
}

/// Counters shared by every lane.
#[derive(Debug, Default)]
pub struct BatcherStats {
    sent: AtomicU64,
    dropped: AtomicU64,
    failed_batches: AtomicU64,
}

impl BatcherStats {
    /// Events accepted by the collector.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Events that will never reach the collector: queue full, encoding failure,
    /// retries exhausted or still buffered when close hit its deadline.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn failed_batches(&self) -> u64 {
        self.failed_batches.load(Ordering::Relaxed)
    }

    fn add_dropped(&self, n: usize) {
        self.dropped.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// FIFO of encoded events.
#[derive(Debug, Default)]
struct EventQueue {
    queue: VecDeque<Vec<u8>>,
    bytes: usize,
}

impl EventQueue {
    fn add(&mut self, encoded: Vec<u8>) {
        self.bytes += encoded.len();
        self.queue.push_back(encoded);
    }

    fn bytes(&self) -> usize {
        self.bytes
    }

    /// Pops events until the next one would push the batch's JSON body past
    /// `max_bytes`. An event too large on its own is returned alone.
    fn get_batch(&mut self, max_bytes: usize) -> Batch {
        let mut batch = Batch::new();
        while let Some(encoded) = self.queue.pop_front() {
            // one more comma joins the next event to a non-empty batch
            if !batch.is_empty() && batch.json_len() + encoded.len() + 1 > max_bytes {
                self.queue.push_front(encoded);
                break;
            }
            self.bytes -= encoded.len();
            batch.push(encoded);
        }
        batch
    }
}

struct Lane {
    id: usize,
    rx: mpsc::Receiver<LaneCommand>,
    queue: EventQueue,
    options: Arc<ReporterOptions>,
    controller: RetryController,
    stats: Arc<BatcherStats>,
    /// Events accepted into this lane and not yet sent or dropped.
    pending: Arc<AtomicUsize>,
    cancel_token: CancellationToken,
}

impl Lane {
    async fn run(mut self) {
        debug!("Reporter | Lane {} started", self.id);
        let mut next_flush = Instant::now() + self.options.event_flush_interval();
        let mut waiters: Vec<oneshot::Sender<()>> = Vec::new();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(LaneCommand::Event(event)) => {
                        self.enqueue(&event);
                        if self.queue.bytes() >= self.options.event_flush_batch_size_bytes() {
                            debug!("Reporter | Lane {} reached its batch watermark", self.id);
                            self.flush().await;
                            next_flush = Instant::now() + self.options.event_flush_interval();
                        }
                    }
                    Some(LaneCommand::Flush(done)) => {
                        self.flush().await;
                        let _ = done.send(());
                    }
                    None => break,
                },
                _ = sleep_until(next_flush) => {
                    self.flush().await;
                    next_flush = Instant::now() + self.options.event_flush_interval();
                }
            }
        }

        // final drain: no new timer flushes, only what is already queued
        self.rx.close();
        while let Ok(command) = self.rx.try_recv() {
            match command {
                LaneCommand::Event(event) => self.enqueue(&event),
                LaneCommand::Flush(done) => waiters.push(done),
            }
        }
        self.flush().await;
        for done in waiters {
            let _ = done.send(());
        }
        debug!("Reporter | Lane {} stopped", self.id);
    }

    fn enqueue(&mut self, event: &Event) {
        match event.encode() {
            Ok(encoded) => self.queue.add(encoded),
            Err(e) => {
                error!("Reporter | Dropping event that failed to encode: {e}");
                settle(&self.pending, 1);
                self.stats.add_dropped(1);
            }
        }
    }

    async fn flush(&mut self) {
        loop {
            let batch = self
                .queue
                .get_batch(self.options.event_flush_batch_size_bytes());
            if batch.is_empty() {
                return;
            }
            let n = batch.len();
            match self.controller.send(&batch).await {
                Ok(()) => {
                    self.stats.sent.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("Reporter | Dropping batch of {n} events: {e}");
                    self.stats.failed_batches.fetch_add(1, Ordering::Relaxed);
                    self.stats.add_dropped(n);
                }
            }
            settle(&self.pending, n);
        }
    }
}

/// Removes `n` settled events from a lane's pending count, never going below zero.
fn settle(pending: &AtomicUsize, n: usize) {
    let _ = pending.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |p| {
        Some(p.saturating_sub(n))
    });
}

pub struct EventBatcher {
    senders: Vec<mpsc::Sender<LaneCommand>>,
    pending: Vec<Arc<AtomicUsize>>,
    handles: Vec<JoinHandle<()>>,
    stats: Arc<BatcherStats>,
}

impl EventBatcher {
    /// Spawns the send lanes. Must be called from within a tokio runtime.
    pub fn start(
        options: Arc<ReporterOptions>,
        controller: RetryController,
        cancel_token: CancellationToken,
    ) -> Self {
        let lanes = options.send_lanes().max(1);
        let lane_capacity = (options.event_queue_capacity() / lanes).max(1);
        let stats = Arc::new(BatcherStats::default());

        let mut senders = Vec::with_capacity(lanes);
        let mut pending = Vec::with_capacity(lanes);
        let mut handles = Vec::with_capacity(lanes);
        for id in 0..lanes {
            let (tx, rx) = mpsc::channel(lane_capacity);
            let lane_pending = Arc::new(AtomicUsize::new(0));
            let lane = Lane {
                id,
                rx,
                queue: EventQueue::default(),
                options: Arc::clone(&options),
                controller: controller.clone(),
                stats: Arc::clone(&stats),
                pending: Arc::clone(&lane_pending),
                cancel_token: cancel_token.clone(),
            };
            handles.push(tokio::spawn(lane.run()));
            senders.push(tx);
            pending.push(lane_pending);
        }

        EventBatcher {
            senders,
            pending,
            handles,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<BatcherStats> {
        Arc::clone(&self.stats)
    }

    /// Enqueues an event without waiting. Returns false if the event was dropped
    /// because its lane is full or already closed.
    pub fn report(&self, event: Event) -> bool {
        let lane = (event.task_key() % self.senders.len() as u64) as usize;
        // counted before the send so the lane never decrements below zero
        self.pending[lane].fetch_add(1, Ordering::Relaxed);
        match self.senders[lane].try_send(LaneCommand::Event(event)) {
            Ok(()) => true,
            Err(err) => {
                settle(&self.pending[lane], 1);
                self.stats.add_dropped(1);
                match err {
                    TrySendError::Full(_) => {
                        debug!("Reporter | Lane {lane} full, dropping event");
                    }
                    TrySendError::Closed(_) => {
                        debug!("Reporter | Lane {lane} closed, dropping event");
                    }
                }
                false
            }
        }
    }

    /// Flushes every lane and waits until each has handed its buffer to the
    /// collector.
    pub async fn flush(&self) {
        let mut waiting = Vec::with_capacity(self.senders.len());
        for sender in &self.senders {
            let (done_tx, done_rx) = oneshot::channel();
            if sender.send(LaneCommand::Flush(done_tx)).await.is_ok() {
                waiting.push(done_rx);
            }
        }
        for done in waiting {
            let _ = done.await;
        }
    }

    /// Waits for the lanes to drain, up to `deadline`. The cancellation token given
    /// to [`EventBatcher::start`] must be cancelled first. Lanes still running at
    /// the deadline are aborted and their buffered events counted as dropped.
    /// Returns the number of events abandoned at the deadline.
    pub async fn close(self, deadline: Instant) -> u64 {
        let EventBatcher {
            senders,
            pending,
            mut handles,
            stats,
        } = self;
        drop(senders);

        let mut unfinished = None;
        for (i, handle) in handles.iter_mut().enumerate() {
            if timeout_at(deadline, handle).await.is_err() {
                unfinished = Some(i);
                break;
            }
        }

        let mut abandoned = 0;
        if let Some(first) = unfinished {
            for handle in &handles[first..] {
                handle.abort();
            }
            // an aborted lane may still be finishing its current poll, which can
            // settle a batch; counters are read only once every lane has stopped
            for (handle, lane_pending) in handles.into_iter().zip(&pending).skip(first) {
                let _ = handle.await;
                abandoned += lane_pending.swap(0, Ordering::Relaxed);
            }
            stats.add_dropped(abandoned);
            warn!("Reporter | Close deadline reached, dropped {abandoned} unsent events");
        }
        abandoned as u64
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_get_batch_respects_byte_ceiling() {
        let mut queue = EventQueue::default();
        for _ in 0..5 {
            queue.add(vec![b'x'; 40]);
        }
        assert_eq!(queue.bytes(), 200);

        let batch = queue.get_batch(100);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.size(), 80);
        assert_eq!(queue.bytes(), 120);

        assert_eq!(queue.get_batch(100).len(), 2);
        assert_eq!(queue.get_batch(100).len(), 1);
        assert!(queue.get_batch(100).is_empty());
        assert_eq!(queue.bytes(), 0);
    }

    #[test]
    fn test_get_batch_counts_json_framing() {
        let mut queue = EventQueue::default();
        for _ in 0..4 {
            queue.add(vec![b'x'; 49]);
        }
        // two events are 98 bytes but 101 once framed as a JSON array
        while !queue.queue.is_empty() {
            let batch = queue.get_batch(100);
            assert_eq!(batch.len(), 1);
            assert!(batch.to_json_array().len() <= 100);
        }

        for _ in 0..10 {
            queue.add(vec![b'x'; 10]);
        }
        let batch = queue.get_batch(100);
        assert_eq!(batch.len(), 9);
        assert_eq!(batch.to_json_array().len(), 100);
    }

    #[test]
    fn test_settle_never_wraps_below_zero() {
        let pending = AtomicUsize::new(2);
        settle(&pending, 1);
        assert_eq!(pending.load(Ordering::Relaxed), 1);
        settle(&pending, 5);
        assert_eq!(pending.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_oversized_event_gets_its_own_batch() {
        let mut queue = EventQueue::default();
        queue.add(vec![b'x'; 10]);
        queue.add(vec![b'y'; 500]);
        queue.add(vec![b'z'; 10]);

        assert_eq!(queue.get_batch(100).len(), 1);
        let oversized = queue.get_batch(100);
        assert_eq!(oversized.len(), 1);
        assert_eq!(oversized.size(), 500);
        assert_eq!(queue.get_batch(100).len(), 1);
    }

    #[test]
    fn test_batches_preserve_order() {
        let mut queue = EventQueue::default();
        for i in 0..4u8 {
            queue.add(vec![i; 10]);
        }
        let batch = queue.get_batch(25);
        assert_eq!(batch.events(), &[vec![0u8; 10], vec![1u8; 10]]);
        let batch = queue.get_batch(25);
        assert_eq!(batch.events(), &[vec![2u8; 10], vec![3u8; 10]]);
    }
}
