//! Tick dispatch thread
//!
//! Hardware events (DMA completion, vertical blank, the voice timer) arrive
//! from interrupt-like contexts such as an audio callback. They are posted
//! to a bounded channel without blocking and serviced on a dedicated thread
//! that holds the pump lock only while dispatching.
//!
//! Each wakeup drains everything queued into per-source counts and services
//! them in rounds, each round handing one [`PendingTicks`] set to the pump so
//! that a DMA completion is always handled before a buffering tick queued
//! alongside it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use dp_core::error::{AudioError, Result};
use parking_lot::Mutex;

use crate::pump::{AudioPump, PendingTicks};

/// Events queued between the event sources and the dispatch thread
const TICK_QUEUE_DEPTH: usize = 256;

/// Hardware event delivered to the dispatch thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// A DMA block finished; the next chunk must be armed
    DmaComplete,
    /// Display refresh; time for a buffering pass
    VerticalBlank,
    /// The voice one-shot timer elapsed
    TimerFired,
    /// Exit the dispatch thread
    Shutdown,
}

/// Cloneable, non-blocking handle for posting ticks
#[derive(Debug, Clone)]
pub struct TickSource {
    tx: Sender<Tick>,
    dropped: Arc<AtomicU64>,
}

impl TickSource {
    /// Post a tick; returns `false` if the queue was full or closed
    pub fn post(&self, tick: Tick) -> bool {
        match self.tx.try_send(tick) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn dma_complete(&self) -> bool {
        self.post(Tick::DmaComplete)
    }

    pub fn vertical_blank(&self) -> bool {
        self.post(Tick::VerticalBlank)
    }

    pub fn timer_fired(&self) -> bool {
        self.post(Tick::TimerFired)
    }

    /// Ticks lost because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create a tick channel ahead of the dispatch thread, so event sources
/// (such as an output stream) can be wired up before the pump exists.
pub fn tick_channel() -> (TickSource, Receiver<Tick>) {
    let (tx, rx) = bounded(TICK_QUEUE_DEPTH);
    (
        TickSource {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct TickCounts {
    dma: u32,
    timer: u32,
    buffer: u32,
}

impl TickCounts {
    fn add(&mut self, tick: Tick) {
        match tick {
            Tick::DmaComplete => self.dma += 1,
            Tick::TimerFired => self.timer += 1,
            Tick::VerticalBlank => self.buffer += 1,
            Tick::Shutdown => {}
        }
    }

    /// Take one round of pending ticks
    fn next_round(&mut self) -> PendingTicks {
        let mut pending = PendingTicks::empty();
        if self.dma > 0 {
            self.dma -= 1;
            pending |= PendingTicks::DMA;
        }
        if self.timer > 0 {
            self.timer -= 1;
            pending |= PendingTicks::TIMER;
        }
        if self.buffer > 0 {
            self.buffer -= 1;
            pending |= PendingTicks::BUFFER;
        }
        pending
    }
}

/// Dispatch thread servicing a shared pump
pub struct TickDriver {
    source: TickSource,
    handle: Option<JoinHandle<()>>,
    rounds: Arc<AtomicU64>,
}

impl TickDriver {
    /// Spawn the dispatch thread with a fresh tick channel
    pub fn spawn(pump: Arc<Mutex<AudioPump>>) -> Result<Self> {
        let (source, rx) = tick_channel();
        Self::spawn_with(pump, source, rx)
    }

    /// Spawn the dispatch thread on an existing tick channel
    pub fn spawn_with(
        pump: Arc<Mutex<AudioPump>>,
        source: TickSource,
        rx: Receiver<Tick>,
    ) -> Result<Self> {
        let rounds = Arc::new(AtomicU64::new(0));
        let thread_rounds = rounds.clone();

        let handle = thread::Builder::new()
            .name("dp-tick".into())
            .spawn(move || run(rx, pump, thread_rounds))
            .map_err(|e| AudioError::Allocation(format!("tick thread: {}", e)))?;

        tracing::debug!("Tick driver started");
        Ok(Self {
            source,
            handle: Some(handle),
            rounds,
        })
    }

    /// Handle for posting ticks
    pub fn source(&self) -> TickSource {
        self.source.clone()
    }

    /// Number of dispatch rounds serviced so far
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Acquire)
    }

    /// Stop the dispatch thread and wait for it to exit
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            // A blocking send: the thread may be behind on a full queue
            let _ = self.source.tx.send(Tick::Shutdown);
            if handle.join().is_err() {
                tracing::error!("Tick driver thread panicked");
            }
            tracing::debug!("Tick driver stopped");
        }
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(rx: Receiver<Tick>, pump: Arc<Mutex<AudioPump>>, rounds: Arc<AtomicU64>) {
    while let Ok(first) = rx.recv() {
        let mut counts = TickCounts::default();
        let mut shutdown = first == Tick::Shutdown;
        counts.add(first);
        for tick in rx.try_iter() {
            shutdown |= tick == Tick::Shutdown;
            counts.add(tick);
        }

        loop {
            let pending = counts.next_round();
            if pending.is_empty() {
                break;
            }
            pump.lock().dispatch(pending);
            rounds.fetch_add(1, Ordering::Release);
        }

        if shutdown {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounds_put_dma_first() {
        let mut counts = TickCounts::default();
        counts.add(Tick::VerticalBlank);
        counts.add(Tick::DmaComplete);
        counts.add(Tick::DmaComplete);
        counts.add(Tick::Shutdown);

        assert_eq!(counts.next_round(), PendingTicks::DMA | PendingTicks::BUFFER);
        assert_eq!(counts.next_round(), PendingTicks::DMA);
        assert_eq!(counts.next_round(), PendingTicks::empty());
    }

    #[test]
    fn test_full_queue_drops_ticks() {
        let (source, rx) = tick_channel();
        for _ in 0..TICK_QUEUE_DEPTH {
            assert!(source.vertical_blank());
        }
        assert!(!source.dma_complete());
        assert_eq!(source.dropped(), 1);

        drop(rx);
        assert!(!source.timer_fired());
        assert_eq!(source.dropped(), 1);
    }
}
