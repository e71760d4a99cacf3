//! Fixed pool of pre-allocated transfer buffers between the ingestion thread
//! and the stream reader.
//!
//! Slots circulate between two channels: `free` holds slots the producer may
//! fill, `filled` holds captured slots in capture order. The consumer holds
//! at most one slot at a time between `acquire` and `release`. The producer
//! never waits: when no free slot exists the transfer is dropped and the
//! overflow flag raised, and the next `acquire` flushes the queue and
//! reports the loss.

use crossbeam_channel::{bounded, select, Receiver, Sender};
use crossbeam_utils::CachePadded;
use log::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::convert::BYTES_PER_SAMPLE;
use crate::error::{Error, Result};

/// One transfer buffer and the tick of its first sample.
pub struct RingSlot {
    index: usize,
    tick: i64,
    len: usize,
    data: Box<[u8]>,
}

impl RingSlot {
    fn new(index: usize, capacity: usize) -> RingSlot {
        RingSlot {
            index,
            tick: 0,
            len: 0,
            data: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn tick(&self) -> i64 {
        self.tick
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Whole samples held by the slot.
    pub fn elems(&self) -> usize {
        self.len / BYTES_PER_SAMPLE
    }
}

struct Shared {
    overflow: CachePadded<AtomicBool>,
    reset: CachePadded<AtomicBool>,
    dropped: AtomicU64,
}

pub struct RingBufferPool {
    num_buffers: usize,
    buffer_len: usize,
    free: (Sender<RingSlot>, Receiver<RingSlot>),
    filled: (Sender<RingSlot>, Receiver<RingSlot>),
    // wakes a blocked acquire when a flag changes
    wake: (Sender<()>, Receiver<()>),
    shared: Shared,
}

impl RingBufferPool {
    pub fn new(num_buffers: usize, buffer_len: usize) -> Arc<RingBufferPool> {
        let free = bounded(num_buffers);
        let filled = bounded(num_buffers);
        for index in 0..num_buffers {
            // capacity equals the slot count, never full here
            let _ = free.0.send(RingSlot::new(index, buffer_len));
        }

        debug!(
            "allocated {} ring buffers of {} bytes",
            num_buffers, buffer_len
        );

        Arc::new(RingBufferPool {
            num_buffers,
            buffer_len,
            free,
            filled,
            wake: bounded(1),
            shared: Shared {
                overflow: CachePadded::new(AtomicBool::new(false)),
                reset: CachePadded::new(AtomicBool::new(false)),
                dropped: AtomicU64::new(0),
            },
        })
    }

    pub fn num_buffers(&self) -> usize {
        self.num_buffers
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Filled slots waiting for the consumer.
    pub fn queued(&self) -> usize {
        self.filled.1.len()
    }

    /// Total transfers dropped because the pool was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn reset_pending(&self) -> bool {
        self.shared.reset.load(Ordering::Acquire)
    }

    /// Discard everything queued before the next acquire.
    pub fn request_reset(&self) {
        self.shared.reset.store(true, Ordering::Release);
        self.notify();
    }

    /// Discard queued slots and pending flags right away. Only valid while
    /// no producer is running and the consumer holds nothing.
    pub fn clear(&self) {
        let n = self.flush();
        self.shared.reset.store(false, Ordering::Release);
        self.shared.overflow.store(false, Ordering::Release);
        while self.wake.1.try_recv().is_ok() {}
        if n > 0 {
            debug!("discarded {} stale buffers", n);
        }
    }

    fn notify(&self) {
        // a pending wake-up is as good as a new one
        let _ = self.wake.0.try_send(());
    }

    fn flush(&self) -> usize {
        let mut n = 0;
        while let Ok(slot) = self.filled.1.try_recv() {
            let _ = self.free.0.send(slot);
            n += 1;
        }
        n
    }
}

/// Producer side, owned by the ingestion thread.
pub struct RingProducer {
    pool: Arc<RingBufferPool>,
    ticks: i64,
}

impl RingProducer {
    pub fn new(pool: Arc<RingBufferPool>) -> RingProducer {
        RingProducer { pool, ticks: 0 }
    }

    pub fn ticks(&self) -> i64 {
        self.ticks
    }

    /// Copy one hardware transfer into the next free slot.
    ///
    /// Returns false when the pool was full and the transfer dropped. Bytes
    /// beyond the slot capacity are discarded.
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        let tick = self.ticks;
        self.ticks += (bytes.len() / BYTES_PER_SAMPLE) as i64;

        let mut slot = match self.pool.free.1.try_recv() {
            Ok(slot) => slot,
            Err(_) => {
                trace!("ring buffer full, dropping {} bytes", bytes.len());
                self.pool.shared.dropped.fetch_add(1, Ordering::Relaxed);
                self.pool.shared.overflow.store(true, Ordering::Release);
                self.pool.notify();
                return false;
            }
        };

        let n = bytes.len().min(slot.data.len());
        slot.data[..n].copy_from_slice(&bytes[..n]);
        slot.len = n;
        slot.tick = tick;

        // one slot per channel position, never full
        let _ = self.pool.filled.0.send(slot);
        true
    }
}

enum Wait {
    Ready(RingSlot),
    Woken,
    TimedOut,
}

/// Consumer side, owned by the stream session.
pub struct RingConsumer {
    pool: Arc<RingBufferPool>,
    held: Option<RingSlot>,
}

impl RingConsumer {
    pub fn new(pool: Arc<RingBufferPool>) -> RingConsumer {
        RingConsumer { pool, held: None }
    }

    pub fn pool(&self) -> &Arc<RingBufferPool> {
        &self.pool
    }

    /// The currently acquired slot, if `handle` names it.
    pub fn held(&self, handle: usize) -> Option<&RingSlot> {
        self.held.as_ref().filter(|slot| slot.index == handle)
    }

    pub fn held_handle(&self) -> Option<usize> {
        self.held.as_ref().map(|slot| slot.index)
    }

    /// Wait up to `timeout` for the oldest filled slot.
    pub fn acquire(&mut self, timeout: Duration) -> Result<&RingSlot> {
        if let Some(slot) = &self.held {
            debug_assert!(false, "acquire while handle {} is outstanding", slot.index);
            return Err(Error::HandleOutstanding(slot.index));
        }

        let pool = &self.pool;
        // None waits without a deadline
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if pool.shared.reset.swap(false, Ordering::AcqRel) {
                let n = pool.flush();
                pool.shared.overflow.store(false, Ordering::Release);
                debug!("stream reset, discarded {} queued buffers", n);
            }

            if pool.shared.overflow.swap(false, Ordering::AcqRel) {
                let n = pool.flush();
                warn!("overflow: dropped {} queued buffers", n);
                return Err(Error::Overflow);
            }

            let wait = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    select! {
                        recv(pool.filled.1) -> slot => slot.map(Wait::Ready).unwrap_or(Wait::Woken),
                        recv(pool.wake.1) -> _ => Wait::Woken,
                        default(remaining) => Wait::TimedOut,
                    }
                }
                None => select! {
                    recv(pool.filled.1) -> slot => slot.map(Wait::Ready).unwrap_or(Wait::Woken),
                    recv(pool.wake.1) -> _ => Wait::Woken,
                },
            };

            match wait {
                Wait::Ready(slot) => {
                    trace!("acquired ring buffer {} at tick {}", slot.index, slot.tick);
                    return Ok(self.held.get_or_insert(slot));
                }
                Wait::Woken => continue,
                Wait::TimedOut => return Err(Error::Timeout),
            }
        }
    }

    /// Hand the acquired slot back to the producer.
    pub fn release(&mut self, handle: usize) -> Result<()> {
        match self.held.take() {
            Some(slot) if slot.index == handle => {
                trace!("released ring buffer {}", handle);
                let _ = self.pool.free.0.send(slot);
                Ok(())
            }
            other => {
                debug_assert!(false, "release of unacquired handle {}", handle);
                self.held = other;
                Err(Error::InvalidHandle(handle))
            }
        }
    }
}
