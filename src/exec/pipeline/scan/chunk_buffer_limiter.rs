// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Capacity accounting for the shared scan chunk buffer.
//!
//! Responsibilities:
//! - Counts pinned chunk slots across every parallel scan operator of one scan node.
//! - Hands out move-only `ChunkBufferToken`s; dropping or releasing a token credits its slots back.
//! - Adapts the capacity to the observed row width when the dynamic limiter is used.
//!
//! Key exported interfaces:
//! - Types: `ChunkBufferLimiter`, `ChunkBufferLimiterPtr`, `ChunkBufferToken`,
//!   `FixedChunkBufferLimiter`, `DynamicChunkBufferLimiter`.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::novarocks_logging::debug;

/// Pinned-slot counter shared by a limiter and every token it issued.
#[derive(Debug, Default)]
struct PinnedChunks {
    pinned: AtomicUsize,
    peak: AtomicUsize,
}

impl PinnedChunks {
    /// Debit `num_chunks` slots only if the total stays within `capacity`.
    /// A failed attempt leaves the counter untouched. Empty reservations are refused.
    fn try_pin(&self, num_chunks: usize, capacity: usize) -> bool {
        if num_chunks == 0 {
            return false;
        }
        let mut current = self.pinned.load(Ordering::Acquire);
        loop {
            let Some(next) = current.checked_add(num_chunks) else {
                return false;
            };
            if next > capacity {
                return false;
            }
            match self.pinned.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.peak.fetch_max(next, Ordering::Relaxed);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn unpin(&self, num_chunks: usize) {
        let prev = self.pinned.fetch_sub(num_chunks, Ordering::AcqRel);
        debug_assert!(
            prev >= num_chunks,
            "chunk buffer unpin underflow: pinned={prev} release={num_chunks}"
        );
    }

    fn size(&self) -> usize {
        self.pinned.load(Ordering::Acquire)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }
}

/// Reservation of `num_chunks` buffer slots.
///
/// The slots are credited back exactly once, either by `release` or when the
/// token is dropped.
#[must_use = "a chunk buffer token holds buffer capacity until released"]
pub struct ChunkBufferToken {
    counter: Arc<PinnedChunks>,
    num_chunks: usize,
}

impl ChunkBufferToken {
    fn new(counter: Arc<PinnedChunks>, num_chunks: usize) -> Self {
        Self {
            counter,
            num_chunks,
        }
    }

    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    /// Credit the reserved slots back to the limiter.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ChunkBufferToken {
    fn drop(&mut self) {
        self.counter.unpin(self.num_chunks);
    }
}

impl fmt::Debug for ChunkBufferToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkBufferToken")
            .field("num_chunks", &self.num_chunks)
            .finish()
    }
}

pub trait ChunkBufferLimiter: Send + Sync + fmt::Debug {
    /// Feed row-size statistics of freshly read chunks. Only the dynamic limiter reacts.
    fn update_avg_row_bytes(
        &self,
        _added_sum_row_bytes: usize,
        _added_num_rows: usize,
        _max_chunk_rows: usize,
    ) {
    }

    /// Reserve `num_chunks` slots, or `None` when the buffer is full or `num_chunks` is 0.
    fn pin(&self, num_chunks: usize) -> Option<ChunkBufferToken>;

    fn is_full(&self) -> bool {
        self.size() >= self.capacity()
    }

    /// Currently pinned slots.
    fn size(&self) -> usize;

    fn capacity(&self) -> usize;

    fn default_capacity(&self) -> usize;

    fn peak_size(&self) -> usize;
}

pub type ChunkBufferLimiterPtr = Arc<dyn ChunkBufferLimiter>;

/// Limiter with a constant capacity.
#[derive(Debug)]
pub struct FixedChunkBufferLimiter {
    counter: Arc<PinnedChunks>,
    capacity: usize,
}

impl FixedChunkBufferLimiter {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            counter: Arc::new(PinnedChunks::default()),
            capacity: capacity.max(1),
        })
    }
}

impl ChunkBufferLimiter for FixedChunkBufferLimiter {
    fn pin(&self, num_chunks: usize) -> Option<ChunkBufferToken> {
        if !self.counter.try_pin(num_chunks, self.capacity) {
            return None;
        }
        Some(ChunkBufferToken::new(Arc::clone(&self.counter), num_chunks))
    }

    fn size(&self) -> usize {
        self.counter.size()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn default_capacity(&self) -> usize {
        self.capacity
    }

    fn peak_size(&self) -> usize {
        self.counter.peak()
    }
}

#[derive(Debug, Default)]
struct RowStats {
    sum_row_bytes: usize,
    num_rows: usize,
}

/// Limiter whose capacity follows the average chunk footprint:
/// `capacity = mem_limit / (avg_row_bytes * chunk_rows)`, clamped to `[1, max_capacity]`.
#[derive(Debug)]
pub struct DynamicChunkBufferLimiter {
    counter: Arc<PinnedChunks>,
    stats: Mutex<RowStats>,
    capacity: AtomicUsize,
    max_capacity: usize,
    default_capacity: usize,
    mem_limit: usize,
}

impl DynamicChunkBufferLimiter {
    pub fn new(max_capacity: usize, default_capacity: usize, mem_limit: usize) -> Arc<Self> {
        let max_capacity = max_capacity.max(1);
        let default_capacity = default_capacity.clamp(1, max_capacity);
        Arc::new(Self {
            counter: Arc::new(PinnedChunks::default()),
            stats: Mutex::new(RowStats::default()),
            capacity: AtomicUsize::new(default_capacity),
            max_capacity,
            default_capacity,
            mem_limit,
        })
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }
}

impl ChunkBufferLimiter for DynamicChunkBufferLimiter {
    fn update_avg_row_bytes(
        &self,
        added_sum_row_bytes: usize,
        added_num_rows: usize,
        max_chunk_rows: usize,
    ) {
        if added_num_rows == 0 {
            return;
        }
        let mut stats = self.stats.lock().expect("chunk buffer limiter lock");
        stats.sum_row_bytes = stats.sum_row_bytes.saturating_add(added_sum_row_bytes);
        stats.num_rows = stats.num_rows.saturating_add(added_num_rows);
        let avg_row_bytes = stats.sum_row_bytes / stats.num_rows;
        if avg_row_bytes == 0 {
            return;
        }
        let chunk_mem_usage = avg_row_bytes.saturating_mul(max_chunk_rows.max(1));
        let new_capacity = (self.mem_limit / chunk_mem_usage).clamp(1, self.max_capacity);
        // Shrinking only gates new pins; outstanding tokens are never revoked.
        let prev = self.capacity.swap(new_capacity, Ordering::AcqRel);
        if prev != new_capacity {
            debug!(
                "DynamicChunkBufferLimiter capacity {} -> {} (avg_row_bytes={} chunk_rows={})",
                prev, new_capacity, avg_row_bytes, max_chunk_rows
            );
        }
    }

    fn pin(&self, num_chunks: usize) -> Option<ChunkBufferToken> {
        let capacity = self.capacity.load(Ordering::Acquire);
        if !self.counter.try_pin(num_chunks, capacity) {
            return None;
        }
        Some(ChunkBufferToken::new(Arc::clone(&self.counter), num_chunks))
    }

    fn size(&self) -> usize {
        self.counter.size()
    }

    fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    fn default_capacity(&self) -> usize {
        self.default_capacity
    }

    fn peak_size(&self) -> usize {
        self.counter.peak()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::{ChunkBufferLimiter, DynamicChunkBufferLimiter, FixedChunkBufferLimiter};

    #[test]
    fn full_pin_leaves_counter_untouched() {
        let limiter = FixedChunkBufferLimiter::new(3);
        let a = limiter.pin(2).expect("first pin");
        assert!(limiter.pin(2).is_none());
        assert_eq!(limiter.size(), 2);
        let b = limiter.pin(1).expect("exact fit");
        assert!(limiter.is_full());
        assert!(limiter.pin(1).is_none());
        assert_eq!(limiter.size(), 3);

        a.release();
        assert_eq!(limiter.size(), 1);
        let c = limiter.pin(2).expect("retry after release");
        drop(b);
        drop(c);
        assert_eq!(limiter.size(), 0);
        assert_eq!(limiter.peak_size(), 3);
    }

    #[test]
    fn zero_chunk_pin_is_refused() {
        let limiter = FixedChunkBufferLimiter::new(1);
        assert!(limiter.pin(0).is_none());
        let held = limiter.pin(1).expect("only slot");
        assert!(limiter.pin(0).is_none());
        assert_eq!(limiter.size(), 1);
        drop(held);
        assert!(limiter.pin(0).is_none());
        assert_eq!(limiter.peak_size(), 1);
    }

    #[test]
    fn concurrent_pins_never_exceed_capacity() {
        let limiter = FixedChunkBufferLimiter::new(4);
        let max_seen = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        if let Some(token) = limiter.pin(1) {
                            max_seen.fetch_max(limiter.size(), Ordering::Relaxed);
                            token.release();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("join");
        }
        assert!(max_seen.load(Ordering::Relaxed) <= 4);
        assert_eq!(limiter.size(), 0);
    }

    #[test]
    fn dynamic_capacity_follows_row_width() {
        // 1 KiB budget, 4 rows per chunk.
        let limiter = DynamicChunkBufferLimiter::new(16, 4, 1024);
        assert_eq!(limiter.capacity(), 4);
        assert_eq!(limiter.default_capacity(), 4);

        // 32 bytes/row -> 128 bytes/chunk -> 8 chunks.
        limiter.update_avg_row_bytes(320, 10, 4);
        assert_eq!(limiter.capacity(), 8);

        // Very wide rows clamp to one chunk.
        limiter.update_avg_row_bytes(1_000_000, 10, 4);
        assert_eq!(limiter.capacity(), 1);
        let token = limiter.pin(1).expect("single slot");
        assert!(limiter.is_full());
        drop(token);
    }

    #[test]
    fn dynamic_capacity_is_bounded_by_max() {
        let limiter = DynamicChunkBufferLimiter::new(5, 2, 1 << 30);
        limiter.update_avg_row_bytes(10, 10, 1);
        assert_eq!(limiter.capacity(), 5);
        assert_eq!(limiter.max_capacity(), 5);
    }
}
