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
//! Shared multi-partition chunk buffer of one connector scan node.
//!
//! Responsibilities:
//! - Keeps one FIFO partition per scan operator (driver sequence) holding `(Chunk, ChunkBufferToken)` entries.
//! - Routes produced chunks to partitions according to the balance strategy.
//! - Enforces a single global capacity through the shared `ChunkBufferLimiter`.
//!
//! Key exported interfaces:
//! - Types: `BalancedChunkBuffer`, `BalanceStrategy`.
//!
//! Capacity is accounted globally rather than per partition, so a partition that
//! fills the buffer throttles every producer through `try_reserve`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::Deserialize;

use crate::exec::chunk::Chunk;
use crate::exec::pipeline::scan::chunk_buffer_limiter::{ChunkBufferLimiterPtr, ChunkBufferToken};
use crate::exec::pipeline::schedule::observer::Observable;
use crate::novarocks_logging::debug;

/// Placement policy of produced chunks across operator partitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStrategy {
    /// A chunk lands in the partition of the operator that owns its source.
    Direct,
    /// Chunks rotate over all open partitions in strict round-robin order.
    RoundRobin,
}

struct BufferEntry {
    chunk: Chunk,
    token: ChunkBufferToken,
}

#[derive(Default)]
struct PartitionState {
    queue: VecDeque<BufferEntry>,
    /// Producer side of this partition will not push any more chunks.
    finished: bool,
    /// Consumer side is gone; the partition is excluded from routing.
    closed: bool,
}

struct Partition {
    mu: Mutex<PartitionState>,
    num_chunks: AtomicUsize,
    observable: Arc<Observable>,
}

impl Partition {
    fn new() -> Self {
        Self {
            mu: Mutex::new(PartitionState::default()),
            num_chunks: AtomicUsize::new(0),
            observable: Arc::new(Observable::new()),
        }
    }
}

pub struct BalancedChunkBuffer {
    strategy: BalanceStrategy,
    partitions: Vec<Partition>,
    limiter: ChunkBufferLimiterPtr,
    next_partition: AtomicUsize,
    num_finished: AtomicUsize,
    mem_usage: AtomicUsize,
    closed: AtomicBool,
}

impl BalancedChunkBuffer {
    pub fn new(
        strategy: BalanceStrategy,
        num_partitions: usize,
        limiter: ChunkBufferLimiterPtr,
    ) -> Self {
        let num_partitions = num_partitions.max(1);
        Self {
            strategy,
            partitions: (0..num_partitions).map(|_| Partition::new()).collect(),
            limiter,
            next_partition: AtomicUsize::new(0),
            num_finished: AtomicUsize::new(0),
            mem_usage: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn strategy(&self) -> BalanceStrategy {
        self.strategy
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn limiter(&self) -> &ChunkBufferLimiterPtr {
        &self.limiter
    }

    /// True when chunks produced by one operator's sources may be consumed by a sibling.
    pub fn is_shared(&self) -> bool {
        self.strategy == BalanceStrategy::RoundRobin && self.partitions.len() > 1
    }

    /// Reserve `num_chunks` slots without blocking; `None` means the buffer is full.
    pub fn try_reserve(&self, num_chunks: usize) -> Option<ChunkBufferToken> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.limiter.pin(num_chunks)
    }

    /// Feed the footprint of a freshly read chunk to the limiter.
    pub fn update_limiter(&self, chunk: &Chunk, chunk_size: usize) {
        self.limiter
            .update_avg_row_bytes(chunk.estimated_bytes(), chunk.len(), chunk_size);
    }

    fn partition(&self, seq: usize) -> &Partition {
        &self.partitions[seq % self.partitions.len()]
    }

    fn pick_partition(&self, producer_seq: usize) -> usize {
        match self.strategy {
            BalanceStrategy::Direct => producer_seq % self.partitions.len(),
            BalanceStrategy::RoundRobin => {
                self.next_partition.fetch_add(1, Ordering::Relaxed) % self.partitions.len()
            }
        }
    }

    /// Store `chunk` under `token`. Returns the partition that received it, or
    /// `None` when no open partition could take it (the token is released).
    pub fn push(
        &self,
        producer_seq: usize,
        chunk: Chunk,
        token: ChunkBufferToken,
    ) -> Option<usize> {
        if self.closed.load(Ordering::Acquire) {
            token.release();
            return None;
        }
        let num_partitions = self.partitions.len();
        let first = self.pick_partition(producer_seq);
        let mut entry = BufferEntry { chunk, token };
        for attempt in 0..num_partitions {
            let seq = match self.strategy {
                BalanceStrategy::Direct if attempt > 0 => break,
                _ => (first + attempt) % num_partitions,
            };
            let partition = &self.partitions[seq];
            let notify = partition.observable.defer_notify();
            let mut guard = partition.mu.lock().expect("chunk buffer partition lock");
            if guard.closed {
                continue;
            }
            let bytes = entry.chunk.estimated_bytes();
            guard.queue.push_back(entry);
            partition.num_chunks.fetch_add(1, Ordering::AcqRel);
            self.mem_usage.fetch_add(bytes, Ordering::AcqRel);
            drop(guard);
            notify.arm();
            return Some(seq);
        }
        debug!(
            "BalancedChunkBuffer discard chunk: producer_seq={} rows={} reason=no_open_partition",
            producer_seq,
            entry.chunk.len()
        );
        entry.token.release();
        None
    }

    /// Oldest entry of partition `seq`. The caller owns the returned token and
    /// releases it once the chunk has been handed downstream.
    pub fn pop(&self, seq: usize) -> Option<(Chunk, ChunkBufferToken)> {
        let partition = self.partition(seq);
        if partition.num_chunks.load(Ordering::Acquire) == 0 {
            return None;
        }
        let mut guard = partition.mu.lock().expect("chunk buffer partition lock");
        let entry = guard.queue.pop_front()?;
        partition.num_chunks.fetch_sub(1, Ordering::AcqRel);
        self.mem_usage
            .fetch_sub(entry.chunk.estimated_bytes(), Ordering::AcqRel);
        Some((entry.chunk, entry.token))
    }

    /// Pop one chunk and credit its slot back immediately.
    pub fn try_get(&self, seq: usize) -> Option<Chunk> {
        self.pop(seq).map(|(chunk, token)| {
            token.release();
            chunk
        })
    }

    /// Mark the producer side of partition `seq` finished. Idempotent.
    pub fn set_finished(&self, seq: usize) {
        let partition = self.partition(seq);
        let newly_finished = {
            let mut guard = partition.mu.lock().expect("chunk buffer partition lock");
            !std::mem::replace(&mut guard.finished, true)
        };
        if !newly_finished {
            return;
        }
        let finished = self.num_finished.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(
            "BalancedChunkBuffer set_finished: partition={} finished={}/{}",
            seq,
            finished,
            self.partitions.len()
        );
        if self.is_shared() {
            // Every partition's end-of-stream depends on the last producer.
            if finished == self.partitions.len() {
                for p in &self.partitions {
                    p.observable.notify_observers();
                }
            }
        } else {
            partition.observable.notify_observers();
        }
    }

    pub fn all_finished(&self) -> bool {
        self.num_finished.load(Ordering::Acquire) >= self.partitions.len()
    }

    /// No chunk is queued for `seq` and none can arrive any more.
    pub fn is_finished(&self, seq: usize) -> bool {
        // Load the finished count before looking at the queue: every push that
        // precedes the last `set_finished` is then visible under the lock.
        let all_finished = self.is_shared() && self.all_finished();
        let partition = self.partition(seq);
        let guard = partition.mu.lock().expect("chunk buffer partition lock");
        if !guard.queue.is_empty() {
            return false;
        }
        if guard.closed {
            return true;
        }
        if self.is_shared() {
            all_finished
        } else {
            guard.finished
        }
    }

    /// Detach the consumer of partition `seq`: drop its queued chunks and stop routing to it.
    /// Returns the number of discarded chunks.
    pub fn close_partition(&self, seq: usize) -> usize {
        let partition = self.partition(seq);
        let entries = {
            let mut guard = partition.mu.lock().expect("chunk buffer partition lock");
            guard.closed = true;
            std::mem::take(&mut guard.queue)
        };
        self.discard(partition, entries)
    }

    fn discard(&self, partition: &Partition, entries: VecDeque<BufferEntry>) -> usize {
        let discarded = entries.len();
        for entry in entries {
            self.mem_usage
                .fetch_sub(entry.chunk.estimated_bytes(), Ordering::AcqRel);
            partition.num_chunks.fetch_sub(1, Ordering::AcqRel);
            entry.token.release();
        }
        discarded
    }

    /// Discard every residual chunk and refuse further reservations. Idempotent.
    pub fn close(&self) -> usize {
        if self.closed.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let mut discarded = 0;
        for partition in &self.partitions {
            let entries = {
                let mut guard = partition.mu.lock().expect("chunk buffer partition lock");
                guard.closed = true;
                std::mem::take(&mut guard.queue)
            };
            discarded += self.discard(partition, entries);
        }
        if discarded > 0 {
            debug!("BalancedChunkBuffer closed: discarded_chunks={}", discarded);
        }
        discarded
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queued chunks of partition `seq`.
    pub fn size(&self, seq: usize) -> usize {
        self.partition(seq).num_chunks.load(Ordering::Acquire)
    }

    pub fn empty(&self, seq: usize) -> bool {
        self.size(seq) == 0
    }

    pub fn total_chunks(&self) -> usize {
        self.partitions
            .iter()
            .map(|p| p.num_chunks.load(Ordering::Acquire))
            .sum()
    }

    pub fn all_empty(&self) -> bool {
        self.total_chunks() == 0
    }

    /// Bytes held by queued chunks across all partitions.
    pub fn mem_usage(&self) -> usize {
        self.mem_usage.load(Ordering::Acquire)
    }

    pub fn observable(&self, seq: usize) -> Arc<Observable> {
        Arc::clone(&self.partition(seq).observable)
    }
}

impl std::fmt::Debug for BalancedChunkBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalancedChunkBuffer")
            .field("strategy", &self.strategy)
            .field("partitions", &self.partitions.len())
            .field("chunks", &self.total_chunks())
            .field("pinned", &self.limiter.size())
            .field("capacity", &self.limiter.capacity())
            .finish()
    }
}
