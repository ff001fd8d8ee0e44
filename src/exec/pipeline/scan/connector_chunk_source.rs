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
//! Chunk source reading one morsel through a connector data source.
//!
//! Responsibilities:
//! - Opens the connector `DataSource` for its morsel with the merged predicate list.
//! - Applies the scan row limit and residual predicates to every chunk it reads.
//! - Reserves buffer capacity before each read and pushes `(chunk, token)` into the shared buffer.
//! - Inserts its `(operator, source)` key into the active-input set with every pushed chunk
//!   and removes it when it stops.
//!
//! Key exported interfaces:
//! - Types: `ConnectorChunkSource`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::common::status::{ScanError, ScanResult};
use crate::connector::{BoxedDataSource, DataSourceProviderPtr};
use crate::exec::chunk::Chunk;
use crate::exec::expr::{PredicateRef, eval_conjuncts};
use crate::exec::node::connector_scan::ConnectorScanNode;
use crate::exec::pipeline::scan::active_inputs::{ActiveInputKey, ActiveInputSet};
use crate::exec::pipeline::scan::balanced_chunk_buffer::BalancedChunkBuffer;
use crate::exec::pipeline::scan::chunk_source::{ChunkSource, ChunkSourceStats, ChunkSourceStatus};
use crate::exec::pipeline::scan::morsel::Morsel;
use crate::novarocks_logging::{debug, warn};
use crate::runtime::profile::{CounterUnit, RuntimeProfile};
use crate::runtime::runtime_state::RuntimeState;

/// First failure of any chunk source of one operator, surfaced once by the operator.
pub(crate) type ErrorSlot = Arc<Mutex<Option<ScanError>>>;

pub(crate) fn record_error(slot: &ErrorSlot, err: &ScanError) {
    let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
    if guard.is_none() {
        *guard = Some(err.clone());
    }
}

/// Everything a chunk source borrows from its operator.
pub(crate) struct ChunkSourceContext {
    pub driver_sequence: i32,
    pub scan_node: Arc<ConnectorScanNode>,
    pub provider: DataSourceProviderPtr,
    pub buffer: Arc<BalancedChunkBuffer>,
    pub active_inputs: Arc<ActiveInputSet>,
    pub error_slot: ErrorSlot,
    pub yield_max_time: Duration,
}

#[derive(Default)]
struct ReadCounters {
    rows_read: AtomicU64,
    raw_rows_read: AtomicU64,
    bytes_read: AtomicU64,
    chunks_read: AtomicU64,
}

struct ReaderState {
    morsel: Option<Morsel>,
    data_source: Option<BoxedDataSource>,
    predicates: Vec<PredicateRef>,
    apply_predicates: bool,
    opened: bool,
    eos: bool,
}

pub struct ConnectorChunkSource {
    index: i32,
    ctx: ChunkSourceContext,
    detached: AtomicBool,
    finished: AtomicBool,
    closed: AtomicBool,
    counters: ReadCounters,
    reader: Mutex<ReaderState>,
    profile: RuntimeProfile,
}

impl ConnectorChunkSource {
    pub(crate) fn new(
        index: i32,
        morsel: Morsel,
        ctx: ChunkSourceContext,
        profile: RuntimeProfile,
    ) -> Self {
        profile.add_info_string("Morsel", morsel.describe());
        Self {
            index,
            ctx,
            detached: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            counters: ReadCounters::default(),
            reader: Mutex::new(ReaderState {
                morsel: Some(morsel),
                data_source: None,
                predicates: Vec::new(),
                apply_predicates: false,
                opened: false,
                eos: false,
            }),
            profile,
        }
    }

    pub fn key(&self) -> ActiveInputKey {
        (self.ctx.driver_sequence, self.index)
    }

    pub fn profile(&self) -> &RuntimeProfile {
        &self.profile
    }

    fn lock_reader(&self) -> MutexGuard<'_, ReaderState> {
        self.reader.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Conjuncts, runtime in-filters and the runtime bloom filters published so far.
    fn merged_predicates(&self) -> Vec<PredicateRef> {
        let node = &self.ctx.scan_node;
        let mut predicates = Vec::with_capacity(
            node.conjuncts().len()
                + node.runtime_in_filters().len()
                + node.runtime_filters().num_filters(),
        );
        predicates.extend(node.conjuncts().iter().cloned());
        predicates.extend(node.runtime_in_filters().iter().cloned());
        predicates.extend(node.runtime_filters().ready_predicates());
        predicates
    }

    fn prepare_locked(&self, reader: &mut ReaderState, state: &RuntimeState) -> ScanResult<()> {
        if reader.opened {
            return Ok(());
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(ScanError::InvalidArgument(format!(
                "chunk source {} prepared after close",
                self.index
            )));
        }
        let morsel = reader.morsel.take().ok_or_else(|| {
            ScanError::InvalidArgument(format!("chunk source {} has no morsel", self.index))
        })?;
        let mut data_source = self
            .ctx
            .provider
            .create_data_source(morsel)
            .map_err(ScanError::ConnectorOpenError)?;
        let predicates = self.merged_predicates();
        data_source.set_predicates(predicates.clone());
        reader.apply_predicates = !predicates.is_empty() && !data_source.applies_predicates();
        reader.predicates = predicates;
        let opened = data_source.open(state);
        // Keep the source even when open fails so close() still reaches it.
        reader.data_source = Some(data_source);
        opened.map_err(ScanError::ConnectorOpenError)?;
        reader.opened = true;
        debug!(
            "ConnectorChunkSource opened: operator={} source={} predicates={} residual={}",
            self.ctx.driver_sequence,
            self.index,
            reader.predicates.len(),
            reader.apply_predicates
        );
        Ok(())
    }

    /// Read the next non-empty chunk, honoring the scan row limit.
    fn read_chunk(
        &self,
        reader: &mut ReaderState,
        state: &RuntimeState,
    ) -> ScanResult<Option<Chunk>> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(None);
        }
        if state.is_cancelled() {
            return Err(ScanError::Cancelled(format!(
                "chunk source {} of operator {}",
                self.index, self.ctx.driver_sequence
            )));
        }
        if !reader.opened {
            self.prepare_locked(reader, state)?;
        }
        if reader.eos {
            return Ok(None);
        }

        let _timer = self.profile.scoped_timer("IOTaskExecTime");
        let limit = self.ctx.scan_node.limit();
        loop {
            let rows_read = self.counters.rows_read.load(Ordering::Acquire);
            if self.ctx.scan_node.has_limit() && rows_read >= limit as u64 {
                reader.eos = true;
                return Ok(None);
            }
            let Some(data_source) = reader.data_source.as_mut() else {
                reader.eos = true;
                return Ok(None);
            };
            let next = data_source
                .get_next(state)
                .map_err(ScanError::ConnectorReadError)?;
            self.sync_source_counters(data_source.raw_rows_read(), data_source.num_bytes_read());
            let Some(mut chunk) = next else {
                reader.eos = true;
                return Ok(None);
            };
            if chunk.is_empty() {
                continue;
            }
            if reader.apply_predicates {
                chunk = eval_conjuncts(&reader.predicates, chunk)
                    .map_err(ScanError::ConnectorReadError)?;
                if chunk.is_empty() {
                    continue;
                }
            }
            if self.ctx.scan_node.has_limit() {
                let remaining = (limit as u64 - rows_read) as usize;
                if chunk.len() > remaining {
                    chunk = chunk.slice(0, remaining);
                }
            }
            let rows = chunk.len() as u64;
            self.counters.rows_read.fetch_add(rows, Ordering::AcqRel);
            self.counters.chunks_read.fetch_add(1, Ordering::AcqRel);
            self.profile
                .counter_add("RowsRead", CounterUnit::Unit, rows as i64);
            self.profile.counter_add("ChunksRead", CounterUnit::Unit, 1);
            return Ok(Some(chunk));
        }
    }

    fn sync_source_counters(&self, raw_rows_read: u64, bytes_read: u64) {
        self.counters
            .raw_rows_read
            .store(raw_rows_read, Ordering::Release);
        self.counters.bytes_read.store(bytes_read, Ordering::Release);
        self.profile
            .counter_set("RawRowsRead", CounterUnit::Unit, raw_rows_read as i64);
        self.profile
            .counter_set("BytesRead", CounterUnit::Bytes, bytes_read as i64);
    }

    fn release_data_source(&self, reader: &mut ReaderState, state: &RuntimeState) {
        reader.morsel = None;
        if let Some(mut data_source) = reader.data_source.take() {
            self.sync_source_counters(data_source.raw_rows_read(), data_source.num_bytes_read());
            data_source.close(state);
        }
    }

    fn finish_locked(&self, reader: &mut ReaderState, state: &RuntimeState) {
        reader.eos = true;
        if !self.finished.swap(true, Ordering::AcqRel) {
            debug!(
                "ConnectorChunkSource finished: operator={} source={} rows_read={} chunks_read={} detached={}",
                self.ctx.driver_sequence,
                self.index,
                self.counters.rows_read.load(Ordering::Acquire),
                self.counters.chunks_read.load(Ordering::Acquire),
                self.is_detached()
            );
        }
        self.release_data_source(reader, state);
        self.ctx.active_inputs.erase(&self.key());
    }

    fn close_locked(&self, reader: &mut ReaderState, state: &RuntimeState) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        reader.eos = true;
        self.finished.store(true, Ordering::Release);
        self.release_data_source(reader, state);
        self.ctx.active_inputs.erase(&self.key());
        debug!(
            "ConnectorChunkSource closed: operator={} source={} rows_read={}",
            self.ctx.driver_sequence,
            self.index,
            self.counters.rows_read.load(Ordering::Acquire)
        );
    }

    /// Close the source and report `err` to its operator and the fragment.
    fn fail_locked(
        &self,
        reader: &mut ReaderState,
        state: &RuntimeState,
        err: ScanError,
    ) -> ScanError {
        self.close_locked(reader, state);
        if matches!(err, ScanError::Cancelled(_)) {
            debug!(
                "ConnectorChunkSource cancelled: operator={} source={}",
                self.ctx.driver_sequence, self.index
            );
            return err;
        }
        warn!(
            "ConnectorChunkSource failed: plan_node_id={} operator={} source={} error={}",
            self.ctx.scan_node.node_id(),
            self.ctx.driver_sequence,
            self.index,
            err
        );
        record_error(&self.ctx.error_slot, &err);
        state.set_error(err.to_string());
        err
    }
}

impl ChunkSource for ConnectorChunkSource {
    fn index(&self) -> i32 {
        self.index
    }

    fn prepare(&self, state: &RuntimeState) -> ScanResult<()> {
        let mut reader = self.lock_reader();
        match self.prepare_locked(&mut reader, state) {
            Ok(()) => Ok(()),
            Err(err @ ScanError::InvalidArgument(_)) => Err(err),
            Err(err) => Err(self.fail_locked(&mut reader, state, err)),
        }
    }

    fn buffer_next_batch_chunks(
        &self,
        state: &RuntimeState,
        batch_size: usize,
    ) -> ScanResult<ChunkSourceStatus> {
        if self.is_finished() {
            return Ok(ChunkSourceStatus::EndOfStream);
        }
        let mut reader = self.lock_reader();
        // close() may have won the lock while we waited.
        if self.is_finished() {
            return Ok(ChunkSourceStatus::EndOfStream);
        }

        let start = Instant::now();
        for _ in 0..batch_size.max(1) {
            if self.is_detached() {
                self.finish_locked(&mut reader, state);
                return Ok(ChunkSourceStatus::EndOfStream);
            }
            let Some(token) = self.ctx.buffer.try_reserve(1) else {
                // A closed buffer never frees a slot again.
                if self.ctx.buffer.is_closed() {
                    self.finish_locked(&mut reader, state);
                    return Ok(ChunkSourceStatus::EndOfStream);
                }
                return Ok(ChunkSourceStatus::BufferFull);
            };
            match self.read_chunk(&mut reader, state) {
                Ok(Some(chunk)) => {
                    self.ctx.buffer.update_limiter(&chunk, state.chunk_size());
                    let pushed = self
                        .ctx
                        .buffer
                        .push(self.ctx.driver_sequence as usize, chunk, token);
                    if pushed.is_some() {
                        let key = self.key();
                        self.ctx.active_inputs.insert(key);
                        // detach() erases after setting the flag; re-check to avoid a stale key.
                        if self.is_detached() {
                            self.ctx.active_inputs.erase(&key);
                        }
                    }
                }
                Ok(None) => {
                    token.release();
                    self.finish_locked(&mut reader, state);
                    return Ok(ChunkSourceStatus::EndOfStream);
                }
                Err(err) => {
                    token.release();
                    return Err(self.fail_locked(&mut reader, state, err));
                }
            }
            if start.elapsed() >= self.ctx.yield_max_time {
                return Ok(ChunkSourceStatus::HasMore);
            }
        }
        Ok(ChunkSourceStatus::HasMore)
    }

    fn detach(&self) {
        if !self.detached.swap(true, Ordering::AcqRel) {
            debug!(
                "ConnectorChunkSource detached: operator={} source={}",
                self.ctx.driver_sequence, self.index
            );
        }
    }

    fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn close(&self, state: &RuntimeState) {
        if self.is_closed() {
            return;
        }
        // Stop a concurrent read step at its next chunk boundary before taking the lock.
        self.detached.store(true, Ordering::Release);
        let mut reader = self.lock_reader();
        self.close_locked(&mut reader, state);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn stats(&self) -> ChunkSourceStats {
        ChunkSourceStats {
            rows_read: self.counters.rows_read.load(Ordering::Acquire),
            raw_rows_read: self.counters.raw_rows_read.load(Ordering::Acquire),
            bytes_read: self.counters.bytes_read.load(Ordering::Acquire),
            chunks_read: self.counters.chunks_read.load(Ordering::Acquire),
        }
    }
}

impl std::fmt::Debug for ConnectorChunkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorChunkSource")
            .field("operator", &self.ctx.driver_sequence)
            .field("index", &self.index)
            .field("detached", &self.is_detached())
            .field("finished", &self.is_finished())
            .field("closed", &self.is_closed())
            .finish()
    }
}
