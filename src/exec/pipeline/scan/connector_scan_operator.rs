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
//! Connector scan operator and its factory.
//!
//! Responsibilities:
//! - The factory resolves the connector and builds the state shared by all DOP instances:
//!   the data source provider, the balanced chunk buffer and the active-input set.
//! - Each operator owns the chunk sources created for its morsels and pulls chunks from
//!   its own buffer partition without blocking.
//!
//! Key exported interfaces:
//! - Types: `ConnectorScanOperatorFactory`, `ConnectorScanOperator`, `ChunkBufferOptions`, `ChunkPoll`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use crate::common::config;
use crate::common::status::{ScanError, ScanResult};
use crate::connector::{ConnectorRegistry, ConnectorType, DataSourceProviderPtr};
use crate::exec::chunk::Chunk;
use crate::exec::node::connector_scan::ConnectorScanNode;
use crate::exec::pipeline::operator::{Operator, SourceOperator};
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::exec::pipeline::scan::active_inputs::ActiveInputSet;
use crate::exec::pipeline::scan::balanced_chunk_buffer::{BalanceStrategy, BalancedChunkBuffer};
use crate::exec::pipeline::scan::chunk_buffer_limiter::{
    ChunkBufferLimiterPtr, ChunkBufferToken, DynamicChunkBufferLimiter, FixedChunkBufferLimiter,
};
use crate::exec::pipeline::scan::chunk_source::{ChunkSource, ChunkSourcePtr};
use crate::exec::pipeline::scan::connector_chunk_source::{
    ChunkSourceContext, ConnectorChunkSource, ErrorSlot,
};
use crate::exec::pipeline::scan::morsel::Morsel;
use crate::exec::pipeline::schedule::observer::Observable;
use crate::novarocks_logging::{debug, warn};
use crate::runtime::profile::{CounterUnit, RuntimeProfile};
use crate::runtime::runtime_state::RuntimeState;

/// Buffer sizing and scheduling knobs of one scan node.
#[derive(Clone, Debug)]
pub struct ChunkBufferOptions {
    pub max_chunks_per_driver: usize,
    pub default_chunks_per_driver: usize,
    pub mem_limit_per_driver: usize,
    pub balance: BalanceStrategy,
    pub dynamic_limiter: bool,
    /// Total buffer capacity regardless of DOP; selects a fixed limiter.
    pub fixed_capacity: Option<usize>,
    pub batch_chunks_per_read: usize,
    pub yield_max_time: Duration,
    pub active_input_shard_bits: u32,
}

impl ChunkBufferOptions {
    pub fn from_config() -> Self {
        Self {
            max_chunks_per_driver: config::scan_buffer_max_chunks_per_driver(),
            default_chunks_per_driver: config::scan_buffer_default_chunks_per_driver(),
            mem_limit_per_driver: config::scan_buffer_mem_limit_per_driver(),
            balance: config::scan_buffer_balance(),
            dynamic_limiter: config::scan_dynamic_buffer_limiter(),
            fixed_capacity: None,
            batch_chunks_per_read: config::scan_batch_chunks_per_read(),
            yield_max_time: Duration::from_millis(config::scan_yield_max_time_ms()),
            active_input_shard_bits: config::active_input_shard_bits(),
        }
    }

    pub fn with_fixed_capacity(mut self, capacity: usize) -> Self {
        self.fixed_capacity = Some(capacity);
        self
    }

    pub fn with_balance(mut self, balance: BalanceStrategy) -> Self {
        self.balance = balance;
        self
    }

    fn build_limiter(&self, dop: usize) -> ChunkBufferLimiterPtr {
        if let Some(capacity) = self.fixed_capacity {
            return FixedChunkBufferLimiter::new(capacity);
        }
        let max_capacity = self.max_chunks_per_driver.saturating_mul(dop);
        if self.dynamic_limiter {
            return DynamicChunkBufferLimiter::new(
                max_capacity,
                self.default_chunks_per_driver.saturating_mul(dop),
                self.mem_limit_per_driver.saturating_mul(dop),
            );
        }
        FixedChunkBufferLimiter::new(max_capacity)
    }
}

impl Default for ChunkBufferOptions {
    fn default() -> Self {
        Self::from_config()
    }
}

/// Result of a non-blocking pull from an operator's buffer partition.
#[derive(Debug)]
pub enum ChunkPoll {
    Chunk(Chunk),
    /// Nothing buffered yet; reschedule once the source observable fires.
    Pending,
    Finished,
}

struct SharedScanState {
    provider: DataSourceProviderPtr,
    buffer: Arc<BalancedChunkBuffer>,
    active_inputs: Arc<ActiveInputSet>,
}

pub struct ConnectorScanOperatorFactory {
    name: String,
    dop: i32,
    scan_node: Arc<ConnectorScanNode>,
    registry: Arc<ConnectorRegistry>,
    options: ChunkBufferOptions,
    shared: OnceLock<SharedScanState>,
    prepare_lock: Mutex<()>,
    closed: AtomicBool,
    profile: RuntimeProfile,
}

impl ConnectorScanOperatorFactory {
    pub fn new(scan_node: ConnectorScanNode, dop: i32, registry: Arc<ConnectorRegistry>) -> Self {
        let name = format!("CONNECTOR_SCAN (plan_node_id={})", scan_node.node_id());
        let profile = RuntimeProfile::new(name.clone());
        Self {
            name,
            dop,
            scan_node: Arc::new(scan_node),
            registry,
            options: ChunkBufferOptions::from_config(),
            shared: OnceLock::new(),
            prepare_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            profile,
        }
    }

    pub fn with_options(mut self, options: ChunkBufferOptions) -> Self {
        self.options = options;
        self
    }

    pub fn dop(&self) -> i32 {
        self.dop
    }

    pub fn plan_node_id(&self) -> i32 {
        self.scan_node.node_id()
    }

    pub fn connector_type(&self) -> ConnectorType {
        self.scan_node.connector_type()
    }

    pub fn scan_node(&self) -> &ConnectorScanNode {
        &self.scan_node
    }

    pub fn options(&self) -> &ChunkBufferOptions {
        &self.options
    }

    pub fn profile(&self) -> &RuntimeProfile {
        &self.profile
    }

    pub fn is_prepared(&self) -> bool {
        self.shared.get().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn chunk_buffer(&self) -> Option<&Arc<BalancedChunkBuffer>> {
        self.shared.get().map(|s| &s.buffer)
    }

    pub fn active_inputs(&self) -> Option<&Arc<ActiveInputSet>> {
        self.shared.get().map(|s| &s.active_inputs)
    }

    pub fn prepare(&self, state: &RuntimeState) -> ScanResult<()> {
        if self.is_closed() {
            return Err(ScanError::InvalidArgument(format!(
                "{} prepared after close",
                self.name
            )));
        }
        if self.is_prepared() {
            return Ok(());
        }
        let _guard = self.prepare_lock.lock().expect("scan factory prepare lock");
        if self.is_prepared() {
            return Ok(());
        }
        if self.dop <= 0 {
            return Err(ScanError::InvalidArgument(format!(
                "{} has invalid dop {}",
                self.name, self.dop
            )));
        }
        let provider = self
            .registry
            .create_data_source_provider(&self.scan_node)
            .map_err(ScanError::ConfigError)?;
        let dop = self.dop as usize;
        let limiter = self.options.build_limiter(dop);
        let buffer = Arc::new(BalancedChunkBuffer::new(
            self.options.balance,
            dop,
            Arc::clone(&limiter),
        ));
        let active_inputs = Arc::new(ActiveInputSet::new(self.options.active_input_shard_bits));
        debug!(
            "{} prepared: connector={} dop={} balance={:?} capacity={} default_capacity={} limit={} chunk_size={}",
            self.name,
            self.scan_node.connector_type(),
            self.dop,
            self.options.balance,
            limiter.capacity(),
            limiter.default_capacity(),
            self.scan_node.limit(),
            state.chunk_size()
        );
        self.profile
            .add_info_string("ConnectorType", self.scan_node.connector_type().name());
        let _ = self.shared.set(SharedScanState {
            provider,
            buffer,
            active_inputs,
        });
        Ok(())
    }

    pub fn create_operator(&self, dop: i32, driver_sequence: i32) -> ScanResult<ConnectorScanOperator> {
        if dop != self.dop {
            return Err(ScanError::InvalidArgument(format!(
                "{} created with dop {} but planned with dop {}",
                self.name, dop, self.dop
            )));
        }
        if driver_sequence < 0 || driver_sequence >= dop {
            return Err(ScanError::InvalidArgument(format!(
                "{} driver sequence {} out of range [0, {})",
                self.name, driver_sequence, dop
            )));
        }
        if self.is_closed() {
            return Err(ScanError::InvalidArgument(format!(
                "{} used after close",
                self.name
            )));
        }
        let Some(shared) = self.shared.get() else {
            return Err(ScanError::InvalidArgument(format!(
                "{} used before prepare",
                self.name
            )));
        };
        let name = format!("{} (driver_sequence={})", self.name, driver_sequence);
        let profile = self.profile.child(format!("Operator{}", driver_sequence));
        Ok(ConnectorScanOperator {
            name,
            driver_sequence,
            scan_node: Arc::clone(&self.scan_node),
            provider: Arc::clone(&shared.provider),
            buffer: Arc::clone(&shared.buffer),
            active_inputs: Arc::clone(&shared.active_inputs),
            yield_max_time: self.options.yield_max_time,
            batch_chunks_per_read: self.options.batch_chunks_per_read.max(1),
            chunk_sources: BTreeMap::new(),
            attached: BTreeSet::new(),
            error_slot: Arc::new(Mutex::new(None)),
            profile,
            prepared: false,
            closed: false,
        })
    }

    /// Discard residual chunks and drop the active-input index. Idempotent.
    pub fn close(&self, _state: &RuntimeState) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(shared) = self.shared.get() else {
            return;
        };
        let discarded = shared.buffer.close();
        shared.active_inputs.clear();
        let limiter = shared.buffer.limiter();
        self.profile.counter_set(
            "ChunkBufferCapacity",
            CounterUnit::Unit,
            limiter.capacity() as i64,
        );
        self.profile.counter_set(
            "DefaultChunkBufferCapacity",
            CounterUnit::Unit,
            limiter.default_capacity() as i64,
        );
        self.profile.counter_set(
            "PeakChunkBufferSize",
            CounterUnit::Unit,
            limiter.peak_size() as i64,
        );
        debug!(
            "{} closed: discarded_chunks={} peak_buffer_size={}",
            self.name,
            discarded,
            limiter.peak_size()
        );
    }
}

impl OperatorFactory for ConnectorScanOperatorFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, state: &RuntimeState) -> ScanResult<()> {
        ConnectorScanOperatorFactory::prepare(self, state)
    }

    fn create(&self, dop: i32, driver_sequence: i32) -> ScanResult<Box<dyn Operator>> {
        Ok(Box::new(self.create_operator(dop, driver_sequence)?))
    }

    fn close(&self, state: &RuntimeState) {
        ConnectorScanOperatorFactory::close(self, state)
    }

    fn is_source(&self) -> bool {
        true
    }
}

pub struct ConnectorScanOperator {
    name: String,
    driver_sequence: i32,
    scan_node: Arc<ConnectorScanNode>,
    provider: DataSourceProviderPtr,
    buffer: Arc<BalancedChunkBuffer>,
    active_inputs: Arc<ActiveInputSet>,
    yield_max_time: Duration,
    batch_chunks_per_read: usize,
    chunk_sources: BTreeMap<i32, Arc<ConnectorChunkSource>>,
    attached: BTreeSet<i32>,
    error_slot: ErrorSlot,
    profile: RuntimeProfile,
    prepared: bool,
    closed: bool,
}

impl ConnectorScanOperator {
    pub fn driver_sequence(&self) -> i32 {
        self.driver_sequence
    }

    pub fn connector_type(&self) -> ConnectorType {
        self.scan_node.connector_type()
    }

    pub fn profile(&self) -> &RuntimeProfile {
        &self.profile
    }

    /// Chunks the scheduler should ask a source for per read step.
    pub fn io_batch_size(&self) -> usize {
        self.batch_chunks_per_read
    }

    fn partition(&self) -> usize {
        self.driver_sequence as usize
    }

    fn validate_predicates(&self) -> Result<(), String> {
        for pred in self.scan_node.conjuncts() {
            pred.prepare()
                .map_err(|e| format!("conjunct {} is invalid: {}", pred.name(), e))?;
        }
        for pred in self.scan_node.runtime_in_filters() {
            pred.prepare()
                .map_err(|e| format!("runtime in-filter {} is invalid: {}", pred.name(), e))?;
        }
        self.scan_node.runtime_filters().validate()
    }

    /// Build the chunk source reading `morsel`. The source is not attached yet.
    pub fn create_chunk_source(
        &mut self,
        morsel: Option<Morsel>,
        source_index: i32,
    ) -> ScanResult<ChunkSourcePtr> {
        if self.closed {
            return Err(ScanError::InvalidArgument(format!(
                "{} creates chunk source {} after close",
                self.name, source_index
            )));
        }
        let Some(morsel) = morsel else {
            return Err(ScanError::InvalidArgument(format!(
                "{} chunk source {} created without a morsel",
                self.name, source_index
            )));
        };
        if morsel.plan_node_id() != self.scan_node.node_id() {
            return Err(ScanError::InvalidArgument(format!(
                "{} got a morsel planned for node {}",
                self.name,
                morsel.plan_node_id()
            )));
        }
        if self.chunk_sources.contains_key(&source_index) {
            return Err(ScanError::InvalidArgument(format!(
                "{} chunk source index {} already in use",
                self.name, source_index
            )));
        }
        let ctx = ChunkSourceContext {
            driver_sequence: self.driver_sequence,
            scan_node: Arc::clone(&self.scan_node),
            provider: Arc::clone(&self.provider),
            buffer: Arc::clone(&self.buffer),
            active_inputs: Arc::clone(&self.active_inputs),
            error_slot: Arc::clone(&self.error_slot),
            yield_max_time: self.yield_max_time,
        };
        let profile = self.profile.child(format!("ChunkSource{}", source_index));
        let source = Arc::new(ConnectorChunkSource::new(source_index, morsel, ctx, profile));
        self.chunk_sources.insert(source_index, Arc::clone(&source));
        Ok(source)
    }

    pub fn chunk_source(&self, source_index: i32) -> Option<ChunkSourcePtr> {
        self.chunk_sources
            .get(&source_index)
            .map(|s| Arc::clone(s) as ChunkSourcePtr)
    }

    /// Track the source as in flight. Its active key appears with its first pushed chunk.
    pub fn attach_chunk_source(&mut self, source_index: i32) -> ScanResult<()> {
        if !self.chunk_sources.contains_key(&source_index) {
            return Err(ScanError::InvalidArgument(format!(
                "{} attaches unknown chunk source {}",
                self.name, source_index
            )));
        }
        self.attached.insert(source_index);
        Ok(())
    }

    /// Ask the source to stop after its in-flight chunk and drop its active key.
    pub fn detach_chunk_source(&mut self, source_index: i32) -> ScanResult<()> {
        let Some(source) = self.chunk_sources.get(&source_index) else {
            return Err(ScanError::InvalidArgument(format!(
                "{} detaches unknown chunk source {}",
                self.name, source_index
            )));
        };
        source.detach();
        self.active_inputs
            .erase(&(self.driver_sequence, source_index));
        self.attached.remove(&source_index);
        Ok(())
    }

    pub fn num_attached_chunk_sources(&self) -> usize {
        self.attached.len()
    }

    /// Attached sources that may still produce chunks.
    pub fn has_running_chunk_sources(&self) -> bool {
        self.attached.iter().any(|idx| {
            self.chunk_sources
                .get(idx)
                .is_some_and(|s| !s.is_finished())
        })
    }

    pub fn has_shared_chunk_source(&self) -> bool {
        self.buffer.is_shared()
    }

    /// Non-blocking pull from this operator's partition; the chunk's token is released.
    ///
    /// Draining the partition erases this operator's active keys; a source
    /// re-inserts its key with its next pushed chunk.
    pub fn get_chunk_from_buffer(&mut self) -> ScanResult<ChunkPoll> {
        let pending_error = self
            .error_slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(err) = pending_error {
            return Err(err);
        }
        if let Some(chunk) = self.buffer.try_get(self.partition()) {
            if self.buffer.empty(self.partition()) {
                self.active_inputs.erase_operator(self.driver_sequence);
            }
            self.profile
                .counter_add("PulledRows", CounterUnit::Unit, chunk.len() as i64);
            return Ok(ChunkPoll::Chunk(chunk));
        }
        if self.buffer.is_finished(self.partition()) {
            Ok(ChunkPoll::Finished)
        } else {
            Ok(ChunkPoll::Pending)
        }
    }

    /// Reserve `num_chunks` buffer slots; `None` when the buffer is full.
    pub fn pin_chunk(&self, num_chunks: usize) -> Option<ChunkBufferToken> {
        self.buffer.try_reserve(num_chunks)
    }

    pub fn is_buffer_full(&self) -> bool {
        self.buffer.limiter().is_full()
    }

    /// Pinned slots across all partitions.
    pub fn buffer_size(&self) -> usize {
        self.buffer.limiter().size()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.limiter().capacity()
    }

    pub fn default_buffer_capacity(&self) -> usize {
        self.buffer.limiter().default_capacity()
    }

    /// Chunks waiting in this operator's partition.
    pub fn num_buffered_chunks(&self) -> usize {
        self.buffer.size(self.partition())
    }

    pub fn buffer_mem_usage(&self) -> usize {
        self.buffer.mem_usage()
    }

    pub fn set_buffer_finished(&self) {
        self.buffer.set_finished(self.partition());
    }

    pub fn source_observable(&self) -> Arc<Observable> {
        self.buffer.observable(self.partition())
    }
}

impl Operator for ConnectorScanOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _state: &RuntimeState) -> ScanResult<()> {
        if self.prepared {
            return Ok(());
        }
        self.validate_predicates().map_err(|e| {
            warn!("{} prepare failed: {}", self.name, e);
            ScanError::PrepareError(e)
        })?;
        self.profile
            .add_info_string("ConnectorType", self.connector_type().name());
        self.profile.add_info_string(
            "SharedChunkSource",
            self.has_shared_chunk_source().to_string(),
        );
        self.prepared = true;
        Ok(())
    }

    fn close(&mut self, state: &RuntimeState) -> ScanResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        for source in self.chunk_sources.values() {
            source.detach();
            source.close(state);
        }
        self.attached.clear();
        self.active_inputs.erase_operator(self.driver_sequence);
        self.buffer.set_finished(self.partition());
        let discarded = self.buffer.close_partition(self.partition());
        self.profile.counter_set(
            "ChunkSources",
            CounterUnit::Unit,
            self.chunk_sources.len() as i64,
        );
        debug!(
            "{} closed: chunk_sources={} discarded_chunks={}",
            self.name,
            self.chunk_sources.len(),
            discarded
        );
        self.chunk_sources.clear();
        Ok(())
    }

    fn is_finished(&self) -> bool {
        if self.closed {
            return true;
        }
        let has_error = self
            .error_slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some();
        !has_error && self.buffer.is_finished(self.partition())
    }

    fn as_source_mut(&mut self) -> Option<&mut dyn SourceOperator> {
        Some(self)
    }
}

impl SourceOperator for ConnectorScanOperator {
    fn has_output(&self) -> bool {
        !self.buffer.empty(self.partition())
    }

    fn pull_chunk(&mut self, _state: &RuntimeState) -> ScanResult<Option<Chunk>> {
        match self.get_chunk_from_buffer()? {
            ChunkPoll::Chunk(chunk) => Ok(Some(chunk)),
            ChunkPoll::Pending | ChunkPoll::Finished => Ok(None),
        }
    }

    fn source_observable(&self) -> Option<Arc<Observable>> {
        Some(ConnectorScanOperator::source_observable(self))
    }
}

impl Drop for ConnectorScanOperator {
    fn drop(&mut self) {
        if !self.closed && !self.chunk_sources.is_empty() {
            warn!(
                "{} dropped without close: chunk_sources={}",
                self.name,
                self.chunk_sources.len()
            );
        }
    }
}
