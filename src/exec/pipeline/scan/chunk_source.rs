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
//! Chunk source contract driven by the external I/O scheduler.
//!
//! Responsibilities:
//! - Defines the per-morsel reader lifecycle `prepare -> buffer_next_batch_chunks* -> close`.
//! - Reports whether a read step made progress, hit backpressure or reached end of stream.
//!
//! Key exported interfaces:
//! - Types: `ChunkSource`, `ChunkSourcePtr`, `ChunkSourceStatus`, `ChunkSourceStats`.

use std::sync::Arc;

use crate::common::status::ScanResult;
use crate::runtime::runtime_state::RuntimeState;

/// Outcome of one `buffer_next_batch_chunks` step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkSourceStatus {
    /// The step yielded with data left to read.
    HasMore,
    /// No buffer slot could be reserved; retry once consumers drain the buffer.
    BufferFull,
    /// The source will not produce any more chunks.
    EndOfStream,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkSourceStats {
    pub rows_read: u64,
    pub raw_rows_read: u64,
    pub bytes_read: u64,
    pub chunks_read: u64,
}

pub trait ChunkSource: Send + Sync {
    fn index(&self) -> i32;

    /// Build and open the underlying data source. Idempotent.
    fn prepare(&self, state: &RuntimeState) -> ScanResult<()>;

    /// Read up to `batch_size` chunks into the shared buffer.
    fn buffer_next_batch_chunks(
        &self,
        state: &RuntimeState,
        batch_size: usize,
    ) -> ScanResult<ChunkSourceStatus>;

    /// Ask the source to stop after its in-flight chunk.
    fn detach(&self);

    fn is_detached(&self) -> bool;

    /// End of stream reached or closed.
    fn is_finished(&self) -> bool;

    /// Terminal and idempotent.
    fn close(&self, state: &RuntimeState);

    fn is_closed(&self) -> bool;

    fn stats(&self) -> ChunkSourceStats;
}

pub type ChunkSourcePtr = Arc<dyn ChunkSource>;
