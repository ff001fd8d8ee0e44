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
//! Core operator traits.
//!
//! Responsibilities:
//! - Defines the lifecycle contract drivers use for every operator instance.
//! - Defines the pull contract of source operators, which never block.
//!
//! Key exported interfaces:
//! - Types: `Operator`, `SourceOperator`.

use std::sync::Arc;

use crate::common::status::ScanResult;
use crate::exec::chunk::Chunk;
use crate::exec::pipeline::schedule::observer::Observable;
use crate::runtime::runtime_state::RuntimeState;

/// Base operator contract.
pub trait Operator: Send {
    fn name(&self) -> &str;

    fn prepare(&mut self, _state: &RuntimeState) -> ScanResult<()> {
        Ok(())
    }

    /// Must be idempotent.
    fn close(&mut self, _state: &RuntimeState) -> ScanResult<()> {
        Ok(())
    }

    fn is_finished(&self) -> bool {
        false
    }

    fn as_source_mut(&mut self) -> Option<&mut dyn SourceOperator> {
        None
    }
}

/// Operator at the head of a pipeline.
pub trait SourceOperator: Operator {
    fn has_output(&self) -> bool;

    /// Next chunk if one is ready. `Ok(None)` means "nothing now"; check `is_finished`.
    fn pull_chunk(&mut self, state: &RuntimeState) -> ScanResult<Option<Chunk>>;

    /// Observable for source-side readiness (has_output becomes true).
    fn source_observable(&self) -> Option<Arc<Observable>> {
        None
    }
}
