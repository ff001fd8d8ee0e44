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
use crate::common::app_config::{ScanRuntimeConfig, config as app_config};
use crate::exec::pipeline::scan::balanced_chunk_buffer::BalanceStrategy;

fn scan_config() -> Option<&'static ScanRuntimeConfig> {
    app_config().ok().map(|c| &c.scan)
}

pub(crate) fn chunk_size() -> usize {
    scan_config().map(|c| c.chunk_size).unwrap_or(4096)
}

pub(crate) fn scan_buffer_max_chunks_per_driver() -> usize {
    scan_config()
        .map(|c| c.buffer_max_chunks_per_driver)
        .unwrap_or(64)
}

pub(crate) fn scan_buffer_default_chunks_per_driver() -> usize {
    scan_config()
        .map(|c| c.buffer_default_chunks_per_driver)
        .unwrap_or(8)
}

pub(crate) fn scan_buffer_mem_limit_per_driver() -> usize {
    scan_config()
        .map(|c| c.buffer_mem_limit_per_driver)
        .unwrap_or(128 * 1024 * 1024)
}

pub(crate) fn scan_buffer_balance() -> BalanceStrategy {
    scan_config()
        .map(|c| c.buffer_balance)
        .unwrap_or(BalanceStrategy::RoundRobin)
}

pub(crate) fn scan_dynamic_buffer_limiter() -> bool {
    scan_config()
        .map(|c| c.dynamic_buffer_limiter)
        .unwrap_or(true)
}

pub(crate) fn scan_batch_chunks_per_read() -> usize {
    scan_config().map(|c| c.batch_chunks_per_read).unwrap_or(16)
}

pub(crate) fn scan_yield_max_time_ms() -> u64 {
    scan_config().map(|c| c.yield_max_time_ms).unwrap_or(100)
}

pub(crate) fn active_input_shard_bits() -> u32 {
    scan_config().map(|c| c.active_input_shard_bits).unwrap_or(4)
}
