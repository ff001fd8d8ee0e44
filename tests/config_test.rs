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
//! Integration tests for TOML config loading and the logging bootstrap.

use crate::common::TestConfig;
use novarocks_scan::exec::pipeline::scan::balanced_chunk_buffer::BalanceStrategy;
use novarocks_scan::novarocks_config::{self, ScanAppConfig};
use novarocks_scan::{ChunkBufferOptions, novarocks_logging};

mod common;

#[test]
fn test_load_scan_section_from_file() -> anyhow::Result<()> {
    let cfg = TestConfig::new()?;
    let parsed = ScanAppConfig::load_from_file(&cfg.config_path)?;
    assert_eq!(parsed.log_level, "debug");
    assert_eq!(parsed.scan.chunk_size, 1024);
    assert_eq!(parsed.scan.buffer_max_chunks_per_driver, 16);
    assert_eq!(parsed.scan.buffer_default_chunks_per_driver, 4);
    assert_eq!(parsed.scan.buffer_balance, BalanceStrategy::RoundRobin);
    assert_eq!(parsed.scan.yield_max_time_ms, 50);
    assert!(parsed.scan.dynamic_buffer_limiter);
    Ok(())
}

#[test]
fn test_unknown_balance_strategy_is_rejected() -> anyhow::Result<()> {
    let cfg = TestConfig::with_content("[scan]\nbuffer_balance = \"largest_backlog\"\n")?;
    let err = ScanAppConfig::load_from_file(&cfg.config_path).expect_err("bad balance");
    assert!(format!("{err:#}").contains("largest_backlog"));
    Ok(())
}

#[test]
fn test_missing_file_reports_path() {
    let err = ScanAppConfig::load_from_file(std::path::Path::new("/nonexistent/novarocks.toml"))
        .expect_err("missing file");
    assert!(err.to_string().contains("/nonexistent/novarocks.toml"));
}

#[test]
fn test_process_config_drives_buffer_options() -> anyhow::Result<()> {
    let cfg = TestConfig::new()?;
    cfg.init_logging();
    novarocks_logging::info!("config test logging initialized");
    let loaded = cfg.load_config()?;
    assert_eq!(loaded.scan.batch_chunks_per_read, 8);
    // The first loaded config wins for the rest of the process.
    assert!(std::ptr::eq(loaded, novarocks_config::config()?));

    let options = ChunkBufferOptions::from_config();
    assert_eq!(options.max_chunks_per_driver, 16);
    assert_eq!(options.default_chunks_per_driver, 4);
    assert_eq!(options.batch_chunks_per_read, 8);
    assert_eq!(options.active_input_shard_bits, 3);
    assert_eq!(options.yield_max_time.as_millis(), 50);
    assert_eq!(options.fixed_capacity, None);
    Ok(())
}
