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
//! TOML application config for the scan stage.
//!
//! Responsibilities:
//! - Loads `novarocks.toml` (or `$NOVAROCKS_CONFIG`) once per process.
//! - Declares the `[scan]` tuning knobs with their defaults.
//!
//! Key exported interfaces:
//! - Types: `ScanAppConfig`, `ScanRuntimeConfig`.
//! - Functions: `init_from_path`, `init_from_env_or_default`, `config`.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::exec::pipeline::scan::balanced_chunk_buffer::BalanceStrategy;

static CONFIG: OnceLock<ScanAppConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static ScanAppConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = ScanAppConfig::load_from_file(path.as_ref())?;
    let _ = CONFIG.set(cfg);
    CONFIG
        .get()
        .ok_or_else(|| anyhow!("scan config was not initialized"))
}

pub fn init_from_env_or_default() -> Result<&'static ScanAppConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    init_from_path(path)
}

pub fn config() -> Result<&'static ScanAppConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("NOVAROCKS_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }
    let default_path = PathBuf::from("novarocks.toml");
    if default_path.exists() {
        return Ok(default_path);
    }
    Err(anyhow!(
        "missing config file: set $NOVAROCKS_CONFIG or create ./novarocks.toml"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct ScanAppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Full tracing EnvFilter expression; takes precedence over `log_level`.
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub scan: ScanRuntimeConfig,
}

impl ScanAppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::parse(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cfg: ScanAppConfig = toml::from_str(s)?;
        cfg.scan.validate()?;
        Ok(cfg)
    }
}

impl Default for ScanAppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            scan: ScanRuntimeConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ScanRuntimeConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_buffer_max_chunks_per_driver")]
    pub buffer_max_chunks_per_driver: usize,
    #[serde(default = "default_buffer_default_chunks_per_driver")]
    pub buffer_default_chunks_per_driver: usize,
    #[serde(default = "default_buffer_mem_limit_per_driver")]
    pub buffer_mem_limit_per_driver: usize,
    #[serde(default = "default_buffer_balance")]
    pub buffer_balance: BalanceStrategy,
    #[serde(default = "default_dynamic_buffer_limiter")]
    pub dynamic_buffer_limiter: bool,
    #[serde(default = "default_batch_chunks_per_read")]
    pub batch_chunks_per_read: usize,
    #[serde(default = "default_yield_max_time_ms")]
    pub yield_max_time_ms: u64,
    #[serde(default = "default_active_input_shard_bits")]
    pub active_input_shard_bits: u32,
}

impl ScanRuntimeConfig {
    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(anyhow!("scan.chunk_size must be positive"));
        }
        if self.buffer_max_chunks_per_driver == 0 {
            return Err(anyhow!("scan.buffer_max_chunks_per_driver must be positive"));
        }
        if self.buffer_default_chunks_per_driver > self.buffer_max_chunks_per_driver {
            return Err(anyhow!(
                "scan.buffer_default_chunks_per_driver={} exceeds buffer_max_chunks_per_driver={}",
                self.buffer_default_chunks_per_driver,
                self.buffer_max_chunks_per_driver
            ));
        }
        if self.active_input_shard_bits > 10 {
            return Err(anyhow!(
                "scan.active_input_shard_bits={} is out of range [0, 10]",
                self.active_input_shard_bits
            ));
        }
        Ok(())
    }
}

fn default_chunk_size() -> usize {
    4096
}

fn default_buffer_max_chunks_per_driver() -> usize {
    64
}

fn default_buffer_default_chunks_per_driver() -> usize {
    8
}

fn default_buffer_mem_limit_per_driver() -> usize {
    128 * 1024 * 1024
}

fn default_buffer_balance() -> BalanceStrategy {
    BalanceStrategy::RoundRobin
}

fn default_dynamic_buffer_limiter() -> bool {
    true
}

fn default_batch_chunks_per_read() -> usize {
    16
}

fn default_yield_max_time_ms() -> u64 {
    100
}

fn default_active_input_shard_bits() -> u32 {
    4
}

impl Default for ScanRuntimeConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            buffer_max_chunks_per_driver: default_buffer_max_chunks_per_driver(),
            buffer_default_chunks_per_driver: default_buffer_default_chunks_per_driver(),
            buffer_mem_limit_per_driver: default_buffer_mem_limit_per_driver(),
            buffer_balance: default_buffer_balance(),
            dynamic_buffer_limiter: default_dynamic_buffer_limiter(),
            batch_chunks_per_read: default_batch_chunks_per_read(),
            yield_max_time_ms: default_yield_max_time_ms(),
            active_input_shard_bits: default_active_input_shard_bits(),
        }
    }
}
