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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrow::array::{Array, BooleanArray, Int32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use tempfile::TempDir;

use novarocks_scan::common::types::UniqueId;
use novarocks_scan::connector::{
    BoxedDataSource, Connector, ConnectorRegistry, ConnectorType, DataSource, DataSourceProvider,
    DataSourceProviderPtr,
};
use novarocks_scan::exec::chunk::Chunk;
use novarocks_scan::exec::expr::{PredicateRef, ScanPredicate};
use novarocks_scan::exec::node::connector_scan::ConnectorScanNode;
use novarocks_scan::exec::pipeline::scan::morsel::{Morsel, ScanRange};
use novarocks_scan::novarocks_config;
use novarocks_scan::novarocks_logging;
use novarocks_scan::runtime::runtime_state::RuntimeState;

pub const PLAN_NODE_ID: i32 = 7;

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    /// Create a new test configuration with default settings.
    pub fn new() -> anyhow::Result<Self> {
        Self::with_content(
            r#"
log_level = "debug"

[scan]
chunk_size = 1024
buffer_max_chunks_per_driver = 16
buffer_default_chunks_per_driver = 4
buffer_balance = "round_robin"
batch_chunks_per_read = 8
yield_max_time_ms = 50
active_input_shard_bits = 3
"#,
        )
    }

    pub fn with_content(content: &str) -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_novarocks.toml");
        std::fs::write(&config_path, content)?;
        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    /// Initialize logging for tests.
    pub fn init_logging(&self) {
        novarocks_logging::init_with_level("debug");
    }

    /// Load the test configuration.
    pub fn load_config(&self) -> anyhow::Result<&'static novarocks_config::ScanAppConfig> {
        novarocks_config::init_from_path(&self.config_path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

/// Generate a test query ID.
pub fn test_query_id() -> UniqueId {
    UniqueId {
        hi: 1234567890,
        lo: 9876543210,
    }
}

pub fn test_state() -> RuntimeState {
    RuntimeState::new(Some(test_query_id()), 1024)
}

/// Wait for a condition to become true, with timeout.
pub fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Run `f` and fail the test if it does not finish within `timeout`.
pub fn run_with_timeout<F, T>(timeout: Duration, f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });

    match rx.recv_timeout(timeout) {
        Ok(v) => v,
        Err(_) => panic!("test timed out after {:?}", timeout),
    }
}

/// Assert that a result is Ok and return the value.
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Single int32 column `v` holding `start..start + rows`.
pub fn int_chunk(start: i32, rows: usize) -> Chunk {
    let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]));
    let values: Vec<i32> = (start..start + rows as i32).collect();
    let batch = RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))])
        .expect("record batch");
    Chunk::new(batch)
}

pub fn int_values(chunk: &Chunk) -> Vec<i32> {
    chunk
        .batch
        .column(0)
        .as_any()
        .downcast_ref::<Int32Array>()
        .expect("int32 column")
        .values()
        .to_vec()
}

pub fn partition_morsel(index: usize) -> Morsel {
    Morsel::new(
        PLAN_NODE_ID,
        ScanRange::Partition {
            name: format!("p{index}"),
            index,
        },
    )
}

/// One `get_next` outcome of a mock data source.
#[derive(Clone, Debug)]
pub enum Step {
    Rows(usize),
    Fail(String),
}

/// Blocks one read until the test releases it.
pub struct ReadGate {
    pub at_read: usize,
    entered: Sender<()>,
    release: Receiver<()>,
}

pub struct ReadGateHandle {
    entered: Receiver<()>,
    release: Sender<()>,
}

impl ReadGateHandle {
    pub fn wait_entered(&self, timeout: Duration) -> bool {
        self.entered.recv_timeout(timeout).is_ok()
    }

    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

pub fn read_gate(at_read: usize) -> (ReadGate, ReadGateHandle) {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    (
        ReadGate {
            at_read,
            entered: entered_tx,
            release: release_rx,
        },
        ReadGateHandle {
            entered: entered_rx,
            release: release_tx,
        },
    )
}

#[derive(Default)]
pub struct MockScript {
    pub steps: Vec<Step>,
    pub fail_open: Option<String>,
    pub applies_predicates: bool,
    pub gate: Option<ReadGate>,
}

impl MockScript {
    pub fn rows(rows: &[usize]) -> Self {
        Self {
            steps: rows.iter().map(|r| Step::Rows(*r)).collect(),
            ..Self::default()
        }
    }

    pub fn with_steps(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }
}

/// What every mock data source observed, keyed by morsel index.
#[derive(Default)]
pub struct MockObservations {
    pub predicates: Mutex<HashMap<usize, Vec<String>>>,
    pub closed: Mutex<Vec<usize>>,
}

struct MockDataSource {
    index: usize,
    steps: std::collections::VecDeque<Step>,
    fail_open: Option<String>,
    applies_predicates: bool,
    gate: Option<ReadGate>,
    reads: usize,
    next_value: i32,
    raw_rows: u64,
    observations: Arc<MockObservations>,
}

impl DataSource for MockDataSource {
    fn name(&self) -> &str {
        "mock"
    }

    fn set_predicates(&mut self, predicates: Vec<PredicateRef>) {
        let names = predicates.iter().map(|p| p.name().to_string()).collect();
        self.observations
            .predicates
            .lock()
            .expect("observations lock")
            .insert(self.index, names);
    }

    fn applies_predicates(&self) -> bool {
        self.applies_predicates
    }

    fn open(&mut self, _state: &RuntimeState) -> Result<(), String> {
        match &self.fail_open {
            Some(msg) => Err(msg.clone()),
            None => Ok(()),
        }
    }

    fn get_next(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>, String> {
        let read = self.reads;
        self.reads += 1;
        if let Some(gate) = &self.gate {
            if gate.at_read == read {
                let _ = gate.entered.send(());
                let _ = gate.release.recv_timeout(Duration::from_secs(10));
            }
        }
        match self.steps.pop_front() {
            None => Ok(None),
            Some(Step::Fail(msg)) => Err(msg),
            Some(Step::Rows(rows)) => {
                let chunk = int_chunk(self.next_value, rows);
                self.next_value += rows as i32;
                self.raw_rows += rows as u64;
                Ok(Some(chunk))
            }
        }
    }

    fn close(&mut self, _state: &RuntimeState) {
        self.observations
            .closed
            .lock()
            .expect("observations lock")
            .push(self.index);
    }

    fn raw_rows_read(&self) -> u64 {
        self.raw_rows
    }

    fn num_bytes_read(&self) -> u64 {
        self.raw_rows * std::mem::size_of::<i32>() as u64
    }
}

struct MockProvider {
    scripts: Mutex<HashMap<usize, MockScript>>,
    observations: Arc<MockObservations>,
}

impl DataSourceProvider for MockProvider {
    fn create_data_source(&self, morsel: Morsel) -> Result<BoxedDataSource, String> {
        let ScanRange::Partition { index, .. } = morsel.scan_range() else {
            return Err(format!("mock connector cannot read {}", morsel.describe()));
        };
        let script = self
            .scripts
            .lock()
            .expect("mock scripts lock")
            .remove(index)
            .ok_or_else(|| format!("no mock script for morsel {index}"))?;
        Ok(Box::new(MockDataSource {
            index: *index,
            steps: script.steps.into_iter().collect(),
            fail_open: script.fail_open,
            applies_predicates: script.applies_predicates,
            gate: script.gate,
            reads: 0,
            next_value: 0,
            raw_rows: 0,
            observations: Arc::clone(&self.observations),
        }))
    }
}

/// File connector whose data sources replay `MockScript`s, one per morsel index.
pub struct MockConnector {
    provider: Arc<MockProvider>,
}

impl MockConnector {
    pub fn new(scripts: Vec<MockScript>) -> Self {
        Self {
            provider: Arc::new(MockProvider {
                scripts: Mutex::new(scripts.into_iter().enumerate().collect()),
                observations: Arc::new(MockObservations::default()),
            }),
        }
    }

    pub fn observations(&self) -> Arc<MockObservations> {
        Arc::clone(&self.provider.observations)
    }
}

impl Connector for MockConnector {
    fn connector_type(&self) -> ConnectorType {
        ConnectorType::File
    }

    fn required_properties(&self) -> &[&'static str] {
        &["path"]
    }

    fn create_data_source_provider(
        &self,
        _scan_node: &ConnectorScanNode,
    ) -> Result<DataSourceProviderPtr, String> {
        Ok(Arc::clone(&self.provider) as DataSourceProviderPtr)
    }
}

/// Registry holding one mock connector, plus a handle on what its sources observed.
pub fn mock_registry(scripts: Vec<MockScript>) -> (Arc<ConnectorRegistry>, Arc<MockObservations>) {
    let connector = MockConnector::new(scripts);
    let observations = connector.observations();
    let mut registry = ConnectorRegistry::new();
    registry.register(Arc::new(connector));
    (Arc::new(registry), observations)
}

pub fn file_scan_node() -> ConnectorScanNode {
    ConnectorScanNode::new(PLAN_NODE_ID, ConnectorType::File).with_property("path", "/data/t")
}

/// Keeps rows whose `v` is below `bound`.
#[derive(Debug)]
pub struct ValueBelow {
    pub name: String,
    pub bound: i32,
}

impl ValueBelow {
    pub fn new(name: &str, bound: i32) -> PredicateRef {
        Arc::new(Self {
            name: name.to_string(),
            bound,
        })
    }
}

impl ScanPredicate for ValueBelow {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, chunk: &Chunk) -> Result<BooleanArray, String> {
        let values = chunk
            .batch
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .ok_or_else(|| "expected int32 column".to_string())?;
        Ok(values.iter().map(|v| v.map(|v| v < self.bound)).collect())
    }
}

/// Predicate that fails validation.
#[derive(Debug)]
pub struct Unprepared;

impl ScanPredicate for Unprepared {
    fn name(&self) -> &str {
        "unprepared"
    }

    fn prepare(&self) -> Result<(), String> {
        Err("slot 3 is not materialized".to_string())
    }

    fn evaluate(&self, chunk: &Chunk) -> Result<BooleanArray, String> {
        Ok(BooleanArray::from(vec![true; chunk.len()]))
    }
}
