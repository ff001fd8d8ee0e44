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
//! Connector plug-in surface of the scan stage.
//!
//! Responsibilities:
//! - Names the supported external connector kinds.
//! - Defines the `DataSource` a chunk source reads from and the provider that creates one per morsel.
//! - Keeps the registry used to resolve a scan node's connector at prepare time.
//!
//! Key exported interfaces:
//! - Types: `ConnectorType`, `DataSource`, `DataSourceProvider`, `Connector`, `ConnectorRegistry`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::exec::chunk::Chunk;
use crate::exec::expr::PredicateRef;
use crate::exec::node::connector_scan::ConnectorScanNode;
use crate::exec::pipeline::scan::morsel::Morsel;
use crate::runtime::runtime_state::RuntimeState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConnectorType {
    Hive,
    Es,
    Jdbc,
    Mysql,
    File,
    Lake,
}

impl ConnectorType {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectorType::Hive => "hive",
            ConnectorType::Es => "es",
            ConnectorType::Jdbc => "jdbc",
            ConnectorType::Mysql => "mysql",
            ConnectorType::File => "file",
            ConnectorType::Lake => "lake",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "hive" => Some(ConnectorType::Hive),
            "es" | "elasticsearch" => Some(ConnectorType::Es),
            "jdbc" => Some(ConnectorType::Jdbc),
            "mysql" => Some(ConnectorType::Mysql),
            "file" => Some(ConnectorType::File),
            "lake" => Some(ConnectorType::Lake),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reader over the data described by one morsel.
///
/// Errors are plain strings; the scan layer maps them to open/read failures.
pub trait DataSource: Send {
    fn name(&self) -> &str {
        "data_source"
    }

    /// Predicates the source may push down. Called once before `open`.
    fn set_predicates(&mut self, _predicates: Vec<PredicateRef>) {}

    /// Whether the source evaluates the predicates handed to `set_predicates` itself.
    fn applies_predicates(&self) -> bool {
        false
    }

    fn open(&mut self, state: &RuntimeState) -> Result<(), String>;

    /// Next chunk, or `None` at end of data. Chunks may be empty.
    fn get_next(&mut self, state: &RuntimeState) -> Result<Option<Chunk>, String>;

    fn close(&mut self, state: &RuntimeState);

    /// Rows scanned before any predicate is applied.
    fn raw_rows_read(&self) -> u64;

    fn num_bytes_read(&self) -> u64;
}

pub type BoxedDataSource = Box<dyn DataSource>;

/// Per-scan-node factory of data sources, shared by every chunk source of the node.
pub trait DataSourceProvider: Send + Sync {
    fn create_data_source(&self, morsel: Morsel) -> Result<BoxedDataSource, String>;
}

pub type DataSourceProviderPtr = Arc<dyn DataSourceProvider>;

pub trait Connector: Send + Sync {
    fn connector_type(&self) -> ConnectorType;

    /// Properties a scan node must carry for this connector.
    fn required_properties(&self) -> &[&'static str] {
        &[]
    }

    fn create_data_source_provider(
        &self,
        scan_node: &ConnectorScanNode,
    ) -> Result<DataSourceProviderPtr, String>;
}

#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<ConnectorType, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later registrations replace earlier ones of the same type.
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.connector_type(), connector);
    }

    pub fn get(&self, connector_type: ConnectorType) -> Option<Arc<dyn Connector>> {
        self.connectors.get(&connector_type).cloned()
    }

    /// Resolve the node's connector, check its required properties and build the provider.
    pub fn create_data_source_provider(
        &self,
        scan_node: &ConnectorScanNode,
    ) -> Result<DataSourceProviderPtr, String> {
        let connector_type = scan_node.connector_type();
        let Some(connector) = self.connectors.get(&connector_type) else {
            return Err(format!("unknown scan connector: {connector_type}"));
        };
        let missing: Vec<&str> = connector
            .required_properties()
            .iter()
            .copied()
            .filter(|key| scan_node.property(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(format!(
                "scan node {} misses required {} properties: {}",
                scan_node.node_id(),
                connector_type,
                missing.join(",")
            ));
        }
        connector.create_data_source_provider(scan_node)
    }
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.connectors.keys().map(|t| t.name()).collect();
        names.sort();
        f.debug_struct("ConnectorRegistry")
            .field("connectors", &names)
            .finish()
    }
}
