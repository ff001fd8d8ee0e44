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
//! Read-only plan description of a connector scan node.
//!
//! Shared by the scan operator factory, its operators and every chunk source.

use std::collections::BTreeMap;

use crate::connector::ConnectorType;
use crate::exec::expr::PredicateRef;
use crate::exec::runtime_filter::RuntimeFilterProbeCollector;

/// Row limit value meaning "no limit".
pub const NO_LIMIT: i64 = -1;

#[derive(Clone, Debug)]
pub struct ConnectorScanNode {
    node_id: i32,
    connector_type: ConnectorType,
    properties: BTreeMap<String, String>,
    conjuncts: Vec<PredicateRef>,
    runtime_in_filters: Vec<PredicateRef>,
    runtime_filters: RuntimeFilterProbeCollector,
    limit: i64,
}

impl ConnectorScanNode {
    pub fn new(node_id: i32, connector_type: ConnectorType) -> Self {
        Self {
            node_id,
            connector_type,
            properties: BTreeMap::new(),
            conjuncts: Vec::new(),
            runtime_in_filters: Vec::new(),
            runtime_filters: RuntimeFilterProbeCollector::default(),
            limit: NO_LIMIT,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_conjuncts(mut self, conjuncts: Vec<PredicateRef>) -> Self {
        self.conjuncts = conjuncts;
        self
    }

    pub fn with_runtime_in_filters(mut self, filters: Vec<PredicateRef>) -> Self {
        self.runtime_in_filters = filters;
        self
    }

    pub fn with_runtime_filters(mut self, runtime_filters: RuntimeFilterProbeCollector) -> Self {
        self.runtime_filters = runtime_filters;
        self
    }

    /// Negative values other than `NO_LIMIT` are treated as "no limit".
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = if limit < 0 { NO_LIMIT } else { limit };
        self
    }

    pub fn node_id(&self) -> i32 {
        self.node_id
    }

    pub fn connector_type(&self) -> ConnectorType {
        self.connector_type
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn conjuncts(&self) -> &[PredicateRef] {
        &self.conjuncts
    }

    pub fn runtime_in_filters(&self) -> &[PredicateRef] {
        &self.runtime_in_filters
    }

    pub fn runtime_filters(&self) -> &RuntimeFilterProbeCollector {
        &self.runtime_filters
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn has_limit(&self) -> bool {
        self.limit != NO_LIMIT
    }
}
