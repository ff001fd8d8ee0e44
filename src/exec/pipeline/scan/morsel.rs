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
//! Scan morsels.
//!
//! Responsibilities:
//! - Defines `Morsel`, the move-only unit of scan work consumed by exactly one chunk source.
//!
//! Key exported interfaces:
//! - Types: `Morsel`, `ScanRange`.

/// Connector-specific description of what a morsel reads.
#[derive(Debug, PartialEq, Eq)]
pub enum ScanRange {
    FileRange {
        path: String,
        offset: u64,
        length: u64,
    },
    /// A table partition or shard identified by name (jdbc query splits, es shards, lake tablets).
    Partition { name: String, index: usize },
    Empty,
}

impl ScanRange {
    pub fn describe(&self) -> String {
        match self {
            ScanRange::FileRange {
                path,
                offset,
                length,
            } => format!("path={} offset={} length={}", path, offset, length),
            ScanRange::Partition { name, index } => format!("partition={} index={}", name, index),
            ScanRange::Empty => "empty".to_string(),
        }
    }
}

/// One unit of scan work planned for the scan node `plan_node_id`.
///
/// Not `Clone`: a morsel moves into the chunk source that reads it.
#[derive(Debug, PartialEq, Eq)]
pub struct Morsel {
    plan_node_id: i32,
    scan_range: ScanRange,
}

impl Morsel {
    pub fn new(plan_node_id: i32, scan_range: ScanRange) -> Self {
        Self {
            plan_node_id,
            scan_range,
        }
    }

    pub fn plan_node_id(&self) -> i32 {
        self.plan_node_id
    }

    pub fn scan_range(&self) -> &ScanRange {
        &self.scan_range
    }

    pub fn describe(&self) -> String {
        format!(
            "plan_node_id={} {}",
            self.plan_node_id,
            self.scan_range.describe()
        )
    }
}
