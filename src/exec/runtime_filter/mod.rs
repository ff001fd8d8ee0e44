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
//! Runtime bloom-filter probe slots for a scan node.
//!
//! Responsibilities:
//! - Holds one slot per expected runtime filter; the build side publishes a compiled predicate later.
//! - Exposes the filters that are ready at chunk-source prepare time so they can be merged with conjuncts.
//!
//! Key exported interfaces:
//! - Types: `RuntimeFilterProbeCollector`.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use crate::exec::expr::PredicateRef;
use crate::novarocks_logging::debug;

#[derive(Debug)]
struct RuntimeFilterSlot {
    filter_id: i32,
    predicate: OnceLock<PredicateRef>,
}

/// Shared between the scan node description and every chunk source of the scan.
#[derive(Debug, Clone, Default)]
pub struct RuntimeFilterProbeCollector {
    slots: Arc<Vec<RuntimeFilterSlot>>,
}

impl RuntimeFilterProbeCollector {
    pub fn new(filter_ids: impl IntoIterator<Item = i32>) -> Self {
        let slots = filter_ids
            .into_iter()
            .map(|filter_id| RuntimeFilterSlot {
                filter_id,
                predicate: OnceLock::new(),
            })
            .collect();
        Self {
            slots: Arc::new(slots),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn num_filters(&self) -> usize {
        self.slots.len()
    }

    pub fn filter_ids(&self) -> Vec<i32> {
        self.slots.iter().map(|s| s.filter_id).collect()
    }

    /// Publish the compiled filter for `filter_id`. A filter arrives at most once.
    pub fn publish(&self, filter_id: i32, predicate: PredicateRef) -> Result<(), String> {
        let slot = self
            .slots
            .iter()
            .find(|s| s.filter_id == filter_id)
            .ok_or_else(|| format!("runtime filter {} is not probed by this scan", filter_id))?;
        slot.predicate
            .set(predicate)
            .map_err(|_| format!("runtime filter {} published twice", filter_id))?;
        debug!("runtime filter published: filter_id={}", filter_id);
        Ok(())
    }

    pub fn num_ready(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.predicate.get().is_some())
            .count()
    }

    pub fn ready_predicates(&self) -> Vec<PredicateRef> {
        self.slots
            .iter()
            .filter_map(|s| s.predicate.get().cloned())
            .collect()
    }

    /// Reject duplicate filter ids and published filters whose own validation fails.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for slot in self.slots.iter() {
            if !seen.insert(slot.filter_id) {
                return Err(format!("duplicate runtime filter id {}", slot.filter_id));
            }
            if let Some(pred) = slot.predicate.get() {
                pred.prepare().map_err(|e| {
                    format!("runtime filter {} is invalid: {}", slot.filter_id, e)
                })?;
            }
        }
        Ok(())
    }
}
