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
//! Predicate contract consumed by the scan layer.
//!
//! Responsibilities:
//! - Defines the opaque predicate interface conjuncts and runtime filters implement.
//! - Evaluates a conjunct list against a chunk when a data source cannot push it down.
//!
//! Key exported interfaces:
//! - Types: `ScanPredicate`, `PredicateRef`.
//! - Functions: `eval_conjuncts`.
//!
//! Expression compilation lives outside this crate; predicates arrive here already built.

use std::fmt;
use std::sync::Arc;

use arrow::array::BooleanArray;
use arrow::compute::kernels::boolean::and_kleene;

use crate::exec::chunk::Chunk;

pub trait ScanPredicate: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Validate the predicate before any chunk is read.
    fn prepare(&self) -> Result<(), String> {
        Ok(())
    }

    /// One mask entry per row; `false` and null both drop the row.
    fn evaluate(&self, chunk: &Chunk) -> Result<BooleanArray, String>;
}

pub type PredicateRef = Arc<dyn ScanPredicate>;

/// Apply every predicate in `conjuncts` as an AND to `chunk`.
pub fn eval_conjuncts(conjuncts: &[PredicateRef], chunk: Chunk) -> Result<Chunk, String> {
    if conjuncts.is_empty() || chunk.is_empty() {
        return Ok(chunk);
    }
    let mut mask: Option<BooleanArray> = None;
    for pred in conjuncts {
        let next = pred
            .evaluate(&chunk)
            .map_err(|e| format!("evaluate predicate {} failed: {}", pred.name(), e))?;
        mask = Some(match mask {
            None => next,
            Some(prev) => and_kleene(&prev, &next).map_err(|e| e.to_string())?,
        });
    }
    match mask {
        Some(mask) => chunk.filter(&mask),
        None => Ok(chunk),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Array, BooleanArray, Int32Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;

    use super::{PredicateRef, ScanPredicate, eval_conjuncts};
    use crate::exec::chunk::Chunk;

    #[derive(Debug)]
    struct GreaterThan(i32);

    impl ScanPredicate for GreaterThan {
        fn name(&self) -> &str {
            "gt"
        }

        fn evaluate(&self, chunk: &Chunk) -> Result<BooleanArray, String> {
            let col = chunk.batch.column(0);
            let ints = col
                .as_any()
                .downcast_ref::<Int32Array>()
                .ok_or_else(|| "expected int32".to_string())?;
            Ok(ints.iter().map(|v| v.map(|v| v > self.0)).collect())
        }
    }

    #[test]
    fn conjuncts_are_combined_with_and() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, true)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int32Array::from(vec![Some(1), Some(5), None, Some(9)]))],
        )
        .expect("record batch");
        let preds: Vec<PredicateRef> = vec![Arc::new(GreaterThan(2)), Arc::new(GreaterThan(6))];
        let out = eval_conjuncts(&preds, Chunk::new(batch)).expect("eval");
        assert_eq!(out.len(), 1);
    }
}
