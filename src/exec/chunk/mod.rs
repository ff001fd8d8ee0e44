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
//! Columnar chunk exchanged between scan and downstream operators.
//!
//! The scan layer treats a chunk as an opaque, sized batch: it only needs the
//! row count, an estimate of its memory footprint, slicing (row limit) and
//! boolean filtering (residual predicates).

use arrow::array::{Array, BooleanArray, RecordBatch};
use arrow::compute::filter_record_batch;
use arrow::datatypes::SchemaRef;

#[derive(Debug, Clone)]
pub struct Chunk {
    pub batch: RecordBatch,
}

impl Chunk {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    /// Zero-copy view of `length` rows starting at `offset`.
    pub fn slice(&self, offset: usize, length: usize) -> Self {
        Self {
            batch: self.batch.slice(offset, length),
        }
    }

    /// Keep the rows whose mask entry is `true`; nulls drop the row.
    pub fn filter(&self, mask: &BooleanArray) -> Result<Self, String> {
        if mask.len() != self.len() {
            return Err(format!(
                "filter mask length {} does not match chunk rows {}",
                mask.len(),
                self.len()
            ));
        }
        let batch = filter_record_batch(&self.batch, mask).map_err(|e| e.to_string())?;
        Ok(Self { batch })
    }

    /// Memory held by the chunk's buffers, used for buffer accounting.
    pub fn estimated_bytes(&self) -> usize {
        self.batch.get_array_memory_size()
    }
}

impl From<RecordBatch> for Chunk {
    fn from(batch: RecordBatch) -> Self {
        Self::new(batch)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{BooleanArray, Int32Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;

    use super::Chunk;

    fn int_chunk(values: Vec<i32>) -> Chunk {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))])
            .expect("record batch");
        Chunk::new(batch)
    }

    #[test]
    fn slice_keeps_prefix() {
        let chunk = int_chunk(vec![1, 2, 3, 4]);
        let head = chunk.slice(0, 2);
        assert_eq!(head.len(), 2);
        assert!(chunk.estimated_bytes() > 0);
    }

    #[test]
    fn filter_rejects_mismatched_mask() {
        let chunk = int_chunk(vec![1, 2, 3]);
        let mask = BooleanArray::from(vec![true, false]);
        assert!(chunk.filter(&mask).is_err());
        let mask = BooleanArray::from(vec![Some(true), None, Some(true)]);
        assert_eq!(chunk.filter(&mask).expect("filter").len(), 2);
    }
}
