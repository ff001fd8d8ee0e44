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
//! Operator factory trait definitions.
//!
//! Separates plan-time operator configuration, shared by all drivers of a
//! pipeline, from the runtime operator instances created per driver.

use super::operator::Operator;
use crate::common::status::ScanResult;
use crate::runtime::runtime_state::RuntimeState;

pub trait OperatorFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Build state shared by every operator. Idempotent.
    fn prepare(&self, _state: &RuntimeState) -> ScanResult<()> {
        Ok(())
    }

    fn create(&self, dop: i32, driver_sequence: i32) -> ScanResult<Box<dyn Operator>>;

    /// Release shared state after all operators closed. Idempotent.
    fn close(&self, _state: &RuntimeState) {}

    fn is_source(&self) -> bool {
        false
    }
}
