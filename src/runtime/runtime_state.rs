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
//! Fragment-level runtime state passed to scan prepare/read/close hooks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::common::config;
use crate::common::types::UniqueId;
use crate::novarocks_logging::debug;

#[derive(Debug, Default)]
pub struct RuntimeErrorState {
    error: Mutex<Option<String>>,
}

impl RuntimeErrorState {
    /// Record the first fragment error; later errors are ignored.
    pub fn set_error(&self, err: String) {
        let mut guard = self.error.lock().expect("runtime error lock");
        if guard.is_none() {
            *guard = Some(err);
        }
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().expect("runtime error lock").clone()
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeState {
    query_id: Option<UniqueId>,
    chunk_size: usize,
    cancelled: Arc<AtomicBool>,
    error_state: Arc<RuntimeErrorState>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new(None, config::chunk_size())
    }
}

impl RuntimeState {
    pub fn new(query_id: Option<UniqueId>, chunk_size: usize) -> Self {
        Self {
            query_id,
            chunk_size: chunk_size.max(1),
            cancelled: Arc::new(AtomicBool::new(false)),
            error_state: Arc::new(RuntimeErrorState::default()),
        }
    }

    pub fn query_id(&self) -> Option<UniqueId> {
        self.query_id
    }

    /// Maximum number of rows a connector should place in one chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            debug!("RuntimeState cancelled: query_id={:?}", self.query_id);
        }
    }

    pub fn set_error(&self, err: String) {
        self.error_state.set_error(err);
    }

    pub fn error(&self) -> Option<String> {
        self.error_state.error()
    }
}

#[cfg(test)]
mod tests {
    use super::RuntimeState;

    #[test]
    fn clones_share_cancellation_and_first_error() {
        let state = RuntimeState::new(None, 16);
        let other = state.clone();
        other.set_error("first".to_string());
        state.set_error("second".to_string());
        other.cancel();
        assert!(state.is_cancelled());
        assert_eq!(state.error().as_deref(), Some("first"));
        assert_eq!(state.chunk_size(), 16);
    }
}
