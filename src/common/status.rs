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
//! Scan-stage error taxonomy.
//!
//! Connector-facing traits keep returning `Result<_, String>`; the scan layer
//! wraps those messages into `ScanError` at the boundary so the scheduler can
//! tell configuration mistakes from storage failures.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    /// Unsupported connector or missing connector property. Fatal to the fragment.
    #[error("config error: {0}")]
    ConfigError(String),
    /// Invalid conjunct or runtime filter state at preparation.
    #[error("prepare error: {0}")]
    PrepareError(String),
    #[error("connector open error: {0}")]
    ConnectorOpenError(String),
    #[error("connector read error: {0}")]
    ConnectorReadError(String),
    /// Caller contract violation (bad driver sequence, missing morsel, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
}

pub type ScanResult<T> = Result<T, ScanError>;

impl ScanError {
    /// Errors raised by the connector itself, as opposed to scan-layer misuse.
    pub fn is_connector_error(&self) -> bool {
        matches!(
            self,
            ScanError::ConnectorOpenError(_) | ScanError::ConnectorReadError(_)
        )
    }
}
