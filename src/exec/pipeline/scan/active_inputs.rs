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
//! Sharded set of chunk sources that currently have buffered output.

use std::hash::BuildHasher;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use hashbrown::{DefaultHashBuilder, HashSet};

/// `(operator driver sequence, chunk source index)`.
pub type ActiveInputKey = (i32, i32);

pub const MAX_SHARD_BITS: u32 = 10;

pub struct ActiveInputSet {
    shards: Vec<Mutex<HashSet<ActiveInputKey>>>,
    hasher: DefaultHashBuilder,
    len: AtomicUsize,
}

impl ActiveInputSet {
    /// `2^shard_bits` independently locked shards.
    pub fn new(shard_bits: u32) -> Self {
        let num_shards = 1usize << shard_bits.min(MAX_SHARD_BITS);
        Self {
            shards: (0..num_shards).map(|_| Mutex::new(HashSet::new())).collect(),
            hasher: DefaultHashBuilder::default(),
            len: AtomicUsize::new(0),
        }
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, key: &ActiveInputKey) -> &Mutex<HashSet<ActiveInputKey>> {
        let idx = (self.hasher.hash_one(key) as usize) & (self.shards.len() - 1);
        &self.shards[idx]
    }

    /// Returns true when the key was not present.
    pub fn insert(&self, key: ActiveInputKey) -> bool {
        let inserted = self
            .shard(&key)
            .lock()
            .expect("active input shard lock")
            .insert(key);
        if inserted {
            self.len.fetch_add(1, Ordering::AcqRel);
        }
        inserted
    }

    /// Returns true when the key was present.
    pub fn erase(&self, key: &ActiveInputKey) -> bool {
        let removed = self
            .shard(key)
            .lock()
            .expect("active input shard lock")
            .remove(key);
        if removed {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    pub fn contains(&self, key: &ActiveInputKey) -> bool {
        self.shard(key)
            .lock()
            .expect("active input shard lock")
            .contains(key)
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all keys; each shard is read under its own lock.
    pub fn keys(&self) -> Vec<ActiveInputKey> {
        let mut keys = Vec::with_capacity(self.len());
        for shard in &self.shards {
            let guard = shard.lock().expect("active input shard lock");
            keys.extend(guard.iter().copied());
        }
        keys
    }

    /// Remove every key owned by `operator_id`. Returns the number removed.
    pub fn erase_operator(&self, operator_id: i32) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut guard = shard.lock().expect("active input shard lock");
            let before = guard.len();
            guard.retain(|(op, _)| *op != operator_id);
            removed += before - guard.len();
        }
        if removed > 0 {
            self.len.fetch_sub(removed, Ordering::AcqRel);
        }
        removed
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            let mut guard = shard.lock().expect("active input shard lock");
            let n = guard.len();
            guard.clear();
            self.len.fetch_sub(n, Ordering::AcqRel);
        }
    }
}

impl std::fmt::Debug for ActiveInputSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveInputSet")
            .field("shards", &self.shards.len())
            .field("len", &self.len())
            .finish()
    }
}
