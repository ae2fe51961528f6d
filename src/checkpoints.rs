// Copyright (c) 2026 MCU-Debug Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bookkeeping for the emulator's checkpoint table.
//!
//! The emulator owns one flat table shared by user breakpoints, call-stack
//! trace points and the engine's own guards. Every checkpoint created through
//! the transport is recorded here with the category of its owner, so scoped
//! toggles and event classification can filter by category instead of
//! guessing from addresses.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::monitor::CheckpointSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CheckpointCategory {
    /// Source breakpoints set by the user.
    User,
    /// Non-stopping exec checkpoints feeding the call-stack tracker.
    Trace,
    /// Dormant stop checkpoints on function entries, enabled for step-in.
    FrameBreak,
    /// Exit and code-segment guards.
    Guard,
    /// Short-lived checkpoints owned by a single stepping operation.
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedCheckpoint {
    pub id: u32,
    pub category: CheckpointCategory,
    pub spec: CheckpointSpec,
}

#[derive(Debug, Default)]
pub struct CheckpointRegistry {
    entries: Mutex<BTreeMap<u32, TrackedCheckpoint>>,
}

impl CheckpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<u32, TrackedCheckpoint>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, id: u32, category: CheckpointCategory, spec: CheckpointSpec) {
        self.entries().insert(
            id,
            TrackedCheckpoint {
                id,
                category,
                spec,
            },
        );
    }

    pub fn forget(&self, id: u32) -> Option<TrackedCheckpoint> {
        self.entries().remove(&id)
    }

    pub fn category(&self, id: u32) -> Option<CheckpointCategory> {
        self.entries().get(&id).map(|c| c.category)
    }

    pub fn get(&self, id: u32) -> Option<TrackedCheckpoint> {
        self.entries().get(&id).cloned()
    }

    /// Ids of one category, ascending.
    pub fn ids(&self, category: CheckpointCategory) -> Vec<u32> {
        self.entries()
            .values()
            .filter(|c| c.category == category)
            .map(|c| c.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Drops everything, e.g. after the emulator was reset or the connection lost.
    pub fn clear(&self) {
        self.entries().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::CpuOperation;

    #[test]
    fn categories_are_tracked_independently() {
        let reg = CheckpointRegistry::new();
        let exec = |a| CheckpointSpec::at(a, CpuOperation::EXEC, false);
        reg.record(3, CheckpointCategory::Trace, exec(0x0800));
        reg.record(1, CheckpointCategory::Trace, exec(0x0810));
        reg.record(2, CheckpointCategory::User, exec(0x0802));

        assert_eq!(reg.ids(CheckpointCategory::Trace), vec![1, 3]);
        assert_eq!(reg.category(2), Some(CheckpointCategory::User));

        assert!(reg.forget(1).is_some());
        assert!(reg.forget(1).is_none());
        assert_eq!(reg.ids(CheckpointCategory::Trace), vec![3]);
        assert_eq!(reg.len(), 2);

        reg.clear();
        assert!(reg.is_empty());
        assert_eq!(reg.category(3), None);
    }
}
