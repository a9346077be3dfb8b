// Copyright ⓒ 2025 Peter Morgan <peter.james.morgan@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use serde::Serialize;
use weir_sans_io::{TaskId, rebalance::Member};

use crate::{Result, coordinator::Coordinator};

mod dealer;
mod incremental;

pub use incremental::IncrementalAssignor;

/// Grace window granted to a worker that disappears, before its share of
/// the work is redistributed.
pub const DEFAULT_MAX_DELAY_MS: i32 = 300_000;

/// Computes one assignment per member of the group, serialized for the
/// membership protocol to deliver.
pub trait Assignor {
    fn perform_assignment(
        &mut self,
        leader_id: &str,
        members: &[Member],
        coordinator: &mut dyn Coordinator,
    ) -> Result<BTreeMap<String, Bytes>>;
}

/// An unordered pair of connector and task ownership, the unit the diff
/// engine subtracts.
#[derive(Clone, Default, Eq, Hash, Debug, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ConnectorsAndTasks {
    pub connectors: BTreeSet<String>,
    pub tasks: BTreeSet<TaskId>,
}

impl ConnectorsAndTasks {
    pub fn connectors(self, connectors: impl IntoIterator<Item = String>) -> Self {
        Self {
            connectors: connectors.into_iter().collect(),
            ..self
        }
    }

    pub fn tasks(self, tasks: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            tasks: tasks.into_iter().collect(),
            ..self
        }
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty() && self.tasks.is_empty()
    }

    pub fn diff(&self, subtracted: &Self) -> Self {
        Self {
            connectors: self
                .connectors
                .difference(&subtracted.connectors)
                .cloned()
                .collect(),
            tasks: self.tasks.difference(&subtracted.tasks).cloned().collect(),
        }
    }
}
