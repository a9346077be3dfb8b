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

use serde::{Deserialize, Serialize};
use weir_sans_io::TaskId;

/// A point in time view of the configured connectors and their tasks, read
/// from the configuration store at `offset`.
///
/// Task indices within a connector are contiguous from zero. The offset is
/// monotonic: a snapshot at a higher offset has seen at least every change a
/// lower one has.
#[derive(Clone, Default, Deserialize, Eq, Hash, Debug, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ConfigSnapshot {
    pub offset: i64,
    pub connectors: BTreeMap<String, BTreeSet<TaskId>>,
}

impl ConfigSnapshot {
    pub fn offset(self, offset: i64) -> Self {
        Self { offset, ..self }
    }

    pub fn connector(mut self, connector: impl Into<String>, tasks: i32) -> Self {
        let connector = connector.into();
        let tasks = (0..tasks)
            .map(|index| TaskId::new(connector.clone(), index))
            .collect();

        _ = self.connectors.insert(connector, tasks);
        self
    }

    pub fn tasks(&self, connector: &str) -> BTreeSet<TaskId> {
        self.connectors.get(connector).cloned().unwrap_or_default()
    }
}
