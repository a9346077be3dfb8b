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

//! Class aware round-robin dealing of connectors and tasks over workers.
//!
//! Each connector's tasks split into equal contiguous blocks, one per task
//! class. The blocks of every connector interleave class by class into one
//! deck, which is dealt round-robin to the sorted workers. Workers keep the
//! concrete task ids they already own whenever a block dealt to them still
//! contains the id, so only the remainder moves.

use std::{
    collections::{BTreeMap, BTreeSet},
    iter,
};

use weir_sans_io::TaskId;

use super::ConnectorsAndTasks;

/// The data classes a connector's tasks divide into, in dealing order.
#[derive(Clone, Copy, Eq, Hash, Debug, Ord, PartialEq, PartialOrd)]
pub(crate) enum TaskClass {
    Log,
    Metric,
    Trace,
    Control,
}

impl TaskClass {
    pub(crate) const ALL: [Self; 4] = [Self::Log, Self::Metric, Self::Trace, Self::Control];

    fn ordinal(self) -> usize {
        match self {
            Self::Log => 1,
            Self::Metric => 2,
            Self::Trace => 3,
            Self::Control => 4,
        }
    }
}

/// Connector kinds are decided by the connector id prefix. This is a
/// product decision, not an extension point.
#[derive(Clone, Copy, Eq, Hash, Debug, Ord, PartialEq, PartialOrd)]
pub(crate) enum ConnectorKind {
    S3,
    Es,
    General,
}

impl ConnectorKind {
    pub(crate) fn of(connector: &str) -> Self {
        if connector.starts_with("s3") {
            Self::S3
        } else if connector.starts_with("es") {
            Self::Es
        } else {
            Self::General
        }
    }

    /// Search sinks index every class, object store sinks only archive logs
    /// and metrics, anything else carries a single undifferentiated class.
    fn classes(self) -> &'static [TaskClass] {
        match self {
            Self::S3 => &TaskClass::ALL[..2],
            Self::Es => &TaskClass::ALL[..],
            Self::General => &TaskClass::ALL[..1],
        }
    }
}

/// A contiguous block of one connector's task indices belonging to one
/// class, consumed while dealing.
#[derive(Clone, Eq, Hash, Debug, Ord, PartialEq, PartialOrd)]
pub(crate) struct TaskGroup {
    connector: String,
    indices: Vec<i32>,
}

impl TaskGroup {
    fn contains(&self, task: &TaskId) -> bool {
        task.connector == self.connector && self.indices.contains(&task.index)
    }

    fn remove(&mut self, task: &TaskId) {
        if task.connector == self.connector
            && let Some(position) = self.indices.iter().position(|index| *index == task.index)
        {
            _ = self.indices.remove(position);
        }
    }

    fn pop_front(&mut self) -> Option<TaskId> {
        if self.indices.is_empty() {
            None
        } else {
            Some(TaskId::new(self.connector.clone(), self.indices.remove(0)))
        }
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}

/// The block of `connector` tasks belonging to `class`, or `None` when the
/// connector kind has no such class or no tasks fall into it.
///
/// The block length is the integer quotient of the task count by the class
/// count; a remainder is silently dropped.
pub(crate) fn class_group(
    connector: &str,
    configured_tasks: &BTreeSet<TaskId>,
    class: TaskClass,
) -> Option<TaskGroup> {
    let classes = ConnectorKind::of(connector).classes();

    if !classes.contains(&class) {
        return None;
    }

    let indices: Vec<i32> = configured_tasks
        .iter()
        .filter(|task| task.connector == connector)
        .map(|task| task.index)
        .collect();

    let group_len = indices.len() / classes.len();
    let skip = group_len * (class.ordinal() - 1);
    let indices = indices[skip..skip + group_len].to_vec();

    if indices.is_empty() {
        return None;
    }

    Some(TaskGroup {
        connector: connector.to_owned(),
        indices,
    })
}

/// Plain round-robin of the configured connectors over the sorted workers.
pub(crate) fn deal_connectors(
    connectors: &BTreeSet<String>,
    workers: &[String],
) -> BTreeMap<String, Vec<String>> {
    let mut allocation: BTreeMap<String, Vec<String>> = workers
        .iter()
        .map(|worker| (worker.clone(), Vec::new()))
        .collect();

    for (count, connector) in connectors.iter().enumerate() {
        if let Some(dealt) = allocation.get_mut(&workers[count % workers.len()]) {
            dealt.push(connector.clone());
        }
    }

    allocation
}

/// Deals concrete task ids to the sorted workers.
///
/// Every class block is entered into the deck once per task it contains, so
/// a block gets as many picks as it has tasks; the repeated entries refer to
/// the same block, and consuming a task through one entry is observed by the
/// others. Workers then retain their currently owned ids out of the blocks
/// dealt to them before the leftover entries are drained front to back.
pub(crate) fn deal_tasks(
    connectors: &BTreeSet<String>,
    configured_tasks: &BTreeSet<TaskId>,
    current_allocation: &BTreeMap<String, ConnectorsAndTasks>,
    workers: &[String],
) -> BTreeMap<String, Vec<TaskId>> {
    let mut groups: Vec<TaskGroup> = Vec::new();
    let mut deck: Vec<usize> = Vec::new();

    for class in TaskClass::ALL {
        for connector in connectors {
            if let Some(group) = class_group(connector, configured_tasks, class) {
                deck.extend(iter::repeat_n(groups.len(), group.len()));
                groups.push(group);
            }
        }
    }

    let mut intermediate: BTreeMap<String, Vec<usize>> = workers
        .iter()
        .map(|worker| (worker.clone(), Vec::new()))
        .collect();

    for (count, slot) in deck.into_iter().enumerate() {
        if let Some(dealt) = intermediate.get_mut(&workers[count % workers.len()]) {
            dealt.push(slot);
        }
    }

    let mut allocation: BTreeMap<String, Vec<TaskId>> = workers
        .iter()
        .map(|worker| (worker.clone(), Vec::new()))
        .collect();

    for (worker, owned) in current_allocation {
        for task in &owned.tasks {
            let Some(slots) = intermediate.get_mut(worker) else {
                continue;
            };

            if let Some(position) = slots.iter().position(|slot| groups[*slot].contains(task)) {
                let slot = slots.remove(position);
                groups[slot].remove(task);

                if let Some(kept) = allocation.get_mut(worker) {
                    kept.push(task.clone());
                }
            }
        }
    }

    for (worker, slots) in &intermediate {
        for slot in slots {
            if let Some(task) = groups[*slot].pop_front()
                && let Some(dealt) = allocation.get_mut(worker)
            {
                dealt.push(task);
            }
        }
    }

    allocation
}
