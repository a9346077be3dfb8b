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

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Debug,
};

use serde::Serialize;
use weir_sans_io::{TaskId, rebalance::WorkerState};

use crate::snapshot::ConfigSnapshot;

/// The group membership and configuration services the assignor consumes.
///
/// Generation identifiers name successful rebalance epochs: the assignor
/// compares `last_completed_generation_id` against the generation it last
/// assigned for to decide whether its cached view of the group is still
/// trustworthy.
pub trait Coordinator: Debug {
    fn generation_id(&self) -> i32;

    fn last_completed_generation_id(&self) -> i32;

    fn member_id(&self) -> String;

    /// The cached configuration snapshot.
    fn snapshot(&self) -> &ConfigSnapshot;

    /// Re-reads the configuration store, returning a snapshot at least as
    /// fresh as the cached one.
    fn fresh_snapshot(&mut self) -> ConfigSnapshot;

    fn set_snapshot(&mut self, snapshot: ConfigSnapshot);

    /// Receives the leader's view of the group each round, for consumption
    /// by status endpoints.
    fn set_leader_state(&mut self, leader_state: LeaderState);
}

/// The leader's published view of one rebalance round: the raw member
/// configurations and the per worker connector and task ownership, filtered
/// to what is currently configured.
#[derive(Clone, Default, Eq, Hash, Debug, Ord, PartialEq, PartialOrd, Serialize)]
pub struct LeaderState {
    pub members: BTreeMap<String, WorkerState>,
    pub connectors: BTreeMap<String, BTreeSet<String>>,
    pub tasks: BTreeMap<String, BTreeSet<TaskId>>,
}

impl LeaderState {
    pub fn owner_url(&self, worker: &str) -> Option<&str> {
        self.members.get(worker).map(|state| state.url.as_str())
    }

    pub fn connector_owner(&self, connector: &str) -> Option<&str> {
        self.connectors
            .iter()
            .find_map(|(worker, owned)| owned.contains(connector).then_some(worker.as_str()))
    }

    pub fn task_owner(&self, task: &TaskId) -> Option<&str> {
        self.tasks
            .iter()
            .find_map(|(worker, owned)| owned.contains(task).then_some(worker.as_str()))
    }
}

/// An in process [`Coordinator`] holding everything in memory, for
/// embedding and tests.
#[derive(Clone, Default, Debug)]
pub struct LocalCoordinator {
    pub generation_id: i32,
    pub last_completed_generation_id: i32,
    pub member_id: String,
    pub snapshot: ConfigSnapshot,
    pub fresh: Option<ConfigSnapshot>,
    pub leader_state: Option<LeaderState>,
}

impl Coordinator for LocalCoordinator {
    fn generation_id(&self) -> i32 {
        self.generation_id
    }

    fn last_completed_generation_id(&self) -> i32 {
        self.last_completed_generation_id
    }

    fn member_id(&self) -> String {
        self.member_id.clone()
    }

    fn snapshot(&self) -> &ConfigSnapshot {
        &self.snapshot
    }

    fn fresh_snapshot(&mut self) -> ConfigSnapshot {
        self.fresh
            .take()
            .unwrap_or_else(|| self.snapshot.clone())
    }

    fn set_snapshot(&mut self, snapshot: ConfigSnapshot) {
        self.snapshot = snapshot;
    }

    fn set_leader_state(&mut self, leader_state: LeaderState) {
        self.leader_state = Some(leader_state);
    }
}
