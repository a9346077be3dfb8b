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
    sync::LazyLock,
};

use bytes::Bytes;
use opentelemetry::{KeyValue, metrics::Counter};
use tracing::{debug, info};
use weir_sans_io::{
    REBALANCE_PROTOCOL_V3, REBALANCE_PROTOCOL_V4, TaskId,
    rebalance::{Assignment, AssignmentError, Member, WorkerState},
};

use crate::{
    Error, METER, Result,
    clock::Clock,
    coordinator::{Coordinator, LeaderState},
};

use super::{
    Assignor, ConnectorsAndTasks,
    dealer::{deal_connectors, deal_tasks},
};

static ASSIGNMENT_ROUNDS: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("weir_assignment_rounds")
        .with_description("rebalance rounds computed by the group leader")
        .build()
});

/// An assignor following the incremental cooperative strategy, with the
/// class aware round-robin distribution of tasks.
///
/// Stops and starts of the same unit never share a round: anything revoked
/// now is handed out in a later round, once its previous owner has let go.
/// A missing worker keeps its share reserved until the scheduled rebalance
/// delay runs out.
///
/// Not thread safe: the membership layer invokes the leader's assignor from
/// a single place, one round at a time.
#[derive(Debug)]
pub struct IncrementalAssignor<C> {
    clock: C,
    max_delay_ms: i32,
    scheduled_rebalance: i64,
    delay_ms: i32,
    previous_generation_id: i32,
    previous_members: BTreeSet<String>,
}

impl<C> IncrementalAssignor<C>
where
    C: Clock,
{
    pub fn new(clock: C, max_delay_ms: i32) -> Self {
        Self {
            clock,
            max_delay_ms,
            scheduled_rebalance: 0,
            delay_ms: 0,
            previous_generation_id: -1,
            previous_members: BTreeSet::new(),
        }
    }

    /// The offset the assignment may be computed at, or `None` when the
    /// leader's configuration is behind the group even after a re-read.
    fn ensure_leader_config(
        &self,
        max_offset: i64,
        coordinator: &mut dyn Coordinator,
    ) -> Option<i64> {
        if coordinator.snapshot().offset < max_offset {
            let updated = coordinator.fresh_snapshot();

            if updated.offset < max_offset {
                info!(
                    max_offset,
                    snapshot_offset = updated.offset,
                    "selected to perform assignment without the latest config, \
                     returning an empty configuration to trigger a re-sync"
                );
                None
            } else {
                let offset = updated.offset;
                coordinator.set_snapshot(updated);
                Some(offset)
            }
        } else {
            Some(max_offset)
        }
    }

    fn task_assignment(
        &mut self,
        leader_id: &str,
        leader_url: &str,
        max_offset: i64,
        member_configs: &BTreeMap<String, WorkerState>,
        coordinator: &mut dyn Coordinator,
        protocol_version: i16,
    ) -> Result<BTreeMap<String, Bytes>> {
        debug!(
            generation_id = coordinator.generation_id(),
            member_id = %coordinator.member_id(),
            "performing task assignment"
        );

        let last_completed_generation_id = coordinator.last_completed_generation_id();

        if self.previous_generation_id != last_completed_generation_id {
            debug!(
                previous_generation_id = self.previous_generation_id,
                last_completed_generation_id,
                scheduled_rebalance = self.scheduled_rebalance,
                delay_ms = self.delay_ms,
                previous_members = ?self.previous_members,
                "clearing cached state on generation mismatch, the previous \
                 leader may have failed to sync or been replaced"
            );

            self.scheduled_rebalance = 0;
            self.delay_ms = 0;
            self.previous_members = BTreeSet::new();
        }

        let snapshot = coordinator.snapshot().clone();

        let configured = ConnectorsAndTasks {
            connectors: snapshot.connectors.keys().cloned().collect(),
            tasks: snapshot
                .connectors
                .keys()
                .flat_map(|connector| snapshot.tasks(connector))
                .collect(),
        };
        debug!(?configured);

        let current_allocation: BTreeMap<String, ConnectorsAndTasks> = member_configs
            .iter()
            .map(|(worker, state)| {
                (
                    worker.clone(),
                    ConnectorsAndTasks {
                        connectors: state.assignment.connectors.clone(),
                        tasks: state.assignment.tasks.clone(),
                    },
                )
            })
            .collect();
        debug!(?current_allocation);

        let new_allocation =
            self.new_allocation(&configured.connectors, &configured.tasks, &current_allocation);
        debug!(?new_allocation);

        let empty = ConnectorsAndTasks::default();

        let to_revoke: BTreeMap<String, ConnectorsAndTasks> = current_allocation
            .iter()
            .map(|(worker, current)| {
                (
                    worker.clone(),
                    current.diff(new_allocation.get(worker).unwrap_or(&empty)),
                )
            })
            .collect();
        debug!(?to_revoke);

        // anything revoked somewhere this round must wait for a later round
        // before it starts elsewhere
        let revoked_connectors: BTreeSet<String> = to_revoke
            .values()
            .flat_map(|revoked| revoked.connectors.iter().cloned())
            .collect();
        let revoked_tasks: BTreeSet<TaskId> = to_revoke
            .values()
            .flat_map(|revoked| revoked.tasks.iter().cloned())
            .collect();

        let connector_starts: BTreeMap<String, BTreeSet<String>> = new_allocation
            .iter()
            .map(|(worker, next)| {
                let current = current_allocation.get(worker);

                (
                    worker.clone(),
                    next.connectors
                        .iter()
                        .filter(|connector| {
                            current.is_none_or(|current| !current.connectors.contains(*connector))
                        })
                        .filter(|connector| !revoked_connectors.contains(*connector))
                        .cloned()
                        .collect(),
                )
            })
            .collect();

        let task_starts: BTreeMap<String, BTreeSet<TaskId>> = new_allocation
            .iter()
            .map(|(worker, next)| {
                let current = current_allocation.get(worker);

                (
                    worker.clone(),
                    next.tasks
                        .iter()
                        .filter(|task| current.is_none_or(|current| !current.tasks.contains(*task)))
                        .filter(|task| !revoked_tasks.contains(*task))
                        .cloned()
                        .collect(),
                )
            })
            .collect();

        debug!(?connector_starts, ?task_starts);

        coordinator.set_leader_state(leader_state(member_configs, &configured));

        let assignments = fill_assignments(
            member_configs.keys(),
            AssignmentError::None,
            leader_id,
            leader_url,
            max_offset,
            &connector_starts,
            &task_starts,
            &to_revoke,
            self.delay_ms,
            protocol_version,
        );

        self.previous_generation_id = coordinator.generation_id();

        ASSIGNMENT_ROUNDS.add(1, &[KeyValue::new("outcome", "assigned")]);

        debug!(?assignments);
        serialize_assignments(&assignments)
    }

    /// Decides which workers take part in this round's deal, holds the
    /// share of recently departed workers while the grace window lasts, and
    /// deals the configured connectors and tasks.
    fn new_allocation(
        &mut self,
        connectors: &BTreeSet<String>,
        configured_tasks: &BTreeSet<TaskId>,
        current_allocation: &BTreeMap<String, ConnectorsAndTasks>,
    ) -> BTreeMap<String, ConnectorsAndTasks> {
        let mut workers: Vec<String> = current_allocation.keys().cloned().collect();
        let mut missing: Vec<String> = self
            .previous_members
            .iter()
            .filter(|member| !current_allocation.contains_key(*member))
            .cloned()
            .collect();

        if missing.is_empty() {
            self.previous_members = workers.iter().cloned().collect();
            self.reset_delay();
        } else {
            let now = self.clock.now_millis();

            if self.scheduled_rebalance > 0 && now >= self.scheduled_rebalance {
                // the grace window has run out, stop assuming anyone is
                // coming back
                self.reset_delay();
                self.previous_members = workers.iter().cloned().collect();
                missing.clear();
            } else {
                if now < self.scheduled_rebalance {
                    self.delay_ms = self.calculate_delay(now);
                    debug!(
                        delay_ms = self.delay_ms,
                        "delayed rebalance in progress, task reassignment is postponed"
                    );
                } else {
                    self.delay_ms = self.max_delay_ms;
                    debug!(delay_ms = self.delay_ms, "scheduling rebalance delay at the maximum");
                }

                self.scheduled_rebalance = now + i64::from(self.delay_ms);
                workers.extend(missing.iter().cloned());
            }
        }

        workers.sort();

        let task_allocation =
            deal_tasks(connectors, configured_tasks, current_allocation, &workers);
        let connector_allocation = deal_connectors(connectors, &workers);

        // missing workers took part in the deal so their share stays
        // reserved, but no assignment is emitted for them
        workers.retain(|worker| !missing.contains(worker));

        workers
            .into_iter()
            .map(|worker| {
                let allocated = ConnectorsAndTasks::default()
                    .connectors(connector_allocation.get(&worker).cloned().unwrap_or_default())
                    .tasks(task_allocation.get(&worker).cloned().unwrap_or_default());

                (worker, allocated)
            })
            .collect()
    }

    fn calculate_delay(&self, now: i64) -> i32 {
        let remaining = self.scheduled_rebalance - now;

        if remaining > 0 {
            remaining.min(i64::from(self.max_delay_ms)) as i32
        } else {
            0
        }
    }

    fn reset_delay(&mut self) {
        self.scheduled_rebalance = 0;

        if self.delay_ms != 0 {
            debug!(delay_ms = self.delay_ms, "resetting rebalance delay");
        }

        self.delay_ms = 0;
    }
}

impl<C> Assignor for IncrementalAssignor<C>
where
    C: Clock,
{
    fn perform_assignment(
        &mut self,
        leader_id: &str,
        members: &[Member],
        coordinator: &mut dyn Coordinator,
    ) -> Result<BTreeMap<String, Bytes>> {
        debug!("performing assignment");

        let mut member_configs = BTreeMap::new();

        for member in members {
            _ = member_configs.insert(
                member.member_id.clone(),
                WorkerState::try_from(member.metadata.clone())?,
            );
        }
        debug!(?member_configs);

        let Some(max_offset) = member_configs
            .values()
            .map(|state| state.config_offset)
            .max()
        else {
            return Err(Error::EmptyGroup);
        };
        debug!(max_offset, snapshot_offset = coordinator.snapshot().offset);

        let protocol_version = if member_configs
            .values()
            .all(|state| state.assignment.version == REBALANCE_PROTOCOL_V4)
        {
            REBALANCE_PROTOCOL_V4
        } else {
            REBALANCE_PROTOCOL_V3
        };

        let leader_url = member_configs
            .get(leader_id)
            .map(|state| state.url.clone())
            .ok_or_else(|| Error::UnknownLeader(leader_id.to_owned()))?;

        let Some(leader_offset) = self.ensure_leader_config(max_offset, coordinator) else {
            ASSIGNMENT_ROUNDS.add(1, &[KeyValue::new("outcome", "config_mismatch")]);

            let assignments = fill_assignments(
                member_configs.keys(),
                AssignmentError::ConfigMismatch,
                leader_id,
                &leader_url,
                max_offset,
                &BTreeMap::new(),
                &BTreeMap::new(),
                &BTreeMap::new(),
                0,
                protocol_version,
            );

            return serialize_assignments(&assignments);
        };

        self.task_assignment(
            leader_id,
            &leader_url,
            leader_offset,
            &member_configs,
            coordinator,
            protocol_version,
        )
    }
}

/// The per member connector and task ownership filtered to the configured
/// set, for publication through the coordinator.
fn leader_state(
    member_configs: &BTreeMap<String, WorkerState>,
    configured: &ConnectorsAndTasks,
) -> LeaderState {
    LeaderState {
        members: member_configs.clone(),
        connectors: member_configs
            .iter()
            .map(|(worker, state)| {
                (
                    worker.clone(),
                    state
                        .assignment
                        .connectors
                        .intersection(&configured.connectors)
                        .cloned()
                        .collect(),
                )
            })
            .collect(),
        tasks: member_configs
            .iter()
            .map(|(worker, state)| {
                (
                    worker.clone(),
                    state
                        .assignment
                        .tasks
                        .intersection(&configured.tasks)
                        .cloned()
                        .collect(),
                )
            })
            .collect(),
    }
}

#[allow(clippy::too_many_arguments)]
fn fill_assignments<'a>(
    members: impl Iterator<Item = &'a String>,
    error: AssignmentError,
    leader_id: &str,
    leader_url: &str,
    config_offset: i64,
    connector_starts: &BTreeMap<String, BTreeSet<String>>,
    task_starts: &BTreeMap<String, BTreeSet<TaskId>>,
    revoked: &BTreeMap<String, ConnectorsAndTasks>,
    delay_ms: i32,
    protocol_version: i16,
) -> BTreeMap<String, Assignment> {
    members
        .map(|member| {
            let assignment = Assignment::default()
                .version(protocol_version)
                .error(error)
                .leader(leader_id)
                .leader_url(leader_url)
                .config_offset(config_offset)
                .connectors(connector_starts.get(member).cloned().unwrap_or_default())
                .tasks(task_starts.get(member).cloned().unwrap_or_default())
                .revoked_connectors(
                    revoked
                        .get(member)
                        .map(|revoked| revoked.connectors.clone())
                        .unwrap_or_default(),
                )
                .revoked_tasks(
                    revoked
                        .get(member)
                        .map(|revoked| revoked.tasks.clone())
                        .unwrap_or_default(),
                )
                .delay_ms(delay_ms);

            debug!(%member, ?assignment, "filling assignment");

            (member.clone(), assignment)
        })
        .collect()
}

fn serialize_assignments(
    assignments: &BTreeMap<String, Assignment>,
) -> Result<BTreeMap<String, Bytes>> {
    assignments
        .iter()
        .map(|(member, assignment)| {
            Bytes::try_from(assignment)
                .map(|encoded| (member.clone(), encoded))
                .map_err(Into::into)
        })
        .collect()
}
