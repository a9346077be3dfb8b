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

//! Member metadata and assignment payloads exchanged during a rebalance round.

use std::collections::BTreeSet;

use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{Error, REBALANCE_PROTOCOL_V3, REBALANCE_PROTOCOL_V4, Result, TaskId};

mod codec;

/// One member of the worker group as reported by the membership protocol:
/// an identifier together with its still encoded metadata.
#[derive(Clone, Default, Eq, Hash, Debug, Ord, PartialEq, PartialOrd)]
pub struct Member {
    pub member_id: String,
    pub metadata: Bytes,
}

impl Member {
    pub fn member_id(self, member_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            ..self
        }
    }

    pub fn metadata(self, metadata: Bytes) -> Self {
        Self { metadata, ..self }
    }
}

/// The error code carried by an [`Assignment`].
#[derive(
    Clone, Copy, Default, Deserialize, Eq, Hash, Debug, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum AssignmentError {
    #[default]
    None,
    ConfigMismatch,
}

impl From<AssignmentError> for i16 {
    fn from(value: AssignmentError) -> Self {
        match value {
            AssignmentError::None => 0,
            AssignmentError::ConfigMismatch => 1,
        }
    }
}

impl TryFrom<i16> for AssignmentError {
    type Error = Error;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::ConfigMismatch),
            otherwise => Err(Error::UnknownAssignmentError(otherwise)),
        }
    }
}

/// The per worker state submitted to the leader at the start of a rebalance
/// round: the worker's externally reachable URL, the highest configuration
/// offset it has observed, and the assignment it received last round.
///
/// A worker without a prior assignment reports an empty one carrying the
/// version of its own metadata, so version negotiation sees fresh workers.
#[derive(Clone, Default, Deserialize, Eq, Hash, Debug, Ord, PartialEq, PartialOrd, Serialize)]
pub struct WorkerState {
    pub version: i16,
    pub url: String,
    pub config_offset: i64,
    pub assignment: Assignment,
}

impl WorkerState {
    pub fn version(self, version: i16) -> Self {
        Self { version, ..self }
    }

    pub fn url(self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..self
        }
    }

    pub fn config_offset(self, config_offset: i64) -> Self {
        Self {
            config_offset,
            ..self
        }
    }

    pub fn assignment(self, assignment: Assignment) -> Self {
        Self { assignment, ..self }
    }
}

impl TryFrom<Bytes> for WorkerState {
    type Error = Error;

    fn try_from(mut value: Bytes) -> Result<Self, Self::Error> {
        let version = value.try_get_i16()?;

        if !(REBALANCE_PROTOCOL_V3..=REBALANCE_PROTOCOL_V4).contains(&version) {
            return Err(Error::UnsupportedVersion(version));
        }

        let url = codec::get_string(&mut value)?;
        let config_offset = value.try_get_i64()?;

        let assignment = match value.try_get_i32()? {
            -1 => Assignment::default().version(version),
            length if length < 0 => return Err(Error::NegativeLength(length)),
            length => {
                Assignment::try_from(codec::try_copy_to_bytes(
                    &mut value,
                    usize::try_from(length)?,
                )?)?
            }
        };

        Ok(Self {
            version,
            url,
            config_offset,
            assignment,
        })
    }
}

impl TryFrom<&WorkerState> for Bytes {
    type Error = Error;

    fn try_from(value: &WorkerState) -> Result<Self, Self::Error> {
        let mut encoded = BytesMut::new();
        encoded.put_i16(value.version);
        codec::put_string(&mut encoded, &value.url)?;
        encoded.put_i64(value.config_offset);

        // an unversioned assignment is the builder default, a worker that
        // has not been assigned anything yet, written as null
        if value.assignment.version == 0 {
            encoded.put_i32(-1);
        } else {
            let assignment = Bytes::try_from(&value.assignment)?;
            encoded.put_i32(i32::try_from(assignment.len())?);
            encoded.put_slice(&assignment);
        }

        Ok(encoded.freeze())
    }
}

/// The per worker outcome of a rebalance round.
///
/// `connectors` and `tasks` are the units the worker must newly start, while
/// `revoked_connectors` and `revoked_tasks` must be stopped before the next
/// round. `delay_ms` is non zero while a departed worker is still within its
/// grace window.
#[derive(Clone, Default, Deserialize, Eq, Hash, Debug, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Assignment {
    pub version: i16,
    pub error: AssignmentError,
    pub leader: String,
    pub leader_url: String,
    pub config_offset: i64,
    pub connectors: BTreeSet<String>,
    pub tasks: BTreeSet<TaskId>,
    pub revoked_connectors: BTreeSet<String>,
    pub revoked_tasks: BTreeSet<TaskId>,
    pub delay_ms: i32,
}

impl Assignment {
    pub fn version(self, version: i16) -> Self {
        Self { version, ..self }
    }

    pub fn error(self, error: AssignmentError) -> Self {
        Self { error, ..self }
    }

    pub fn leader(self, leader: impl Into<String>) -> Self {
        Self {
            leader: leader.into(),
            ..self
        }
    }

    pub fn leader_url(self, leader_url: impl Into<String>) -> Self {
        Self {
            leader_url: leader_url.into(),
            ..self
        }
    }

    pub fn config_offset(self, config_offset: i64) -> Self {
        Self {
            config_offset,
            ..self
        }
    }

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

    pub fn revoked_connectors(self, revoked_connectors: impl IntoIterator<Item = String>) -> Self {
        Self {
            revoked_connectors: revoked_connectors.into_iter().collect(),
            ..self
        }
    }

    pub fn revoked_tasks(self, revoked_tasks: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            revoked_tasks: revoked_tasks.into_iter().collect(),
            ..self
        }
    }

    pub fn delay_ms(self, delay_ms: i32) -> Self {
        Self { delay_ms, ..self }
    }
}

impl TryFrom<Bytes> for Assignment {
    type Error = Error;

    fn try_from(mut value: Bytes) -> Result<Self, Self::Error> {
        let version = value.try_get_i16()?;

        if !(REBALANCE_PROTOCOL_V3..=REBALANCE_PROTOCOL_V4).contains(&version) {
            return Err(Error::UnsupportedVersion(version));
        }

        let error = AssignmentError::try_from(value.try_get_i16()?)?;
        let leader = codec::get_string(&mut value)?;
        let leader_url = codec::get_string(&mut value)?;
        let config_offset = value.try_get_i64()?;

        let connectors = codec::get_connectors(&mut value)?;
        let tasks = codec::get_tasks(&mut value, version)?;
        let revoked_connectors = codec::get_connectors(&mut value)?;
        let revoked_tasks = codec::get_tasks(&mut value, version)?;

        let delay_ms = value.try_get_i32()?;

        Ok(Self {
            version,
            error,
            leader,
            leader_url,
            config_offset,
            connectors,
            tasks,
            revoked_connectors,
            revoked_tasks,
            delay_ms,
        })
    }
}

impl TryFrom<&Assignment> for Bytes {
    type Error = Error;

    fn try_from(value: &Assignment) -> Result<Self, Self::Error> {
        let mut encoded = BytesMut::new();
        encoded.put_i16(value.version);
        encoded.put_i16(value.error.into());
        codec::put_string(&mut encoded, &value.leader)?;
        codec::put_string(&mut encoded, &value.leader_url)?;
        encoded.put_i64(value.config_offset);

        codec::put_connectors(&mut encoded, &value.connectors)?;
        codec::put_tasks(&mut encoded, &value.tasks, value.version)?;
        codec::put_connectors(&mut encoded, &value.revoked_connectors)?;
        codec::put_tasks(&mut encoded, &value.revoked_tasks, value.version)?;

        encoded.put_i32(value.delay_ms);

        Ok(encoded.freeze())
    }
}
