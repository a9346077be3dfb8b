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
//
//! The connector rebalance protocol without I/O (it operates only on bytes)
//!
//! Workers in a pipeline group report their state to the group leader as an
//! opaque metadata payload, and the leader answers each of them with an
//! assignment payload. This crate owns both payloads and their byte level
//! codecs, together with the identifiers shared by every layer above:
//! [`TaskId`], the protocol version constants and the assignment error code.
//!
//! Two wire versions are recognised. [`REBALANCE_PROTOCOL_V3`] writes task
//! sets as a flat sequence of connector and index pairs, while
//! [`REBALANCE_PROTOCOL_V4`] groups the indices of each connector into a
//! single run. Both decode into the same in memory representation.
//!
//! Encoding an assignment and reading it back:
//!
//! ```
//! # use weir_sans_io::Error;
//! # fn main() -> Result<(), Error> {
//! use bytes::Bytes;
//! use weir_sans_io::{
//!     REBALANCE_PROTOCOL_V4, TaskId,
//!     rebalance::{Assignment, AssignmentError},
//! };
//!
//! let assignment = Assignment::default()
//!     .version(REBALANCE_PROTOCOL_V4)
//!     .error(AssignmentError::None)
//!     .leader("worker-a")
//!     .leader_url("tcp://10.0.0.1:8083/")
//!     .config_offset(42)
//!     .connectors(["es-payments".into()])
//!     .tasks((0..4).map(|index| TaskId::new("es-payments", index)))
//!     .delay_ms(0);
//!
//! let encoded = Bytes::try_from(&assignment)?;
//! assert_eq!(assignment, Assignment::try_from(encoded)?);
//! # Ok(())
//! # }
//! ```

pub mod rebalance;

use std::{
    fmt::{self, Display, Formatter},
    num, result, string,
    sync::Arc,
};

use bytes::TryGetError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The oldest rebalance protocol version understood by this crate.
pub const REBALANCE_PROTOCOL_V3: i16 = 3;

/// The current rebalance protocol version.
pub const REBALANCE_PROTOCOL_V4: i16 = 4;

#[derive(Clone, Debug, Error)]
pub enum Error {
    FromUtf8(#[from] string::FromUtf8Error),
    Message(String),
    NegativeLength(i32),
    TryFromInt(#[from] num::TryFromIntError),
    TryGet(Arc<TryGetError>),
    UnknownAssignmentError(i16),
    UnsupportedVersion(i16),
}

impl From<TryGetError> for Error {
    fn from(value: TryGetError) -> Self {
        Self::TryGet(Arc::new(value))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::Message(e) => f.write_str(e),
            e => write!(f, "{e:?}"),
        }
    }
}

pub type Result<T, E = Error> = result::Result<T, E>;

/// One execution unit of a connector, named by the connector it belongs to
/// and its index within that connector.
#[derive(Clone, Default, Deserialize, Eq, Hash, Debug, Ord, PartialEq, PartialOrd, Serialize)]
pub struct TaskId {
    pub connector: String,
    pub index: i32,
}

impl TaskId {
    pub fn new(connector: impl Into<String>, index: i32) -> Self {
        Self {
            connector: connector.into(),
            index,
        }
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.connector, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_ordering_is_connector_then_index() {
        let mut tasks = [
            TaskId::new("es-logs", 2),
            TaskId::new("archive", 0),
            TaskId::new("es-logs", 0),
        ];
        tasks.sort();

        assert_eq!(
            [
                TaskId::new("archive", 0),
                TaskId::new("es-logs", 0),
                TaskId::new("es-logs", 2),
            ],
            tasks
        );
    }

    #[test]
    fn task_id_display() {
        assert_eq!("s3-archive-7", TaskId::new("s3-archive", 7).to_string());
    }
}
