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

//! Byte level primitives shared by the rebalance payload codecs.
//!
//! Integers are big endian. Strings carry an `i16` length prefix, sequences
//! an `i32` count. Task sets are written flat as connector and index pairs
//! at [`REBALANCE_PROTOCOL_V3`](crate::REBALANCE_PROTOCOL_V3), and as one
//! indices run per connector at
//! [`REBALANCE_PROTOCOL_V4`](crate::REBALANCE_PROTOCOL_V4).

use std::collections::BTreeSet;

use bytes::{Buf as _, BufMut as _, Bytes, BytesMut, TryGetError};
use tracing::debug;

use crate::{Error, REBALANCE_PROTOCOL_V4, Result, TaskId};

/// Copies `length` bytes out of `encoded`, mirroring the bounds checking of
/// [`bytes::Buf::try_get_i16`] and friends, since [`bytes::Buf`] has no
/// fallible counterpart to [`bytes::Buf::copy_to_bytes`].
pub(super) fn try_copy_to_bytes(encoded: &mut Bytes, length: usize) -> Result<Bytes> {
    if encoded.remaining() < length {
        return Err(Error::from(TryGetError {
            requested: length,
            available: encoded.remaining(),
        }));
    }

    Ok(encoded.copy_to_bytes(length))
}

pub(super) fn put_string(encoded: &mut BytesMut, value: &str) -> Result<()> {
    encoded.put_i16(i16::try_from(value.len())?);
    encoded.put_slice(value.as_bytes());
    Ok(())
}

pub(super) fn get_string(encoded: &mut Bytes) -> Result<String> {
    let length = encoded.try_get_i16()?;

    if length < 0 {
        return Err(Error::NegativeLength(i32::from(length)));
    }

    let raw = try_copy_to_bytes(encoded, usize::try_from(length)?)?;
    String::from_utf8(raw.to_vec()).map_err(Into::into)
}

pub(super) fn put_connectors(encoded: &mut BytesMut, connectors: &BTreeSet<String>) -> Result<()> {
    encoded.put_i32(i32::try_from(connectors.len())?);

    for connector in connectors {
        put_string(encoded, connector)?;
    }

    Ok(())
}

pub(super) fn get_connectors(encoded: &mut Bytes) -> Result<BTreeSet<String>> {
    let count = encoded.try_get_i32()?;

    if count < 0 {
        return Err(Error::NegativeLength(count));
    }

    (0..count)
        .map(|_| get_string(encoded))
        .collect::<Result<BTreeSet<_>>>()
}

pub(super) fn put_tasks(
    encoded: &mut BytesMut,
    tasks: &BTreeSet<TaskId>,
    version: i16,
) -> Result<()> {
    if version >= REBALANCE_PROTOCOL_V4 {
        put_tasks_grouped(encoded, tasks)
    } else {
        put_tasks_flat(encoded, tasks)
    }
}

pub(super) fn get_tasks(encoded: &mut Bytes, version: i16) -> Result<BTreeSet<TaskId>> {
    if version >= REBALANCE_PROTOCOL_V4 {
        get_tasks_grouped(encoded)
    } else {
        get_tasks_flat(encoded)
    }
}

fn put_tasks_flat(encoded: &mut BytesMut, tasks: &BTreeSet<TaskId>) -> Result<()> {
    encoded.put_i32(i32::try_from(tasks.len())?);

    for task in tasks {
        put_string(encoded, &task.connector)?;
        encoded.put_i32(task.index);
    }

    Ok(())
}

fn get_tasks_flat(encoded: &mut Bytes) -> Result<BTreeSet<TaskId>> {
    let count = encoded.try_get_i32()?;

    if count < 0 {
        return Err(Error::NegativeLength(count));
    }

    debug!(count);

    (0..count)
        .map(|_| {
            let connector = get_string(encoded)?;
            let index = encoded.try_get_i32()?;
            Ok(TaskId { connector, index })
        })
        .collect::<Result<BTreeSet<_>>>()
}

fn put_tasks_grouped(encoded: &mut BytesMut, tasks: &BTreeSet<TaskId>) -> Result<()> {
    let mut runs: Vec<(&str, Vec<i32>)> = Vec::new();

    for task in tasks {
        match runs.last_mut() {
            Some((connector, indices)) if *connector == task.connector => {
                indices.push(task.index);
            }
            _ => runs.push((task.connector.as_str(), vec![task.index])),
        }
    }

    encoded.put_i32(i32::try_from(runs.len())?);

    for (connector, indices) in runs {
        put_string(encoded, connector)?;
        encoded.put_i32(i32::try_from(indices.len())?);

        for index in indices {
            encoded.put_i32(index);
        }
    }

    Ok(())
}

fn get_tasks_grouped(encoded: &mut Bytes) -> Result<BTreeSet<TaskId>> {
    let runs = encoded.try_get_i32()?;

    if runs < 0 {
        return Err(Error::NegativeLength(runs));
    }

    debug!(runs);

    let mut tasks = BTreeSet::new();

    for _ in 0..runs {
        let connector = get_string(encoded)?;
        let count = encoded.try_get_i32()?;

        if count < 0 {
            return Err(Error::NegativeLength(count));
        }

        for _ in 0..count {
            let index = encoded.try_get_i32()?;
            _ = tasks.insert(TaskId::new(connector.clone(), index));
        }
    }

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use bytes::{Buf as _, BufMut as _};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn string_round_trip() -> Result<()> {
        let mut encoded = BytesMut::new();
        put_string(&mut encoded, "es-app")?;

        assert_eq!("es-app", get_string(&mut encoded.freeze())?);
        Ok(())
    }

    #[test]
    fn empty_string() -> Result<()> {
        let mut encoded = BytesMut::new();
        put_string(&mut encoded, "")?;

        assert_eq!("", get_string(&mut encoded.freeze())?);
        Ok(())
    }

    #[test]
    fn negative_string_length() {
        let mut encoded = BytesMut::new();
        encoded.put_i16(-1);

        assert!(matches!(
            get_string(&mut encoded.freeze()),
            Err(Error::NegativeLength(-1))
        ));
    }

    #[test]
    fn grouped_tasks_share_one_run_per_connector() -> Result<()> {
        let tasks = BTreeSet::from([
            TaskId::new("es-app", 0),
            TaskId::new("es-app", 1),
            TaskId::new("es-app", 2),
            TaskId::new("s3-archive", 0),
        ]);

        let mut encoded = BytesMut::new();
        put_tasks_grouped(&mut encoded, &tasks)?;
        let mut encoded = encoded.freeze();

        assert_eq!(2, encoded.try_get_i32()?);
        assert_eq!("es-app", get_string(&mut encoded)?);
        assert_eq!(3, encoded.try_get_i32()?);

        Ok(())
    }

    #[test]
    fn flat_and_grouped_decode_alike() -> Result<()> {
        let tasks = BTreeSet::from([
            TaskId::new("billing", 4),
            TaskId::new("es-app", 0),
            TaskId::new("es-app", 3),
        ]);

        let mut flat = BytesMut::new();
        put_tasks_flat(&mut flat, &tasks)?;

        let mut grouped = BytesMut::new();
        put_tasks_grouped(&mut grouped, &tasks)?;

        assert_eq!(tasks, get_tasks_flat(&mut flat.freeze())?);
        assert_eq!(tasks, get_tasks_grouped(&mut grouped.freeze())?);
        Ok(())
    }
}
