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

//! Property-based tests for the rebalance payload codecs.
//!
//! Arbitrary assignments and worker states, at both protocol versions and
//! across connector naming conventions, must survive encoding without data
//! loss, and decoding must consume the payload exactly.

use std::collections::BTreeSet;

use bytes::Bytes;
use proptest::prelude::*;
use weir_sans_io::{
    REBALANCE_PROTOCOL_V3, REBALANCE_PROTOCOL_V4, TaskId,
    rebalance::{Assignment, AssignmentError, WorkerState},
};

fn arb_connector() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{1,8}",
        "s3-[a-z]{1,8}",
        "es-[a-z]{1,8}",
        Just(String::from("s3")),
        Just(String::from("es")),
    ]
}

fn arb_tasks(max: usize) -> impl Strategy<Value = BTreeSet<TaskId>> {
    prop::collection::btree_set((arb_connector(), 0i32..32), 0..=max)
        .prop_map(|tasks| {
            tasks
                .into_iter()
                .map(|(connector, index)| TaskId::new(connector, index))
                .collect()
        })
}

fn arb_connectors(max: usize) -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set(arb_connector(), 0..=max)
}

fn arb_version() -> impl Strategy<Value = i16> {
    prop_oneof![
        Just(REBALANCE_PROTOCOL_V3),
        Just(REBALANCE_PROTOCOL_V4),
    ]
}

fn arb_error() -> impl Strategy<Value = AssignmentError> {
    prop_oneof![
        Just(AssignmentError::None),
        Just(AssignmentError::ConfigMismatch),
    ]
}

fn arb_assignment() -> impl Strategy<Value = Assignment> {
    (
        arb_version(),
        arb_error(),
        "[a-z0-9-]{1,16}",
        "[a-z0-9:/.-]{0,24}",
        0i64..=i64::MAX / 2,
        arb_connectors(4),
        arb_tasks(12),
        arb_connectors(4),
        arb_tasks(12),
        0i32..=i32::MAX / 2,
    )
        .prop_map(
            |(
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
            )| {
                Assignment::default()
                    .version(version)
                    .error(error)
                    .leader(leader)
                    .leader_url(leader_url)
                    .config_offset(config_offset)
                    .connectors(connectors)
                    .tasks(tasks)
                    .revoked_connectors(revoked_connectors)
                    .revoked_tasks(revoked_tasks)
                    .delay_ms(delay_ms)
            },
        )
}

proptest! {
    #[test]
    fn assignment_encode_decode(assignment in arb_assignment()) {
        let encoded = Bytes::try_from(&assignment)?;
        prop_assert_eq!(assignment, Assignment::try_from(encoded)?);
    }

    #[test]
    fn worker_state_encode_decode(
        version in arb_version(),
        url in "[a-z0-9:/.-]{0,24}",
        config_offset in 0i64..=i64::MAX / 2,
        assignment in arb_assignment(),
    ) {
        let state = WorkerState::default()
            .version(version)
            .url(url)
            .config_offset(config_offset)
            .assignment(assignment);

        let encoded = Bytes::try_from(&state)?;
        prop_assert_eq!(state, WorkerState::try_from(encoded)?);
    }

    #[test]
    fn encoding_is_canonical(assignment in arb_assignment()) {
        let encoded = Bytes::try_from(&assignment)?;
        let replayed = Bytes::try_from(&Assignment::try_from(encoded.clone())?)?;
        prop_assert_eq!(encoded, replayed);
    }
}
