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
//! Leader side rebalancing for a group of pipeline connector workers.
//!
//! Once per rebalance round the elected leader hands the whole membership to
//! an [`assignor::Assignor`], which decides the connectors and tasks each
//! worker starts, keeps or stops. The provided
//! [`assignor::IncrementalAssignor`] follows the incremental cooperative
//! discipline: work already owned by a worker that still deserves it is
//! never revoked, stops and starts of the same unit are separated across
//! rounds, and workers that disappear are given a bounded grace window
//! before their share is redistributed.
//!
//! The assignor reaches its surroundings through three seams: the
//! [`coordinator::Coordinator`] membership and snapshot interface, the
//! [`snapshot::ConfigSnapshot`] view of the configured connectors, and the
//! injectable [`clock::Clock`].

use std::{
    fmt::{self, Display, Formatter},
    result,
    sync::LazyLock,
};

use opentelemetry::{InstrumentationScope, global, metrics::Meter};
use opentelemetry_semantic_conventions::SCHEMA_URL;
use thiserror::Error;

pub mod assignor;
pub mod clock;
pub mod coordinator;
pub mod snapshot;

pub(crate) static METER: LazyLock<Meter> = LazyLock::new(|| {
    global::meter_with_scope(
        InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(SCHEMA_URL)
            .build(),
    )
});

#[derive(Clone, Debug, Error)]
pub enum Error {
    EmptyGroup,
    Message(String),
    Protocol(#[from] weir_sans_io::Error),
    UnknownLeader(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

pub type Result<T, E = Error> = result::Result<T, E>;
