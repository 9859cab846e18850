// Copyright ⓒ 2024-2025 Peter Morgan <peter.james.morgan@gmail.com>
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

//! Consumer configuration.

use std::str::FromStr;

use url::Url;

use crate::Error;

pub const DEFAULT_SESSION_TIMEOUT_MS: i32 = 10_000;
pub const DEFAULT_REBALANCE_TIMEOUT_MS: i32 = 60_000;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_AUTO_COMMIT_INTERVAL_MS: u64 = 5_000;

/// Where to position a partition whose committed offset is unknown or
/// expired.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AutoOffsetReset {
    #[default]
    Earliest,
    Latest,

    /// surface the unknown offset to the caller instead of resetting
    None,
}

impl AutoOffsetReset {
    const EARLIEST: &str = "earliest";
    const LATEST: &str = "latest";
    const NONE: &str = "none";
}

impl AsRef<str> for AutoOffsetReset {
    fn as_ref(&self) -> &str {
        match self {
            Self::Earliest => Self::EARLIEST,
            Self::Latest => Self::LATEST,
            Self::None => Self::NONE,
        }
    }
}

impl FromStr for AutoOffsetReset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            Self::EARLIEST => Ok(Self::Earliest),
            Self::LATEST => Ok(Self::Latest),
            Self::NONE => Ok(Self::None),
            otherwise => Err(Error::UnknownOffsetReset(otherwise.into())),
        }
    }
}

/// Configuration of one consumer instance.
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) bootstrap: Vec<Url>,
    pub(crate) client_id: Option<String>,
    pub(crate) group_id: String,
    pub(crate) partition_assignment_strategy: String,
    pub(crate) heartbeat_interval_ms: u64,
    pub(crate) session_timeout_ms: i32,
    pub(crate) rebalance_timeout_ms: i32,
    pub(crate) enable_auto_commit: bool,
    pub(crate) auto_commit_interval_ms: u64,
    pub(crate) auto_offset_reset: AutoOffsetReset,

    /// passed through on commit, `-1` for the broker retention default
    pub(crate) offset_retention_ms: i64,
}

impl Config {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            bootstrap: Vec::new(),
            client_id: None,
            group_id: group_id.into(),
            partition_assignment_strategy: "range".into(),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            rebalance_timeout_ms: DEFAULT_REBALANCE_TIMEOUT_MS,
            enable_auto_commit: true,
            auto_commit_interval_ms: DEFAULT_AUTO_COMMIT_INTERVAL_MS,
            auto_offset_reset: AutoOffsetReset::default(),
            offset_retention_ms: -1,
        }
    }

    pub fn bootstrap(self, bootstrap: impl IntoIterator<Item = Url>) -> Self {
        Self {
            bootstrap: bootstrap.into_iter().collect(),
            ..self
        }
    }

    pub fn client_id(self, client_id: Option<String>) -> Self {
        Self { client_id, ..self }
    }

    pub fn partition_assignment_strategy(self, strategy: impl Into<String>) -> Self {
        Self {
            partition_assignment_strategy: strategy.into(),
            ..self
        }
    }

    pub fn heartbeat_interval_ms(self, heartbeat_interval_ms: u64) -> Self {
        Self {
            heartbeat_interval_ms,
            ..self
        }
    }

    pub fn session_timeout_ms(self, session_timeout_ms: i32) -> Self {
        Self {
            session_timeout_ms,
            ..self
        }
    }

    pub fn rebalance_timeout_ms(self, rebalance_timeout_ms: i32) -> Self {
        Self {
            rebalance_timeout_ms,
            ..self
        }
    }

    pub fn enable_auto_commit(self, enable_auto_commit: bool) -> Self {
        Self {
            enable_auto_commit,
            ..self
        }
    }

    pub fn auto_commit_interval_ms(self, auto_commit_interval_ms: u64) -> Self {
        Self {
            auto_commit_interval_ms,
            ..self
        }
    }

    pub fn auto_offset_reset(self, auto_offset_reset: AutoOffsetReset) -> Self {
        Self {
            auto_offset_reset,
            ..self
        }
    }

    pub fn offset_retention_ms(self, offset_retention_ms: i64) -> Self {
        Self {
            offset_retention_ms,
            ..self
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }
}
