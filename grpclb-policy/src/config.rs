// SPDX-FileCopyrightText: © 2025 Huawei Cloud Computing Technologies Co., Ltd
// SPDX-License-Identifier: Apache-2.0
//
// Copyright 2025 Huawei Cloud Computing Technologies Co., Ltd
//
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for the policy; callers embed this in their own configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GrpclbConfig {
    pub backoff: BackoffConfig,
    pub empty_serverlist: EmptyServerListPolicy,
}

/// Retry delays for the balancer call: multiplicative growth with jitter,
/// bounded between `min_delay` and `max_delay`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            min_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            multiplier: 1.6,
            jitter: 0.2,
        }
    }
}

/// What to do when the balancer sends a serverlist with zero entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyServerListPolicy {
    /// Keep serving from the currently installed backends, if any.
    #[default]
    KeepCurrent,
    /// Treat the empty list as "no capacity": drop the installed backends so
    /// new picks queue until the balancer sends a non-empty list.
    DropBackends,
}
