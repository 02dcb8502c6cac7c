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

//! Client-side load-balancing policy that delegates backend selection to an
//! external balancer over a streaming `grpc.lb.v1` call.
//!
//! The balancer returns a time-varying list of backends, each tagged with an
//! opaque token. The policy builds a child (round-robin by default) policy
//! over every adopted list, routes application picks and pings through it,
//! and echoes the chosen backend's token on the call's initial metadata so
//! the backend can account for the pick. The balancer call itself is retried
//! with bounded, jittered backoff whenever it terminates.

pub mod backoff;
pub mod child;
pub mod config;
pub mod pick;
pub mod policy;
pub mod serverlist;
pub mod session;
pub mod state;
pub mod trace;

mod pending;
mod supervisor;

pub use child::{ChildPick, ChildPolicy, ChildPolicyFactory, RoundRobin, RoundRobinFactory};
pub use config::{BackoffConfig, EmptyServerListPolicy, GrpclbConfig};
pub use pick::{CompletedPick, PickArgs, PickContext, PickDisposition, PickId, PickTicket};
pub use policy::{
    GrpclbFactory, GrpclbPolicy, LbAddress, LbChannelFactory, PolicyArgs, TonicChannelFactory, GRPCLB_POLICY_NAME,
};
pub use serverlist::{BackendEndpoint, LB_TOKEN_METADATA_KEY};
pub use session::{LbResponseStream, LoadBalancerBinding, SessionState, TonicLoadBalancerBinding};
pub use state::ConnectivityState;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PolicyError>;

#[derive(Debug, Error)]
pub enum PolicyError {
    /// The pick carried no initial-metadata buffer to receive the LB token;
    /// usage accounting would silently break, so the pick fails up front.
    #[error("pick has no initial metadata to carry the LB token")]
    MissingTokenStorage,
    #[error("pick cancelled: {reason}")]
    PickCancelled { reason: String },
    #[error("channel shutdown")]
    ChannelShutdown,
    /// A balancer message that failed validation; dropped, the stream goes on.
    #[error("invalid balancer response: {0}")]
    InvalidLbResponse(String),
    /// The balancer call terminated; drives the retry path, never surfaced to
    /// pick callers.
    #[error("balancer call ended: {0}")]
    LbCallEnded(tonic::Status),
    #[error("failed to build child policy: {0}")]
    ChildPolicyBuild(String),
    #[error("failed to create balancer channel: {0}")]
    LbChannelBuild(String),
}
