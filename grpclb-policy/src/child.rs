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

use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, watch};

use crate::pick::PickContext;
use crate::serverlist::BackendEndpoint;
use crate::state::ConnectivityState;
use crate::{PolicyError, Result};

/// Outcome of handing a pick to a child policy.
pub enum ChildPick {
    /// The child chose synchronously; the context comes back to the caller
    /// for completion.
    Ready(Option<Arc<BackendEndpoint>>, PickContext),
    /// The child kept the context and will complete it asynchronously.
    Deferred,
}

/// The inner policy that picks among a fixed set of backends. The grpclb
/// policy builds one per adopted serverlist and routes picks, pings and
/// connectivity through it.
///
/// Implementations are invoked under the policy's coordinator lock and must
/// not call back into the policy from within these methods.
pub trait ChildPolicy: Debug + Send + Sync {
    fn pick(&self, ctx: PickContext) -> ChildPick;
    fn ping(&self, notify: oneshot::Sender<Result<()>>);
    fn exit_idle(&self);
    fn connectivity(&self) -> ConnectivityState;
    /// Stream of connectivity changes; intermediate values may coalesce but
    /// the latest state is always observed.
    fn watch_connectivity(&self) -> watch::Receiver<ConnectivityState>;
}

/// Builds a child policy over the decoded backends of one serverlist.
pub trait ChildPolicyFactory: Send + Sync {
    fn build(&self, backends: Vec<BackendEndpoint>) -> Result<Arc<dyn ChildPolicy>>;
}

/// Default child policy: rotates over the backends in serverlist order.
/// The backends are plain addresses with token user-data, so the instance is
/// usable as soon as it exists.
#[derive(Debug)]
pub struct RoundRobin {
    backends: Vec<Arc<BackendEndpoint>>,
    cursor: AtomicUsize,
    state: watch::Sender<ConnectivityState>,
}

impl RoundRobin {
    pub fn new(backends: Vec<BackendEndpoint>) -> Result<Self> {
        if backends.is_empty() {
            return Err(PolicyError::ChildPolicyBuild("round robin needs at least one backend".to_owned()));
        }
        Ok(RoundRobin {
            backends: backends.into_iter().map(Arc::new).collect(),
            cursor: AtomicUsize::new(0),
            state: watch::channel(ConnectivityState::Ready).0,
        })
    }

    fn next_backend(&self) -> Arc<BackendEndpoint> {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.backends.len();
        Arc::clone(&self.backends[idx])
    }
}

impl ChildPolicy for RoundRobin {
    fn pick(&self, ctx: PickContext) -> ChildPick {
        ChildPick::Ready(Some(self.next_backend()), ctx)
    }

    fn ping(&self, notify: oneshot::Sender<Result<()>>) {
        let _ = notify.send(Ok(()));
    }

    fn exit_idle(&self) {}

    fn connectivity(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    fn watch_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }
}

/// Factory for [`RoundRobin`] children.
#[derive(Debug, Default)]
pub struct RoundRobinFactory;

impl ChildPolicyFactory for RoundRobinFactory {
    fn build(&self, backends: Vec<BackendEndpoint>) -> Result<Arc<dyn ChildPolicy>> {
        Ok(Arc::new(RoundRobin::new(backends)?))
    }
}

#[cfg(test)]
mod tests {
    use tonic::metadata::MetadataMap;

    use super::*;
    use crate::pick::PickId;

    fn backends(n: usize) -> Vec<BackendEndpoint> {
        (0..n)
            .map(|i| BackendEndpoint {
                address: format!("10.0.0.{}:80", i + 1).parse().unwrap(),
                token: format!("tok-{i}").parse().unwrap(),
            })
            .collect()
    }

    fn picked_address(rr: &RoundRobin, id: u64) -> std::net::SocketAddr {
        let (ctx, _rx) = PickContext::new(PickId(id), 0, MetadataMap::new());
        match rr.pick(ctx) {
            ChildPick::Ready(Some(backend), _ctx) => backend.address,
            _ => panic!("round robin picks synchronously"),
        }
    }

    #[test]
    fn rotates_in_serverlist_order() {
        let rr = RoundRobin::new(backends(3)).unwrap();
        let picked: Vec<_> = (0..6).map(|i| picked_address(&rr, i)).collect();
        assert_eq!(picked[0], picked[3]);
        assert_eq!(picked[1], picked[4]);
        assert_eq!(picked[2], picked[5]);
        assert_ne!(picked[0], picked[1]);
        assert_ne!(picked[1], picked[2]);
    }

    #[test]
    fn refuses_an_empty_backend_set() {
        assert!(matches!(RoundRobin::new(Vec::new()), Err(PolicyError::ChildPolicyBuild(_))));
    }

    #[test]
    fn starts_ready() {
        let rr = RoundRobin::new(backends(1)).unwrap();
        assert_eq!(rr.connectivity(), ConnectivityState::Ready);
    }
}
