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

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use grpclb_api::grpc_lb_v1::ServerList;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::child::{ChildPick, ChildPolicy, ChildPolicyFactory, RoundRobinFactory};
use crate::config::GrpclbConfig;
use crate::pending::PendingQueues;
use crate::pick::{PickArgs, PickContext, PickDisposition, PickId, PickTicket};
use crate::session::{self, LoadBalancerBinding, SessionSlot, SessionState, TonicLoadBalancerBinding};
use crate::state::ConnectivityState;
use crate::trace::glb_trace;
use crate::{PolicyError, Result};

/// Name under which the factory registers itself.
pub const GRPCLB_POLICY_NAME: &str = "grpclb";

pub(crate) struct RrSlot {
    pub child: Option<Arc<dyn ChildPolicy>>,
    pub last_state: ConnectivityState,
    /// Bumped on every install/release; outdated connectivity subscriptions
    /// see the mismatch and stop.
    pub watch_generation: u64,
}

/// Everything behind the coordinator lock. Each transition touches several of
/// these fields at once, which is why a single lock serializes them.
pub(crate) struct Core {
    pub started_picking: bool,
    pub shutting_down: bool,
    pub deadline: Option<tokio::time::Instant>,
    pub state: ConnectivityState,
    pub state_error: Option<Arc<PolicyError>>,
    pub pending: PendingQueues,
    pub session: SessionSlot,
    pub rr: RrSlot,
    pub serverlist: Option<ServerList>,
    pub backoff: Backoff,
}

pub(crate) struct PolicyInner {
    pub server_name: String,
    pub config: GrpclbConfig,
    pub binding: Arc<dyn LoadBalancerBinding>,
    pub child_factory: Arc<dyn ChildPolicyFactory>,
    pub core: Mutex<Core>,
    state_watch: watch::Sender<ConnectivityState>,
    next_pick_id: AtomicU64,
}

impl PolicyInner {
    /// Moves the aggregate connectivity state. Never called with `Shutdown`
    /// outside the shutdown path.
    pub(crate) fn set_state(
        &self,
        core: &mut Core,
        state: ConnectivityState,
        error: Option<Arc<PolicyError>>,
        reason: &str,
    ) {
        if core.state != state {
            glb_trace!("connectivity {} -> {state} ({reason})", core.state);
        }
        core.state = state;
        core.state_error = error;
        self.state_watch.send_replace(state);
    }

    fn issue_pick_id(&self) -> PickId {
        PickId(self.next_pick_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Flips `started_picking` and launches the one balancer session this
    /// policy runs. Called at most once outside shutdown.
    fn start_picking(self: &Arc<Self>, core: &mut Core) {
        core.started_picking = true;
        core.backoff.reset();
        session::start(self, core);
    }
}

/// The grpclb policy: selects backends through an external balancer, echoing
/// each backend's LB token on the picked call's initial metadata.
pub struct GrpclbPolicy {
    inner: Arc<PolicyInner>,
}

impl GrpclbPolicy {
    /// Assembles a policy from its collaborators. Most callers go through
    /// [`GrpclbFactory`]; tests inject scripted bindings and children.
    pub fn new(
        server_name: impl Into<String>,
        binding: Arc<dyn LoadBalancerBinding>,
        child_factory: Arc<dyn ChildPolicyFactory>,
        config: GrpclbConfig,
    ) -> Self {
        let backoff = Backoff::new(config.backoff.clone());
        let inner = Arc::new(PolicyInner {
            server_name: server_name.into(),
            config,
            binding,
            child_factory,
            core: Mutex::new(Core {
                started_picking: false,
                shutting_down: false,
                deadline: None,
                state: ConnectivityState::Idle,
                state_error: None,
                pending: PendingQueues::default(),
                session: SessionSlot::default(),
                rr: RrSlot { child: None, last_state: ConnectivityState::Idle, watch_generation: 0 },
                serverlist: None,
                backoff,
            }),
            state_watch: watch::channel(ConnectivityState::Idle).0,
            next_pick_id: AtomicU64::new(1),
        });
        GrpclbPolicy { inner }
    }

    /// Selects a backend for one outgoing call. With a child policy installed
    /// the pick goes straight through (and may still resolve asynchronously);
    /// otherwise it queues until a serverlist produces a child, starting the
    /// balancer session on first use.
    pub fn pick(&self, args: PickArgs) -> Result<PickDisposition> {
        let PickArgs { metadata, flags, deadline } = args;
        let Some(metadata) = metadata else {
            return Err(PolicyError::MissingTokenStorage);
        };
        let inner = &self.inner;
        let mut core = inner.core.lock();
        if core.shutting_down {
            return Err(PolicyError::ChannelShutdown);
        }
        core.deadline = deadline;
        let id = inner.issue_pick_id();
        let (mut ctx, reply) = PickContext::new(id, flags, metadata);
        if let Some(child) = core.rr.child.clone() {
            glb_trace!("about to pick from the child policy");
            ctx.attach_child(Arc::clone(&child));
            match child.pick(ctx) {
                ChildPick::Ready(backend, ctx) => Ok(PickDisposition::Complete(ctx.finish(backend))),
                ChildPick::Deferred => Ok(PickDisposition::Pending(PickTicket::new(id, reply))),
            }
        } else {
            glb_trace!("no child policy yet, queueing pick");
            core.pending.enqueue_pick(ctx);
            if !core.started_picking {
                inner.start_picking(&mut core);
            }
            Ok(PickDisposition::Pending(PickTicket::new(id, reply)))
        }
    }

    /// Queues or forwards a connectivity ping; resolves once a child policy
    /// answers it.
    pub fn ping(&self) -> oneshot::Receiver<Result<()>> {
        let (notify, rx) = oneshot::channel();
        let inner = &self.inner;
        let mut core = inner.core.lock();
        if core.shutting_down {
            let _ = notify.send(Err(PolicyError::ChannelShutdown));
            return rx;
        }
        if let Some(child) = core.rr.child.clone() {
            child.ping(notify);
        } else {
            core.pending.enqueue_ping(notify);
            if !core.started_picking {
                inner.start_picking(&mut core);
            }
        }
        rx
    }

    /// Cancels a still-queued pick. Picks already forwarded to a child are
    /// cancelled through the child's own mechanism.
    pub fn cancel_pick(&self, id: PickId, reason: &str) {
        let mut core = self.inner.core.lock();
        let cancelled = core.pending.cancel_picks_matching(
            |ctx| ctx.id == id,
            || PolicyError::PickCancelled { reason: reason.to_owned() },
        );
        if cancelled > 0 {
            glb_trace!("cancelled queued pick {id:?}: {reason}");
        }
    }

    /// Cancels every queued pick whose flags satisfy
    /// `(flags & mask) == needle`.
    pub fn cancel_picks_by_flags(&self, mask: u32, needle: u32, reason: &str) {
        let mut core = self.inner.core.lock();
        let cancelled = core.pending.cancel_picks_matching(
            |ctx| (ctx.flags & mask) == needle,
            || PolicyError::PickCancelled { reason: reason.to_owned() },
        );
        glb_trace!("cancelled {cancelled} queued picks matching {mask:#x}/{needle:#x}");
    }

    /// Starts the balancer session if nothing has triggered it yet.
    pub fn exit_idle(&self) {
        let inner = &self.inner;
        let mut core = inner.core.lock();
        if !core.started_picking && !core.shutting_down {
            inner.start_picking(&mut core);
        }
    }

    pub fn check_connectivity(&self) -> (ConnectivityState, Option<Arc<PolicyError>>) {
        let core = self.inner.core.lock();
        (core.state, core.state_error.clone())
    }

    /// Edge-triggered view of the aggregate connectivity state.
    pub fn watch_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.inner.state_watch.subscribe()
    }

    pub fn session_state(&self) -> SessionState {
        self.inner.core.lock().session.state
    }

    /// Shuts the policy down: queued picks complete with no backend and no
    /// error, queued pings complete successfully, the balancer call is
    /// cancelled, and no further session, child, or timer is created.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        let mut core = inner.core.lock();
        if core.shutting_down {
            return;
        }
        core.shutting_down = true;
        let picks = core.pending.drain_picks();
        let pings = core.pending.drain_pings();
        core.rr.child = None;
        core.rr.watch_generation += 1;
        let cancel = core.session.cancel.take();
        core.session.state = SessionState::Idle;
        inner.set_state(
            &mut core,
            ConnectivityState::Shutdown,
            Some(Arc::new(PolicyError::ChannelShutdown)),
            "policy shutdown",
        );
        drop(core);

        // user-visible completions happen outside the lock
        if let Some(cancel) = cancel {
            let _ = cancel.send(true);
        }
        for ctx in picks {
            ctx.complete(None);
        }
        for ping in pings {
            let _ = ping.notify.send(Ok(()));
        }
    }
}

impl Drop for GrpclbPolicy {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One resolved address as handed over by the resolver, flagged as balancer
/// or backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbAddress {
    pub address: SocketAddr,
    pub is_balancer: bool,
}

/// Arguments for [`GrpclbFactory::create`].
#[derive(Debug, Clone)]
pub struct PolicyArgs {
    /// Target service name, sent to the balancer in the initial request.
    pub server_name: String,
    pub addresses: Vec<LbAddress>,
    pub config: GrpclbConfig,
}

/// Builds the transport for the balancer channel from its URI-joined target.
pub trait LbChannelFactory: Send + Sync {
    fn create(&self, target: &str) -> Result<Arc<dyn LoadBalancerBinding>>;
}

/// Default channel factory: a lazily connecting tonic channel balanced over
/// the listed endpoints, using the transport's default policy underneath.
#[derive(Debug, Default)]
pub struct TonicChannelFactory;

impl LbChannelFactory for TonicChannelFactory {
    fn create(&self, target: &str) -> Result<Arc<dyn LoadBalancerBinding>> {
        let mut endpoints = Vec::new();
        for entry in target.split(',') {
            let authority = entry.trim_start_matches("ipv4:").trim_start_matches("ipv6:");
            let endpoint = Endpoint::from_shared(format!("http://{authority}"))
                .map_err(|error| PolicyError::LbChannelBuild(error.to_string()))?;
            endpoints.push(endpoint);
        }
        let channel = Channel::balance_list(endpoints.into_iter());
        Ok(Arc::new(TonicLoadBalancerBinding::new(channel)))
    }
}

/// Joins the balancer addresses into the channel target, scheme-prefixing the
/// first entry the way resolver output is formatted.
fn join_balancer_target(balancers: &[SocketAddr]) -> String {
    balancers
        .iter()
        .enumerate()
        .map(|(idx, address)| match (idx, address) {
            (0, SocketAddr::V4(_)) => format!("ipv4:{address}"),
            (0, SocketAddr::V6(_)) => format!("ipv6:{address}"),
            _ => address.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Factory for the `"grpclb"` policy. Yields no policy unless the arguments
/// carry a server name and at least one balancer address.
pub struct GrpclbFactory {
    channel_factory: Arc<dyn LbChannelFactory>,
    child_factory: Arc<dyn ChildPolicyFactory>,
}

impl Default for GrpclbFactory {
    fn default() -> Self {
        GrpclbFactory { channel_factory: Arc::new(TonicChannelFactory), child_factory: Arc::new(RoundRobinFactory) }
    }
}

impl GrpclbFactory {
    pub fn new(channel_factory: Arc<dyn LbChannelFactory>, child_factory: Arc<dyn ChildPolicyFactory>) -> Self {
        GrpclbFactory { channel_factory, child_factory }
    }

    pub fn name(&self) -> &'static str {
        GRPCLB_POLICY_NAME
    }

    pub fn create(&self, args: PolicyArgs) -> Option<GrpclbPolicy> {
        let balancers: Vec<SocketAddr> =
            args.addresses.iter().filter(|addr| addr.is_balancer).map(|addr| addr.address).collect();
        if balancers.is_empty() {
            debug!("no balancer addresses among {} resolved entries, not creating a grpclb policy", args.addresses.len());
            return None;
        }
        if args.server_name.is_empty() {
            debug!("missing server name, not creating a grpclb policy");
            return None;
        }
        let target = join_balancer_target(&balancers);
        let binding = match self.channel_factory.create(&target) {
            Ok(binding) => binding,
            Err(error) => {
                warn!("failed to create the balancer channel over '{target}': {error}");
                return None;
            },
        };
        Some(GrpclbPolicy::new(args.server_name, binding, Arc::clone(&self.child_factory), args.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balancer(address: &str) -> LbAddress {
        LbAddress { address: address.parse().unwrap(), is_balancer: true }
    }

    fn backend(address: &str) -> LbAddress {
        LbAddress { address: address.parse().unwrap(), is_balancer: false }
    }

    #[test]
    fn target_joins_balancers_with_a_scheme_on_the_first_entry() {
        let target = join_balancer_target(&[
            "10.0.0.1:3000".parse().unwrap(),
            "10.0.0.2:3000".parse().unwrap(),
        ]);
        assert_eq!(target, "ipv4:10.0.0.1:3000,10.0.0.2:3000");

        let v6 = join_balancer_target(&["[::1]:3000".parse().unwrap()]);
        assert_eq!(v6, "ipv6:[::1]:3000");
    }

    #[tokio::test]
    async fn factory_requires_a_balancer_address_and_a_server_name() {
        let factory = GrpclbFactory::default();
        let config = GrpclbConfig::default();

        let no_balancers = PolicyArgs {
            server_name: "svc.example.com".to_owned(),
            addresses: vec![backend("10.0.0.1:80")],
            config: config.clone(),
        };
        assert!(factory.create(no_balancers).is_none());

        let no_name = PolicyArgs {
            server_name: String::new(),
            addresses: vec![balancer("10.0.0.9:3000")],
            config: config.clone(),
        };
        assert!(factory.create(no_name).is_none());

        let good = PolicyArgs {
            server_name: "svc.example.com".to_owned(),
            addresses: vec![backend("10.0.0.1:80"), balancer("10.0.0.9:3000")],
            config,
        };
        assert!(factory.create(good).is_some());
    }
}
