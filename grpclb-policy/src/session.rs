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

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use grpclb_api::grpc_lb_v1::load_balancer_client::LoadBalancerClient;
use grpclb_api::grpc_lb_v1::{
    load_balance_request, load_balance_response, InitialLoadBalanceRequest, LoadBalanceRequest, LoadBalanceResponse,
};
use tokio::sync::watch;
use tonic::transport::Channel;
use tonic::Status;
use tracing::{debug, warn};

use crate::config::EmptyServerListPolicy;
use crate::policy::{Core, PolicyInner};
use crate::serverlist;
use crate::supervisor;
use crate::trace::glb_trace;
use crate::PolicyError;

/// A live `BalanceLoad` response stream.
pub type LbResponseStream = Pin<Box<dyn Stream<Item = std::result::Result<LoadBalanceResponse, Status>> + Send>>;

/// Seam over the transport used to reach the balancer; production wraps a
/// tonic channel, tests script the stream.
pub trait LoadBalancerBinding: Send + Sync {
    /// Opens one `BalanceLoad` call. The request message is sent once and the
    /// send side stays open for the lifetime of the call.
    fn balance_load(
        &self,
        request: LoadBalanceRequest,
        timeout: Option<Duration>,
    ) -> BoxFuture<'static, std::result::Result<LbResponseStream, Status>>;
}

/// Production binding over a lazily connecting tonic [`Channel`].
#[derive(Debug, Clone)]
pub struct TonicLoadBalancerBinding {
    channel: Channel,
}

impl TonicLoadBalancerBinding {
    pub fn new(channel: Channel) -> Self {
        TonicLoadBalancerBinding { channel }
    }
}

impl LoadBalancerBinding for TonicLoadBalancerBinding {
    fn balance_load(
        &self,
        request: LoadBalanceRequest,
        timeout: Option<Duration>,
    ) -> BoxFuture<'static, std::result::Result<LbResponseStream, Status>> {
        let mut client = LoadBalancerClient::new(self.channel.clone());
        Box::pin(async move {
            let outbound = async_stream::stream! {
                yield request;
                // keep the send side open; the balancer ends the call
                futures::future::pending::<()>().await;
            };
            let mut call = tonic::Request::new(outbound);
            if let Some(timeout) = timeout {
                call.set_timeout(timeout);
            }
            let response = client.balance_load(call).await?;
            Ok(Box::pin(response.into_inner()) as LbResponseStream)
        })
    }
}

/// Phase of the balancer session, tracked under the coordinator lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Streaming,
    Cooling,
}

pub(crate) struct SessionSlot {
    pub state: SessionState,
    pub generation: u64,
    pub cancel: Option<watch::Sender<bool>>,
}

impl Default for SessionSlot {
    fn default() -> Self {
        SessionSlot { state: SessionState::Idle, generation: 0, cancel: None }
    }
}

/// Starts a new session chain. Caller holds the coordinator lock. At most one
/// chain is live per policy: starting a new one invalidates the previous
/// generation.
pub(crate) fn start(inner: &Arc<PolicyInner>, core: &mut Core) {
    if core.shutting_down {
        return;
    }
    let (cancel_tx, cancel_rx) = watch::channel(false);
    core.session.generation += 1;
    core.session.state = SessionState::Starting;
    core.session.cancel = Some(cancel_tx);
    let generation = core.session.generation;
    glb_trace!("querying balancer for backends (session generation {generation})");
    tokio::spawn(run(Arc::downgrade(inner), generation, cancel_rx));
}

async fn run(policy: Weak<PolicyInner>, generation: u64, mut cancel: watch::Receiver<bool>) {
    loop {
        let Some(opening) = open_call(&policy, generation) else { return };
        let mut stream = tokio::select! {
            _ = cancel.changed() => return,
            opened = opening => match opened {
                Ok(stream) => stream,
                Err(status) => {
                    warn!("balancer call failed to open: {status}");
                    if !cool_down(&policy, generation, &mut cancel).await {
                        return;
                    }
                    continue;
                },
            },
        };
        if !mark_streaming(&policy, generation) {
            return;
        }

        let status = loop {
            tokio::select! {
                _ = cancel.changed() => return,
                message = stream.next() => match message {
                    Some(Ok(response)) => {
                        if !handle_response(&policy, generation, response) {
                            return;
                        }
                    },
                    Some(Err(status)) => break status,
                    None => break Status::new(tonic::Code::Ok, "balancer closed the stream"),
                },
            }
        };
        debug!("{}", PolicyError::LbCallEnded(status));
        if !cool_down(&policy, generation, &mut cancel).await {
            return;
        }
    }
}

/// Builds the call-opening future for this attempt, or `None` when the policy
/// is gone, shutting down, or this generation was superseded. The deadline is
/// re-read on every attempt: it tracks the most recent pick.
fn open_call(
    policy: &Weak<PolicyInner>,
    generation: u64,
) -> Option<BoxFuture<'static, std::result::Result<LbResponseStream, Status>>> {
    let inner = policy.upgrade()?;
    let timeout = {
        let core = inner.core.lock();
        if core.shutting_down || core.session.generation != generation {
            return None;
        }
        core.deadline.map(|deadline| deadline.saturating_duration_since(tokio::time::Instant::now()))
    };
    let request = LoadBalanceRequest {
        load_balance_request_type: Some(load_balance_request::LoadBalanceRequestType::InitialRequest(
            InitialLoadBalanceRequest { name: inner.server_name.clone() },
        )),
    };
    Some(inner.binding.balance_load(request, timeout))
}

fn mark_streaming(policy: &Weak<PolicyInner>, generation: u64) -> bool {
    let Some(inner) = policy.upgrade() else { return false };
    let mut core = inner.core.lock();
    if core.shutting_down || core.session.generation != generation {
        return false;
    }
    core.session.state = SessionState::Streaming;
    glb_trace!("balancer stream established");
    true
}

/// Processes one message from the balancer. Returns `false` when the session
/// task should stop.
fn handle_response(policy: &Weak<PolicyInner>, generation: u64, response: LoadBalanceResponse) -> bool {
    let Some(inner) = policy.upgrade() else { return false };
    let mut core = inner.core.lock();
    if core.shutting_down || core.session.generation != generation {
        return false;
    }
    match response.load_balance_response_type {
        Some(load_balance_response::LoadBalanceResponseType::InitialResponse(initial)) => {
            debug!("initial balancer response received (delegate '{}')", initial.load_balancer_delegate);
        },
        Some(load_balance_response::LoadBalanceResponseType::ServerList(list)) => {
            if !list.servers.is_empty() {
                // only a usable response forgives past failures; a chatty but
                // broken balancer keeps escalating the delay
                core.backoff.reset();
            }
            glb_trace!("serverlist with {} servers received", list.servers.len());
            if list.servers.is_empty() {
                match inner.config.empty_serverlist {
                    EmptyServerListPolicy::KeepCurrent => {
                        glb_trace!("empty serverlist received, picks stay pending until one with > 0 servers arrives");
                    },
                    EmptyServerListPolicy::DropBackends => supervisor::drop_child(&inner, &mut core),
                }
            } else if core.serverlist.as_ref().is_some_and(|stored| serverlist::serverlists_equal(stored, &list)) {
                glb_trace!("incoming serverlist identical to current, ignoring");
            } else {
                core.serverlist = Some(list);
                supervisor::handover(&inner, &mut core);
            }
        },
        None => {
            let error = PolicyError::InvalidLbResponse("response carried no payload".to_owned());
            warn!("{error}, ignoring");
        },
    }
    true
}

/// The cooling phase after a call ended: arm the backoff delay, then move
/// back to Starting. Returns `false` when the session task should stop.
async fn cool_down(policy: &Weak<PolicyInner>, generation: u64, cancel: &mut watch::Receiver<bool>) -> bool {
    let delay = {
        let Some(inner) = policy.upgrade() else { return false };
        let mut core = inner.core.lock();
        if core.shutting_down || core.session.generation != generation {
            return false;
        }
        core.session.state = SessionState::Cooling;
        core.backoff.step()
    };
    glb_trace!("connection to balancer lost, retrying in {delay:?}");
    tokio::select! {
        _ = cancel.changed() => return false,
        () = tokio::time::sleep(delay) => {},
    }
    let Some(inner) = policy.upgrade() else { return false };
    let mut core = inner.core.lock();
    if core.shutting_down || core.session.generation != generation {
        return false;
    }
    core.session.state = SessionState::Starting;
    glb_trace!("restarting call to balancer");
    true
}
