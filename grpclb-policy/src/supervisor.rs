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

use std::sync::Arc;

use tracing::warn;

use crate::child::{ChildPick, ChildPolicy};
use crate::pick::PickContext;
use crate::policy::{Core, PolicyInner};
use crate::serverlist;
use crate::state::ConnectivityState;
use crate::trace::glb_trace;

/// Reacts to a freshly stored serverlist: builds a child policy over it and
/// decides whether it replaces the installed one. Runs under the coordinator
/// lock.
pub(crate) fn handover(inner: &Arc<PolicyInner>, core: &mut Core) {
    if core.shutting_down {
        return;
    }
    let Some(list) = core.serverlist.as_ref() else { return };
    let backends = serverlist::decode(list);
    if backends.is_empty() {
        warn!("serverlist produced no usable backends, keeping the current child policy");
        return;
    }
    let num_backends = backends.len();
    let new_child = match inner.child_factory.build(backends) {
        Ok(child) => child,
        Err(error) => {
            warn!(
                "failure building a child policy for the serverlist update with {num_backends} entries; the \
                 previous instance, if any, continues to be used: {error}"
            );
            return;
        },
    };

    let new_state = new_child.connectivity();
    // A replacement that starts out failing or shut down would disrupt
    // whatever is currently serving; it is discarded and the aggregate state
    // stays put.
    if new_state.unusable_for_adoption() {
        glb_trace!("keeping old child policy despite new serverlist: replacement was in {new_state} state");
        return;
    }

    glb_trace!("adopting child policy over {num_backends} backends in {new_state} state");
    core.rr.child = Some(Arc::clone(&new_child));
    core.rr.last_state = new_state;
    core.rr.watch_generation += 1;
    inner.set_state(core, new_state, None, "child policy handover");
    watch_child(inner, Arc::clone(&new_child), core.rr.watch_generation);
    new_child.exit_idle();

    // flush the work that was waiting for a child, in arrival order
    for ctx in core.pending.drain_picks() {
        forward_pick(&new_child, ctx);
    }
    for ping in core.pending.drain_pings() {
        new_child.ping(ping.notify);
    }
}

/// Releases the installed child; subsequent picks queue until a fresh
/// serverlist arrives. The stored serverlist is forgotten as well, so a
/// balancer resending the same list afterwards is not mistaken for a
/// duplicate.
pub(crate) fn drop_child(inner: &Arc<PolicyInner>, core: &mut Core) {
    core.serverlist = None;
    if core.rr.child.take().is_some() {
        core.rr.watch_generation += 1;
        inner.set_state(core, ConnectivityState::Connecting, None, "backends dropped");
    }
}

/// Hands one pick to `child`, completing it in place when the child resolves
/// synchronously. The context keeps a reference on the child until it
/// completes, so a replaced child survives as long as its in-flight picks.
pub(crate) fn forward_pick(child: &Arc<dyn ChildPolicy>, mut ctx: PickContext) {
    ctx.attach_child(Arc::clone(child));
    if let ChildPick::Ready(backend, ctx) = child.pick(ctx) {
        ctx.complete(backend);
    }
}

/// Follows the connectivity of an adopted child until it shuts down, the
/// policy shuts down, or the child is replaced (the generation moves on).
fn watch_child(inner: &Arc<PolicyInner>, child: Arc<dyn ChildPolicy>, generation: u64) {
    let policy = Arc::downgrade(inner);
    let mut states = child.watch_connectivity();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let new_state = *states.borrow_and_update();
            let Some(inner) = policy.upgrade() else { return };
            let mut core = inner.core.lock();
            if core.shutting_down || core.rr.watch_generation != generation {
                return;
            }
            if new_state == ConnectivityState::Shutdown {
                // the child is going away on its own; stop listening
                return;
            }
            core.rr.last_state = new_state;
            if new_state != ConnectivityState::TransientFailure {
                // a degraded child keeps the aggregate at its last good state
                inner.set_state(&mut core, new_state, None, "child connectivity change");
            }
        }
    });
}
