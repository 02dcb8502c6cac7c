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

use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};

use crate::child::ChildPolicy;
use crate::serverlist::{BackendEndpoint, LB_TOKEN_METADATA_KEY};
use crate::{PolicyError, Result};

/// Identifies one pick for cancellation while it sits in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PickId(pub(crate) u64);

/// What the application hands in to select a backend for one outgoing call.
#[derive(Debug)]
pub struct PickArgs {
    /// Initial metadata of the outgoing call; receives the backend's LB
    /// token. A pick without a metadata buffer fails immediately.
    pub metadata: Option<MetadataMap>,
    /// Caller-defined flags, matchable by `cancel_picks_by_flags`.
    pub flags: u32,
    /// Deadline of the outgoing call; also bounds the balancer call.
    pub deadline: Option<tokio::time::Instant>,
}

/// Outcome of a completed pick.
#[derive(Debug)]
pub struct CompletedPick {
    /// The chosen backend, or `None` when no backend could be selected.
    pub backend: Option<Arc<BackendEndpoint>>,
    /// The call's initial metadata, carrying exactly one `lb-token` entry
    /// when a backend was chosen.
    pub metadata: MetadataMap,
}

pub(crate) type PickReply = Result<CompletedPick>;

/// How a pick resolved at the policy surface.
#[derive(Debug)]
pub enum PickDisposition {
    /// Resolved synchronously.
    Complete(CompletedPick),
    /// Queued for a future serverlist, or deferred inside the child policy;
    /// resolves through the ticket.
    Pending(PickTicket),
}

/// Receipt for a pick that did not resolve synchronously.
#[derive(Debug)]
pub struct PickTicket {
    id: PickId,
    reply: oneshot::Receiver<PickReply>,
}

impl PickTicket {
    pub(crate) fn new(id: PickId, reply: oneshot::Receiver<PickReply>) -> Self {
        PickTicket { id, reply }
    }

    pub fn id(&self) -> PickId {
        self.id
    }

    /// Waits for the pick to resolve.
    pub async fn resolve(self) -> Result<CompletedPick> {
        self.reply.await.map_err(|_| PolicyError::ChannelShutdown)?
    }

    /// Non-blocking probe for an outcome that may already be there.
    pub fn try_resolve(&mut self) -> Option<PickReply> {
        self.reply.try_recv().ok()
    }
}

/// Completion record for one pick. It owns the caller's metadata and reply
/// channel plus, once forwarded, a reference on the child serving it. The
/// chosen backend's token is spliced into the metadata before the caller can
/// observe the outcome; a pick resolving with no backend passes its metadata
/// through untouched.
pub struct PickContext {
    pub(crate) id: PickId,
    pub(crate) flags: u32,
    metadata: MetadataMap,
    reply: Option<oneshot::Sender<PickReply>>,
    child: Option<Arc<dyn ChildPolicy>>,
}

impl PickContext {
    pub(crate) fn new(id: PickId, flags: u32, metadata: MetadataMap) -> (Self, oneshot::Receiver<PickReply>) {
        let (reply, rx) = oneshot::channel();
        (PickContext { id, flags, metadata, reply: Some(reply), child: None }, rx)
    }

    pub(crate) fn attach_child(&mut self, child: Arc<dyn ChildPolicy>) {
        self.child = Some(child);
    }

    /// Resolves the pick in place and hands the outcome back instead of
    /// sending it; the synchronous path.
    pub(crate) fn finish(self, backend: Option<Arc<BackendEndpoint>>) -> CompletedPick {
        let PickContext { mut metadata, child, .. } = self;
        if let Some(backend) = &backend {
            inject_lb_token(&mut metadata, &backend.token);
        }
        drop(child);
        CompletedPick { backend, metadata }
    }

    /// Completes an asynchronous pick: attaches the token and fires the
    /// caller's continuation.
    pub fn complete(mut self, backend: Option<Arc<BackendEndpoint>>) {
        let reply = self.reply.take();
        let done = self.finish(backend);
        if let Some(reply) = reply {
            let _ = reply.send(Ok(done));
        }
    }

    pub(crate) fn fail(mut self, error: PolicyError) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Err(error));
        }
    }
}

impl fmt::Debug for PickContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PickContext").field("id", &self.id).field("flags", &self.flags).finish_non_exhaustive()
    }
}

/// Splices the backend token into the call's initial metadata. `insert`
/// replaces any previous value, keeping the entry unique.
pub(crate) fn inject_lb_token(metadata: &mut MetadataMap, token: &AsciiMetadataValue) {
    metadata.insert(LB_TOKEN_METADATA_KEY, token.clone());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(token: &str) -> Arc<BackendEndpoint> {
        Arc::new(BackendEndpoint {
            address: "10.0.0.1:80".parse().unwrap(),
            token: token.parse().unwrap(),
        })
    }

    #[test]
    fn completing_with_a_backend_attaches_its_token() {
        let (ctx, mut rx) = PickContext::new(PickId(1), 0, MetadataMap::new());
        ctx.complete(Some(backend("tok-a")));
        let done = rx.try_recv().unwrap().unwrap();
        assert_eq!(done.metadata.get(LB_TOKEN_METADATA_KEY).unwrap().to_str().unwrap(), "tok-a");
        assert_eq!(done.backend.unwrap().token.as_bytes(), b"tok-a");
    }

    #[test]
    fn completing_without_a_backend_leaves_metadata_untouched() {
        let (ctx, mut rx) = PickContext::new(PickId(2), 0, MetadataMap::new());
        ctx.complete(None);
        let done = rx.try_recv().unwrap().unwrap();
        assert!(done.backend.is_none());
        assert!(done.metadata.get(LB_TOKEN_METADATA_KEY).is_none());
    }

    #[test]
    fn the_token_entry_stays_unique_across_reinjection() {
        let mut metadata = MetadataMap::new();
        inject_lb_token(&mut metadata, &"stale".parse().unwrap());
        inject_lb_token(&mut metadata, &"fresh".parse().unwrap());
        let values: Vec<_> = metadata.get_all(LB_TOKEN_METADATA_KEY).iter().collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].to_str().unwrap(), "fresh");
    }

    #[test]
    fn failing_fires_the_continuation_with_the_error() {
        let (ctx, mut rx) = PickContext::new(PickId(3), 0, MetadataMap::new());
        ctx.fail(PolicyError::PickCancelled { reason: "caller went away".to_owned() });
        assert!(matches!(rx.try_recv().unwrap(), Err(PolicyError::PickCancelled { .. })));
    }
}
