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

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::pick::PickContext;
use crate::{PolicyError, Result};

/// A ping waiting for a child policy to forward it to.
pub(crate) struct PendingPing {
    pub notify: oneshot::Sender<Result<()>>,
}

/// FIFO holders for picks and pings that arrived before a child policy was
/// available. All mutation happens under the policy's coordinator lock.
#[derive(Default)]
pub(crate) struct PendingQueues {
    picks: VecDeque<PickContext>,
    pings: VecDeque<PendingPing>,
}

impl PendingQueues {
    pub fn enqueue_pick(&mut self, ctx: PickContext) {
        self.picks.push_back(ctx);
    }

    pub fn enqueue_ping(&mut self, notify: oneshot::Sender<Result<()>>) {
        self.pings.push_back(PendingPing { notify });
    }

    pub fn drain_picks(&mut self) -> VecDeque<PickContext> {
        std::mem::take(&mut self.picks)
    }

    pub fn drain_pings(&mut self) -> VecDeque<PendingPing> {
        std::mem::take(&mut self.pings)
    }

    /// Completes with `make_error()` every queued pick matching `matches`,
    /// preserving the order of the survivors. Returns how many were
    /// cancelled.
    pub fn cancel_picks_matching(
        &mut self,
        matches: impl Fn(&PickContext) -> bool,
        make_error: impl Fn() -> PolicyError,
    ) -> usize {
        let mut cancelled = 0;
        let mut kept = VecDeque::with_capacity(self.picks.len());
        for ctx in std::mem::take(&mut self.picks) {
            if matches(&ctx) {
                ctx.fail(make_error());
                cancelled += 1;
            } else {
                kept.push_back(ctx);
            }
        }
        self.picks = kept;
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use tonic::metadata::MetadataMap;

    use super::*;
    use crate::pick::PickId;

    fn queued_pick(queues: &mut PendingQueues, id: u64, flags: u32) -> oneshot::Receiver<crate::pick::PickReply> {
        let (ctx, rx) = PickContext::new(PickId(id), flags, MetadataMap::new());
        queues.enqueue_pick(ctx);
        rx
    }

    #[test]
    fn picks_drain_in_enqueue_order() {
        let mut queues = PendingQueues::default();
        for id in 1..=3 {
            queued_pick(&mut queues, id, 0);
        }
        let drained: Vec<_> = queues.drain_picks().into_iter().map(|ctx| ctx.id).collect();
        assert_eq!(drained, vec![PickId(1), PickId(2), PickId(3)]);
        assert!(queues.drain_picks().is_empty());
    }

    #[test]
    fn cancel_by_flags_completes_matches_and_keeps_survivor_order() {
        let mut queues = PendingQueues::default();
        let mut rx1 = queued_pick(&mut queues, 1, 0x1);
        let mut rx2 = queued_pick(&mut queues, 2, 0x2);
        let mut rx3 = queued_pick(&mut queues, 3, 0x3);

        let cancelled = queues.cancel_picks_matching(
            |ctx| (ctx.flags & 0x1) == 0x1,
            || PolicyError::PickCancelled { reason: "test".to_owned() },
        );
        assert_eq!(cancelled, 2);
        assert!(matches!(rx1.try_recv().unwrap(), Err(PolicyError::PickCancelled { .. })));
        assert!(matches!(rx3.try_recv().unwrap(), Err(PolicyError::PickCancelled { .. })));
        assert!(rx2.try_recv().is_err(), "non-matching pick must stay queued");

        let survivors: Vec<_> = queues.drain_picks().into_iter().map(|ctx| ctx.id).collect();
        assert_eq!(survivors, vec![PickId(2)]);
    }

    #[test]
    fn cancel_by_id_touches_only_that_pick() {
        let mut queues = PendingQueues::default();
        let mut rx1 = queued_pick(&mut queues, 1, 0);
        let _rx2 = queued_pick(&mut queues, 2, 0);

        let cancelled = queues.cancel_picks_matching(
            |ctx| ctx.id == PickId(1),
            || PolicyError::PickCancelled { reason: "test".to_owned() },
        );
        assert_eq!(cancelled, 1);
        assert!(rx1.try_recv().unwrap().is_err());
        assert_eq!(queues.drain_picks().len(), 1);
    }
}
