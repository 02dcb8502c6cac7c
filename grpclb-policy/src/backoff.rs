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

use rand::{thread_rng, Rng};

use crate::config::BackoffConfig;

/// Delay sequence for balancer call retries. Starts at `min_delay`, grows by
/// `multiplier` up to `max_delay`, with `jitter` applied to each step. The
/// returned delays never decrease until [`Backoff::reset`].
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    base: Duration,
    floor: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let base = config.min_delay;
        Backoff { config, base, floor: Duration::ZERO }
    }

    /// Next delay before retrying the balancer call.
    pub fn step(&mut self) -> Duration {
        let base = self.base;
        self.base = Duration::min(base.mul_f64(self.config.multiplier), self.config.max_delay);
        let spread = self.config.jitter * (thread_rng().gen::<f64>() * 2.0 - 1.0);
        let jittered = base.mul_f64(1.0 + spread);
        let delay = jittered.clamp(self.config.min_delay, self.config.max_delay).max(self.floor);
        self.floor = delay;
        delay
    }

    /// Forgets accumulated growth; the next delay is again close to
    /// `min_delay`.
    pub fn reset(&mut self) {
        self.base = self.config.min_delay;
        self.floor = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_stay_within_bounds_and_never_decrease() {
        let config = BackoffConfig::default();
        let mut backoff = Backoff::new(config.clone());
        let mut last = Duration::ZERO;
        for _ in 0..32 {
            let delay = backoff.step();
            assert!(delay >= config.min_delay, "{delay:?} fell below the minimum");
            assert!(delay <= config.max_delay, "{delay:?} exceeded the maximum");
            assert!(delay >= last, "{delay:?} decreased from {last:?}");
            last = delay;
        }
    }

    #[test]
    fn growth_reaches_the_cap() {
        let config = BackoffConfig::default();
        let mut backoff = Backoff::new(config.clone());
        let mut last = Duration::ZERO;
        for _ in 0..16 {
            last = backoff.step();
        }
        assert!(last >= config.max_delay.mul_f64(1.0 - config.jitter));
    }

    #[test]
    fn reset_restores_the_initial_delay() {
        let config = BackoffConfig::default();
        let mut backoff = Backoff::new(config.clone());
        for _ in 0..10 {
            backoff.step();
        }
        backoff.reset();
        let first = backoff.step();
        assert!(first <= config.min_delay.mul_f64(1.0 + config.jitter));
    }
}
