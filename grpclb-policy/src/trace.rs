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

use std::sync::atomic::{AtomicBool, Ordering};

static GLB_TRACE: AtomicBool = AtomicBool::new(false);

/// Turns the informational `glb` tracer on or off. Purely observational, no
/// semantic effect.
pub fn set_glb_enabled(enabled: bool) {
    GLB_TRACE.store(enabled, Ordering::Relaxed);
}

pub fn glb_enabled() -> bool {
    GLB_TRACE.load(Ordering::Relaxed)
}

/// Enables the `glb` tracer when the comma-separated `GRPC_TRACE` environment
/// variable names it (or says `all`).
pub fn init_from_env() {
    if let Ok(filter) = std::env::var("GRPC_TRACE") {
        if filter.split(',').any(|tracer| matches!(tracer.trim(), "glb" | "all")) {
            set_glb_enabled(true);
        }
    }
}

macro_rules! glb_trace {
    ($($arg:tt)*) => {
        if $crate::trace::glb_enabled() {
            ::tracing::info!($($arg)*);
        }
    };
}
pub(crate) use glb_trace;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_round_trips() {
        set_glb_enabled(true);
        assert!(glb_enabled());
        set_glb_enabled(false);
        assert!(!glb_enabled());
    }
}
