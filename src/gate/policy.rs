// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Quiet-window policies for the overlay gate

use std::fmt::Debug;
use std::time::Duration;

/// Decides how long the renderer must stay quiet before a pending unmask
/// becomes visible.
pub trait QuietWindowPolicy: Debug + Send + Sync {
    /// Quiet window given the number of ticks that interrupted a pending
    /// unmask since the last mask.
    fn quiet_window(&self, ticks_while_pending: u32) -> Duration;
}

/// The same window regardless of renderer activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedQuietWindow(pub Duration);

impl QuietWindowPolicy for FixedQuietWindow {
    fn quiet_window(&self, _ticks_while_pending: u32) -> Duration {
        self.0
    }
}

/// Grows the window by `step` for every tick that interrupted a pending
/// unmask, up to `max`. A renderer that keeps reporting changes gets more
/// time to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffQuietWindow {
    pub base: Duration,
    pub step: Duration,
    pub max: Duration,
}

impl QuietWindowPolicy for BackoffQuietWindow {
    fn quiet_window(&self, ticks_while_pending: u32) -> Duration {
        let grown = self.base.saturating_add(self.step.saturating_mul(ticks_while_pending));
        grown.min(self.max)
    }
}
