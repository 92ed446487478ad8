// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Overlay gate: decides whether field overlays may be shown.
//!
//! The renderer paints asynchronously, so any overlay drawn while the page
//! is still settling can land in the wrong place. The gate arbitrates:
//!
//! - `mask_overlays` hides overlays immediately and always wins.
//! - `request_unmask` only starts a pending unmask, and only if the renderer
//!   finished a paint pass after the most recent mask.
//! - a pending unmask becomes visible once the renderer has been quiet for
//!   the policy's quiet window. A tick before then drops the gate back to
//!   masked, and only a fresh `request_unmask` re-arms it.
//!
//! ```text
//!            request_unmask (render done)        quiet window elapsed
//!  Masked ───────────────────────────▶ PendingUnmask ─────────────────▶ Visible
//!    ▲  ▲                                │                                │
//!    │  └──────── tick / mask_overlays ──┘                                │
//!    └─────────────────────────────── mask_overlays ─────────────────────┘
//! ```
//!
//! The gate holds no clock. Time-dependent calls take the current time in
//! milliseconds, and a pending result tells the caller when to `settle`.

mod policy;

pub use policy::{BackoffQuietWindow, FixedQuietWindow, QuietWindowPolicy};

use std::collections::BTreeSet;
use std::time::Duration;

/// Visibility state of the gate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GateState {
    #[default]
    Masked,
    PendingUnmask,
    Visible,
}

/// Result of asking the gate to unmask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmaskOutcome {
    /// No render-done since the last mask; nothing changes
    Refused,
    /// Waiting for the quiet window; call `settle` again after `retry_in`
    Pending { retry_in: Duration },
    /// Overlays may be shown
    Visible,
}

/// Debounced overlay visibility arbiter
#[derive(Debug)]
pub struct OverlayGate {
    state: GateState,
    policy: Box<dyn QuietWindowPolicy>,
    /// Time of the latest tick (ms)
    last_tick_at: u64,
    /// Time the current pending unmask started (ms)
    pending_since: u64,
    /// Ticks that interrupted a pending unmask since the last mask
    ticks_while_pending: u32,
    render_done_since_mask: bool,
    pending_reasons: BTreeSet<String>,
    /// Bumped on every mask request
    mask_epoch: u64,
}

impl OverlayGate {
    /// Create a gate that starts masked
    pub fn new(policy: Box<dyn QuietWindowPolicy>) -> Self {
        Self {
            state: GateState::Masked,
            policy,
            last_tick_at: 0,
            pending_since: 0,
            ticks_while_pending: 0,
            render_done_since_mask: false,
            pending_reasons: BTreeSet::new(),
            mask_epoch: 0,
        }
    }

    /// Record that renderer or viewport state changed.
    ///
    /// Never unmasks. A pending unmask is cancelled: the gate drops back to
    /// masked but keeps the render-done, so the next `request_unmask` can
    /// re-arm it. Visible overlays stay visible.
    pub fn mark_tick(&mut self, now_ms: u64, reason: Option<&str>) {
        self.last_tick_at = now_ms;
        if self.state == GateState::PendingUnmask {
            tracing::debug!(reason = reason.unwrap_or("-"), "pending unmask interrupted by tick");
            self.state = GateState::Masked;
            self.ticks_while_pending = self.ticks_while_pending.saturating_add(1);
            self.pending_reasons.clear();
        }
        tracing::trace!(reason = reason.unwrap_or("-"), state = ?self.state, "gate tick");
    }

    /// Record that the renderer finished painting the current state.
    pub fn mark_render_done(&mut self) {
        self.render_done_since_mask = true;
    }

    /// Hide overlays now. Cancels any pending unmask.
    pub fn mask_overlays(&mut self, reason: Option<&str>) {
        if self.state != GateState::Masked {
            tracing::debug!(reason = reason.unwrap_or("-"), from = ?self.state, "gate masked");
        }
        self.state = GateState::Masked;
        self.render_done_since_mask = false;
        self.ticks_while_pending = 0;
        self.pending_reasons.clear();
        self.mask_epoch = self.mask_epoch.wrapping_add(1);
    }

    /// Ask the gate to become visible.
    ///
    /// Refused unless a render-done was recorded after the latest mask.
    /// Otherwise the gate goes pending and settles against the quiet window.
    pub fn request_unmask(&mut self, now_ms: u64, reason: Option<&str>) -> UnmaskOutcome {
        match self.state {
            GateState::Visible => return UnmaskOutcome::Visible,
            GateState::Masked if !self.render_done_since_mask => {
                tracing::debug!(reason = reason.unwrap_or("-"), "unmask refused: no render since mask");
                return UnmaskOutcome::Refused;
            }
            GateState::Masked => {
                self.state = GateState::PendingUnmask;
                self.pending_since = now_ms;
            }
            GateState::PendingUnmask => {}
        }
        if let Some(reason) = reason {
            self.pending_reasons.insert(reason.to_string());
        }
        self.settle(now_ms)
    }

    /// Re-evaluate a pending unmask against the quiet window.
    pub fn settle(&mut self, now_ms: u64) -> UnmaskOutcome {
        match self.state {
            GateState::Masked => UnmaskOutcome::Refused,
            GateState::Visible => UnmaskOutcome::Visible,
            GateState::PendingUnmask => {
                let window = self.policy.quiet_window(self.ticks_while_pending);
                let quiet_from = self.last_tick_at.max(self.pending_since);
                let ready_at = quiet_from.saturating_add(window.as_millis() as u64);
                if now_ms >= ready_at {
                    tracing::debug!(reasons = ?self.pending_reasons, "gate visible");
                    self.state = GateState::Visible;
                    self.pending_reasons.clear();
                    self.ticks_while_pending = 0;
                    UnmaskOutcome::Visible
                } else {
                    UnmaskOutcome::Pending {
                        retry_in: Duration::from_millis(ready_at - now_ms),
                    }
                }
            }
        }
    }

    /// Whether overlays may be shown. No side effects.
    pub fn can_show_overlays(&self) -> bool {
        self.state == GateState::Visible
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Counter bumped by every mask request
    pub fn mask_epoch(&self) -> u64 {
        self.mask_epoch
    }

    /// Reasons collected by the current pending unmask
    pub fn pending_reasons(&self) -> impl Iterator<Item = &str> {
        self.pending_reasons.iter().map(String::as_str)
    }
}
