// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Session settings and configuration constants.
//!
//! Contractual limits (page and scale clamps) are plain constants. Tunable
//! timing and overlay behaviour lives in [`SessionConfig`], which is read
//! from a TOML file and falls back to the defaults below for every key.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::gate::{BackoffQuietWindow, FixedQuietWindow, QuietWindowPolicy};

// ============================================================================
// NAVIGATION LIMITS
// ============================================================================
/// Lowest page number the session will navigate to (pages are 1-based)
const MIN_PAGE: u32 = 1;

/// Lowest render scale accepted by `set_scale`
const MIN_SCALE: f64 = 0.1;

/// Scale used when a config does not name one
const DEFAULT_SCALE: f64 = 1.0;

// ============================================================================
// OVERLAY GATE DEFAULTS
// ============================================================================
/// Quiet window before a requested unmask becomes visible
const QUIET_WINDOW_MS: u64 = 120;

/// Extra wait per tick that interrupted a pending unmask (backoff policy)
const BACKOFF_STEP_MS: u64 = 40;

/// Upper bound on the backoff quiet window
const BACKOFF_MAX_MS: u64 = 600;

/// Delay between a successful edit and its stabilizing unmask request
const REFRESH_UNMASK_DELAY_MS: u64 = 350;

// ============================================================================
// OVERLAY DEFAULTS
// ============================================================================
/// Pixels added around a rendered box when hit testing
const HIT_PADDING: f64 = 4.0;

// ============================================================================
// PUBLIC API
// ============================================================================

/// Page and scale clamps
pub mod navigation {
    /// Lowest page number (1-based)
    pub const MIN_PAGE: u32 = super::MIN_PAGE;

    /// Lowest render scale
    pub const MIN_SCALE: f64 = super::MIN_SCALE;

    /// Default render scale
    pub const DEFAULT_SCALE: f64 = super::DEFAULT_SCALE;
}

/// Overlay gate timing defaults
pub mod gate {
    pub const QUIET_WINDOW_MS: u64 = super::QUIET_WINDOW_MS;
    pub const BACKOFF_STEP_MS: u64 = super::BACKOFF_STEP_MS;
    pub const BACKOFF_MAX_MS: u64 = super::BACKOFF_MAX_MS;
    pub const REFRESH_UNMASK_DELAY_MS: u64 = super::REFRESH_UNMASK_DELAY_MS;
}

/// Which quiet-window policy the gate uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Fixed,
    Backoff,
}

/// `[gate]` table
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub policy: PolicyKind,
    pub quiet_window_ms: u64,
    pub backoff_step_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::Fixed,
            quiet_window_ms: QUIET_WINDOW_MS,
            backoff_step_ms: BACKOFF_STEP_MS,
            backoff_max_ms: BACKOFF_MAX_MS,
        }
    }
}

impl GateConfig {
    /// Build the quiet-window policy this table describes.
    pub fn policy(&self) -> Box<dyn QuietWindowPolicy> {
        let base = Duration::from_millis(self.quiet_window_ms);
        match self.policy {
            PolicyKind::Fixed => Box::new(FixedQuietWindow(base)),
            PolicyKind::Backoff => Box::new(BackoffQuietWindow {
                base,
                step: Duration::from_millis(self.backoff_step_ms),
                max: Duration::from_millis(self.backoff_max_ms.max(self.quiet_window_ms)),
            }),
        }
    }
}

/// `[refresh]` table
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub unmask_delay_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            unmask_delay_ms: REFRESH_UNMASK_DELAY_MS,
        }
    }
}

impl RefreshConfig {
    pub fn unmask_delay(&self) -> Duration {
        Duration::from_millis(self.unmask_delay_ms)
    }
}

/// `[overlay]` table
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub hit_padding: f64,
    pub initial_scale: f64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            hit_padding: HIT_PADDING,
            initial_scale: DEFAULT_SCALE,
        }
    }
}

/// Tunable session behaviour
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub gate: GateConfig,
    pub refresh: RefreshConfig,
    pub overlay: OverlayConfig,
}

impl SessionConfig {
    /// Parse a config from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Invalid session config")?;
        Ok(config)
    }

    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config = Self::from_toml(&text)?;
        tracing::info!("Loaded session config from {}", path.display());
        Ok(config)
    }

    /// Initial render scale, clamped to the navigation minimum.
    pub fn initial_scale(&self) -> f64 {
        if self.overlay.initial_scale.is_finite() {
            self.overlay.initial_scale.max(MIN_SCALE)
        } else {
            DEFAULT_SCALE
        }
    }
}
