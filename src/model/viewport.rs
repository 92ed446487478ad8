// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Renderer viewport as last reported by the rendering surface.

use serde::{Deserialize, Serialize};

/// Page rotation, clockwise
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Map a rotation in degrees onto a quarter turn.
    ///
    /// Any multiple of 90 is accepted (negative values wrap). Non-finite
    /// or off-axis angles return `None`.
    pub fn from_degrees(degrees: f64) -> Option<Self> {
        if !degrees.is_finite() || degrees.fract() != 0.0 {
            return None;
        }
        match degrees.rem_euclid(360.0) as u32 {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Whether the page's width and height trade places on screen
    pub fn is_sideways(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

impl TryFrom<f64> for Rotation {
    type Error = String;

    fn try_from(degrees: f64) -> Result<Self, Self::Error> {
        Rotation::from_degrees(degrees).ok_or_else(|| format!("invalid rotation: {degrees}"))
    }
}

impl From<Rotation> for f64 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees() as f64
    }
}

/// Rendered page size in pixels plus the scale and rotation it was drawn at.
///
/// Always replaced wholesale; a dimension report never patches one field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub scale: f64,
    pub rotation: Option<Rotation>,
}

impl Viewport {
    pub fn new(width: f64, height: f64, scale: f64, rotation: Option<Rotation>) -> Self {
        Self {
            width,
            height,
            scale,
            rotation,
        }
    }

    /// Rotation with the unrotated default filled in
    pub fn rotation_or_default(&self) -> Rotation {
        self.rotation.unwrap_or_default()
    }

    /// Whether every dimension is finite and positive
    pub fn is_usable(&self) -> bool {
        [self.width, self.height, self.scale]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
    }
}
