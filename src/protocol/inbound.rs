// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Renderer → controller messages.
//!
//! The renderer is an external surface we do not control, so parsing is
//! permissive: anything that is not a well-formed, known message becomes
//! "no event" and is logged at debug level.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{Rotation, Viewport};

/// Why a renderer message was dropped. Never surfaced to callers.
#[derive(Debug, Error)]
pub enum ProtocolParseError {
    #[error("message is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("message has no string `type`")]
    MissingType,

    #[error("unrecognized message type: {0}")]
    UnknownType(String),
}

/// Dimension report as sent by the renderer, after numeric coercion.
///
/// Malformed numbers come through as `NaN`; the controller rejects such
/// reports instead of adopting them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionsReport {
    pub width: f64,
    pub height: f64,
    pub scale: f64,
    pub rotation: Option<f64>,
}

impl DimensionsReport {
    /// Convert into a viewport, or `None` if any part is unusable.
    pub fn to_viewport(&self) -> Option<Viewport> {
        let rotation = match self.rotation {
            Some(degrees) => Some(Rotation::from_degrees(degrees)?),
            None => None,
        };
        let viewport = Viewport::new(self.width, self.height, self.scale, rotation);
        viewport.is_usable().then_some(viewport)
    }
}

/// A parsed renderer event
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// `READY`: the surface can accept a document
    Ready,
    /// `PDF_DIMENSIONS`: the rendered page size changed
    Dimensions(DimensionsReport),
    /// `RENDER_DONE`: a paint pass finished
    RenderDone,
    /// `READY_FOR_OVERLAYS`: secondary unmask signal
    ReadyForOverlays,
    /// `DEBUG_PAGE_COUNT`: diagnostic only
    DebugPageCount { pages: f64 },
}

impl InboundEvent {
    /// Wire name of the event
    pub fn type_name(&self) -> &'static str {
        match self {
            InboundEvent::Ready => "READY",
            InboundEvent::Dimensions(_) => "PDF_DIMENSIONS",
            InboundEvent::RenderDone => "RENDER_DONE",
            InboundEvent::ReadyForOverlays => "READY_FOR_OVERLAYS",
            InboundEvent::DebugPageCount { .. } => "DEBUG_PAGE_COUNT",
        }
    }
}

/// Parse a raw renderer message, dropping anything unusable.
pub fn parse_inbound(raw: &str) -> Option<InboundEvent> {
    match try_parse_inbound(raw) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::debug!("Dropping renderer message: {}", err);
            None
        }
    }
}

/// Parse a raw renderer message, reporting why it was rejected.
pub fn try_parse_inbound(raw: &str) -> Result<InboundEvent, ProtocolParseError> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(message) = value else {
        return Err(ProtocolParseError::NotAnObject);
    };
    let Some(Value::String(kind)) = message.get("type") else {
        return Err(ProtocolParseError::MissingType);
    };

    match kind.as_str() {
        "READY" => Ok(InboundEvent::Ready),
        "PDF_DIMENSIONS" => Ok(InboundEvent::Dimensions(DimensionsReport {
            width: number(&message, "width"),
            height: number(&message, "height"),
            scale: number(&message, "scale"),
            rotation: optional_number(&message, "rotation"),
        })),
        "RENDER_DONE" => Ok(InboundEvent::RenderDone),
        "READY_FOR_OVERLAYS" => Ok(InboundEvent::ReadyForOverlays),
        "DEBUG_PAGE_COUNT" => Ok(InboundEvent::DebugPageCount {
            pages: number(&message, "pages"),
        }),
        other => Err(ProtocolParseError::UnknownType(other.to_string())),
    }
}

fn optional_number(message: &Map<String, Value>, key: &str) -> Option<f64> {
    message.get(key).map(coerce_number)
}

fn number(message: &Map<String, Value>, key: &str) -> f64 {
    optional_number(message, key).unwrap_or(f64::NAN)
}

/// Loose numeric coercion matching what a JavaScript host sends:
/// numeric strings parse, blank strings and `null` are zero, booleans are
/// 0/1, everything else is `NaN`.
fn coerce_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse().unwrap_or(f64::NAN)
            }
        }
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Null => 0.0,
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}
