// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Collaborator ports consumed by the session controller.
//!
//! Instance storage, field extraction, persistence of edits, templates,
//! coordinate math, and time all live behind these traits. The controller
//! only ever receives data from them and applies it itself.

pub mod clock;
pub mod memory;
pub mod transform;

pub use clock::{Clock, ManualClock, TimerCallback, TimerHandle, TokioClock};
pub use memory::MemoryBackend;
pub use transform::StandardTransform;

use async_trait::async_trait;
use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::{Field, Viewport};

// ============================================================================
// ERRORS
// ============================================================================

/// Opening, listing, or extracting an instance failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpenError {
    #[error("instance manager failed: {0}")]
    Instance(String),

    #[error("instance manager returned no working copy")]
    NoWorkingCopy,

    #[error("field extraction failed: {0}")]
    Extraction(String),

    #[error("template lookup failed: {0}")]
    Template(String),
}

/// A write to the working copy or instance store failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {message}")]
pub struct PersistenceError {
    pub operation: &'static str,
    pub message: String,
}

impl PersistenceError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Coordinate conversion could not produce a box
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("box has non-finite or zero-area geometry")]
    DegenerateBox,

    #[error("page metadata has non-finite or zero-area geometry")]
    DegeneratePage,

    #[error("viewport is not usable")]
    UnusableViewport,
}

// ============================================================================
// DATA
// ============================================================================

/// Caller's request to open a document instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub document_id: String,
    /// Opaque context the instance manager uses to locate the instance
    pub sheet_context: String,
    #[serde(default)]
    pub tag: Option<String>,
}

impl OpenRequest {
    pub fn new(document_id: impl Into<String>, sheet_context: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            sheet_context: sheet_context.into(),
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// Reference to a session-local working copy of a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkingCopyRef(pub String);

impl fmt::Display for WorkingCopyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the instance manager hands back from `open`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenedInstance {
    pub working_copy: Option<WorkingCopyRef>,
    pub extracted_fields: Vec<Field>,
    /// `None` when the instance manager has no template for this document
    pub template_fields: Option<Vec<Field>>,
}

/// Listing entry for a stored instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceMeta {
    pub instance_id: String,
    pub document_id: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub updated_at_ms: u64,
}

/// Geometry of one source page
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageMeta {
    /// Visible page area in source coordinates (y grows upward)
    pub crop_box: Rect,
}

impl PageMeta {
    pub fn new(crop_box: Rect) -> Self {
        Self { crop_box }
    }
}

/// Result of extracting fields from a working copy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub fields: Vec<Field>,
    /// Per-page geometry, indexed by page; empty when unknown
    pub page_meta: Vec<PageMeta>,
}

/// Which fields a signature write targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureMode {
    /// One named field
    Single(String),
    /// Every signature field in the document
    All,
}

impl SignatureMode {
    pub fn target(&self) -> Option<&str> {
        match self {
            SignatureMode::Single(name) => Some(name),
            SignatureMode::All => None,
        }
    }
}

// ============================================================================
// PORTS
// ============================================================================

/// Opens, lists, and commits document instances
#[async_trait]
pub trait InstanceManager: Send + Sync {
    async fn open(&self, request: &OpenRequest) -> Result<OpenedInstance, OpenError>;

    async fn list(&self, sheet_context: &str) -> Result<Vec<InstanceMeta>, OpenError>;

    /// Current bytes of a working copy, for loading into the renderer
    async fn read_document(&self, working_copy: &WorkingCopyRef) -> Result<Vec<u8>, OpenError>;

    /// Commit a working copy back to the instance store
    async fn save(&self, working_copy: &WorkingCopyRef) -> Result<(), PersistenceError>;
}

/// Reads fields and page geometry out of a working copy
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    async fn extract(&self, working_copy: &WorkingCopyRef) -> Result<Extraction, OpenError>;
}

/// Persists edits into a working copy
#[async_trait]
pub trait FieldWriter: Send + Sync {
    async fn write_text(&self, working_copy: &WorkingCopyRef, name: &str, value: &str) -> Result<(), PersistenceError>;

    async fn write_checkbox(&self, working_copy: &WorkingCopyRef, name: &str, checked: bool) -> Result<(), PersistenceError>;

    /// `image_base64` is opaque to the controller and never stored in a field
    async fn write_signature(
        &self,
        working_copy: &WorkingCopyRef,
        image_base64: &str,
        mode: &SignatureMode,
    ) -> Result<(), PersistenceError>;

    async fn clear_form(&self, working_copy: &WorkingCopyRef) -> Result<(), PersistenceError>;
}

/// Field templates keyed by document id
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get_template(&self, document_id: &str) -> Result<Option<Vec<Field>>, OpenError>;

    async fn put_template(&self, document_id: &str, fields: &[Field]) -> Result<(), PersistenceError>;

    async fn clear_template(&self, document_id: &str) -> Result<(), PersistenceError>;
}

/// Raw box → percent box → viewport pixels, plus hit testing
pub trait CoordinateTransform: Send + Sync {
    fn to_percent_rect(&self, raw_box: Rect, page: &PageMeta) -> Result<Rect, TransformError>;

    fn to_pixel_rect(&self, percent_box: Rect, viewport: &Viewport) -> Result<Rect, TransformError>;

    fn hit_test(&self, point: Point, pixel_box: Rect, padding: f64) -> bool;
}
