// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Committed session state, as observed by callers

use kurbo::Rect;
use serde::Serialize;

use crate::model::{Field, FieldKind, FieldStore, Viewport};
use crate::ports::WorkingCopyRef;

/// State of one editing session.
///
/// Only the controller writes it. Callers get clones through
/// `snapshot`/`subscribe`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub document_id: Option<String>,
    pub working_copy: Option<WorkingCopyRef>,
    /// 1-based
    pub page_number: u32,
    /// Requested render scale
    pub scale: f64,
    pub viewport: Option<Viewport>,
    pub fields: FieldStore,
    pub selection: Option<String>,
    /// Set by any edit attempt; cleared only by a successful save
    pub dirty: bool,
    pub renderer_ready: bool,
    pub overlays_visible: bool,
    /// Human-readable status line
    pub status: String,
}

impl Session {
    pub fn new(scale: f64) -> Self {
        Self {
            document_id: None,
            working_copy: None,
            page_number: 1,
            scale,
            viewport: None,
            fields: FieldStore::new(),
            selection: None,
            dirty: false,
            renderer_ready: false,
            overlays_visible: false,
            status: "No document".to_string(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.working_copy.is_some()
    }

    /// The selected field, if the selection names a field that exists
    pub fn selected_field(&self) -> Option<&Field> {
        self.selection.as_deref().and_then(|name| self.fields.get(name))
    }

    /// Zero-based index of the current page
    pub fn page_index(&self) -> usize {
        self.page_number.saturating_sub(1) as usize
    }
}

/// A visible hit-region for one field on the current page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    pub name: String,
    pub kind: FieldKind,
    pub rect: Rect,
}

/// Answer to "may the caller close this session now?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCheck {
    Clear,
    UnsavedChanges,
}

impl CloseCheck {
    pub fn is_ok(self) -> bool {
        self == CloseCheck::Clear
    }

    pub fn reason(self) -> Option<&'static str> {
        match self {
            CloseCheck::Clear => None,
            CloseCheck::UnsavedChanges => Some("unsaved changes"),
        }
    }
}
