// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Form fields and their per-kind edit semantics.
//!
//! A `Field` carries three boxes. `raw_box` is in the document's own
//! coordinate space, `normalized_box` is page-relative (0–1) and
//! `rendered_box` is in viewport pixels. Only the controller derives
//! `rendered_box`, and it does so from `normalized_box` plus the current
//! viewport every time the viewport changes.

use kurbo::Rect;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Marker stored in a signature field once it has been signed.
///
/// The signature image itself never enters the field store.
pub const SIGNED_MARKER: &str = "SIGNED";

/// Kind of form field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[serde(alias = "Tx", alias = "textfield")]
    Text,
    #[serde(alias = "Sig")]
    Signature,
    #[serde(alias = "checkbox", alias = "check")]
    Checkbox,
    Radio,
    #[serde(alias = "Btn")]
    Button,
    #[default]
    #[serde(other)]
    Unknown,
}

impl FieldKind {
    /// Value a field of this kind takes after `clear_form`.
    pub fn cleared_value(self) -> FieldValue {
        match self {
            FieldKind::Text => FieldValue::Text(String::new()),
            FieldKind::Checkbox => FieldValue::Bool(false),
            FieldKind::Signature => FieldValue::Null,
            FieldKind::Radio | FieldKind::Button | FieldKind::Unknown => FieldValue::Null,
        }
    }

    /// Value a field of this kind takes after a successful signature write.
    ///
    /// Returns `None` for kinds a signature write never touches when
    /// signing every signature field at once.
    pub fn signed_value(self) -> Option<FieldValue> {
        match self {
            FieldKind::Signature => Some(FieldValue::Signed),
            FieldKind::Text
            | FieldKind::Checkbox
            | FieldKind::Radio
            | FieldKind::Button
            | FieldKind::Unknown => None,
        }
    }
}

/// Current value of a field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    #[default]
    Null,
    Text(String),
    Bool(bool),
    /// Opaque "this field has been signed" token
    Signed,
}

impl FieldValue {
    /// Display string for status lines and logs
    pub fn display(&self) -> &str {
        match self {
            FieldValue::Null => "",
            FieldValue::Text(text) => text,
            FieldValue::Bool(true) => "true",
            FieldValue::Bool(false) => "false",
            FieldValue::Signed => SIGNED_MARKER,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

/// Behaviour flags attached to a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldFlags {
    pub editable: bool,
    pub required: bool,
    /// Multi-line memo text, derived from the template
    pub memo: bool,
    /// Date-formatted text, derived from the template
    pub date: bool,
}

impl Default for FieldFlags {
    fn default() -> Self {
        Self {
            editable: true,
            required: false,
            memo: false,
            date: false,
        }
    }
}

/// A form field with its value and geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Join key across extraction, template, and edits; unique per document
    pub name: String,
    #[serde(default)]
    pub kind: FieldKind,
    /// Zero-based page the field lives on
    #[serde(default)]
    pub page_index: usize,
    #[serde(default)]
    pub value: FieldValue,
    /// Box in the document's source coordinate space
    pub raw_box: Rect,
    /// Page-relative box, each edge in 0..=1
    #[serde(default)]
    pub normalized_box: Option<Rect>,
    /// Viewport pixel box; never deserialized, always recomputed
    #[serde(default, skip_deserializing)]
    pub rendered_box: Option<Rect>,
    #[serde(default)]
    pub flags: FieldFlags,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Field {
    /// Create a field with default flags and a null value
    pub fn new(name: impl Into<String>, kind: FieldKind, page_index: usize, raw_box: Rect) -> Self {
        Self {
            name: name.into(),
            kind,
            page_index,
            value: FieldValue::Null,
            raw_box,
            normalized_box: None,
            rendered_box: None,
            flags: FieldFlags::default(),
            metadata: BTreeMap::new(),
        }
    }

    /// Builder-style value setter
    pub fn with_value(mut self, value: FieldValue) -> Self {
        self.value = value;
        self
    }

    /// Builder-style normalized box setter
    pub fn with_normalized_box(mut self, rect: Rect) -> Self {
        self.normalized_box = Some(rect);
        self
    }
}
