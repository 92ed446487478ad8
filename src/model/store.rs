// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! In-session field store.
//!
//! `FieldStore` keeps fields in extraction order with unique names. The
//! controller is its only writer.

use super::field::{Field, FieldValue};
use serde::Serialize;
use std::collections::HashMap;

/// Ordered, name-unique list of fields for the open document
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldStore {
    fields: Vec<Field>,
}

impl FieldStore {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Build a store, dropping later fields that reuse an earlier name.
    pub fn from_fields(fields: impl IntoIterator<Item = Field>) -> Self {
        let mut store = Self::new();
        for field in fields {
            if store.contains(&field.name) {
                tracing::warn!("Dropping duplicate field name: {}", field.name);
                continue;
            }
            store.fields.push(field);
        }
        store
    }

    /// Layer extracted values onto template fields by name.
    ///
    /// The template decides which fields exist and in what order. A template
    /// field with a live extracted value takes that value; one without keeps
    /// its template default. Extracted fields the template does not name are
    /// dropped. Template geometry wins, but an extracted normalized box fills
    /// in when the template has none.
    pub fn layered(template: Vec<Field>, extracted: Vec<Field>) -> Self {
        let mut live: HashMap<String, Field> = extracted
            .into_iter()
            .map(|field| (field.name.clone(), field))
            .collect();

        let merged = template.into_iter().map(|mut field| {
            if let Some(extracted) = live.remove(&field.name) {
                if !extracted.value.is_null() {
                    field.value = extracted.value;
                }
                if field.normalized_box.is_none() {
                    field.normalized_box = extracted.normalized_box;
                }
            }
            field
        });
        let store = Self::from_fields(merged);

        if !live.is_empty() {
            tracing::debug!("Dropped {} extracted fields absent from template", live.len());
        }
        store
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Field> {
        self.fields.iter_mut()
    }

    /// Set one field's value. Returns `false` if the name is unknown.
    pub fn set_value(&mut self, name: &str, value: FieldValue) -> bool {
        match self.get_mut(name) {
            Some(field) => {
                field.value = value;
                true
            }
            None => false,
        }
    }

    /// Reset every field to its kind's cleared value.
    pub fn clear_values(&mut self) {
        for field in &mut self.fields {
            field.value = field.kind.cleared_value();
        }
    }

    /// Mark every field that accepts a signature as signed.
    pub fn sign_all(&mut self) -> usize {
        let mut signed = 0;
        for field in &mut self.fields {
            if let Some(value) = field.kind.signed_value() {
                field.value = value;
                signed += 1;
            }
        }
        signed
    }

    pub fn as_slice(&self) -> &[Field] {
        &self.fields
    }

    pub fn to_vec(&self) -> Vec<Field> {
        self.fields.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::field::FieldKind;
    use kurbo::Rect;

    fn field(name: &str, kind: FieldKind) -> Field {
        Field::new(name, kind, 0, Rect::new(0.0, 0.0, 10.0, 10.0))
    }

    #[test]
    fn duplicate_names_keep_first() {
        let store = FieldStore::from_fields(vec![
            field("a", FieldKind::Text).with_value(FieldValue::Text("first".into())),
            field("a", FieldKind::Text).with_value(FieldValue::Text("second".into())),
            field("b", FieldKind::Checkbox),
        ]);

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a").unwrap().value, FieldValue::Text("first".into()));
    }

    #[test]
    fn layering_follows_template() {
        let template = vec![
            field("fullName", FieldKind::Text).with_value(FieldValue::Text("default".into())),
            field("agree", FieldKind::Checkbox).with_value(FieldValue::Bool(false)),
            field("memo", FieldKind::Text).with_value(FieldValue::Text("keep me".into())),
        ];
        let extracted = vec![
            field("agree", FieldKind::Checkbox).with_value(FieldValue::Bool(true)),
            field("fullName", FieldKind::Text).with_value(FieldValue::Text("Jane Doe".into())),
            field("stray", FieldKind::Text).with_value(FieldValue::Text("dropped".into())),
        ];

        let store = FieldStore::layered(template, extracted);
        let names: Vec<&str> = store.iter().map(|f| f.name.as_str()).collect();

        assert_eq!(names, vec!["fullName", "agree", "memo"]);
        assert_eq!(store.get("fullName").unwrap().value, FieldValue::Text("Jane Doe".into()));
        assert_eq!(store.get("agree").unwrap().value, FieldValue::Bool(true));
        assert_eq!(store.get("memo").unwrap().value, FieldValue::Text("keep me".into()));
        assert!(!store.contains("stray"));
    }

    #[test]
    fn null_extracted_value_keeps_template_default() {
        let template = vec![field("a", FieldKind::Text).with_value(FieldValue::Text("t".into()))];
        let extracted = vec![field("a", FieldKind::Text)];

        let store = FieldStore::layered(template, extracted);
        assert_eq!(store.get("a").unwrap().value, FieldValue::Text("t".into()));
    }

    #[test]
    fn clear_values_keeps_identity() {
        let mut store = FieldStore::from_fields(vec![
            field("t", FieldKind::Text).with_value(FieldValue::Text("x".into())),
            field("c", FieldKind::Checkbox).with_value(FieldValue::Bool(true)),
            field("s", FieldKind::Signature).with_value(FieldValue::Signed),
        ]);
        let before: Vec<(String, FieldKind, Rect)> =
            store.iter().map(|f| (f.name.clone(), f.kind, f.raw_box)).collect();

        store.clear_values();

        assert_eq!(store.get("t").unwrap().value, FieldValue::Text(String::new()));
        assert_eq!(store.get("c").unwrap().value, FieldValue::Bool(false));
        assert_eq!(store.get("s").unwrap().value, FieldValue::Null);
        let after: Vec<(String, FieldKind, Rect)> =
            store.iter().map(|f| (f.name.clone(), f.kind, f.raw_box)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn sign_all_touches_only_signatures() {
        let mut store = FieldStore::from_fields(vec![
            field("t", FieldKind::Text),
            field("s1", FieldKind::Signature),
            field("s2", FieldKind::Signature),
        ]);

        assert_eq!(store.sign_all(), 2);
        assert!(store.get("t").unwrap().value.is_null());
        assert_eq!(store.get("s2").unwrap().value, FieldValue::Signed);
    }

    #[test]
    fn set_value_unknown_name() {
        let mut store = FieldStore::from_fields(vec![field("a", FieldKind::Text)]);
        assert!(!store.set_value("missing", FieldValue::Bool(true)));
        assert!(store.set_value("a", FieldValue::Text("ok".into())));
    }
}
