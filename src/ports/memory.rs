// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! In-memory storage backend.
//!
//! `MemoryBackend` implements the instance manager, field extractor, field
//! writer, and template store ports over plain maps. The binary uses it to
//! run a session from a JSON fixture; tests use its failure injection to
//! drive the controller's error paths.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{
    Extraction, FieldExtractor, FieldWriter, InstanceManager, InstanceMeta, OpenError, OpenRequest, OpenedInstance,
    PageMeta, PersistenceError, SignatureMode, TemplateStore, WorkingCopyRef,
};
use crate::model::{Field, FieldStore, FieldValue};

/// One injected failure, consumed by the next matching call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// `open` fails with an instance error
    Open,
    /// `open` succeeds but returns no working copy
    MissingWorkingCopy,
    /// `extract` fails
    Extract,
    /// `read_document` fails
    Read,
    /// The next field write (text, checkbox, signature, clear) fails
    Write,
    /// `save` fails
    Save,
}

/// Document description loaded from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    pub document_id: String,
    #[serde(default)]
    pub sheet_context: String,
    /// Document bytes, base64 encoded
    #[serde(default)]
    pub document_base64: String,
    #[serde(default)]
    pub pages: Vec<PageMeta>,
    /// Fields as extraction reports them, with live values
    pub fields: Vec<Field>,
    /// Stored template; when absent the first open seeds one
    #[serde(default)]
    pub template: Option<Vec<Field>>,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    sheet_context: String,
    bytes: Vec<u8>,
    pages: Vec<PageMeta>,
    fields: FieldStore,
}

#[derive(Debug, Clone)]
struct WorkingCopy {
    document_id: String,
    instance_id: String,
    bytes: Vec<u8>,
    pages: Vec<PageMeta>,
    fields: FieldStore,
}

#[derive(Debug, Default)]
struct MemoryState {
    documents: HashMap<String, StoredDocument>,
    working: HashMap<WorkingCopyRef, WorkingCopy>,
    templates: HashMap<String, Vec<Field>>,
    instances: Vec<InstanceMeta>,
    failures: HashSet<FailPoint>,
    next_id: u64,
    write_count: usize,
}

impl MemoryState {
    fn take_failure(&mut self, point: FailPoint) -> bool {
        self.failures.remove(&point)
    }

    fn working_mut(&mut self, working_copy: &WorkingCopyRef, operation: &'static str) -> Result<&mut WorkingCopy, PersistenceError> {
        if self.take_failure(FailPoint::Write) {
            return Err(PersistenceError::new(operation, "injected write failure"));
        }
        self.write_count += 1;
        self.working
            .get_mut(working_copy)
            .ok_or_else(|| PersistenceError::new(operation, format!("unknown working copy {working_copy}")))
    }
}

/// Map-backed implementation of the storage ports
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Memory backend mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Register a document that `open` can find.
    pub fn insert_document(
        &self,
        document_id: impl Into<String>,
        sheet_context: impl Into<String>,
        bytes: Vec<u8>,
        pages: Vec<PageMeta>,
        fields: Vec<Field>,
    ) {
        self.state().documents.insert(
            document_id.into(),
            StoredDocument {
                sheet_context: sheet_context.into(),
                bytes,
                pages,
                fields: FieldStore::from_fields(fields),
            },
        );
    }

    /// Store a template directly, bypassing the port.
    pub fn set_template(&self, document_id: impl Into<String>, fields: Vec<Field>) {
        self.state().templates.insert(document_id.into(), fields);
    }

    pub fn template(&self, document_id: &str) -> Option<Vec<Field>> {
        self.state().templates.get(document_id).cloned()
    }

    /// Build a backend holding a single fixture document.
    pub fn from_fixture(fixture: Fixture) -> Result<Self> {
        let bytes = STANDARD
            .decode(fixture.document_base64.trim())
            .context("Fixture document_base64 is not valid base64")?;
        let backend = Self::new();
        if let Some(template) = fixture.template {
            backend.set_template(fixture.document_id.clone(), template);
        }
        backend.insert_document(fixture.document_id, fixture.sheet_context, bytes, fixture.pages, fixture.fields);
        Ok(backend)
    }

    /// Read a fixture file and build a backend from it.
    pub fn load_fixture(path: &Path) -> Result<(Self, OpenRequest)> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture: {}", path.display()))?;
        let fixture: Fixture =
            serde_json::from_str(&text).with_context(|| format!("Failed to parse fixture: {}", path.display()))?;
        let request = OpenRequest::new(fixture.document_id.clone(), fixture.sheet_context.clone());
        Ok((Self::from_fixture(fixture)?, request))
    }

    /// Make the next call at `point` fail.
    pub fn fail_next(&self, point: FailPoint) {
        self.state().failures.insert(point);
    }

    /// Value persisted in a working copy, if the field exists
    pub fn working_value(&self, working_copy: &WorkingCopyRef, name: &str) -> Option<FieldValue> {
        let state = self.state();
        let copy = state.working.get(working_copy)?;
        copy.fields.get(name).map(|f| f.value.clone())
    }

    /// Value committed to the stored document, if the field exists
    pub fn stored_value(&self, document_id: &str, name: &str) -> Option<FieldValue> {
        let state = self.state();
        let document = state.documents.get(document_id)?;
        document.fields.get(name).map(|f| f.value.clone())
    }

    /// Number of field writes attempted so far
    pub fn write_count(&self) -> usize {
        self.state().write_count
    }
}

#[async_trait]
impl InstanceManager for MemoryBackend {
    async fn open(&self, request: &OpenRequest) -> Result<OpenedInstance, OpenError> {
        let mut state = self.state();
        if state.take_failure(FailPoint::Open) {
            return Err(OpenError::Instance("injected open failure".into()));
        }
        let document = state
            .documents
            .get(&request.document_id)
            .cloned()
            .ok_or_else(|| OpenError::Instance(format!("unknown document {}", request.document_id)))?;
        if state.take_failure(FailPoint::MissingWorkingCopy) {
            return Ok(OpenedInstance::default());
        }

        state.next_id += 1;
        let id = state.next_id;
        let working_copy = WorkingCopyRef(format!("wc-{id}-{}", request.document_id));
        let instance_id = format!("{}#{id}", request.document_id);
        state.instances.push(InstanceMeta {
            instance_id: instance_id.clone(),
            document_id: request.document_id.clone(),
            tag: request.tag.clone(),
            updated_at_ms: 0,
        });
        let extracted_fields = document.fields.to_vec();
        state.working.insert(
            working_copy.clone(),
            WorkingCopy {
                document_id: request.document_id.clone(),
                instance_id,
                bytes: document.bytes,
                pages: document.pages,
                fields: document.fields,
            },
        );

        Ok(OpenedInstance {
            working_copy: Some(working_copy),
            extracted_fields,
            template_fields: None,
        })
    }

    async fn list(&self, sheet_context: &str) -> Result<Vec<InstanceMeta>, OpenError> {
        let state = self.state();
        Ok(state
            .instances
            .iter()
            .filter(|meta| {
                state
                    .documents
                    .get(&meta.document_id)
                    .is_some_and(|doc| doc.sheet_context == sheet_context)
            })
            .cloned()
            .collect())
    }

    async fn read_document(&self, working_copy: &WorkingCopyRef) -> Result<Vec<u8>, OpenError> {
        let mut state = self.state();
        if state.take_failure(FailPoint::Read) {
            return Err(OpenError::Instance("injected read failure".into()));
        }
        state
            .working
            .get(working_copy)
            .map(|copy| copy.bytes.clone())
            .ok_or_else(|| OpenError::Instance(format!("unknown working copy {working_copy}")))
    }

    async fn save(&self, working_copy: &WorkingCopyRef) -> Result<(), PersistenceError> {
        let mut state = self.state();
        if state.take_failure(FailPoint::Save) {
            return Err(PersistenceError::new("save", "injected save failure"));
        }
        let copy = state
            .working
            .get(working_copy)
            .cloned()
            .ok_or_else(|| PersistenceError::new("save", format!("unknown working copy {working_copy}")))?;
        if let Some(document) = state.documents.get_mut(&copy.document_id) {
            document.fields = copy.fields;
            document.bytes = copy.bytes;
        }
        state.next_id += 1;
        let stamp = state.next_id;
        if let Some(meta) = state.instances.iter_mut().find(|m| m.instance_id == copy.instance_id) {
            meta.updated_at_ms = stamp;
        }
        Ok(())
    }
}

#[async_trait]
impl FieldExtractor for MemoryBackend {
    async fn extract(&self, working_copy: &WorkingCopyRef) -> Result<Extraction, OpenError> {
        let mut state = self.state();
        if state.take_failure(FailPoint::Extract) {
            return Err(OpenError::Extraction("injected extraction failure".into()));
        }
        let copy = state
            .working
            .get(working_copy)
            .ok_or_else(|| OpenError::Extraction(format!("unknown working copy {working_copy}")))?;
        Ok(Extraction {
            fields: copy.fields.to_vec(),
            page_meta: copy.pages.clone(),
        })
    }
}

fn set_field(copy: &mut WorkingCopy, operation: &'static str, name: &str, value: FieldValue) -> Result<(), PersistenceError> {
    if copy.fields.set_value(name, value) {
        Ok(())
    } else {
        Err(PersistenceError::new(operation, format!("no field named {name}")))
    }
}

#[async_trait]
impl FieldWriter for MemoryBackend {
    async fn write_text(&self, working_copy: &WorkingCopyRef, name: &str, value: &str) -> Result<(), PersistenceError> {
        let mut state = self.state();
        let copy = state.working_mut(working_copy, "write_text")?;
        set_field(copy, "write_text", name, FieldValue::Text(value.to_string()))
    }

    async fn write_checkbox(&self, working_copy: &WorkingCopyRef, name: &str, checked: bool) -> Result<(), PersistenceError> {
        let mut state = self.state();
        let copy = state.working_mut(working_copy, "write_checkbox")?;
        set_field(copy, "write_checkbox", name, FieldValue::Bool(checked))
    }

    async fn write_signature(
        &self,
        working_copy: &WorkingCopyRef,
        image_base64: &str,
        mode: &SignatureMode,
    ) -> Result<(), PersistenceError> {
        if STANDARD.decode(image_base64.trim()).is_err() {
            return Err(PersistenceError::new("write_signature", "signature image is not valid base64"));
        }
        let mut state = self.state();
        let copy = state.working_mut(working_copy, "write_signature")?;
        match mode {
            SignatureMode::Single(name) => set_field(copy, "write_signature", name, FieldValue::Signed),
            SignatureMode::All => {
                copy.fields.sign_all();
                Ok(())
            }
        }
    }

    async fn clear_form(&self, working_copy: &WorkingCopyRef) -> Result<(), PersistenceError> {
        let mut state = self.state();
        let copy = state.working_mut(working_copy, "clear_form")?;
        copy.fields.clear_values();
        Ok(())
    }
}

#[async_trait]
impl TemplateStore for MemoryBackend {
    async fn get_template(&self, document_id: &str) -> Result<Option<Vec<Field>>, OpenError> {
        Ok(self.state().templates.get(document_id).cloned())
    }

    async fn put_template(&self, document_id: &str, fields: &[Field]) -> Result<(), PersistenceError> {
        self.state().templates.insert(document_id.to_string(), fields.to_vec());
        Ok(())
    }

    async fn clear_template(&self, document_id: &str) -> Result<(), PersistenceError> {
        self.state().templates.remove(document_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldKind;
    use kurbo::Rect;
    use std::io::Write;

    fn backend() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.insert_document(
            "doc",
            "sheet-1",
            b"%PDF".to_vec(),
            vec![PageMeta::new(Rect::new(0.0, 0.0, 612.0, 792.0))],
            vec![
                Field::new("fullName", FieldKind::Text, 0, Rect::new(0.0, 0.0, 10.0, 10.0)),
                Field::new("sig", FieldKind::Signature, 0, Rect::new(0.0, 20.0, 10.0, 30.0)),
            ],
        );
        backend
    }

    #[tokio::test]
    async fn open_creates_working_copy() {
        let backend = backend();
        let opened = backend.open(&OpenRequest::new("doc", "sheet-1")).await.unwrap();
        let wc = opened.working_copy.unwrap();

        assert_eq!(opened.extracted_fields.len(), 2);
        assert_eq!(backend.read_document(&wc).await.unwrap(), b"%PDF".to_vec());
        assert_eq!(backend.list("sheet-1").await.unwrap().len(), 1);
        assert!(backend.list("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_document_fails_open() {
        let backend = backend();
        let err = backend.open(&OpenRequest::new("missing", "sheet-1")).await.unwrap_err();
        assert!(matches!(err, OpenError::Instance(_)));
    }

    #[tokio::test]
    async fn writes_stay_in_working_copy_until_save() {
        let backend = backend();
        let wc = backend
            .open(&OpenRequest::new("doc", "sheet-1"))
            .await
            .unwrap()
            .working_copy
            .unwrap();

        backend.write_text(&wc, "fullName", "Jane Doe").await.unwrap();
        assert_eq!(backend.working_value(&wc, "fullName"), Some(FieldValue::Text("Jane Doe".into())));
        assert_eq!(backend.stored_value("doc", "fullName"), Some(FieldValue::Null));

        backend.save(&wc).await.unwrap();
        assert_eq!(backend.stored_value("doc", "fullName"), Some(FieldValue::Text("Jane Doe".into())));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_once() {
        let backend = backend();
        let wc = backend
            .open(&OpenRequest::new("doc", "sheet-1"))
            .await
            .unwrap()
            .working_copy
            .unwrap();

        backend.fail_next(FailPoint::Write);
        assert!(backend.write_checkbox(&wc, "fullName", true).await.is_err());
        assert!(backend.write_text(&wc, "fullName", "ok").await.is_ok());
        assert_eq!(backend.write_count(), 1);
    }

    #[tokio::test]
    async fn signature_rejects_bad_payload() {
        let backend = backend();
        let wc = backend
            .open(&OpenRequest::new("doc", "sheet-1"))
            .await
            .unwrap()
            .working_copy
            .unwrap();

        assert!(backend.write_signature(&wc, "***", &SignatureMode::All).await.is_err());
        backend.write_signature(&wc, "iVBORw0KGgo=", &SignatureMode::All).await.unwrap();
        assert_eq!(backend.working_value(&wc, "sig"), Some(FieldValue::Signed));
    }

    #[test]
    fn load_fixture_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "document_id": "w9",
                "sheet_context": "tax",
                "document_base64": "JVBERg==",
                "pages": [{{ "crop_box": {{ "x0": 0, "y0": 0, "x1": 612, "y1": 792 }} }}],
                "fields": [{{ "name": "a", "kind": "text", "raw_box": {{ "x0": 0, "y0": 0, "x1": 1, "y1": 1 }} }}],
                "template": []
            }}"#
        )
        .unwrap();

        let (backend, request) = MemoryBackend::load_fixture(file.path()).unwrap();
        assert_eq!(request.document_id, "w9");
        assert_eq!(request.sheet_context, "tax");
        assert_eq!(backend.template("w9"), Some(vec![]));
    }
}
