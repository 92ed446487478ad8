// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

use kurbo::{Point, Rect};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use super::*;
use crate::error::SessionError;
use crate::model::{Field, FieldKind, FieldValue};
use crate::ports::memory::FailPoint;
use crate::model::Viewport;
use crate::ports::{
    CoordinateTransform, ManualClock, MemoryBackend, OpenRequest, PageMeta, SignatureMode, StandardTransform,
    TransformError,
};
use crate::protocol::ChannelTransport;
use crate::settings::SessionConfig;

const DIMS: &str = r#"{"type":"PDF_DIMENSIONS","width":612,"height":792,"scale":1}"#;
const RENDER_DONE: &str = r#"{"type":"RENDER_DONE"}"#;
const READY: &str = r#"{"type":"READY"}"#;
const PAGE_COUNT: &str = r#"{"type":"DEBUG_PAGE_COUNT","pages":2}"#;

fn lease_fields() -> Vec<Field> {
    vec![
        Field::new("fullName", FieldKind::Text, 0, Rect::new(72.0, 692.0, 272.0, 712.0))
            .with_value(FieldValue::Text("J. Doe".into())),
        Field::new("agree", FieldKind::Checkbox, 0, Rect::new(72.0, 600.0, 92.0, 620.0))
            .with_value(FieldValue::Bool(true)),
        Field::new("tenantSignature", FieldKind::Signature, 0, Rect::new(300.0, 100.0, 500.0, 140.0)),
        Field::new("landlordSignature", FieldKind::Signature, 1, Rect::new(300.0, 100.0, 500.0, 140.0)),
    ]
}

fn page() -> PageMeta {
    PageMeta::new(Rect::new(0.0, 0.0, 612.0, 792.0))
}

fn config(quiet_window_ms: u64) -> SessionConfig {
    let mut config = SessionConfig::default();
    config.gate.quiet_window_ms = quiet_window_ms;
    config
}

/// Standard transform whose pixel mapping can be switched off
#[derive(Default)]
struct SwitchableTransform {
    failing: AtomicBool,
}

impl CoordinateTransform for SwitchableTransform {
    fn to_percent_rect(&self, raw_box: Rect, page: &PageMeta) -> Result<Rect, TransformError> {
        StandardTransform.to_percent_rect(raw_box, page)
    }

    fn to_pixel_rect(&self, percent_box: Rect, viewport: &Viewport) -> Result<Rect, TransformError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransformError::UnusableViewport);
        }
        StandardTransform.to_pixel_rect(percent_box, viewport)
    }

    fn hit_test(&self, point: Point, pixel_box: Rect, padding: f64) -> bool {
        StandardTransform.hit_test(point, pixel_box, padding)
    }
}

fn approx(a: Rect, b: Rect) -> bool {
    [(a.x0, b.x0), (a.y0, b.y0), (a.x1, b.x1), (a.y1, b.y1)]
        .iter()
        .all(|(x, y)| (x - y).abs() < 1e-9)
}

struct Harness {
    controller: SessionController,
    timers: TimerEvents,
    clock: Arc<ManualClock>,
    backend: Arc<MemoryBackend>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl Harness {
    fn new(quiet_window_ms: u64) -> Self {
        Self::with_ports(quiet_window_ms, |_| {})
    }

    fn with_ports(quiet_window_ms: u64, customize: impl FnOnce(&mut SessionPorts)) -> Self {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_document("lease", "rentals", b"%PDF-1.7".to_vec(), vec![page(), page()], lease_fields());
        let clock = Arc::new(ManualClock::new());
        let mut ports = SessionPorts::in_memory(backend.clone(), clock.clone());
        customize(&mut ports);
        let (mut controller, timers) = SessionController::new(ports, config(quiet_window_ms));
        let (transport, outbound) = ChannelTransport::new();
        controller.attach_transport(Box::new(transport));
        Self {
            controller,
            timers,
            clock,
            backend,
            outbound,
        }
    }

    async fn opened(quiet_window_ms: u64) -> Self {
        let mut harness = Self::new(quiet_window_ms);
        harness.controller.open(OpenRequest::new("lease", "rentals")).await.unwrap();
        harness
    }

    /// Open, load into a ready renderer, and let overlays show.
    async fn visible() -> Self {
        let mut harness = Self::opened(0).await;
        harness.send(READY).await;
        harness.send(DIMS).await;
        harness.send(RENDER_DONE).await;
        assert!(harness.controller.can_show_overlays());
        harness.drain_outbound();
        harness
    }

    async fn send(&mut self, raw: &str) {
        self.controller.on_renderer_message(raw).await;
    }

    fn advance(&mut self, ms: u64) {
        self.clock.advance(Duration::from_millis(ms));
        while let Ok(event) = self.timers.try_recv() {
            self.controller.on_timer(event);
        }
    }

    /// Types of every outbound message since the last drain
    fn drain_outbound(&mut self) -> Vec<Value> {
        let mut messages = Vec::new();
        while let Ok(raw) = self.outbound.try_recv() {
            messages.push(serde_json::from_str(&raw).unwrap());
        }
        messages
    }

    fn outbound_types(&mut self) -> Vec<String> {
        self.drain_outbound()
            .iter()
            .map(|m| m["type"].as_str().unwrap().to_string())
            .collect()
    }

    fn value(&self, name: &str) -> FieldValue {
        self.controller.snapshot().fields.get(name).unwrap().value.clone()
    }
}

#[tokio::test]
async fn open_masks_and_waits_for_ready() {
    let mut harness = Harness::opened(0).await;
    let session = harness.controller.snapshot();
    assert_eq!(session.document_id.as_deref(), Some("lease"));
    assert_eq!(session.fields.len(), 4);
    assert_eq!(session.page_number, 1);
    assert!(!session.dirty);
    assert!(!session.overlays_visible);
    assert!(!harness.controller.can_show_overlays());
    assert!(harness.outbound_types().is_empty());

    harness.send(READY).await;
    let messages = harness.drain_outbound();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["type"], "LOAD_PDF_BASE64");
    assert_eq!(messages[0]["base64"], "JVBERi0xLjc=");

    // A repeated READY for the same document does not reload.
    harness.send(READY).await;
    assert!(harness.outbound_types().is_empty());
}

#[tokio::test]
async fn ready_before_open_loads_on_open() {
    let mut harness = Harness::new(0);
    harness.send(READY).await;
    assert!(harness.controller.snapshot().renderer_ready);
    assert!(harness.outbound_types().is_empty());

    harness.controller.open(OpenRequest::new("lease", "rentals")).await.unwrap();
    assert_eq!(harness.outbound_types(), vec!["LOAD_PDF_BASE64"]);
}

#[tokio::test]
async fn open_normalizes_boxes_against_crop_box() {
    let harness = Harness::opened(0).await;
    let field = harness.controller.snapshot().fields.get("fullName").unwrap().clone();
    let expected = Rect::new(72.0 / 612.0, 80.0 / 792.0, 272.0 / 612.0, 100.0 / 792.0);
    assert!(approx(field.normalized_box.unwrap(), expected));
    assert!(field.rendered_box.is_none());
}

#[tokio::test]
async fn first_open_seeds_template() {
    let harness = Harness::opened(0).await;
    let template = harness.backend.template("lease").unwrap();
    assert_eq!(template.len(), 4);
    assert_eq!(template[0].name, "fullName");
}

#[tokio::test]
async fn stored_template_decides_fields_and_order() {
    let mut harness = Harness::new(0);
    harness.backend.set_template(
        "lease",
        vec![
            Field::new("agree", FieldKind::Checkbox, 0, Rect::new(72.0, 600.0, 92.0, 620.0)),
            Field::new("fullName", FieldKind::Text, 0, Rect::new(72.0, 692.0, 272.0, 712.0)),
        ],
    );
    harness.controller.open(OpenRequest::new("lease", "rentals")).await.unwrap();

    let session = harness.controller.snapshot();
    let names: Vec<_> = session.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["agree", "fullName"]);
    assert_eq!(harness.value("fullName"), FieldValue::Text("J. Doe".into()));
    assert_eq!(harness.value("agree"), FieldValue::Bool(true));
}

#[tokio::test]
async fn render_done_shows_overlays_for_current_page() {
    let harness = Harness::visible().await;
    assert!(harness.controller.snapshot().overlays_visible);

    let overlays = harness.controller.overlays();
    let names: Vec<_> = overlays.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["fullName", "agree", "tenantSignature"]);
    assert!(approx(overlays[0].rect, Rect::new(72.0, 80.0, 272.0, 100.0)));

    assert_eq!(harness.controller.hit_test(Point::new(100.0, 90.0)).as_deref(), Some("fullName"));
    // Within padding of the box edge.
    assert_eq!(harness.controller.hit_test(Point::new(70.0, 90.0)).as_deref(), Some("fullName"));
    assert_eq!(harness.controller.hit_test(Point::new(5.0, 5.0)), None);
}

#[tokio::test]
async fn ready_for_overlays_alone_unmasks() {
    let mut harness = Harness::opened(0).await;
    harness.send(READY).await;
    harness.send(DIMS).await;
    harness.send(r#"{"type":"READY_FOR_OVERLAYS"}"#).await;
    assert!(harness.controller.can_show_overlays());
}

#[tokio::test]
async fn unmask_waits_for_quiet_window() {
    let mut harness = Harness::opened(120).await;
    harness.send(READY).await;
    harness.send(DIMS).await;
    harness.send(RENDER_DONE).await;
    assert!(!harness.controller.can_show_overlays());

    harness.advance(119);
    assert!(!harness.controller.can_show_overlays());
    harness.advance(1);
    assert!(harness.controller.can_show_overlays());
    assert!(harness.controller.snapshot().overlays_visible);
}

#[tokio::test]
async fn tick_while_pending_cancels_unmask() {
    let mut harness = Harness::opened(120).await;
    harness.send(READY).await;
    harness.send(DIMS).await;
    harness.send(RENDER_DONE).await;

    harness.advance(60);
    harness.send(PAGE_COUNT).await;
    harness.advance(1000);
    assert!(!harness.controller.can_show_overlays(), "interrupted unmask must be re-requested");

    // The render-done survives the tick; a fresh request re-arms the window.
    harness.send(RENDER_DONE).await;
    harness.advance(119);
    assert!(!harness.controller.can_show_overlays());
    harness.advance(1);
    assert!(harness.controller.can_show_overlays());
}

#[tokio::test]
async fn render_done_before_dimensions_does_not_count() {
    let mut harness = Harness::opened(0).await;
    harness.send(READY).await;
    harness.send(RENDER_DONE).await;
    assert!(harness.controller.can_show_overlays());

    // New dimensions mask, and the earlier render-done no longer counts.
    harness.send(DIMS).await;
    assert!(!harness.controller.can_show_overlays());
    harness.send(PAGE_COUNT).await;
    assert!(!harness.controller.can_show_overlays());
}

#[tokio::test]
async fn new_dimensions_mask_and_recompute_boxes() {
    let mut harness = Harness::visible().await;
    harness
        .send(r#"{"type":"PDF_DIMENSIONS","width":1224,"height":1584,"scale":2}"#)
        .await;

    assert!(!harness.controller.can_show_overlays());
    assert!(harness.controller.overlays().is_empty());
    let session = harness.controller.snapshot();
    assert_eq!(session.viewport.unwrap().width, 1224.0);
    let rect = session.fields.get("fullName").unwrap().rendered_box.unwrap();
    assert!(approx(rect, Rect::new(144.0, 160.0, 544.0, 200.0)));
}

#[tokio::test]
async fn failed_pixel_mapping_clears_rendered_boxes() {
    let transform = Arc::new(SwitchableTransform::default());
    let ports_transform = transform.clone();
    let mut harness = Harness::with_ports(0, move |ports| {
        ports.transform = Some(ports_transform as Arc<dyn CoordinateTransform>);
    });
    harness.controller.open(OpenRequest::new("lease", "rentals")).await.unwrap();
    harness.send(READY).await;
    harness.send(DIMS).await;
    harness.send(RENDER_DONE).await;
    assert_eq!(harness.controller.overlays().len(), 3);

    transform.failing.store(true, Ordering::SeqCst);
    harness
        .send(r#"{"type":"PDF_DIMENSIONS","width":1224,"height":1584,"scale":2}"#)
        .await;
    harness.send(RENDER_DONE).await;

    let session = harness.controller.snapshot();
    assert_eq!(session.viewport.unwrap().width, 1224.0);
    assert!(session.fields.iter().all(|field| field.rendered_box.is_none()));
    assert!(session.fields.iter().all(|field| field.normalized_box.is_some()));
    assert!(harness.controller.can_show_overlays());
    assert!(harness.controller.overlays().is_empty());
    assert_eq!(harness.controller.hit_test(Point::new(200.0, 180.0)), None);
}

#[tokio::test]
async fn missing_transform_leaves_fields_unplaced() {
    let mut harness = Harness::with_ports(0, |ports| ports.transform = None);
    harness.controller.open(OpenRequest::new("lease", "rentals")).await.unwrap();
    harness.send(READY).await;
    harness.send(DIMS).await;
    harness.send(RENDER_DONE).await;

    let session = harness.controller.snapshot();
    assert!(session.viewport.is_some());
    assert!(session.fields.iter().all(|field| field.normalized_box.is_none()));
    assert!(session.fields.iter().all(|field| field.rendered_box.is_none()));
    assert!(harness.controller.can_show_overlays());
    assert!(harness.controller.overlays().is_empty());
    assert_eq!(harness.controller.hit_test(Point::new(100.0, 90.0)), None);
}

#[tokio::test]
async fn rotated_dimensions_rotate_boxes() {
    let mut harness = Harness::opened(0).await;
    harness
        .send(r#"{"type":"PDF_DIMENSIONS","width":792,"height":612,"scale":1,"rotation":90}"#)
        .await;
    let rect = harness.controller.snapshot().fields.get("fullName").unwrap().rendered_box.unwrap();
    // (x, y) → (1 - y, x) in unit space, then scaled to 792x612.
    let expected = Rect::new((1.0 - 100.0 / 792.0) * 792.0, 72.0 / 612.0 * 612.0, (1.0 - 80.0 / 792.0) * 792.0, 272.0 / 612.0 * 612.0);
    assert!(approx(rect, expected), "{rect:?}");
}

#[tokio::test]
async fn unusable_dimensions_are_rejected() {
    let mut harness = Harness::visible().await;
    let before = harness.controller.snapshot().clone();

    harness.send(r#"{"type":"PDF_DIMENSIONS","width":"abc","height":792,"scale":1}"#).await;
    harness.send(r#"{"type":"PDF_DIMENSIONS","width":612,"height":792}"#).await;
    harness
        .send(r#"{"type":"PDF_DIMENSIONS","width":612,"height":792,"scale":1,"rotation":45}"#)
        .await;

    assert_eq!(harness.controller.snapshot(), &before);
    assert!(harness.controller.can_show_overlays());
}

#[tokio::test]
async fn garbage_messages_are_ignored() {
    let mut harness = Harness::visible().await;
    let before = harness.controller.snapshot().clone();
    for raw in ["", "not json", "[1,2]", r#"{"kind":"READY"}"#, r#"{"type":"SCROLL"}"#] {
        harness.send(raw).await;
    }
    assert_eq!(harness.controller.snapshot(), &before);
}

#[tokio::test]
async fn navigation_masks_and_notifies_renderer() {
    let mut harness = Harness::visible().await;

    harness.controller.set_page(2);
    assert!(!harness.controller.can_show_overlays());
    let messages = harness.drain_outbound();
    assert_eq!(messages[0]["type"], "SET_PAGE");
    assert_eq!(messages[0]["pageNumber"], 2);

    harness.send(RENDER_DONE).await;
    let names: Vec<_> = harness.controller.overlays().into_iter().map(|o| o.name).collect();
    assert_eq!(names, vec!["landlordSignature"]);

    harness.controller.set_scale(1.5);
    assert!(!harness.controller.can_show_overlays());
    let messages = harness.drain_outbound();
    assert_eq!(messages[0]["type"], "SET_SCALE");
    assert_eq!(messages[0]["scale"], 1.5);
    assert_eq!(harness.controller.snapshot().scale, 1.5);
}

#[tokio::test]
async fn navigation_clamps_and_ignores_nan() {
    let mut harness = Harness::opened(0).await;
    harness.controller.set_page(0);
    assert_eq!(harness.controller.snapshot().page_number, 1);

    harness.controller.set_scale(0.01);
    assert_eq!(harness.controller.snapshot().scale, 0.1);

    harness.drain_outbound();
    harness.controller.set_scale(f64::NAN);
    assert_eq!(harness.controller.snapshot().scale, 0.1);
    assert!(harness.outbound_types().is_empty());
}

#[tokio::test]
async fn reload_restores_page_and_scale() {
    let mut harness = Harness::opened(0).await;
    harness.controller.set_page(2);
    harness.controller.set_scale(2.0);
    harness.drain_outbound();

    harness.send(READY).await;
    assert_eq!(harness.outbound_types(), vec!["LOAD_PDF_BASE64", "SET_PAGE", "SET_SCALE"]);
}

#[tokio::test]
async fn select_field_resolves_against_store() {
    let mut harness = Harness::opened(0).await;
    harness.controller.select_field(Some("fullName"));
    assert_eq!(harness.controller.selected_field().unwrap().name, "fullName");

    harness.controller.select_field(Some("nonexistent"));
    assert!(harness.controller.selected_field().is_none());

    harness.controller.select_field(None);
    assert!(harness.controller.snapshot().selection.is_none());
}

#[tokio::test]
async fn save_text_persists_then_refreshes() {
    let mut harness = Harness::visible().await;
    harness.controller.save_text("fullName", "Jane Doe").await.unwrap();

    let session = harness.controller.snapshot();
    assert_eq!(harness.value("fullName"), FieldValue::Text("Jane Doe".into()));
    assert!(session.dirty);
    assert!(!session.overlays_visible);
    let working_copy = session.working_copy.clone().unwrap();
    assert_eq!(
        harness.backend.working_value(&working_copy, "fullName"),
        Some(FieldValue::Text("Jane Doe".into()))
    );
    // The edited document is re-sent to the renderer.
    assert_eq!(harness.outbound_types(), vec!["LOAD_PDF_BASE64"]);

    // The refresh timer alone never unmasks; the reload has to paint first.
    harness.advance(350);
    assert!(!harness.controller.can_show_overlays());
    harness.send(RENDER_DONE).await;
    assert!(harness.controller.can_show_overlays());
}

#[tokio::test]
async fn refresh_timer_without_render_stays_masked() {
    let mut harness = Harness::opened(0).await;
    harness.controller.save_text("fullName", "Jane Doe").await.unwrap();
    harness.advance(350);
    assert!(!harness.controller.can_show_overlays());

    // A ready renderer gets the reload, but nothing has painted it yet.
    harness.send(READY).await;
    assert_eq!(harness.outbound_types(), vec!["LOAD_PDF_BASE64"]);
    harness.advance(1000);
    assert!(!harness.controller.can_show_overlays());
}

#[tokio::test]
async fn refresh_timer_rearms_after_interrupted_render() {
    let mut harness = Harness::opened(120).await;
    harness.send(READY).await;
    harness.send(DIMS).await;
    harness.send(RENDER_DONE).await;
    harness.advance(120);
    assert!(harness.controller.can_show_overlays());

    harness.controller.save_text("fullName", "Jane Doe").await.unwrap();
    harness.send(RENDER_DONE).await;
    harness.send(PAGE_COUNT).await;

    // The refresh request re-arms the interrupted unmask from its own time.
    harness.advance(350);
    assert!(!harness.controller.can_show_overlays());
    harness.advance(120);
    assert!(harness.controller.can_show_overlays());
}

#[tokio::test]
async fn refresh_unmask_is_void_after_a_later_mask() {
    let mut harness = Harness::visible().await;
    harness.controller.save_text("fullName", "Jane Doe").await.unwrap();
    harness
        .send(r#"{"type":"PDF_DIMENSIONS","width":700,"height":900,"scale":1}"#)
        .await;

    harness.advance(400);
    assert!(!harness.controller.can_show_overlays());

    harness.send(RENDER_DONE).await;
    assert!(harness.controller.can_show_overlays());
}

#[tokio::test]
async fn toggle_checkbox() {
    let mut harness = Harness::opened(0).await;
    harness.controller.toggle_checkbox("agree", false).await.unwrap();
    assert_eq!(harness.value("agree"), FieldValue::Bool(false));
    assert!(harness.controller.snapshot().dirty);
}

#[tokio::test]
async fn signatures_store_only_a_marker() {
    let mut harness = Harness::opened(0).await;
    harness
        .controller
        .save_signature("aGVsbG8=", SignatureMode::Single("tenantSignature".into()))
        .await
        .unwrap();
    assert_eq!(harness.value("tenantSignature"), FieldValue::Signed);
    assert_eq!(harness.value("landlordSignature"), FieldValue::Null);

    harness.controller.save_signature("aGVsbG8=", SignatureMode::All).await.unwrap();
    assert_eq!(harness.value("landlordSignature"), FieldValue::Signed);
    assert_eq!(harness.value("fullName"), FieldValue::Text("J. Doe".into()));
}

#[tokio::test]
async fn clear_form_resets_by_kind() {
    let mut harness = Harness::opened(0).await;
    harness
        .controller
        .save_signature("aGVsbG8=", SignatureMode::All)
        .await
        .unwrap();
    harness.controller.clear_form().await.unwrap();

    assert_eq!(harness.value("fullName"), FieldValue::Text(String::new()));
    assert_eq!(harness.value("agree"), FieldValue::Bool(false));
    assert_eq!(harness.value("tenantSignature"), FieldValue::Null);
    assert_eq!(harness.controller.snapshot().status, "Form cleared");
}

#[tokio::test]
async fn failed_write_keeps_values_and_dirty() {
    let mut harness = Harness::visible().await;
    let errors = Arc::new(AtomicUsize::new(0));
    let seen = errors.clone();
    harness.controller.set_error_callback(Box::new(move |_: &SessionError| {
        seen.fetch_add(1, Ordering::SeqCst);
    }));

    harness.backend.fail_next(FailPoint::Write);
    let err = harness.controller.save_text("fullName", "Jane Doe").await.unwrap_err();
    assert!(matches!(err, SessionError::Persistence(_)));

    let session = harness.controller.snapshot();
    assert_eq!(harness.value("fullName"), FieldValue::Text("J. Doe".into()));
    assert!(session.dirty);
    assert!(session.status.starts_with("Error saving text"), "{}", session.status);
    assert!(!session.overlays_visible);
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    // No retry, no reload, no stabilizing unmask.
    assert!(harness.outbound_types().is_empty());
    harness.advance(1000);
    assert!(!harness.controller.can_show_overlays());
    assert_eq!(harness.backend.write_count(), 0);
}

#[tokio::test]
async fn failed_renderer_load_is_reported() {
    let mut harness = Harness::opened(0).await;
    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = errors.clone();
    harness.controller.set_error_callback(Box::new(move |err: &SessionError| {
        seen.lock().unwrap().push(err.to_string());
    }));

    harness.backend.fail_next(FailPoint::Read);
    harness.send(READY).await;
    let status = harness.controller.snapshot().status.clone();
    assert!(status.starts_with("Error loading document into renderer"), "{status}");
    assert_eq!(errors.lock().unwrap().len(), 1);
    assert!(harness.outbound_types().is_empty());

    // Nothing was loaded, so the next READY tries again.
    harness.send(READY).await;
    assert_eq!(harness.outbound_types(), vec!["LOAD_PDF_BASE64"]);
}

#[tokio::test]
async fn edit_of_unknown_field_changes_nothing() {
    let mut harness = Harness::visible().await;
    let before = harness.controller.snapshot().clone();

    let err = harness.controller.save_text("nope", "x").await.unwrap_err();
    assert!(matches!(err, SessionError::FieldNotFound { ref name } if name == "nope"));
    let err = harness
        .controller
        .save_signature("aGVsbG8=", SignatureMode::Single("nope".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::FieldNotFound { .. }));

    assert_eq!(harness.controller.snapshot(), &before);
    assert_eq!(harness.backend.write_count(), 0);
}

#[tokio::test]
async fn edits_need_an_open_document() {
    let mut harness = Harness::new(0);
    let err = harness.controller.clear_form().await.unwrap_err();
    assert!(matches!(err, SessionError::NotOpen));
    let err = harness.controller.save().await.unwrap_err();
    assert!(matches!(err, SessionError::NotOpen));
}

#[tokio::test]
async fn save_clears_dirty_and_commits() {
    let mut harness = Harness::opened(0).await;
    harness.controller.save_text("fullName", "Jane Doe").await.unwrap();
    assert_eq!(harness.controller.request_close(), CloseCheck::UnsavedChanges);
    assert_eq!(harness.backend.stored_value("lease", "fullName"), Some(FieldValue::Text("J. Doe".into())));

    harness.controller.save().await.unwrap();
    assert!(!harness.controller.snapshot().dirty);
    assert_eq!(harness.controller.request_close(), CloseCheck::Clear);
    assert_eq!(
        harness.backend.stored_value("lease", "fullName"),
        Some(FieldValue::Text("Jane Doe".into()))
    );
}

#[tokio::test]
async fn failed_save_stays_dirty() {
    let mut harness = Harness::opened(0).await;
    harness.controller.toggle_checkbox("agree", false).await.unwrap();
    harness.backend.fail_next(FailPoint::Save);

    assert!(harness.controller.save().await.is_err());
    let session = harness.controller.snapshot();
    assert!(session.dirty);
    assert!(session.status.starts_with("Error saving document"));
}

#[tokio::test]
async fn failed_open_keeps_previous_session() {
    let mut harness = Harness::opened(0).await;
    harness.controller.save_text("fullName", "Jane Doe").await.unwrap();

    for point in [FailPoint::Open, FailPoint::MissingWorkingCopy, FailPoint::Extract] {
        harness.backend.fail_next(point);
        let err = harness.controller.open(OpenRequest::new("lease", "rentals")).await.unwrap_err();
        assert!(matches!(err, SessionError::Open(_)));

        let session = harness.controller.snapshot();
        assert_eq!(session.document_id.as_deref(), Some("lease"));
        assert_eq!(harness.value("fullName"), FieldValue::Text("Jane Doe".into()));
        assert!(session.status.starts_with("Error opening lease"), "{}", session.status);
    }
}

#[tokio::test]
async fn reopening_replaces_the_session() {
    let mut harness = Harness::visible().await;
    harness.controller.select_field(Some("fullName"));
    harness.controller.set_page(2);

    harness.controller.open(OpenRequest::new("lease", "rentals")).await.unwrap();
    let session = harness.controller.snapshot();
    assert_eq!(session.page_number, 1);
    assert!(session.selection.is_none());
    assert!(session.viewport.is_none());
    assert!(!harness.controller.can_show_overlays());
    // Renderer is still ready, so the new working copy loads at once.
    assert!(harness.outbound_types().contains(&"LOAD_PDF_BASE64".to_string()));
}

#[tokio::test]
async fn close_resets_session() {
    let mut harness = Harness::visible().await;
    harness.controller.close();
    let session = harness.controller.snapshot();
    assert!(!session.is_open());
    assert!(session.fields.is_empty());
    assert!(session.renderer_ready);
    assert_eq!(session.status, "Closed");
    assert!(harness.controller.overlays().is_empty());
}

#[tokio::test]
async fn list_instances_by_sheet_context() {
    let mut harness = Harness::opened(0).await;
    let instances = harness.controller.list_instances("rentals").await.unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].document_id, "lease");
    assert!(harness.controller.list_instances("other").await.unwrap().is_empty());
}

#[tokio::test]
async fn template_store_and_clear() {
    let mut harness = Harness::opened(0).await;
    harness.controller.save_text("fullName", "Jane Doe").await.unwrap();
    harness.controller.store_template().await.unwrap();
    let template = harness.backend.template("lease").unwrap();
    assert_eq!(template[0].value, FieldValue::Text("Jane Doe".into()));

    harness.controller.clear_template().await.unwrap();
    assert!(harness.backend.template("lease").is_none());
}

#[tokio::test]
async fn subscribers_see_committed_transitions() {
    let mut harness = Harness::opened(0).await;
    let mut updates = harness.controller.subscribe();
    updates.mark_unchanged();

    harness.controller.save_text("fullName", "Jane Doe").await.unwrap();
    assert!(updates.has_changed().unwrap());
    let seen = updates.borrow_and_update().clone();
    assert_eq!(seen.fields.get("fullName").unwrap().value, FieldValue::Text("Jane Doe".into()));
    assert!(seen.dirty);
}

#[tokio::test]
async fn new_transport_waits_for_ready() {
    let mut harness = Harness::visible().await;
    let (transport, mut outbound) = ChannelTransport::new();
    harness.controller.attach_transport(Box::new(transport));

    assert!(!harness.controller.snapshot().renderer_ready);
    assert!(!harness.controller.can_show_overlays());

    harness.send(READY).await;
    let raw = outbound.try_recv().unwrap();
    assert!(raw.contains("LOAD_PDF_BASE64"));
}
