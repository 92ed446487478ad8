// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Document session controller.
//!
//! Owns the session and is its only writer. Drives the open → extract →
//! render → overlay → edit → persist cycle, feeding renderer events and
//! edits through the overlay gate so overlays are never shown against a
//! viewport they were not computed for.

use kurbo::Point;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::state::{CloseCheck, Overlay, Session};
use crate::error::{Result, SessionError};
use crate::gate::{OverlayGate, UnmaskOutcome};
use crate::model::{Field, FieldStore, FieldValue};
use crate::ports::{
    Clock, CoordinateTransform, FieldExtractor, FieldWriter, InstanceManager, InstanceMeta, MemoryBackend, OpenError,
    OpenRequest, PageMeta, PersistenceError, SignatureMode, StandardTransform, TemplateStore, TimerHandle,
    WorkingCopyRef,
};
use crate::protocol::{DimensionsReport, InboundEvent, OutboundCommand, RendererTransport, parse_inbound};
use crate::settings::{SessionConfig, navigation};

/// Called with every error the controller surfaces
pub type ErrorCallback = Box<dyn Fn(&SessionError) + Send + Sync>;

/// Receiving end of the controller's self-scheduled timer events
pub type TimerEvents = mpsc::UnboundedReceiver<TimerEvent>;

/// Timer expiry delivered back into the session's event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Re-check a pending unmask against the quiet window
    GateSettle,
    /// Stabilizing unmask request after a saved edit; void if masked since
    /// `epoch`. The gate still needs a real render-done to grant it.
    RefreshUnmask { epoch: u64 },
}

/// Collaborators the controller delegates to
#[derive(Clone)]
pub struct SessionPorts {
    pub instances: Arc<dyn InstanceManager>,
    pub extractor: Arc<dyn FieldExtractor>,
    pub writer: Arc<dyn FieldWriter>,
    pub templates: Arc<dyn TemplateStore>,
    /// `None` leaves every field without a rendered box
    pub transform: Option<Arc<dyn CoordinateTransform>>,
    pub clock: Arc<dyn Clock>,
}

impl SessionPorts {
    /// Wire every storage port to one in-memory backend.
    pub fn in_memory(backend: Arc<MemoryBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            instances: backend.clone(),
            extractor: backend.clone(),
            writer: backend.clone(),
            templates: backend,
            transform: Some(Arc::new(StandardTransform)),
            clock,
        }
    }
}

/// Everything `open` gathers before it touches the session
struct LoadedDocument {
    working_copy: WorkingCopyRef,
    fields: FieldStore,
    page_meta: Vec<PageMeta>,
}

/// Open an instance, extract it, and layer values onto its template.
async fn load_document(ports: &SessionPorts, request: &OpenRequest) -> std::result::Result<LoadedDocument, OpenError> {
    let opened = ports.instances.open(request).await?;
    let working_copy = opened.working_copy.ok_or(OpenError::NoWorkingCopy)?;
    let extraction = ports.extractor.extract(&working_copy).await?;

    let live = if opened.extracted_fields.is_empty() {
        extraction.fields
    } else {
        opened.extracted_fields
    };

    let template = match opened.template_fields {
        Some(template) => template,
        None => match ports.templates.get_template(&request.document_id).await? {
            Some(template) => template,
            None => {
                tracing::info!("No template for {}, seeding from extraction", request.document_id);
                if let Err(err) = ports.templates.put_template(&request.document_id, &live).await {
                    tracing::warn!("Failed to store seeded template: {}", err);
                }
                live.clone()
            }
        },
    };

    let mut fields = FieldStore::layered(template, live);
    if let Some(transform) = &ports.transform {
        for field in fields.iter_mut().filter(|field| field.normalized_box.is_none()) {
            let Some(page) = extraction.page_meta.get(field.page_index) else {
                continue;
            };
            match transform.to_percent_rect(field.raw_box, page) {
                Ok(rect) => field.normalized_box = Some(rect),
                Err(err) => tracing::warn!("Cannot normalize box for {}: {}", field.name, err),
            }
        }
    }

    Ok(LoadedDocument {
        working_copy,
        fields,
        page_meta: extraction.page_meta,
    })
}

/// Sole owner and writer of a [`Session`]
pub struct SessionController {
    ports: SessionPorts,
    config: SessionConfig,
    session: Session,
    gate: OverlayGate,
    transport: Option<Box<dyn RendererTransport>>,
    /// Bumped per opened document and per saved edit
    revision: u64,
    /// Revision last sent to the renderer
    loaded_revision: Option<u64>,
    page_meta: Vec<PageMeta>,
    gate_timer: Option<TimerHandle>,
    timers: mpsc::UnboundedSender<TimerEvent>,
    notify: watch::Sender<Session>,
    on_error: Option<ErrorCallback>,
}

impl SessionController {
    /// Create a controller with no document open.
    ///
    /// Timer expiries arrive on the returned receiver; feed them back
    /// through [`SessionController::on_timer`].
    pub fn new(ports: SessionPorts, config: SessionConfig) -> (Self, TimerEvents) {
        let (timers, timer_events) = mpsc::unbounded_channel();
        let session = Session::new(config.initial_scale());
        let (notify, _) = watch::channel(session.clone());
        let controller = Self {
            gate: OverlayGate::new(config.gate.policy()),
            ports,
            config,
            session,
            transport: None,
            revision: 0,
            loaded_revision: None,
            page_meta: Vec::new(),
            gate_timer: None,
            timers,
            notify,
            on_error: None,
        };
        (controller, timer_events)
    }

    // ========================================================================
    // OBSERVATION
    // ========================================================================

    /// Current committed state
    pub fn snapshot(&self) -> &Session {
        &self.session
    }

    /// Receive every committed transition
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.notify.subscribe()
    }

    pub fn set_error_callback(&mut self, callback: ErrorCallback) {
        self.on_error = Some(callback);
    }

    pub fn can_show_overlays(&self) -> bool {
        self.gate.can_show_overlays()
    }

    /// Page geometry from the last extraction
    pub fn page_meta(&self) -> &[PageMeta] {
        &self.page_meta
    }

    /// Field the selection names, if it exists
    pub fn selected_field(&self) -> Option<&Field> {
        self.session.selected_field()
    }

    /// Overlays to draw for the current page; empty while masked
    pub fn overlays(&self) -> Vec<Overlay> {
        if !self.session.overlays_visible {
            return Vec::new();
        }
        let page = self.session.page_index();
        self.session
            .fields
            .iter()
            .filter(|field| field.page_index == page)
            .filter_map(|field| {
                field.rendered_box.map(|rect| Overlay {
                    name: field.name.clone(),
                    kind: field.kind,
                    rect,
                })
            })
            .collect()
    }

    /// Name of the topmost visible overlay under a viewport point
    pub fn hit_test(&self, point: Point) -> Option<String> {
        let transform = self.ports.transform.as_ref()?;
        let padding = self.config.overlay.hit_padding;
        self.overlays()
            .into_iter()
            .rev()
            .find(|overlay| transform.hit_test(point, overlay.rect, padding))
            .map(|overlay| overlay.name)
    }

    // ========================================================================
    // COMMIT / ERRORS
    // ========================================================================

    fn now(&self) -> u64 {
        self.ports.clock.now_ms()
    }

    /// Publish the session if it changed.
    fn commit(&mut self) {
        self.session.overlays_visible = self.gate.can_show_overlays();
        let session = &self.session;
        self.notify.send_if_modified(|current| {
            if *current == *session {
                false
            } else {
                *current = session.clone();
                true
            }
        });
    }

    fn report(&self, err: &SessionError) {
        if let Some(callback) = &self.on_error {
            callback(err);
        }
    }

    /// Set an error status, notify, and hand the error back for returning.
    fn fail(&mut self, status: String, err: SessionError) -> SessionError {
        tracing::error!("{}", status);
        self.session.status = status;
        self.commit();
        self.report(&err);
        err
    }

    /// Surface an error that leaves the session untouched.
    fn reject(&self, err: SessionError) -> SessionError {
        tracing::warn!("{}", err);
        self.report(&err);
        err
    }

    // ========================================================================
    // GATE PLUMBING
    // ========================================================================

    fn mask(&mut self, reason: &str) {
        self.gate.mask_overlays(Some(reason));
        if let Some(handle) = self.gate_timer.take() {
            self.ports.clock.clear_timeout(handle);
        }
    }

    fn request_unmask(&mut self, reason: &str) {
        let outcome = self.gate.request_unmask(self.now(), Some(reason));
        self.follow_up(outcome);
    }

    fn follow_up(&mut self, outcome: UnmaskOutcome) {
        if let Some(handle) = self.gate_timer.take() {
            self.ports.clock.clear_timeout(handle);
        }
        if let UnmaskOutcome::Pending { retry_in } = outcome {
            let timers = self.timers.clone();
            let handle = self.ports.clock.set_timeout(
                retry_in,
                Box::new(move || {
                    let _ = timers.send(TimerEvent::GateSettle);
                }),
            );
            self.gate_timer = Some(handle);
        }
    }

    /// Handle a timer expiry from the receiver returned by `new`.
    pub fn on_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::GateSettle => {
                self.gate_timer = None;
                let outcome = self.gate.settle(self.now());
                self.follow_up(outcome);
            }
            TimerEvent::RefreshUnmask { epoch } => {
                if self.gate.mask_epoch() == epoch {
                    self.request_unmask("refresh-after-save");
                } else {
                    tracing::debug!("Refresh unmask superseded by a later mask");
                }
            }
        }
        self.commit();
    }

    // ========================================================================
    // RENDERER
    // ========================================================================

    /// Replace the renderer connection. The new renderer must announce
    /// `READY` before it receives the document.
    pub fn attach_transport(&mut self, transport: Box<dyn RendererTransport>) {
        self.transport = Some(transport);
        self.session.renderer_ready = false;
        self.loaded_revision = None;
        self.mask("transport-attached");
        self.commit();
    }

    fn send(&mut self, command: OutboundCommand) {
        let Some(transport) = self.transport.as_mut() else {
            tracing::debug!("No renderer attached, dropping {}", command.type_name());
            return;
        };
        match command.encode() {
            Ok(message) => {
                if let Err(err) = transport.post_message(message) {
                    tracing::warn!("Failed to send {}: {}", command.type_name(), err);
                }
            }
            Err(err) => tracing::warn!("Failed to encode {}: {}", command.type_name(), err),
        }
    }

    /// Send the current document if the renderer is ready and does not
    /// have this revision yet.
    async fn load_into_renderer(&mut self) {
        if !self.session.renderer_ready || self.loaded_revision == Some(self.revision) {
            return;
        }
        let Some(working_copy) = self.session.working_copy.clone() else {
            return;
        };

        match self.ports.instances.read_document(&working_copy).await {
            Ok(bytes) => {
                tracing::info!("Loading {} ({} bytes) into renderer", working_copy, bytes.len());
                self.send(OutboundCommand::load_document(&bytes));
                self.loaded_revision = Some(self.revision);
                if self.session.page_number != navigation::MIN_PAGE {
                    self.send(OutboundCommand::SetPage {
                        page_number: self.session.page_number,
                    });
                }
                if self.session.scale != navigation::DEFAULT_SCALE {
                    self.send(OutboundCommand::SetScale {
                        scale: self.session.scale,
                    });
                }
            }
            Err(err) => {
                let status = format!("Error loading document into renderer: {err}");
                self.fail(status, err.into());
            }
        }
    }

    /// Handle a raw renderer message. Unknown or malformed messages are
    /// dropped.
    pub async fn on_renderer_message(&mut self, raw: &str) {
        if let Some(event) = parse_inbound(raw) {
            self.on_renderer_event(event).await;
        }
    }

    pub async fn on_renderer_event(&mut self, event: InboundEvent) {
        self.gate.mark_tick(self.now(), Some(event.type_name()));

        match event {
            InboundEvent::Ready => {
                if !self.session.renderer_ready {
                    tracing::info!("Renderer ready");
                }
                self.session.renderer_ready = true;
                self.commit();
                self.load_into_renderer().await;
            }
            InboundEvent::Dimensions(report) => self.apply_dimensions(report),
            InboundEvent::RenderDone => {
                self.gate.mark_render_done();
                self.request_unmask("render-done");
            }
            InboundEvent::ReadyForOverlays => {
                self.gate.mark_render_done();
                self.request_unmask("ready-for-overlays");
            }
            InboundEvent::DebugPageCount { pages } => {
                tracing::debug!("Renderer reports {} pages", pages);
            }
        }
        self.commit();
    }

    fn apply_dimensions(&mut self, report: DimensionsReport) {
        let Some(viewport) = report.to_viewport() else {
            tracing::warn!("Rejecting unusable dimension report: {:?}", report);
            return;
        };
        tracing::debug!(
            "Viewport {}x{} @ {} ({:?})",
            viewport.width,
            viewport.height,
            viewport.scale,
            viewport.rotation
        );
        self.session.viewport = Some(viewport);
        self.mask("dims-changed");

        let transform = self.ports.transform.as_ref();
        for field in self.session.fields.iter_mut() {
            field.rendered_box = match (transform, field.normalized_box) {
                (Some(transform), Some(percent)) => match transform.to_pixel_rect(percent, &viewport) {
                    Ok(rect) => Some(rect),
                    Err(err) => {
                        tracing::debug!("No rendered box for {}: {}", field.name, err);
                        None
                    }
                },
                _ => None,
            };
        }
    }

    // ========================================================================
    // OPEN / CLOSE
    // ========================================================================

    /// Open a document, replacing any open session.
    ///
    /// On failure the previous session is kept and only the status
    /// changes.
    pub async fn open(&mut self, request: OpenRequest) -> Result<()> {
        tracing::info!("Opening {}", request.document_id);
        self.session.status = format!("Opening {}...", request.document_id);
        self.commit();

        let loaded = match load_document(&self.ports, &request).await {
            Ok(loaded) => loaded,
            Err(err) => {
                let status = format!("Error opening {}: {}", request.document_id, err);
                return Err(self.fail(status, err.into()));
            }
        };

        self.mask("open");
        let field_count = loaded.fields.len();
        self.session = Session {
            document_id: Some(request.document_id.clone()),
            working_copy: Some(loaded.working_copy),
            page_number: navigation::MIN_PAGE,
            scale: self.session.scale,
            viewport: None,
            fields: loaded.fields,
            selection: None,
            dirty: false,
            renderer_ready: self.session.renderer_ready,
            overlays_visible: false,
            status: format!("Opened {} ({} fields)", request.document_id, field_count),
        };
        self.page_meta = loaded.page_meta;
        self.revision += 1;
        tracing::info!("Opened {} with {} fields", request.document_id, field_count);
        self.commit();

        self.load_into_renderer().await;
        Ok(())
    }

    /// Whether closing now would lose work
    pub fn request_close(&self) -> CloseCheck {
        if self.session.dirty {
            CloseCheck::UnsavedChanges
        } else {
            CloseCheck::Clear
        }
    }

    /// Drop the open document. Callers check `request_close` first.
    pub fn close(&mut self) {
        if let Some(id) = &self.session.document_id {
            tracing::info!("Closing {}", id);
        }
        self.mask("close");
        let mut session = Session::new(self.session.scale);
        session.renderer_ready = self.session.renderer_ready;
        session.status = "Closed".to_string();
        self.session = session;
        self.page_meta.clear();
        self.commit();
    }

    /// Instances stored for a sheet context
    pub async fn list_instances(&mut self, sheet_context: &str) -> Result<Vec<InstanceMeta>> {
        match self.ports.instances.list(sheet_context).await {
            Ok(instances) => Ok(instances),
            Err(err) => Err(self.fail(format!("Error listing instances: {err}"), err.into())),
        }
    }

    // ========================================================================
    // NAVIGATION
    // ========================================================================

    pub fn set_page(&mut self, page_number: u32) {
        let page_number = page_number.max(navigation::MIN_PAGE);
        self.mask("set-page");
        self.session.page_number = page_number;
        self.send(OutboundCommand::SetPage { page_number });
        self.commit();
    }

    pub fn set_scale(&mut self, scale: f64) {
        if !scale.is_finite() {
            tracing::warn!("Ignoring non-finite scale {}", scale);
            return;
        }
        let scale = scale.max(navigation::MIN_SCALE);
        self.mask("set-scale");
        self.session.scale = scale;
        self.send(OutboundCommand::SetScale { scale });
        self.commit();
    }

    /// Change the selection. Names that do not exist select nothing.
    pub fn select_field(&mut self, name: Option<&str>) {
        self.session.selection = name.map(str::to_string);
        self.commit();
    }

    // ========================================================================
    // EDITS
    // ========================================================================

    /// Check an edit can run and return the working copy it targets.
    fn edit_target(&self, names: &[&str]) -> Result<WorkingCopyRef> {
        let Some(working_copy) = self.session.working_copy.clone() else {
            return Err(self.reject(SessionError::NotOpen));
        };
        if let Some(missing) = names.iter().find(|name| !self.session.fields.contains(name)) {
            return Err(self.reject(SessionError::field_not_found(*missing)));
        }
        Ok(working_copy)
    }

    fn begin_edit(&mut self, status: String) {
        self.session.dirty = true;
        self.mask("edit");
        self.session.status = status;
        self.commit();
    }

    /// Apply a persisted edit, or surface its failure.
    ///
    /// Field values only change once the writer succeeded. A failed write
    /// keeps `dirty` set and overlays masked; it is never retried.
    async fn finish_edit(
        &mut self,
        result: std::result::Result<(), PersistenceError>,
        apply: impl FnOnce(&mut FieldStore) + Send,
        done_status: String,
        error_label: &str,
    ) -> Result<()> {
        match result {
            Ok(()) => {
                apply(&mut self.session.fields);
                self.revision += 1;
                self.session.status = done_status;
                self.commit();
                self.refresh_after_save().await;
                Ok(())
            }
            Err(err) => Err(self.fail(format!("{error_label}: {err}"), err.into())),
        }
    }

    /// Mask, schedule a stabilizing unmask, and re-send the edited document.
    async fn refresh_after_save(&mut self) {
        self.mask("refresh");
        let epoch = self.gate.mask_epoch();
        let timers = self.timers.clone();
        self.ports.clock.set_timeout(
            self.config.refresh.unmask_delay(),
            Box::new(move || {
                let _ = timers.send(TimerEvent::RefreshUnmask { epoch });
            }),
        );
        self.commit();
        self.load_into_renderer().await;
    }

    pub async fn save_text(&mut self, name: &str, value: &str) -> Result<()> {
        let working_copy = self.edit_target(&[name])?;
        self.begin_edit(format!("Saving {name}..."));
        let result = self.ports.writer.write_text(&working_copy, name, value).await;
        self.finish_edit(
            result,
            |fields| {
                fields.set_value(name, FieldValue::Text(value.to_string()));
            },
            format!("Saved {name}"),
            "Error saving text",
        )
        .await
    }

    pub async fn toggle_checkbox(&mut self, name: &str, checked: bool) -> Result<()> {
        let working_copy = self.edit_target(&[name])?;
        self.begin_edit(format!("Saving {name}..."));
        let result = self.ports.writer.write_checkbox(&working_copy, name, checked).await;
        self.finish_edit(
            result,
            |fields| {
                fields.set_value(name, FieldValue::Bool(checked));
            },
            format!("Saved {name}"),
            "Error saving checkbox",
        )
        .await
    }

    /// Persist a signature image. Only an opaque marker reaches the field
    /// store.
    pub async fn save_signature(&mut self, image_base64: &str, mode: SignatureMode) -> Result<()> {
        let targets: Vec<&str> = mode.target().into_iter().collect();
        let working_copy = self.edit_target(&targets)?;
        self.begin_edit("Applying signature...".to_string());
        let result = self.ports.writer.write_signature(&working_copy, image_base64, &mode).await;
        let done = match &mode {
            SignatureMode::Single(name) => format!("Signed {name}"),
            SignatureMode::All => "Signed all signature fields".to_string(),
        };
        self.finish_edit(
            result,
            |fields| match &mode {
                SignatureMode::Single(name) => {
                    fields.set_value(name, FieldValue::Signed);
                }
                SignatureMode::All => {
                    fields.sign_all();
                }
            },
            done,
            "Error saving signature",
        )
        .await
    }

    pub async fn clear_form(&mut self) -> Result<()> {
        let working_copy = self.edit_target(&[])?;
        self.begin_edit("Clearing form...".to_string());
        let result = self.ports.writer.clear_form(&working_copy).await;
        self.finish_edit(result, FieldStore::clear_values, "Form cleared".to_string(), "Error clearing form")
            .await
    }

    /// Commit the working copy. The only way `dirty` clears.
    pub async fn save(&mut self) -> Result<()> {
        let working_copy = self.edit_target(&[])?;
        self.session.status = "Saving document...".to_string();
        self.commit();
        match self.ports.instances.save(&working_copy).await {
            Ok(()) => {
                tracing::info!("Saved {}", working_copy);
                self.session.dirty = false;
                self.session.status = "Saved".to_string();
                self.commit();
                Ok(())
            }
            Err(err) => Err(self.fail(format!("Error saving document: {err}"), err.into())),
        }
    }

    // ========================================================================
    // TEMPLATES
    // ========================================================================

    /// Store the current fields as this document's template.
    pub async fn store_template(&mut self) -> Result<()> {
        let Some(document_id) = self.session.document_id.clone() else {
            return Err(self.reject(SessionError::NotOpen));
        };
        let fields = self.session.fields.to_vec();
        match self.ports.templates.put_template(&document_id, &fields).await {
            Ok(()) => {
                self.session.status = format!("Template stored for {document_id}");
                self.commit();
                Ok(())
            }
            Err(err) => Err(self.fail(format!("Error storing template: {err}"), err.into())),
        }
    }

    /// Forget this document's template; the next open re-seeds it.
    pub async fn clear_template(&mut self) -> Result<()> {
        let Some(document_id) = self.session.document_id.clone() else {
            return Err(self.reject(SessionError::NotOpen));
        };
        match self.ports.templates.clear_template(&document_id).await {
            Ok(()) => {
                self.session.status = format!("Template cleared for {document_id}");
                self.commit();
                Ok(())
            }
            Err(err) => Err(self.fail(format!("Error clearing template: {err}"), err.into())),
        }
    }
}
