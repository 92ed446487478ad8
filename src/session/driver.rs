// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Runs a [`SessionController`] on its own task.
//!
//! Renderer messages, timer expiries, and caller commands are serialized
//! through one loop, so the session sees a single ordered event stream.
//! Callers talk to it through a cloneable [`SessionHandle`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::controller::{SessionController, TimerEvents};
use super::state::{CloseCheck, Session};
use crate::error::{Result, SessionError};
use crate::ports::{InstanceMeta, OpenRequest, SignatureMode};
use crate::protocol::RendererTransport;

type Reply<T> = oneshot::Sender<Result<T>>;

enum SessionCommand {
    Open(OpenRequest, Reply<()>),
    RendererMessage(String),
    AttachTransport(Box<dyn RendererTransport>),
    SetPage(u32),
    SetScale(f64),
    SelectField(Option<String>),
    SaveText {
        name: String,
        value: String,
        reply: Reply<()>,
    },
    ToggleCheckbox {
        name: String,
        checked: bool,
        reply: Reply<()>,
    },
    SaveSignature {
        image_base64: String,
        mode: SignatureMode,
        reply: Reply<()>,
    },
    ClearForm(Reply<()>),
    Save(Reply<()>),
    RequestClose(oneshot::Sender<CloseCheck>),
    Close,
    ListInstances(String, Reply<Vec<InstanceMeta>>),
}

/// Cloneable handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    open_in_flight: Arc<AtomicBool>,
    state: watch::Receiver<Session>,
}

impl SessionHandle {
    fn post(&self, command: SessionCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> SessionCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.post(make(reply))?;
        response.await.map_err(|_| SessionError::Closed)?
    }

    /// Open a document. Fails with `OpenInProgress` while another open is
    /// still running.
    pub async fn open(&self, request: OpenRequest) -> Result<()> {
        if self.open_in_flight.swap(true, Ordering::SeqCst) {
            tracing::warn!("Rejecting open of {}: another open is in progress", request.document_id);
            return Err(SessionError::OpenInProgress);
        }
        let result = self.call(|reply| SessionCommand::Open(request, reply)).await;
        if matches!(result, Err(SessionError::Closed)) {
            self.open_in_flight.store(false, Ordering::SeqCst);
        }
        result
    }

    pub fn renderer_message(&self, raw: impl Into<String>) -> Result<()> {
        self.post(SessionCommand::RendererMessage(raw.into()))
    }

    pub fn attach_transport(&self, transport: Box<dyn RendererTransport>) -> Result<()> {
        self.post(SessionCommand::AttachTransport(transport))
    }

    pub fn set_page(&self, page_number: u32) -> Result<()> {
        self.post(SessionCommand::SetPage(page_number))
    }

    pub fn set_scale(&self, scale: f64) -> Result<()> {
        self.post(SessionCommand::SetScale(scale))
    }

    pub fn select_field(&self, name: Option<&str>) -> Result<()> {
        self.post(SessionCommand::SelectField(name.map(str::to_string)))
    }

    pub fn close(&self) -> Result<()> {
        self.post(SessionCommand::Close)
    }

    pub async fn save_text(&self, name: &str, value: &str) -> Result<()> {
        let (name, value) = (name.to_string(), value.to_string());
        self.call(|reply| SessionCommand::SaveText { name, value, reply }).await
    }

    pub async fn toggle_checkbox(&self, name: &str, checked: bool) -> Result<()> {
        let name = name.to_string();
        self.call(|reply| SessionCommand::ToggleCheckbox { name, checked, reply })
            .await
    }

    pub async fn save_signature(&self, image_base64: &str, mode: SignatureMode) -> Result<()> {
        let image_base64 = image_base64.to_string();
        self.call(|reply| SessionCommand::SaveSignature {
            image_base64,
            mode,
            reply,
        })
        .await
    }

    pub async fn clear_form(&self) -> Result<()> {
        self.call(SessionCommand::ClearForm).await
    }

    pub async fn save(&self) -> Result<()> {
        self.call(SessionCommand::Save).await
    }

    pub async fn request_close(&self) -> Result<CloseCheck> {
        let (reply, response) = oneshot::channel();
        self.post(SessionCommand::RequestClose(reply))?;
        response.await.map_err(|_| SessionError::Closed)
    }

    pub async fn list_instances(&self, sheet_context: &str) -> Result<Vec<InstanceMeta>> {
        let sheet_context = sheet_context.to_string();
        self.call(|reply| SessionCommand::ListInstances(sheet_context, reply))
            .await
    }

    /// Latest committed state
    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.clone()
    }
}

/// Start the session loop. It runs until every handle is dropped.
pub fn spawn_session(controller: SessionController, timers: TimerEvents) -> (SessionHandle, JoinHandle<()>) {
    let (commands, command_rx) = mpsc::unbounded_channel();
    let open_in_flight = Arc::new(AtomicBool::new(false));
    let handle = SessionHandle {
        commands,
        open_in_flight: open_in_flight.clone(),
        state: controller.subscribe(),
    };
    let task = tokio::spawn(run_loop(controller, command_rx, timers, open_in_flight));
    (handle, task)
}

async fn run_loop(
    mut controller: SessionController,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    mut timers: TimerEvents,
    open_in_flight: Arc<AtomicBool>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    tracing::debug!("All session handles dropped, stopping");
                    break;
                };
                dispatch(&mut controller, command, &open_in_flight).await;
            }
            Some(event) = timers.recv() => controller.on_timer(event),
        }
    }
}

async fn dispatch(controller: &mut SessionController, command: SessionCommand, open_in_flight: &AtomicBool) {
    match command {
        SessionCommand::Open(request, reply) => {
            let result = controller.open(request).await;
            open_in_flight.store(false, Ordering::SeqCst);
            let _ = reply.send(result);
        }
        SessionCommand::RendererMessage(raw) => controller.on_renderer_message(&raw).await,
        SessionCommand::AttachTransport(transport) => controller.attach_transport(transport),
        SessionCommand::SetPage(page) => controller.set_page(page),
        SessionCommand::SetScale(scale) => controller.set_scale(scale),
        SessionCommand::SelectField(name) => controller.select_field(name.as_deref()),
        SessionCommand::SaveText { name, value, reply } => {
            let _ = reply.send(controller.save_text(&name, &value).await);
        }
        SessionCommand::ToggleCheckbox { name, checked, reply } => {
            let _ = reply.send(controller.toggle_checkbox(&name, checked).await);
        }
        SessionCommand::SaveSignature {
            image_base64,
            mode,
            reply,
        } => {
            let _ = reply.send(controller.save_signature(&image_base64, mode).await);
        }
        SessionCommand::ClearForm(reply) => {
            let _ = reply.send(controller.clear_form().await);
        }
        SessionCommand::Save(reply) => {
            let _ = reply.send(controller.save().await);
        }
        SessionCommand::RequestClose(reply) => {
            let _ = reply.send(controller.request_close());
        }
        SessionCommand::Close => controller.close(),
        SessionCommand::ListInstances(sheet_context, reply) => {
            let _ = reply.send(controller.list_instances(&sheet_context).await);
        }
    }
}
