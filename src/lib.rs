// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Formpane: a form-filling session controller for asynchronously rendered
//! documents.
//!
//! A renderer paints the document somewhere else (a web view, a worker, a
//! separate process) and reports back over a JSON message bridge. The
//! [`session`] controller keeps the fields, the viewport, and the renderer
//! in step, and the [`gate`] keeps field overlays hidden until the page
//! underneath them has settled.

pub mod cli;
pub mod error;
pub mod gate;
pub mod model;
pub mod ports;
pub mod protocol;
pub mod session;
pub mod settings;

pub use error::{Result, SessionError};
pub use gate::{GateState, OverlayGate, UnmaskOutcome};
pub use session::{SessionController, SessionHandle, SessionPorts, spawn_session};
pub use settings::SessionConfig;

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use cli::{UserCommand, parse_command};
use ports::{MemoryBackend, TokioClock};
use protocol::LineTransport;

/// Install the tracing subscriber. Logs go to stderr; `RUST_LOG` overrides
/// the default level.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("formpane=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Entry point for the `formpane` binary.
///
/// Runs one session over a fixture document. Renderer messages arrive as
/// JSON lines on stdin, user commands as `:`-prefixed lines, and outbound
/// renderer commands are printed to stdout.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let Some(fixture) = args.next().map(PathBuf::from) else {
        anyhow::bail!("Usage: formpane <fixture.json> [config.toml]");
    };
    let config = match args.next() {
        Some(path) => SessionConfig::load(&PathBuf::from(path))?,
        None => SessionConfig::default(),
    };

    let (backend, request) = MemoryBackend::load_fixture(&fixture)?;
    let ports = SessionPorts::in_memory(Arc::new(backend), Arc::new(TokioClock::new()));
    let (controller, timers) = SessionController::new(ports, config);
    let (handle, task) = spawn_session(controller, timers);
    handle.attach_transport(Box::new(LineTransport::new(std::io::stdout())))?;

    let mut updates = handle.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let session = updates.borrow_and_update().clone();
            tracing::info!(
                status = %session.status,
                page = session.page_number,
                dirty = session.dirty,
                overlays = session.overlays_visible,
                "session"
            );
        }
    });

    if let Err(err) = handle.open(request).await {
        tracing::error!("{}", err);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.starts_with('{') {
            handle.renderer_message(line)?;
        } else if let Some(command) = line.strip_prefix(':') {
            match parse_command(command) {
                Ok(command) => run_command(&handle, command).await?,
                Err(err) => tracing::warn!("{}", err),
            }
        } else if !line.is_empty() {
            tracing::warn!("Ignoring input line: {}", line);
        }
    }

    drop(handle);
    task.await.context("Session task failed")?;
    Ok(())
}

/// Apply one user command. Edit failures are already surfaced in the
/// session status; only a stopped session ends the loop.
async fn run_command(handle: &SessionHandle, command: UserCommand) -> Result<()> {
    let result = match command {
        UserCommand::Page(page) => handle.set_page(page),
        UserCommand::Scale(scale) => handle.set_scale(scale),
        UserCommand::Select(name) => handle.select_field(name.as_deref()),
        UserCommand::Text { name, value } => handle.save_text(&name, &value).await,
        UserCommand::Check { name, checked } => handle.toggle_checkbox(&name, checked).await,
        UserCommand::Sign { mode, image_base64 } => handle.save_signature(&image_base64, mode).await,
        UserCommand::Clear => handle.clear_form().await,
        UserCommand::Save => handle.save().await,
        UserCommand::Close => match handle.request_close().await? {
            check if check.is_ok() => handle.close(),
            check => {
                tracing::warn!("Not closing: {}", check.reason().unwrap_or("refused"));
                Ok(())
            }
        },
    };
    match result {
        Err(SessionError::Closed) => Err(SessionError::Closed),
        Err(err) => {
            tracing::warn!("{}", err);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}
