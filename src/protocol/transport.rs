// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! String transport to an attached renderer

use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("renderer transport is closed")]
    Closed,

    #[error("renderer transport I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound half of the renderer connection.
///
/// One transport is attached at a time; attaching another replaces the
/// target of later sends.
pub trait RendererTransport: Send {
    fn post_message(&mut self, message: String) -> Result<(), TransportError>;
}

/// Transport that forwards every message into a tokio channel.
///
/// Useful for hosts that pump messages to the surface from another task,
/// and for capturing outbound traffic in tests.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RendererTransport for ChannelTransport {
    fn post_message(&mut self, message: String) -> Result<(), TransportError> {
        self.tx.send(message).map_err(|_| TransportError::Closed)
    }
}

/// Transport that writes one message per line to any `Write`
pub struct LineTransport<W> {
    out: W,
}

impl<W: std::io::Write + Send> LineTransport<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: std::io::Write + Send> RendererTransport for LineTransport<W> {
    fn post_message(&mut self, message: String) -> Result<(), TransportError> {
        writeln!(self.out, "{message}")?;
        self.out.flush()?;
        Ok(())
    }
}
