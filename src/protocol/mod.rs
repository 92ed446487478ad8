// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Renderer bridge protocol.
//!
//! Messages are JSON objects discriminated by a `type` string. Inbound
//! parsing is forward-compatible: unknown or malformed messages are
//! dropped, never reported as errors.

mod inbound;
mod outbound;
mod transport;

pub use inbound::{DimensionsReport, InboundEvent, ProtocolParseError, parse_inbound, try_parse_inbound};
pub use outbound::OutboundCommand;
pub use transport::{ChannelTransport, LineTransport, RendererTransport, TransportError};
