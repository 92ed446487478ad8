// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Controller → renderer commands

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

/// A command for the rendering surface
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundCommand {
    /// Replace the rendered document
    #[serde(rename = "LOAD_PDF_BASE64")]
    LoadPdfBase64 { base64: String },

    /// Show a page (1-based)
    #[serde(rename = "SET_PAGE")]
    SetPage {
        #[serde(rename = "pageNumber")]
        page_number: u32,
    },

    /// Change the render scale
    #[serde(rename = "SET_SCALE")]
    SetScale { scale: f64 },
}

impl OutboundCommand {
    /// Build a load command from raw document bytes.
    pub fn load_document(bytes: &[u8]) -> Self {
        OutboundCommand::LoadPdfBase64 {
            base64: STANDARD.encode(bytes),
        }
    }

    /// Wire name of the command
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundCommand::LoadPdfBase64 { .. } => "LOAD_PDF_BASE64",
            OutboundCommand::SetPage { .. } => "SET_PAGE",
            OutboundCommand::SetScale { .. } => "SET_SCALE",
        }
    }

    /// Encode as the JSON string the transport carries.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
