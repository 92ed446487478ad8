// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors surfaced by the session controller

use thiserror::Error;

use crate::ports::{OpenError, PersistenceError};

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not open document: {0}")]
    Open(#[from] OpenError),

    #[error("no field named {name:?}")]
    FieldNotFound { name: String },

    #[error("could not persist change: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("no document is open")]
    NotOpen,

    #[error("another open is already in progress")]
    OpenInProgress,

    #[error("session has shut down")]
    Closed,
}

impl SessionError {
    pub fn field_not_found(name: impl Into<String>) -> Self {
        Self::FieldNotFound { name: name.into() }
    }
}
