// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Session data model: fields, the field store, and the viewport

pub mod field;
pub mod store;
pub mod viewport;

pub use field::{Field, FieldFlags, FieldKind, FieldValue, SIGNED_MARKER};
pub use store::FieldStore;
pub use viewport::{Rotation, Viewport};
