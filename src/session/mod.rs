// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Document editing session: state, controller, and the task that runs it

mod controller;
mod driver;
mod state;

#[cfg(test)]
mod tests;

pub use controller::{ErrorCallback, SessionController, SessionPorts, TimerEvent, TimerEvents};
pub use driver::{SessionHandle, spawn_session};
pub use state::{CloseCheck, Overlay, Session};
