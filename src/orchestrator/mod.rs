//! Application-level orchestration.
//!
//! This module owns the run-state machine, the action gate and status polling.
//! UI/CLI layers talk to it only through `UiCommand`s and `PanelEvent`s.

mod controller;
mod state;

pub(crate) use controller::{run_controller, UiCommand};
