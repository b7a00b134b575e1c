//! Run-state machine and single in-flight action gate.
//!
//! Pure state: no I/O happens here. The controller feeds backend replies in and
//! performs whatever dispatch this module allows.

use crate::api::ApiError;
use crate::model::{Action, Notice, PanelSnapshot, RunState, Settings};
use crate::settings::{SettingsEdit, SettingsStore};
use tracing::debug;

/// Why the client refused an operation before reaching the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub(crate) enum Rejection {
    #[error("Another action is still in progress")]
    Busy(Action),
    #[error("Stop the stream before changing settings")]
    Running,
}

/// Work the controller must send to the backend after a successful `begin`.
#[derive(Debug, Clone)]
pub(crate) enum Dispatch {
    Start,
    Stop,
    Save(Settings),
}

/// What happened to a status reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    Applied { changed: bool },
    /// Dispatched before (or during) an action; superseded by the action's result.
    Discarded,
    Failed,
}

/// Result of settling a start/stop reply.
#[derive(Debug)]
pub(crate) struct Settled {
    pub notice: Notice,
    /// The gate stays held until a confirmation poll settles.
    pub confirm: bool,
}

pub(crate) struct ControlState {
    run_state: RunState,
    settings: SettingsStore,
    in_flight: Option<Action>,
    // Bumped whenever an action begins or releases the gate; status replies
    // tagged with an older epoch are stale.
    epoch: u64,
}

impl ControlState {
    pub fn new(settings: SettingsStore) -> Self {
        Self {
            run_state: RunState::default(),
            settings,
            in_flight: None,
            epoch: 0,
        }
    }

    pub fn run_state(&self) -> &RunState {
        &self.run_state
    }

    #[cfg(test)]
    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut SettingsStore {
        &mut self.settings
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> Option<Action> {
        self.in_flight
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn snapshot(&self) -> PanelSnapshot {
        PanelSnapshot {
            settings: self.settings.draft().clone(),
            saved_settings: self.settings.current().clone(),
            settings_loaded: self.settings.is_loaded(),
            dirty: self.settings.is_dirty(),
            run_state: self.run_state.clone(),
            action_in_flight: self.in_flight,
        }
    }

    /// Apply a local edit; refused while the stream is running.
    pub fn edit(&mut self, edit: SettingsEdit) -> Result<(), Rejection> {
        if self.run_state.is_running {
            return Err(Rejection::Running);
        }
        self.settings.apply(edit);
        Ok(())
    }

    pub fn revert(&mut self) {
        self.settings.revert();
    }

    /// Try to take the action gate.
    pub fn begin(&mut self, action: Action) -> Result<Dispatch, Rejection> {
        if let Some(active) = self.in_flight {
            return Err(Rejection::Busy(active));
        }
        let dispatch = match action {
            Action::Start => Dispatch::Start,
            Action::Stop => Dispatch::Stop,
            Action::SaveSettings => {
                if self.run_state.is_running {
                    return Err(Rejection::Running);
                }
                Dispatch::Save(self.settings.candidate())
            }
        };
        self.in_flight = Some(action);
        self.epoch += 1;
        Ok(dispatch)
    }

    fn release(&mut self) {
        self.in_flight = None;
        self.epoch += 1;
    }

    /// Release the gate without a reply (the request task was lost).
    pub fn abandon(&mut self) {
        if self.in_flight.is_some() {
            self.release();
        }
    }

    /// Apply a status reply dispatched at `epoch`.
    pub fn apply_poll(&mut self, epoch: u64, result: Result<RunState, ApiError>) -> PollOutcome {
        if self.in_flight.is_some() || epoch != self.epoch {
            debug!(epoch, current = self.epoch, "discarding stale status reply");
            return PollOutcome::Discarded;
        }
        match result {
            Ok(state) => {
                let changed = state != self.run_state;
                self.run_state = state;
                PollOutcome::Applied { changed }
            }
            Err(e) => {
                debug!("status poll failed: {e}");
                PollOutcome::Failed
            }
        }
    }

    /// Settle a start/stop reply.
    pub fn settle_transition(
        &mut self,
        action: Action,
        result: Result<RunState, ApiError>,
    ) -> Settled {
        match result {
            Ok(state) => {
                self.run_state = state;
                let text = match action {
                    Action::Stop => "Stream stopped",
                    _ => "Stream started",
                };
                Settled {
                    notice: Notice::success(text),
                    confirm: true,
                }
            }
            Err(e) => {
                self.release();
                Settled {
                    notice: failure_notice(action, &e),
                    confirm: false,
                }
            }
        }
    }

    /// Settle the forced poll that follows a successful start/stop and release the gate.
    pub fn settle_confirmation(&mut self, result: Result<RunState, ApiError>) -> bool {
        let changed = match result {
            Ok(state) => {
                let changed = state != self.run_state;
                self.run_state = state;
                changed
            }
            Err(e) => {
                debug!("confirmation poll failed: {e}");
                false
            }
        };
        self.release();
        changed
    }

    pub fn settle_save(&mut self, result: Result<Settings, ApiError>) -> (bool, Notice) {
        self.release();
        match result {
            Ok(canonical) => {
                self.settings.adopt(canonical);
                (true, Notice::success("Settings saved"))
            }
            Err(e) => (false, failure_notice(Action::SaveSettings, &e)),
        }
    }
}

/// User-facing failure text: backend detail when present, else a generic message.
pub(crate) fn failure_notice(action: Action, err: &ApiError) -> Notice {
    let generic = match action {
        Action::Start => "Could not start stream",
        Action::Stop => "Could not stop stream",
        Action::SaveSettings => "Could not save settings",
    };
    Notice::error(err.detail().unwrap_or(generic))
}
