//! Settings model owned by the panel.
//!
//! Keeps the last-known-good record alongside a local draft. Edits only touch the
//! draft; nothing is persisted until the draft is submitted and the backend's
//! canonical echo is adopted.

use crate::api::{ApiError, BackendClient};
use crate::model::{OutputMode, ResolutionProfile, Settings, MAX_FONT_SIZE, MIN_FONT_SIZE};
use tracing::{info, warn};

/// A single local change to the draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsEdit {
    RadioUrl(String),
    Resolution(ResolutionProfile),
    OutputMode(OutputMode),
    ToggleOutputMode,
    /// Address for whichever mode is currently active.
    ActiveTarget(String),
    FontSize(u16),
    FontColor(String),
    DatetimeFormat(Option<String>),
}

#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    saved: Settings,
    draft: Settings,
    loaded: bool,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last-known-good settings (defaults until the first successful load).
    pub fn current(&self) -> &Settings {
        &self.saved
    }

    pub fn draft(&self) -> &Settings {
        &self.draft
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_dirty(&self) -> bool {
        self.saved != self.draft
    }

    /// Fetch the persisted record. On failure the previous model stays in place.
    pub async fn load(&mut self, client: &BackendClient) -> Result<(), ApiError> {
        match client.get_settings().await {
            Ok(settings) => {
                info!(mode = %settings.mode(), resolution = settings.resolution.as_str(), "settings loaded");
                self.adopt(settings);
                self.loaded = true;
                Ok(())
            }
            Err(e) => {
                warn!("failed to load settings: {e}");
                Err(e)
            }
        }
    }

    /// Replace both the saved model and the draft with the backend's canonical record.
    pub fn adopt(&mut self, canonical: Settings) {
        self.draft = canonical.clone();
        self.saved = canonical;
    }

    /// Draft to submit for persistence.
    pub fn candidate(&self) -> Settings {
        self.draft.clone()
    }

    pub fn revert(&mut self) {
        self.draft = self.saved.clone();
    }

    pub fn apply(&mut self, edit: SettingsEdit) {
        let draft = &mut self.draft;
        match edit {
            SettingsEdit::RadioUrl(url) => draft.radio_url = url,
            SettingsEdit::Resolution(profile) => draft.resolution = profile,
            SettingsEdit::OutputMode(mode) => draft.set_mode(mode),
            SettingsEdit::ToggleOutputMode => draft.toggle_mode(),
            SettingsEdit::ActiveTarget(address) => draft.set_active_target(address),
            SettingsEdit::FontSize(size) => {
                draft.overlay.font_size = size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE)
            }
            SettingsEdit::FontColor(color) => draft.overlay.font_color = color,
            SettingsEdit::DatetimeFormat(format) => {
                draft.overlay.datetime_format = format.filter(|f| !f.trim().is_empty())
            }
        }
    }
}
