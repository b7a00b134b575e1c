use crate::model::{
    Action, Notice, NoticeLevel, OutputMode, PanelEvent, PanelSnapshot, Settings, FONT_COLORS,
};
use crate::settings::SettingsEdit;
use ratatui::style::Color;
use std::collections::VecDeque;

const MAX_NOTICES: usize = 50;
const FONT_SIZE_STEP: u16 = 2;

/// Rows of the settings form, top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormField {
    #[default]
    RadioUrl,
    Resolution,
    OutputMode,
    Target,
    FontSize,
    FontColor,
    DatetimeFormat,
}

impl FormField {
    pub const ALL: [FormField; 7] = [
        FormField::RadioUrl,
        FormField::Resolution,
        FormField::OutputMode,
        FormField::Target,
        FormField::FontSize,
        FormField::FontColor,
        FormField::DatetimeFormat,
    ];

    fn index(self) -> usize {
        Self::ALL.iter().position(|f| *f == self).unwrap_or(0)
    }

    pub fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    pub fn prev(self) -> Self {
        Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
    }

    /// Label for the row. The target label follows the active mode.
    pub fn label(self, settings: &Settings) -> &'static str {
        match self {
            FormField::RadioUrl => "Radio URL",
            FormField::Resolution => "Resolution",
            FormField::OutputMode => "Output mode",
            FormField::Target => match settings.mode() {
                OutputMode::Unicast => "Unicast target",
                OutputMode::Multicast => "Multicast group",
            },
            FormField::FontSize => "Font size",
            FormField::FontColor => "Font color",
            FormField::DatetimeFormat => "Date/time format",
        }
    }

    /// Free-text fields are edited with Enter; the rest cycle with ←/→.
    pub fn is_text(self) -> bool {
        matches!(
            self,
            FormField::RadioUrl | FormField::Target | FormField::DatetimeFormat
        )
    }

    pub fn value(self, settings: &Settings) -> String {
        match self {
            FormField::RadioUrl => settings.radio_url.clone(),
            FormField::Resolution => settings.resolution.to_string(),
            FormField::OutputMode => settings.mode().to_string(),
            FormField::Target => settings.active_target().to_string(),
            FormField::FontSize => format!("{}px", settings.overlay.font_size),
            FormField::FontColor => settings.overlay.font_color.clone(),
            FormField::DatetimeFormat => settings
                .overlay
                .datetime_format
                .clone()
                .unwrap_or_default(),
        }
    }

    /// Edit produced by ←/→ on a non-text field.
    pub fn cycle(self, settings: &Settings, forward: bool) -> Option<SettingsEdit> {
        match self {
            FormField::Resolution => {
                let profile = if forward {
                    settings.resolution.next()
                } else {
                    settings.resolution.prev()
                };
                Some(SettingsEdit::Resolution(profile))
            }
            FormField::OutputMode => Some(SettingsEdit::ToggleOutputMode),
            FormField::FontSize => {
                let size = settings.overlay.font_size;
                let size = if forward {
                    size.saturating_add(FONT_SIZE_STEP)
                } else {
                    size.saturating_sub(FONT_SIZE_STEP)
                };
                Some(SettingsEdit::FontSize(size))
            }
            FormField::FontColor => {
                let len = FONT_COLORS.len();
                let next = match FONT_COLORS
                    .iter()
                    .position(|c| *c == settings.overlay.font_color)
                {
                    Some(i) if forward => (i + 1) % len,
                    Some(i) => (i + len - 1) % len,
                    None => 0,
                };
                Some(SettingsEdit::FontColor(FONT_COLORS[next].to_string()))
            }
            FormField::RadioUrl | FormField::Target | FormField::DatetimeFormat => None,
        }
    }

    /// Edit produced by confirming a text buffer.
    pub fn commit(self, text: String) -> Option<SettingsEdit> {
        match self {
            FormField::RadioUrl => Some(SettingsEdit::RadioUrl(text.trim().to_string())),
            FormField::Target => Some(SettingsEdit::ActiveTarget(text.trim().to_string())),
            FormField::DatetimeFormat => Some(SettingsEdit::DatetimeFormat(Some(text))),
            _ => None,
        }
    }
}

pub fn notice_color(level: NoticeLevel) -> Color {
    match level {
        NoticeLevel::Success => Color::Green,
        NoticeLevel::Warning => Color::Yellow,
        NoticeLevel::Error => Color::Red,
    }
}

pub struct UiState {
    pub tab: usize,
    pub base_url: String,
    pub snapshot: Option<PanelSnapshot>,
    pub field: FormField,
    /// Text buffer while a free-text field is being edited.
    pub editing: Option<String>,
    /// Newest first.
    pub notices: VecDeque<Notice>,
}

impl UiState {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            tab: 0,
            base_url: base_url.into(),
            snapshot: None,
            field: FormField::default(),
            editing: None,
            notices: VecDeque::new(),
        }
    }

    pub fn apply_event(&mut self, ev: PanelEvent) {
        match ev {
            PanelEvent::Snapshot(s) => {
                if !s.settings_editable() {
                    self.editing = None;
                }
                self.snapshot = Some(*s);
            }
            PanelEvent::Notice(n) => self.push_notice(n),
            PanelEvent::ActionSettled { .. } | PanelEvent::ActionRefused { .. } => {}
        }
    }

    pub fn push_notice(&mut self, notice: Notice) {
        self.notices.push_front(notice);
        self.notices.truncate(MAX_NOTICES);
    }

    /// Settings shown in the form (the draft).
    pub fn settings(&self) -> Option<&Settings> {
        self.snapshot.as_ref().map(|s| &s.settings)
    }

    pub fn editable(&self) -> bool {
        self.snapshot
            .as_ref()
            .is_some_and(|s| s.settings_editable())
    }

    /// Whether the key for `action` is live. Nothing is live before the first snapshot.
    pub fn action_enabled(&self, action: Action) -> bool {
        self.snapshot.as_ref().is_some_and(|s| match action {
            Action::Start => s.can_start(),
            Action::Stop => s.can_stop(),
            Action::SaveSettings => s.can_save(),
        })
    }

    /// Open the text buffer on the selected field. Returns false when not applicable.
    pub fn begin_edit(&mut self) -> bool {
        if !self.field.is_text() || !self.editable() {
            return false;
        }
        let current = self
            .settings()
            .map(|s| self.field.value(s))
            .unwrap_or_default();
        self.editing = Some(current);
        true
    }

    pub fn commit_edit(&mut self) -> Option<SettingsEdit> {
        let text = self.editing.take()?;
        self.field.commit(text)
    }

    pub fn cancel_edit(&mut self) {
        self.editing = None;
    }

    pub fn cycle(&self, forward: bool) -> Option<SettingsEdit> {
        if !self.editable() {
            return None;
        }
        self.settings().and_then(|s| self.field.cycle(s, forward))
    }

    pub fn select_next(&mut self) {
        self.field = self.field.next();
    }

    pub fn select_prev(&mut self) {
        self.field = self.field.prev();
    }
}
