use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

pub const DEFAULT_RADIO_URL: &str =
    "https://op25-par.streamabc.net/hls/d3ep2fcbnhfc72r905fg/redbm-razo-mp3-192-3960759.m3u8";
pub const DEFAULT_UNICAST_TARGET: &str = "127.0.0.1:5000";
pub const DEFAULT_MULTICAST_TARGET: &str = "239.255.0.1:5000";
pub const DEFAULT_FONT_SIZE: u16 = 72;
pub const DEFAULT_FONT_COLOR: &str = "white";
pub const MIN_FONT_SIZE: u16 = 24;
pub const MAX_FONT_SIZE: u16 = 200;
/// Overlay colors offered by the panel. The backend accepts any ffmpeg color name.
pub const FONT_COLORS: [&str; 6] = ["white", "yellow", "cyan", "lime", "orange", "red"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResolutionProfile {
    P540,
    #[default]
    P720,
    P1080,
}

impl ResolutionProfile {
    pub const ALL: [ResolutionProfile; 3] = [Self::P540, Self::P720, Self::P1080];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::P540 => "540p",
            Self::P720 => "720p",
            Self::P1080 => "1080p",
        }
    }

    /// Output frame size in pixels (width, height).
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::P540 => (960, 540),
            Self::P720 => (1280, 720),
            Self::P1080 => (1920, 1080),
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::P540 => Self::P720,
            Self::P720 => Self::P1080,
            Self::P1080 => Self::P540,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Self::P540 => Self::P1080,
            Self::P720 => Self::P540,
            Self::P1080 => Self::P720,
        }
    }
}

impl fmt::Display for ResolutionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions();
        write!(f, "{} ({w}x{h})", self.as_str())
    }
}

impl FromStr for ResolutionProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown resolution profile '{s}' (expected 540p, 720p or 1080p)"))
    }
}

// Unknown profiles render at 720p on the backend, so decode them the same way.
impl From<String> for ResolutionProfile {
    fn from(s: String) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl From<ResolutionProfile> for String {
    fn from(p: ResolutionProfile) -> Self {
        p.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OutputMode {
    Unicast,
    Multicast,
}

impl OutputMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unicast => "unicast",
            Self::Multicast => "multicast",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unicast" => Ok(Self::Unicast),
            "multicast" => Ok(Self::Multicast),
            other => Err(format!(
                "unknown output mode '{other}' (expected unicast or multicast)"
            )),
        }
    }
}

// The backend sends anything that is not "multicast" to the unicast address.
impl From<String> for OutputMode {
    fn from(s: String) -> Self {
        if s.eq_ignore_ascii_case("multicast") {
            Self::Multicast
        } else {
            Self::Unicast
        }
    }
}

impl From<OutputMode> for String {
    fn from(m: OutputMode) -> Self {
        m.as_str().to_string()
    }
}

/// The active UDP destination (`host:port`). Exactly one mode is active at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Unicast(String),
    Multicast(String),
}

impl OutputTarget {
    pub fn mode(&self) -> OutputMode {
        match self {
            Self::Unicast(_) => OutputMode::Unicast,
            Self::Multicast(_) => OutputMode::Multicast,
        }
    }

    pub fn address(&self) -> &str {
        match self {
            Self::Unicast(a) | Self::Multicast(a) => a,
        }
    }

    fn address_mut(&mut self) -> &mut String {
        match self {
            Self::Unicast(a) | Self::Multicast(a) => a,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub font_size: u16,
    pub font_color: String,
    pub datetime_format: Option<String>,
}

impl Default for Overlay {
    fn default() -> Self {
        Self {
            font_size: DEFAULT_FONT_SIZE,
            font_color: DEFAULT_FONT_COLOR.to_string(),
            datetime_format: None,
        }
    }
}

/// Stream configuration as the panel models it.
///
/// `parked_target` keeps the address of the inactive mode so toggling the mode
/// back and forth restores it. It is still sent on save so the backend keeps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SettingsRecord", into = "SettingsRecord")]
pub struct Settings {
    pub id: Option<String>,
    pub radio_url: String,
    pub resolution: ResolutionProfile,
    pub target: OutputTarget,
    pub parked_target: String,
    pub overlay: Overlay,
}

impl Default for Settings {
    fn default() -> Self {
        SettingsRecord::default().into()
    }
}

impl Settings {
    pub fn mode(&self) -> OutputMode {
        self.target.mode()
    }

    /// The address that is visible and used downstream for the current mode.
    pub fn active_target(&self) -> &str {
        self.target.address()
    }

    pub fn set_active_target(&mut self, address: String) {
        *self.target.address_mut() = address;
    }

    pub fn set_mode(&mut self, mode: OutputMode) {
        if self.mode() != mode {
            self.toggle_mode();
        }
    }

    /// Swap the active and parked addresses.
    pub fn toggle_mode(&mut self) {
        let parked = std::mem::take(&mut self.parked_target);
        let current = std::mem::replace(&mut self.target, OutputTarget::Unicast(String::new()));
        let (next, previous) = match current {
            OutputTarget::Unicast(a) => (OutputTarget::Multicast(parked), a),
            OutputTarget::Multicast(a) => (OutputTarget::Unicast(parked), a),
        };
        self.target = next;
        self.parked_target = previous;
    }
}

#[cfg(test)]
impl Settings {
    pub fn unicast_target(&self) -> &str {
        match &self.target {
            OutputTarget::Unicast(a) => a,
            OutputTarget::Multicast(_) => &self.parked_target,
        }
    }

    pub fn multicast_target(&self) -> &str {
        match &self.target {
            OutputTarget::Multicast(a) => a,
            OutputTarget::Unicast(_) => &self.parked_target,
        }
    }
}

/// Settings as exchanged with the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct SettingsRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    radio_url: String,
    resolution: ResolutionProfile,
    output_mode: OutputMode,
    unicast_ip: String,
    multicast_address: String,
    font_size: u16,
    font_color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    datetime_format: Option<String>,
}

impl Default for SettingsRecord {
    fn default() -> Self {
        Self {
            id: None,
            radio_url: DEFAULT_RADIO_URL.to_string(),
            resolution: ResolutionProfile::default(),
            output_mode: OutputMode::Multicast,
            unicast_ip: DEFAULT_UNICAST_TARGET.to_string(),
            multicast_address: DEFAULT_MULTICAST_TARGET.to_string(),
            font_size: DEFAULT_FONT_SIZE,
            font_color: DEFAULT_FONT_COLOR.to_string(),
            datetime_format: None,
        }
    }
}

impl From<SettingsRecord> for Settings {
    fn from(r: SettingsRecord) -> Self {
        let (target, parked_target) = match r.output_mode {
            OutputMode::Unicast => (OutputTarget::Unicast(r.unicast_ip), r.multicast_address),
            OutputMode::Multicast => (OutputTarget::Multicast(r.multicast_address), r.unicast_ip),
        };
        Self {
            id: r.id,
            radio_url: r.radio_url,
            resolution: r.resolution,
            target,
            parked_target,
            overlay: Overlay {
                font_size: r.font_size,
                font_color: r.font_color,
                datetime_format: r.datetime_format,
            },
        }
    }
}

impl From<Settings> for SettingsRecord {
    fn from(s: Settings) -> Self {
        let output_mode = s.mode();
        let (unicast_ip, multicast_address) = match s.target {
            OutputTarget::Unicast(a) => (a, s.parked_target),
            OutputTarget::Multicast(a) => (s.parked_target, a),
        };
        Self {
            id: s.id,
            radio_url: s.radio_url,
            resolution: s.resolution,
            output_mode,
            unicast_ip,
            multicast_address,
            font_size: s.overlay.font_size,
            font_color: s.overlay.font_color,
            datetime_format: s.overlay.datetime_format,
        }
    }
}

/// Backend-owned view of the transcoding process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunState {
    pub is_running: bool,
    #[serde(default, rename = "pid")]
    pub process_id: Option<u32>,
    #[serde(default)]
    pub message: String,
}

impl RunState {
    /// The process id, reported only while running.
    pub fn pid(&self) -> Option<u32> {
        self.process_id.filter(|_| self.is_running)
    }
}

/// Mutating operations that share the single in-flight gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Start,
    Stop,
    SaveSettings,
}

impl Action {
    pub fn progress_label(self) -> &'static str {
        match self {
            Action::Start => "Starting stream…",
            Action::Stop => "Stopping stream…",
            Action::SaveSettings => "Saving settings…",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

/// A user-facing notification (the panel's equivalent of a toast).
#[derive(Debug, Clone)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
    pub at: OffsetDateTime,
}

impl Notice {
    pub fn new(level: NoticeLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
            at: OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc()),
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, text)
    }
}

/// Everything a presentation layer needs to render the panel.
#[derive(Debug, Clone, Serialize)]
pub struct PanelSnapshot {
    pub settings: Settings,
    pub saved_settings: Settings,
    pub settings_loaded: bool,
    pub dirty: bool,
    pub run_state: RunState,
    pub action_in_flight: Option<Action>,
}

impl PanelSnapshot {
    pub fn settings_editable(&self) -> bool {
        !self.run_state.is_running
    }

    pub fn can_start(&self) -> bool {
        self.action_in_flight.is_none() && !self.run_state.is_running
    }

    pub fn can_stop(&self) -> bool {
        self.action_in_flight.is_none() && self.run_state.is_running
    }

    pub fn can_save(&self) -> bool {
        self.action_in_flight.is_none() && !self.run_state.is_running
    }
}

/// Events emitted by the controller for presentation layers.
#[derive(Debug, Clone)]
pub enum PanelEvent {
    Snapshot(Box<PanelSnapshot>),
    Notice(Notice),
    /// An action was dispatched and has fully settled (including its confirmation poll).
    ActionSettled { action: Action, ok: bool },
    /// An action was refused by the client-side gate and never reached the backend.
    ActionRefused { action: Action },
}
