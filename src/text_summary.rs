//! Text summary builder for CLI output.
//!
//! Formats a panel snapshot as human-readable lines for text mode.

use crate::model::{OutputMode, PanelSnapshot};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary of the run state and the last-known-good settings.
pub(crate) fn build_text_summary(snapshot: &PanelSnapshot, base_url: &str) -> TextSummary {
    let mut lines = Vec::new();
    let run = &snapshot.run_state;
    let settings = &snapshot.saved_settings;

    let on_air = if run.is_running { "ON AIR" } else { "OFF AIR" };
    match run.pid() {
        Some(pid) => lines.push(format!("Stream: {on_air} (pid {pid})")),
        None => lines.push(format!("Stream: {on_air}")),
    }
    if !run.message.trim().is_empty() {
        lines.push(format!("Status: {}", run.message));
    }
    lines.push(format!("Backend: {base_url}"));
    if !snapshot.settings_loaded {
        lines.push("Settings: not loaded (showing defaults)".into());
    }

    lines.push(format!("Radio URL: {}", settings.radio_url));
    lines.push(format!("Resolution: {}", settings.resolution));
    let mode = match settings.mode() {
        OutputMode::Unicast => "Unicast",
        OutputMode::Multicast => "Multicast",
    };
    lines.push(format!(
        "Output: {mode} udp://{}",
        settings.active_target()
    ));

    let overlay = &settings.overlay;
    match overlay.datetime_format.as_deref() {
        Some(fmt) => lines.push(format!(
            "Overlay: {}px {} ({fmt})",
            overlay.font_size, overlay.font_color
        )),
        None => lines.push(format!(
            "Overlay: {}px {}",
            overlay.font_size, overlay.font_color
        )),
    }

    TextSummary { lines }
}
