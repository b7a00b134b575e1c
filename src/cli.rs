use crate::api::BackendClient;
use crate::logging::{self, LogSink};
use crate::model::{
    Action, Notice, NoticeLevel, OutputMode, PanelConfig, PanelEvent, PanelSnapshot,
    ResolutionProfile,
};
use crate::orchestrator::{self, UiCommand};
use crate::settings::SettingsEdit;
use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

fn parse_resolution(s: &str) -> Result<ResolutionProfile, String> {
    s.parse()
}

fn parse_output_mode(s: &str) -> Result<OutputMode, String> {
    s.parse()
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "radio-stream-panel",
    version,
    about = "Control panel for the radio-to-video FFmpeg stream backend"
)]
pub struct Cli {
    /// Base URL of the stream backend (`/api` is appended)
    #[arg(long, env = "STREAM_PANEL_BACKEND_URL", default_value = "http://127.0.0.1:8001")]
    pub base_url: String,

    /// How often to poll the stream status
    #[arg(long, default_value = "3s")]
    pub poll_interval: humantime::Duration,

    /// Timeout for each backend request
    #[arg(long, default_value = "10s")]
    pub request_timeout: humantime::Duration,

    /// Print status and settings as JSON and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Print a text summary and exit (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Start the stream, wait for confirmation and exit
    #[arg(long)]
    pub start: bool,

    /// Stop the stream, wait for confirmation and exit
    #[arg(long)]
    pub stop: bool,

    /// Save settings (with the overrides below) and exit
    #[arg(long)]
    pub save: bool,

    /// Radio stream URL to save
    #[arg(long)]
    pub radio_url: Option<String>,

    /// Resolution profile to save (540p, 720p, 1080p)
    #[arg(long, value_parser = parse_resolution)]
    pub resolution: Option<ResolutionProfile>,

    /// Output mode to save (unicast, multicast)
    #[arg(long, value_parser = parse_output_mode)]
    pub output_mode: Option<OutputMode>,

    /// host:port for the active output mode
    #[arg(long)]
    pub target: Option<String>,

    /// Overlay font size in pixels (24-200)
    #[arg(long)]
    pub font_size: Option<u16>,

    /// Overlay font color (e.g. white, yellow, cyan)
    #[arg(long)]
    pub font_color: Option<String>,

    /// Overlay date/time format string
    #[arg(long)]
    pub datetime_format: Option<String>,

    /// Log file (defaults to the user cache dir in TUI mode)
    #[arg(long)]
    pub log_file: Option<std::path::PathBuf>,

    /// Log filter, e.g. `info` or `radio_stream_panel=debug`
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// The one-shot action requested on the command line, if any.
    pub fn requested_action(&self) -> Option<Action> {
        if self.start {
            Some(Action::Start)
        } else if self.stop {
            Some(Action::Stop)
        } else if self.save {
            Some(Action::SaveSettings)
        } else {
            None
        }
    }

    pub fn is_interactive(&self) -> bool {
        !self.json && !self.text && self.requested_action().is_none()
    }

    /// Settings overrides in application order (mode before target).
    pub fn overrides(&self) -> Vec<SettingsEdit> {
        let mut edits = Vec::new();
        if let Some(mode) = self.output_mode {
            edits.push(SettingsEdit::OutputMode(mode));
        }
        if let Some(target) = &self.target {
            edits.push(SettingsEdit::ActiveTarget(target.trim().to_string()));
        }
        if let Some(url) = &self.radio_url {
            edits.push(SettingsEdit::RadioUrl(url.clone()));
        }
        if let Some(profile) = self.resolution {
            edits.push(SettingsEdit::Resolution(profile));
        }
        if let Some(size) = self.font_size {
            edits.push(SettingsEdit::FontSize(size));
        }
        if let Some(color) = &self.font_color {
            edits.push(SettingsEdit::FontColor(color.trim().to_string()));
        }
        if let Some(fmt) = &self.datetime_format {
            edits.push(SettingsEdit::DatetimeFormat(Some(fmt.clone())));
        }
        edits
    }
}

fn validate(args: &Cli) -> Result<()> {
    if args.json && args.text {
        return Err(anyhow::anyhow!("--json and --text cannot be used together."));
    }
    let actions = [args.start, args.stop, args.save]
        .iter()
        .filter(|set| **set)
        .count();
    if actions > 1 {
        return Err(anyhow::anyhow!(
            "--start, --stop and --save are mutually exclusive."
        ));
    }
    if !args.save && !args.overrides().is_empty() {
        return Err(anyhow::anyhow!(
            "settings options (--radio-url, --resolution, ...) can only be used with --save."
        ));
    }
    Ok(())
}

fn init_logging(args: &Cli) {
    let sink = if args.is_interactive() && cfg!(feature = "tui") {
        match args.log_file.clone().or_else(logging::default_log_path) {
            Some(path) => LogSink::File(path),
            // Nowhere to write that would not corrupt the TUI.
            None => return,
        }
    } else if let Some(path) = args.log_file.clone() {
        LogSink::File(path)
    } else {
        LogSink::Stderr
    };
    if let Err(e) = logging::init(&args.log_level, sink) {
        eprintln!("warning: logging disabled: {e:#}");
    }
}

pub async fn run(args: Cli) -> Result<()> {
    validate(&args)?;
    init_logging(&args);
    let cfg = build_config(&args);

    if args.is_interactive() {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(cfg).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_report(args, cfg).await;
        }
    }

    match args.requested_action() {
        Some(action) => run_action(args, cfg, action).await,
        None => run_report(args, cfg).await,
    }
}

/// Build a `PanelConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> PanelConfig {
    PanelConfig {
        base_url: args.base_url.trim().to_string(),
        poll_interval: Duration::from(args.poll_interval),
        request_timeout: Duration::from(args.request_timeout),
        user_agent: format!("radio-stream-panel/{}", env!("CARGO_PKG_VERSION")),
    }
}

/// Controller running on its own task, driven over channels.
struct ControllerTask {
    cmd_tx: mpsc::UnboundedSender<UiCommand>,
    event_rx: mpsc::UnboundedReceiver<PanelEvent>,
    handle: JoinHandle<Result<()>>,
}

impl ControllerTask {
    fn spawn(cfg: &PanelConfig) -> Result<Self> {
        let client = BackendClient::new(cfg)?;
        let (event_tx, event_rx) = mpsc::unbounded_channel::<PanelEvent>();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
        let cfg = cfg.clone();
        let handle = tokio::spawn(async move {
            orchestrator::run_controller(client, &cfg, event_tx, cmd_rx).await
        });
        Ok(Self {
            cmd_tx,
            event_rx,
            handle,
        })
    }

    async fn shutdown(self) -> Result<()> {
        let _ = self.cmd_tx.send(UiCommand::Quit);
        self.handle
            .await
            .context("controller task failed")?
            .context("controller failed")
    }
}

fn notice_line(n: &Notice) -> String {
    let tag = match n.level {
        NoticeLevel::Success => "ok",
        NoticeLevel::Warning => "warning",
        NoticeLevel::Error => "error",
    };
    format!("[{tag}] {}", n.text)
}

/// JSON document printed by `--json`.
#[derive(Serialize)]
struct Report<'a> {
    fetched_at: String,
    config: &'a PanelConfig,
    #[serde(flatten)]
    snapshot: &'a PanelSnapshot,
}

fn print_snapshot(
    args: &Cli,
    cfg: &PanelConfig,
    snapshot: &PanelSnapshot,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    if args.json {
        let report = Report {
            fetched_at: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
            config: cfg,
            snapshot,
        };
        let out = serde_json::to_string_pretty(&report)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    } else {
        let summary = crate::text_summary::build_text_summary(snapshot, &cfg.base_url);
        for line in summary.lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }
    Ok(())
}

/// Wait for the controller's initial snapshot, forwarding notices to stderr.
async fn initial_snapshot(
    task: &mut ControllerTask,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> Option<PanelSnapshot> {
    while let Some(ev) = task.event_rx.recv().await {
        match ev {
            PanelEvent::Snapshot(s) => return Some(*s),
            PanelEvent::Notice(n) => {
                let _ = out_tx.send(OutputLine::Stderr(notice_line(&n)));
            }
            _ => {}
        }
    }
    None
}

async fn run_report(args: Cli, cfg: PanelConfig) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let mut task = ControllerTask::spawn(&cfg)?;

    let snapshot = initial_snapshot(&mut task, &out_tx).await;
    task.shutdown().await?;
    let snapshot = snapshot.context("controller stopped before reporting state")?;

    print_snapshot(&args, &cfg, &snapshot, &out_tx)?;
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

async fn run_action(args: Cli, cfg: PanelConfig, action: Action) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let mut task = ControllerTask::spawn(&cfg)?;

    let mut snapshot = initial_snapshot(&mut task, &out_tx).await;
    if snapshot.is_none() {
        task.shutdown().await?;
        return Err(anyhow::anyhow!("controller stopped before reporting state"));
    }

    if action == Action::SaveSettings {
        for edit in args.overrides() {
            let _ = task.cmd_tx.send(UiCommand::Edit(edit));
        }
    }
    let cmd = match action {
        Action::Start => UiCommand::Start,
        Action::Stop => UiCommand::Stop,
        Action::SaveSettings => UiCommand::SaveSettings,
    };
    let _ = task.cmd_tx.send(cmd);

    let mut outcome = None;
    let mut last_error = None;
    while let Some(ev) = task.event_rx.recv().await {
        match ev {
            PanelEvent::Snapshot(s) => snapshot = Some(*s),
            PanelEvent::Notice(n) => {
                if n.level == NoticeLevel::Error {
                    last_error = Some(n.text.clone());
                }
                let _ = out_tx.send(OutputLine::Stderr(notice_line(&n)));
            }
            PanelEvent::ActionSettled { action: a, ok } if a == action => {
                outcome = Some(ok);
                break;
            }
            PanelEvent::ActionRefused { action: a } if a == action => {
                outcome = Some(false);
                break;
            }
            _ => {}
        }
    }
    task.shutdown().await?;

    if let Some(snapshot) = snapshot.as_ref() {
        print_snapshot(&args, &cfg, snapshot, &out_tx)?;
    }
    drop(out_tx);
    let _ = out_handle.await;

    match outcome {
        Some(true) => Ok(()),
        Some(false) => Err(anyhow::anyhow!(
            last_error.unwrap_or_else(|| format!("{action:?} failed"))
        )),
        None => Err(anyhow::anyhow!("controller stopped before the action settled")),
    }
}
