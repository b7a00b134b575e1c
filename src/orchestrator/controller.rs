//! Stream controller.
//!
//! Single writer for run state and settings. UI commands, the poll timer and
//! backend replies all funnel through one select loop, so there is never more
//! than one place mutating state.

use super::state::{ControlState, Dispatch, PollOutcome, Rejection};
use crate::api::{ApiError, BackendClient};
use crate::model::{Action, Notice, PanelConfig, PanelEvent, RunState, Settings};
use crate::settings::{SettingsEdit, SettingsStore};
use anyhow::Result;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Floor for the poll cadence so a bad flag cannot hammer the backend.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Commands emitted by presentation layers.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Start,
    Stop,
    SaveSettings,
    Edit(SettingsEdit),
    Revert,
    /// Poll status now instead of waiting for the next tick.
    Refresh,
    Quit,
}

/// Reply from a request task spawned for the in-flight action.
enum ActionReply {
    Transition(Result<RunState, ApiError>),
    Confirmed(Result<RunState, ApiError>),
    Saved(Result<Settings, ApiError>),
}

/// Handle for the request currently holding the action gate.
struct InFlight {
    action: Action,
    handle: JoinHandle<ActionReply>,
}

/// Handle for an outstanding background status request.
struct PendingPoll {
    epoch: u64,
    handle: JoinHandle<Result<RunState, ApiError>>,
}

pub(crate) struct StreamController {
    client: BackendClient,
    state: ControlState,
    event_tx: UnboundedSender<PanelEvent>,
}

impl StreamController {
    pub fn new(client: BackendClient, event_tx: UnboundedSender<PanelEvent>) -> Self {
        Self {
            client,
            state: ControlState::new(SettingsStore::new()),
            event_tx,
        }
    }

    fn emit_snapshot(&self) {
        let _ = self
            .event_tx
            .send(PanelEvent::Snapshot(Box::new(self.state.snapshot())));
    }

    fn notify(&self, notice: Notice) {
        let _ = self.event_tx.send(PanelEvent::Notice(notice));
    }

    /// Load settings and the current run state before polling begins.
    async fn initialize(&mut self) {
        if self
            .state
            .settings_mut()
            .load(&self.client)
            .await
            .is_err()
        {
            self.notify(Notice::warning("Could not load settings; showing defaults"));
        }
        let epoch = self.state.epoch();
        let result = self.client.status().await;
        if let PollOutcome::Failed = self.state.apply_poll(epoch, result) {
            warn!("initial status fetch failed; showing last known state");
        }
        self.emit_snapshot();
    }

    /// Start a background status request.
    fn poll(&self) -> PendingPoll {
        let client = self.client.clone();
        PendingPoll {
            epoch: self.state.epoch(),
            handle: tokio::spawn(async move { client.status().await }),
        }
    }

    fn on_poll_reply(&mut self, epoch: u64, result: Result<RunState, ApiError>) {
        match self.state.apply_poll(epoch, result) {
            PollOutcome::Applied { changed: true } => {
                debug!(running = self.state.run_state().is_running, "run state changed");
                self.emit_snapshot();
            }
            PollOutcome::Applied { changed: false } | PollOutcome::Discarded => {}
            // Poll failures stay silent; the last known state remains on screen.
            PollOutcome::Failed => {}
        }
    }

    fn handle_command(&mut self, cmd: UiCommand, action: &mut Option<InFlight>) {
        let requested = match cmd {
            UiCommand::Start => Action::Start,
            UiCommand::Stop => Action::Stop,
            UiCommand::SaveSettings => Action::SaveSettings,
            UiCommand::Edit(edit) => {
                match self.state.edit(edit) {
                    Ok(()) => self.emit_snapshot(),
                    Err(rejection) => self.notify(Notice::error(rejection.to_string())),
                }
                return;
            }
            UiCommand::Revert => {
                self.state.revert();
                self.emit_snapshot();
                return;
            }
            // Handled by the loop, which owns the poll handle.
            UiCommand::Refresh | UiCommand::Quit => return,
        };
        if let Some(in_flight) = self.begin(requested) {
            *action = Some(in_flight);
        }
    }

    /// Take the action gate and dispatch the request, or refuse it locally.
    fn begin(&mut self, action: Action) -> Option<InFlight> {
        let dispatch = match self.state.begin(action) {
            Ok(dispatch) => dispatch,
            Err(Rejection::Busy(active)) => {
                debug!(?action, ?active, "ignoring action while another is in flight");
                let _ = self.event_tx.send(PanelEvent::ActionRefused { action });
                return None;
            }
            Err(rejection @ Rejection::Running) => {
                self.notify(Notice::error(rejection.to_string()));
                let _ = self.event_tx.send(PanelEvent::ActionRefused { action });
                return None;
            }
        };

        info!(?action, "dispatching action");
        let client = self.client.clone();
        let handle = match dispatch {
            Dispatch::Start => {
                tokio::spawn(async move { ActionReply::Transition(client.start().await) })
            }
            Dispatch::Stop => {
                tokio::spawn(async move { ActionReply::Transition(client.stop().await) })
            }
            Dispatch::Save(candidate) => tokio::spawn(async move {
                ActionReply::Saved(client.save_settings(&candidate).await)
            }),
        };
        self.emit_snapshot();
        Some(InFlight { action, handle })
    }

    /// Apply an action reply. Returns the follow-up request that keeps the gate held, if any.
    fn on_action_reply(&mut self, action: Action, reply: ActionReply) -> Option<InFlight> {
        match reply {
            ActionReply::Transition(result) => {
                if let Err(e) = &result {
                    warn!(?action, "action failed: {e}");
                }
                let settled = self.state.settle_transition(action, result);
                self.notify(settled.notice);
                self.emit_snapshot();
                if !settled.confirm {
                    let _ = self
                        .event_tx
                        .send(PanelEvent::ActionSettled { action, ok: false });
                    return None;
                }
                // Reconcile with the backend before the gate opens again.
                let client = self.client.clone();
                let handle =
                    tokio::spawn(async move { ActionReply::Confirmed(client.status().await) });
                Some(InFlight { action, handle })
            }
            ActionReply::Confirmed(result) => {
                self.state.settle_confirmation(result);
                info!(
                    ?action,
                    running = self.state.run_state().is_running,
                    pid = ?self.state.run_state().pid(),
                    "action settled"
                );
                self.emit_snapshot();
                let _ = self
                    .event_tx
                    .send(PanelEvent::ActionSettled { action, ok: true });
                None
            }
            ActionReply::Saved(result) => {
                if let Err(e) = &result {
                    warn!("saving settings failed: {e}");
                }
                let (ok, notice) = self.state.settle_save(result);
                self.notify(notice);
                self.emit_snapshot();
                let _ = self.event_tx.send(PanelEvent::ActionSettled { action, ok });
                None
            }
        }
    }
}

/// Drive the controller until `Quit` arrives or every command sender is gone.
pub(crate) async fn run_controller(
    client: BackendClient,
    cfg: &PanelConfig,
    event_tx: UnboundedSender<PanelEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut controller = StreamController::new(client, event_tx);

    // Quit must not wait on startup requests. Other commands run once startup is done.
    let mut queued = Vec::new();
    {
        let startup = controller.initialize();
        tokio::pin!(startup);
        loop {
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => match cmd {
                    Some(UiCommand::Quit) | None => {
                        debug!("controller stopped during startup");
                        return Ok(());
                    }
                    Some(cmd) => queued.push(cmd),
                },
                () = &mut startup => break,
            }
        }
    }

    let period = cfg.poll_interval.max(MIN_POLL_INTERVAL);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut action: Option<InFlight> = None;
    let mut poll: Option<PendingPoll> = None;

    for cmd in queued {
        match cmd {
            UiCommand::Refresh => {
                if poll.is_none() {
                    poll = Some(controller.poll());
                }
            }
            cmd => controller.handle_command(cmd, &mut action),
        }
    }

    loop {
        tokio::select! {
            // Commands first: a second action queued behind the first must see the gate closed.
            biased;
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Quit) | None => break,
                    Some(UiCommand::Refresh) => {
                        if poll.is_none() {
                            poll = Some(controller.poll());
                        }
                    }
                    Some(cmd) => controller.handle_command(cmd, &mut action),
                }
            }
            // Same pattern as the poll branch below: only take the handle once this branch wins.
            reply = async {
                match action.as_mut() {
                    Some(in_flight) => (&mut in_flight.handle).await,
                    None => futures::future::pending().await,
                }
            } => {
                let Some(finished) = action.take() else { continue };
                match reply {
                    Ok(reply) => action = controller.on_action_reply(finished.action, reply),
                    Err(e) => {
                        warn!(action = ?finished.action, "action task failed: {e}");
                        controller.state.abandon();
                        controller.notify(Notice::error("Request was interrupted; status will refresh shortly"));
                        controller.emit_snapshot();
                        let _ = controller.event_tx.send(PanelEvent::ActionSettled {
                            action: finished.action,
                            ok: false,
                        });
                    }
                }
            }
            done = async {
                match poll.as_mut() {
                    Some(pending) => (&mut pending.handle).await,
                    None => futures::future::pending().await,
                }
            } => {
                let Some(finished) = poll.take() else { continue };
                match done {
                    Ok(result) => controller.on_poll_reply(finished.epoch, result),
                    Err(e) => warn!("status task failed: {e}"),
                }
            }
            _ = ticker.tick() => {
                // Skip the tick if the previous request has not come back yet.
                if poll.is_none() {
                    poll = Some(controller.poll());
                }
            }
        }
    }

    // Nothing may touch state after teardown; drop outstanding requests.
    if let Some(in_flight) = action.take() {
        in_flight.handle.abort();
    }
    if let Some(pending) = poll.take() {
        pending.handle.abort();
    }
    debug!("controller stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NoticeLevel, PanelSnapshot, ResolutionProfile};
    use mockito::{Matcher, Mock, ServerGuard};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const SETTINGS_BODY: &str = r#"{"id":"s1","radio_url":"https://ex.com/live.m3u8","resolution":"720p",
        "output_mode":"multicast","unicast_ip":"127.0.0.1:5000","multicast_address":"239.255.0.1:5000",
        "font_size":72,"font_color":"white","is_running":false}"#;
    const IDLE: &str = r#"{"is_running":false,"pid":null,"message":"idle"}"#;
    const STREAMING: &str = r#"{"is_running":true,"pid":4821,"message":"streaming"}"#;
    const STALE: &str = r#"{"is_running":false,"pid":null,"message":"stale"}"#;
    const NO_POLL: Duration = Duration::from_secs(3600);

    struct Harness {
        cmd_tx: UnboundedSender<UiCommand>,
        event_rx: UnboundedReceiver<PanelEvent>,
        task: JoinHandle<Result<()>>,
    }

    /// Events observed up to the end of one action.
    struct Outcome {
        /// `None` when the gate refused the action.
        ok: Option<bool>,
        refused: Vec<Action>,
        notices: Vec<Notice>,
        last_snapshot: Option<PanelSnapshot>,
    }

    impl Harness {
        fn spawn(server: &ServerGuard, poll_interval: Duration) -> Self {
            Self::spawn_at(server.url(), poll_interval, Duration::from_secs(5))
        }

        fn spawn_at(base_url: String, poll_interval: Duration, request_timeout: Duration) -> Self {
            let cfg = PanelConfig {
                base_url,
                poll_interval,
                request_timeout,
                user_agent: "radio-stream-panel/test".into(),
            };
            let client = BackendClient::new(&cfg).unwrap();
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
            let task =
                tokio::spawn(async move { run_controller(client, &cfg, event_tx, cmd_rx).await });
            Self {
                cmd_tx,
                event_rx,
                task,
            }
        }

        fn send(&self, cmd: UiCommand) {
            self.cmd_tx.send(cmd).unwrap();
        }

        async fn next_event(&mut self) -> PanelEvent {
            timeout(Duration::from_secs(5), self.event_rx.recv())
                .await
                .expect("timed out waiting for controller event")
                .expect("controller event channel closed")
        }

        async fn next_snapshot(&mut self) -> PanelSnapshot {
            loop {
                if let PanelEvent::Snapshot(s) = self.next_event().await {
                    return *s;
                }
            }
        }

        async fn next_notice(&mut self) -> Notice {
            loop {
                if let PanelEvent::Notice(n) = self.next_event().await {
                    return n;
                }
            }
        }

        /// Collect events until `action` settles or is refused.
        async fn outcome_of(&mut self, action: Action) -> Outcome {
            let mut out = Outcome {
                ok: None,
                refused: Vec::new(),
                notices: Vec::new(),
                last_snapshot: None,
            };
            loop {
                match self.next_event().await {
                    PanelEvent::Snapshot(s) => out.last_snapshot = Some(*s),
                    PanelEvent::Notice(n) => out.notices.push(n),
                    PanelEvent::ActionRefused { action: a } => {
                        out.refused.push(a);
                        if a == action {
                            return out;
                        }
                    }
                    PanelEvent::ActionSettled { action: a, ok } if a == action => {
                        out.ok = Some(ok);
                        return out;
                    }
                    PanelEvent::ActionSettled { .. } => {}
                }
            }
        }

        fn drain(&mut self) -> Vec<PanelEvent> {
            let mut events = Vec::new();
            while let Ok(ev) = self.event_rx.try_recv() {
                events.push(ev);
            }
            events
        }

        async fn shutdown(self) {
            let _ = self.cmd_tx.send(UiCommand::Quit);
            timeout(Duration::from_secs(5), self.task)
                .await
                .expect("controller did not stop")
                .unwrap()
                .unwrap();
        }
    }

    async fn mock_settings(server: &mut ServerGuard) -> Mock {
        server
            .mock("GET", "/api/settings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(SETTINGS_BODY)
            .create_async()
            .await
    }

    async fn mock_status(server: &mut ServerGuard, body: &str) -> Mock {
        server
            .mock("GET", "/api/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn initial_load_then_save_adopts_echo() {
        let mut server = mockito::Server::new_async().await;
        let _settings = mock_settings(&mut server).await;
        let _status = mock_status(&mut server, IDLE).await;
        let save = server
            .mock("POST", "/api/settings")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "id": "s1",
                "radio_url": "https://ex.com/a.m3u8",
                "resolution": "1080p",
                "output_mode": "multicast",
                "unicast_ip": "127.0.0.1:5000",
                "multicast_address": "239.255.0.1:5000",
                "font_size": 72,
                "font_color": "white"
            })))
            .with_status(200)
            .with_body(
                r#"{"id":"s2","radio_url":"https://ex.com/a.m3u8","resolution":"1080p","output_mode":"multicast",
                    "unicast_ip":"127.0.0.1:5000","multicast_address":"239.255.0.1:5000","font_size":72,"font_color":"white"}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let mut h = Harness::spawn(&server, NO_POLL);
        let initial = h.next_snapshot().await;
        assert!(initial.settings_loaded);
        assert!(!initial.run_state.is_running);
        assert_eq!(initial.run_state.message, "idle");
        assert_eq!(initial.settings.radio_url, "https://ex.com/live.m3u8");

        h.send(UiCommand::Edit(SettingsEdit::RadioUrl("https://ex.com/a.m3u8".into())));
        h.send(UiCommand::Edit(SettingsEdit::Resolution(ResolutionProfile::P1080)));
        h.send(UiCommand::SaveSettings);

        let out = h.outcome_of(Action::SaveSettings).await;
        assert_eq!(out.ok, Some(true));
        let last = out.last_snapshot.unwrap();
        assert_eq!(last.saved_settings.id.as_deref(), Some("s2"));
        assert_eq!(last.settings, last.saved_settings);
        assert!(!last.dirty);
        assert_eq!(last.action_in_flight, None);
        assert!(out.notices.iter().any(|n| n.level == NoticeLevel::Success));

        save.assert_async().await;
        h.shutdown().await;
    }

    #[tokio::test]
    async fn start_applies_reply_then_confirms_with_poll() {
        let mut server = mockito::Server::new_async().await;
        let _settings = mock_settings(&mut server).await;
        let idle = mock_status(&mut server, IDLE).await;

        let mut h = Harness::spawn(&server, NO_POLL);
        assert!(h.next_snapshot().await.can_start());

        idle.remove_async().await;
        let confirm = server
            .mock("GET", "/api/status")
            .with_status(200)
            .with_body(STREAMING)
            .expect(1)
            .create_async()
            .await;
        let start = server
            .mock("POST", "/api/start")
            .with_status(200)
            .with_body(STREAMING)
            .expect(1)
            .create_async()
            .await;

        h.send(UiCommand::Start);

        let busy = h.next_snapshot().await;
        assert_eq!(busy.action_in_flight, Some(Action::Start));
        assert!(!busy.can_stop());
        assert!(!busy.can_save());

        // The start reply is shown before the confirmation poll releases the gate.
        let applied = h.next_snapshot().await;
        assert!(applied.run_state.is_running);
        assert_eq!(applied.run_state.pid(), Some(4821));
        assert_eq!(applied.action_in_flight, Some(Action::Start));

        let out = h.outcome_of(Action::Start).await;
        assert_eq!(out.ok, Some(true));
        let last = out.last_snapshot.unwrap();
        assert!(last.run_state.is_running);
        assert!(!last.settings_editable());
        assert!(last.can_stop());

        start.assert_async().await;
        confirm.assert_async().await;
        h.shutdown().await;
    }

    #[tokio::test]
    async fn edits_and_save_refused_while_running() {
        let mut server = mockito::Server::new_async().await;
        let _settings = mock_settings(&mut server).await;
        let _status = mock_status(&mut server, STREAMING).await;
        let save = server
            .mock("POST", "/api/settings")
            .expect(0)
            .create_async()
            .await;

        let mut h = Harness::spawn(&server, NO_POLL);
        let initial = h.next_snapshot().await;
        assert!(!initial.settings_editable());

        h.send(UiCommand::Edit(SettingsEdit::Resolution(ResolutionProfile::P1080)));
        let notice = h.next_notice().await;
        assert_eq!(notice.level, NoticeLevel::Error);
        assert_eq!(notice.text, "Stop the stream before changing settings");

        h.send(UiCommand::SaveSettings);
        let out = h.outcome_of(Action::SaveSettings).await;
        assert_eq!(out.ok, None);
        assert_eq!(out.refused, vec![Action::SaveSettings]);
        assert!(out.last_snapshot.is_none(), "refusal must not change state");

        save.assert_async().await;
        h.shutdown().await;
    }

    #[tokio::test]
    async fn start_failure_surfaces_backend_detail() {
        let mut server = mockito::Server::new_async().await;
        let _settings = mock_settings(&mut server).await;
        let status = server
            .mock("GET", "/api/status")
            .with_status(200)
            .with_body(IDLE)
            .expect(1)
            .create_async()
            .await;
        let _start = server
            .mock("POST", "/api/start")
            .with_status(400)
            .with_body(r#"{"detail":"already running"}"#)
            .create_async()
            .await;

        let mut h = Harness::spawn(&server, NO_POLL);
        let initial = h.next_snapshot().await;

        h.send(UiCommand::Start);
        let out = h.outcome_of(Action::Start).await;

        assert_eq!(out.ok, Some(false));
        let messages: Vec<_> = out.notices.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(messages, vec!["already running"]);
        let last = out.last_snapshot.unwrap();
        assert_eq!(last.run_state, initial.run_state);
        assert_eq!(last.action_in_flight, None);

        // No confirmation poll after a failed action.
        status.assert_async().await;
        h.shutdown().await;
    }

    #[tokio::test]
    async fn second_action_is_not_dispatched_while_first_is_in_flight() {
        let mut server = mockito::Server::new_async().await;
        let _settings = mock_settings(&mut server).await;
        let _status = mock_status(&mut server, IDLE).await;
        let start = server
            .mock("POST", "/api/start")
            .with_status(200)
            .with_body(STREAMING)
            .expect(1)
            .create_async()
            .await;
        let stop = server.mock("POST", "/api/stop").expect(0).create_async().await;
        let save = server
            .mock("POST", "/api/settings")
            .expect(0)
            .create_async()
            .await;

        let mut h = Harness::spawn(&server, NO_POLL);
        h.next_snapshot().await;

        h.send(UiCommand::Start);
        h.send(UiCommand::Stop);
        h.send(UiCommand::SaveSettings);

        let out = h.outcome_of(Action::Start).await;
        assert_eq!(out.ok, Some(true));
        assert_eq!(out.refused, vec![Action::Stop, Action::SaveSettings]);

        start.assert_async().await;
        stop.assert_async().await;
        save.assert_async().await;
        h.shutdown().await;
    }

    #[tokio::test]
    async fn backend_rejects_save_from_stale_client() {
        let mut server = mockito::Server::new_async().await;
        let _settings = mock_settings(&mut server).await;
        // The client believes the stream is stopped; the backend knows better.
        let _status = mock_status(&mut server, IDLE).await;
        let save = server
            .mock("POST", "/api/settings")
            .with_status(400)
            .with_body(r#"{"detail":"Settings cannot change while the stream is running"}"#)
            .expect(1)
            .create_async()
            .await;

        let mut h = Harness::spawn(&server, NO_POLL);
        let initial = h.next_snapshot().await;

        h.send(UiCommand::Edit(SettingsEdit::FontColor("red".into())));
        h.send(UiCommand::SaveSettings);
        let out = h.outcome_of(Action::SaveSettings).await;

        assert_eq!(out.ok, Some(false));
        let notice = out.notices.last().unwrap();
        assert_eq!(notice.level, NoticeLevel::Error);
        assert_eq!(notice.text, "Settings cannot change while the stream is running");
        let last = out.last_snapshot.unwrap();
        assert_eq!(last.saved_settings, initial.saved_settings);
        assert_eq!(last.settings.overlay.font_color, "red");
        assert!(last.dirty);

        save.assert_async().await;
        h.shutdown().await;
    }

    #[tokio::test]
    async fn start_then_stop_returns_to_editable() {
        let mut server = mockito::Server::new_async().await;
        let _settings = mock_settings(&mut server).await;
        let idle = mock_status(&mut server, IDLE).await;
        let _start = server
            .mock("POST", "/api/start")
            .with_status(200)
            .with_body(STREAMING)
            .create_async()
            .await;
        let _stop = server
            .mock("POST", "/api/stop")
            .with_status(200)
            .with_body(r#"{"is_running":false,"pid":null,"message":"stopped"}"#)
            .create_async()
            .await;

        let mut h = Harness::spawn(&server, NO_POLL);
        h.next_snapshot().await;

        idle.remove_async().await;
        let streaming = mock_status(&mut server, STREAMING).await;
        h.send(UiCommand::Start);
        let out = h.outcome_of(Action::Start).await;
        assert!(out.last_snapshot.unwrap().run_state.is_running);

        streaming.remove_async().await;
        let _stopped = mock_status(&mut server, IDLE).await;
        h.send(UiCommand::Stop);
        let out = h.outcome_of(Action::Stop).await;
        assert_eq!(out.ok, Some(true));
        let last = out.last_snapshot.unwrap();
        assert!(!last.run_state.is_running);
        assert_eq!(last.run_state.pid(), None);
        assert!(last.settings_editable());

        h.send(UiCommand::Edit(SettingsEdit::FontSize(96)));
        let edited = h.next_snapshot().await;
        assert_eq!(edited.settings.overlay.font_size, 96);
        assert!(edited.dirty);

        h.shutdown().await;
    }

    #[tokio::test]
    async fn unchanged_polls_emit_nothing() {
        let mut server = mockito::Server::new_async().await;
        let _settings = mock_settings(&mut server).await;
        let status = server
            .mock("GET", "/api/status")
            .with_status(200)
            .with_body(IDLE)
            .expect_at_least(3)
            .create_async()
            .await;

        let mut h = Harness::spawn(&server, Duration::from_millis(60));
        h.next_snapshot().await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(h.drain().is_empty());
        status.assert_async().await;
        h.shutdown().await;
    }

    #[tokio::test]
    async fn failing_polls_keep_last_known_state_silently() {
        let mut server = mockito::Server::new_async().await;
        let _settings = mock_settings(&mut server).await;
        let streaming = mock_status(&mut server, STREAMING).await;

        let mut h = Harness::spawn(&server, Duration::from_millis(60));
        let initial = h.next_snapshot().await;
        assert!(initial.run_state.is_running);

        streaming.remove_async().await;
        let failing = server
            .mock("GET", "/api/status")
            .with_status(503)
            .expect_at_least(3)
            .create_async()
            .await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let events = h.drain();
        assert!(
            !events.iter().any(|e| matches!(e, PanelEvent::Notice(_))),
            "poll failures must not notify"
        );
        assert!(
            !events.iter().any(|e| matches!(e, PanelEvent::Snapshot(_))),
            "poll failures must not change displayed state"
        );
        failing.assert_async().await;
        h.shutdown().await;
    }

    #[tokio::test]
    async fn settings_load_failure_warns_and_keeps_defaults() {
        let mut server = mockito::Server::new_async().await;
        let _settings = server
            .mock("GET", "/api/settings")
            .with_status(500)
            .create_async()
            .await;
        let _status = mock_status(&mut server, IDLE).await;

        let mut h = Harness::spawn(&server, NO_POLL);
        let first = h.next_event().await;
        match first {
            PanelEvent::Notice(n) => {
                assert_eq!(n.level, NoticeLevel::Warning);
                assert_eq!(n.text, "Could not load settings; showing defaults");
            }
            other => panic!("expected a warning first, got {other:?}"),
        }
        let snap = h.next_snapshot().await;
        assert!(!snap.settings_loaded);
        assert_eq!(snap.settings, Settings::default());

        h.shutdown().await;
    }

    #[tokio::test]
    async fn refresh_polls_without_waiting_for_tick() {
        let mut server = mockito::Server::new_async().await;
        let _settings = mock_settings(&mut server).await;
        let idle = mock_status(&mut server, IDLE).await;

        let mut h = Harness::spawn(&server, NO_POLL);
        assert!(!h.next_snapshot().await.run_state.is_running);

        idle.remove_async().await;
        let streaming = server
            .mock("GET", "/api/status")
            .with_status(200)
            .with_body(STREAMING)
            .expect(1)
            .create_async()
            .await;
        h.send(UiCommand::Refresh);

        let snap = h.next_snapshot().await;
        assert!(snap.run_state.is_running);
        assert_eq!(snap.run_state.pid(), Some(4821));

        streaming.assert_async().await;
        h.shutdown().await;
    }

    #[tokio::test]
    async fn slow_background_poll_cannot_overwrite_start_result() {
        let mut server = mockito::Server::new_async().await;
        let _settings = mock_settings(&mut server).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        // Call 0 is the startup fetch, call 1 the first background poll.
        let _status = server
            .mock("GET", "/api/status")
            .with_status(200)
            .with_body_from_request(move |_| match seen.fetch_add(1, Ordering::SeqCst) {
                0 => IDLE.into(),
                1 => {
                    std::thread::sleep(Duration::from_millis(400));
                    STALE.into()
                }
                _ => STREAMING.into(),
            })
            .create_async()
            .await;
        let start = server
            .mock("POST", "/api/start")
            .with_status(200)
            .with_body(STREAMING)
            .expect(1)
            .create_async()
            .await;

        let mut h = Harness::spawn(&server, Duration::from_millis(60));
        h.next_snapshot().await;
        // Let the first background poll reach the backend before starting.
        tokio::time::sleep(Duration::from_millis(150)).await;
        h.send(UiCommand::Start);

        let mut snapshots = Vec::new();
        loop {
            match h.next_event().await {
                PanelEvent::Snapshot(s) => snapshots.push(*s),
                PanelEvent::ActionSettled { action, ok } => {
                    assert_eq!(action, Action::Start);
                    assert!(ok);
                    break;
                }
                _ => {}
            }
        }
        tokio::time::sleep(Duration::from_millis(600)).await;
        for ev in h.drain() {
            if let PanelEvent::Snapshot(s) = ev {
                snapshots.push(*s);
            }
        }

        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert!(
            snapshots.iter().all(|s| s.run_state.message != "stale"),
            "a poll dispatched before the start must be discarded"
        );
        assert!(snapshots.last().unwrap().run_state.is_running);

        start.assert_async().await;
        h.shutdown().await;
    }

    #[tokio::test]
    async fn quit_during_startup_does_not_wait_for_backend() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let h = Harness::spawn_at(format!("http://{addr}"), NO_POLL, Duration::from_secs(30));
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.send(UiCommand::Quit);

        let Harness { task, .. } = h;
        timeout(Duration::from_secs(2), task)
            .await
            .expect("controller kept waiting on startup requests")
            .unwrap()
            .unwrap();
        silent.abort();
    }

    #[tokio::test]
    async fn commands_sent_during_startup_run_after_it() {
        let mut server = mockito::Server::new_async().await;
        let _settings = mock_settings(&mut server).await;
        let _status = mock_status(&mut server, IDLE).await;

        let mut h = Harness::spawn(&server, NO_POLL);
        h.send(UiCommand::Edit(SettingsEdit::FontColor("cyan".into())));

        let mut last = h.next_snapshot().await;
        while last.settings.overlay.font_color != "cyan" {
            last = h.next_snapshot().await;
        }
        assert!(last.settings_loaded);
        assert_eq!(last.settings.radio_url, "https://ex.com/live.m3u8");
        assert!(last.dirty);

        h.shutdown().await;
    }

    #[tokio::test]
    async fn dropping_all_senders_stops_controller() {
        let mut server = mockito::Server::new_async().await;
        let _settings = mock_settings(&mut server).await;
        let _status = mock_status(&mut server, IDLE).await;

        let mut h = Harness::spawn(&server, NO_POLL);
        h.next_snapshot().await;
        let Harness { cmd_tx, task, .. } = h;
        drop(cmd_tx);
        timeout(Duration::from_secs(5), task)
            .await
            .expect("controller did not stop")
            .unwrap()
            .unwrap();
    }
}
