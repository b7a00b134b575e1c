mod help;
mod state;

use crate::api::BackendClient;
use crate::model::{Action, PanelConfig, PanelEvent, PanelSnapshot};
use crate::orchestrator::{self, UiCommand};
use crate::settings::SettingsEdit;
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Tabs},
    Terminal,
};
use state::{notice_color, FormField, UiState};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

const NOTICE_TIME: &[time::format_description::BorrowedFormatItem<'static>] =
    time::macros::format_description!("[hour]:[minute]:[second]");

fn push_wrapped_status_kv(
    out: &mut Vec<Line<'static>>,
    label: &str,
    value: &str,
    status_area_width: u16,
) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    // Account for borders (2 chars on each side)
    let usable_width = status_area_width.saturating_sub(4).max(1);
    let label_text = format!("{label}:");
    let label_width = label_text.chars().count() as u16;

    let value_chars: Vec<char> = value.chars().collect();
    let mut remaining = value_chars.as_slice();
    let mut first = true;

    while !remaining.is_empty() {
        let line_width = if first {
            usable_width.saturating_sub(label_width + 1).max(1)
        } else {
            usable_width.saturating_sub(2).max(1)
        };

        let take = (remaining.len() as u16).min(line_width) as usize;
        let (line_chars, rest) = remaining.split_at(take);
        let line_text: String = line_chars.iter().collect();

        if first {
            out.push(Line::from(vec![
                Span::styled(label_text.clone(), Style::default().fg(Color::Gray)),
                Span::raw(" "),
                Span::raw(line_text),
            ]));
            first = false;
        } else {
            out.push(Line::from(vec![Span::raw("  "), Span::raw(line_text)]));
        }

        remaining = rest;
    }
}

pub async fn run(cfg: PanelConfig) -> Result<()> {
    let client = BackendClient::new(&cfg)?;
    let (event_tx, event_rx) = mpsc::unbounded_channel::<PanelEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let base_url = cfg.base_url.clone();
    let ui_handle = std::thread::spawn(move || run_threaded(base_url, event_rx, cmd_tx));

    let res = orchestrator::run_controller(client, &cfg, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    base_url: String,
    mut event_rx: UnboundedReceiver<PanelEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let mut state = UiState::new(base_url);

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        let mut controller_gone = false;
        loop {
            match event_rx.try_recv() {
                Ok(ev) => state.apply_event(ev),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    controller_gone = true;
                    break;
                }
            }
        }
        // Controller exited; nothing left to drive.
        if controller_gone {
            break Ok(());
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                if let (KeyModifiers::CONTROL, KeyCode::Char('c')) = (k.modifiers, k.code) {
                    let _ = cmd_tx.send(UiCommand::Quit);
                    break Ok(());
                }
                if state.editing.is_some() {
                    handle_edit_key(&mut state, k.code, &cmd_tx);
                    continue;
                }
                match k.code {
                    KeyCode::Char('q') => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    KeyCode::Tab => {
                        state.tab = (state.tab + 1) % 2;
                    }
                    KeyCode::Char('?') => {
                        state.tab = 1;
                    }
                    KeyCode::Char('s') if state.action_enabled(Action::Start) => {
                        let _ = cmd_tx.send(UiCommand::Start);
                    }
                    KeyCode::Char('x') if state.action_enabled(Action::Stop) => {
                        let _ = cmd_tx.send(UiCommand::Stop);
                    }
                    KeyCode::Char('u') if state.action_enabled(Action::SaveSettings) => {
                        let _ = cmd_tx.send(UiCommand::SaveSettings);
                    }
                    KeyCode::Char('r') => {
                        let _ = cmd_tx.send(UiCommand::Refresh);
                    }
                    KeyCode::Char('z') => {
                        let _ = cmd_tx.send(UiCommand::Revert);
                    }
                    KeyCode::Up | KeyCode::Char('k') if state.tab == 0 => state.select_prev(),
                    KeyCode::Down | KeyCode::Char('j') if state.tab == 0 => state.select_next(),
                    KeyCode::Left | KeyCode::Char('h') if state.tab == 0 => {
                        send_edit(&cmd_tx, state.cycle(false));
                    }
                    KeyCode::Right | KeyCode::Char('l') if state.tab == 0 => {
                        send_edit(&cmd_tx, state.cycle(true));
                    }
                    KeyCode::Enter if state.tab == 0 => {
                        state.begin_edit();
                    }
                    _ => {}
                }
            }
        }
    };

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();
    res
}

fn send_edit(cmd_tx: &UnboundedSender<UiCommand>, edit: Option<SettingsEdit>) {
    if let Some(edit) = edit {
        let _ = cmd_tx.send(UiCommand::Edit(edit));
    }
}

fn handle_edit_key(state: &mut UiState, code: KeyCode, cmd_tx: &UnboundedSender<UiCommand>) {
    match code {
        KeyCode::Enter => send_edit(cmd_tx, state.commit_edit()),
        KeyCode::Esc => state.cancel_edit(),
        KeyCode::Backspace => {
            if let Some(buf) = state.editing.as_mut() {
                buf.pop();
            }
        }
        KeyCode::Char(c) => {
            if let Some(buf) = state.editing.as_mut() {
                buf.push(c);
            }
        }
        _ => {}
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![Line::from("Panel"), Line::from("Help")])
        .select(state.tab)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("radio-stream-panel"),
        )
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_panel(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }
}

fn draw_panel(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let main = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(8),  // Stream status
                Constraint::Length(9),  // Settings form
                Constraint::Min(3),     // Notices
                Constraint::Length(1),  // Key hints
            ]
            .as_ref(),
        )
        .split(area);

    let Some(snapshot) = state.snapshot.as_ref() else {
        let p = Paragraph::new(vec![
            Line::from(format!("Connecting to {}…", state.base_url)),
        ])
        .block(Block::default().borders(Borders::ALL).title("Stream"));
        f.render_widget(p, main[0]);
        draw_notices(main[2], f, state);
        return;
    };

    draw_status(main[0], f, state, snapshot);
    draw_form(main[1], f, state, snapshot);
    draw_notices(main[2], f, state);
    draw_hints(main[3], f, snapshot);
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState, snapshot: &PanelSnapshot) {
    let run = &snapshot.run_state;
    let (badge, color) = if run.is_running {
        ("● ON AIR", Color::Red)
    } else {
        ("○ OFF AIR", Color::Gray)
    };

    let mut lines = vec![Line::from(Span::styled(
        badge,
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    ))];
    if let Some(pid) = run.pid() {
        lines.push(Line::from(vec![
            Span::styled("PID:", Style::default().fg(Color::Gray)),
            Span::raw(format!(" {pid}")),
        ]));
    }
    push_wrapped_status_kv(&mut lines, "Status", &run.message, area.width);
    push_wrapped_status_kv(&mut lines, "Backend", &state.base_url, area.width);
    if let Some(action) = snapshot.action_in_flight {
        lines.push(Line::from(Span::styled(
            action.progress_label(),
            Style::default().fg(Color::Yellow),
        )));
    }

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Stream"));
    f.render_widget(p, area);
}

fn draw_form(area: Rect, f: &mut ratatui::Frame, state: &UiState, snapshot: &PanelSnapshot) {
    let settings = &snapshot.settings;
    let editable = snapshot.settings_editable();

    let mut title = String::from("Settings");
    if !snapshot.settings_loaded {
        title.push_str(" (defaults, not loaded)");
    }
    if snapshot.dirty {
        title.push_str(" *");
    }
    if !editable {
        title.push_str(" [locked while streaming]");
    }

    let value_style = if editable {
        Style::default()
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let lines: Vec<Line> = FormField::ALL
        .iter()
        .map(|field| {
            let selected = *field == state.field;
            let marker = if selected { "› " } else { "  " };
            let label = format!("{:<18}", field.label(settings));
            let value = match (&state.editing, selected) {
                (Some(buf), true) => Span::styled(
                    format!("{buf}▏"),
                    Style::default().fg(Color::Yellow),
                ),
                _ => {
                    let v = field.value(settings);
                    if *field == FormField::DatetimeFormat && v.is_empty() {
                        Span::styled("(backend default)", Style::default().fg(Color::DarkGray))
                    } else {
                        Span::styled(v, value_style)
                    }
                }
            };
            let label_style = if selected {
                Style::default().fg(Color::Cyan)
            } else {
                Style::default().fg(Color::Gray)
            };
            Line::from(vec![
                Span::styled(marker, label_style),
                Span::styled(label, label_style),
                value,
            ])
        })
        .collect();

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

fn draw_notices(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let rows = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = state
        .notices
        .iter()
        .take(rows)
        .map(|n| {
            let at = n.at.format(NOTICE_TIME).unwrap_or_default();
            Line::from(vec![
                Span::styled(format!("{at} "), Style::default().fg(Color::DarkGray)),
                Span::styled(n.text.clone(), Style::default().fg(notice_color(n.level))),
            ])
        })
        .collect();
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Notices"));
    f.render_widget(p, area);
}

fn draw_hints(area: Rect, f: &mut ratatui::Frame, snapshot: &PanelSnapshot) {
    let hint = |key: &'static str, what: &'static str, enabled: bool| {
        let style = if enabled {
            Style::default().fg(Color::Magenta)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        [
            Span::styled(key, style),
            Span::styled(format!(" {what}  "), style),
        ]
    };
    let editable = snapshot.settings_editable() && snapshot.action_in_flight.is_none();
    let mut spans = Vec::new();
    spans.extend(hint("s", "start", snapshot.can_start()));
    spans.extend(hint("x", "stop", snapshot.can_stop()));
    spans.extend(hint("u", "save", snapshot.can_save()));
    spans.extend(hint("z", "revert", editable && snapshot.dirty));
    spans.extend(hint("r", "refresh", true));
    spans.extend(hint("?", "help", true));
    spans.extend(hint("q", "quit", true));
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}
