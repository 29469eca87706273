//! Terminal front end. The event loop blocks on the main thread; agent work
//! runs on the bridge, driven from short-lived worker threads.

pub mod app;
pub mod input_line;
pub mod render;
pub mod view;

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossterm::event::{self, Event, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use crate::agent_engine::session::{AgentSession, SessionHandle};
use crate::bridge::AsyncBridge;
use crate::config::AppConfig;
use crate::errors::DeskPilotResult;
use app::{Action, App, UiEvent};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

type Term = Terminal<CrosstermBackend<io::Stdout>>;

/// Run the chat UI until the user quits, then shut the session down.
/// The caller stops and joins the bridge.
pub fn run(bridge: Arc<AsyncBridge>, config: AppConfig, step_limit: u32) -> DeskPilotResult<()> {
    let mut terminal = setup_terminal()?;
    let (tx, rx) = mpsc::channel::<UiEvent>();
    spawn_initializer(Arc::clone(&bridge), config, tx.clone());

    let mut app = App::new();
    let result = event_loop(&mut terminal, &mut app, &bridge, &tx, &rx, step_limit);
    let restored = restore_terminal(&mut terminal);

    if app.is_busy() {
        eprintln!("Waiting for the running command to finish...");
    }
    if let Some(session) = app.session().cloned() {
        match bridge.submit_and_wait(async move { session.shutdown().await }) {
            Ok(()) => tracing::info!("session shut down"),
            Err(e) => tracing::warn!(error = %e, "session shutdown skipped"),
        }
    }
    result?;
    restored
}

fn setup_terminal() -> DeskPilotResult<Term> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    if let Err(e) = execute!(stdout, EnterAlternateScreen) {
        let _ = disable_raw_mode();
        return Err(e.into());
    }
    Ok(Terminal::new(CrosstermBackend::new(stdout))?)
}

fn restore_terminal(terminal: &mut Term) -> DeskPilotResult<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn event_loop(
    terminal: &mut Term,
    app: &mut App,
    bridge: &Arc<AsyncBridge>,
    tx: &Sender<UiEvent>,
    rx: &Receiver<UiEvent>,
    step_limit: u32,
) -> DeskPilotResult<()> {
    loop {
        while let Ok(ev) = rx.try_recv() {
            app.on_event(ev);
        }
        terminal.draw(|f| view::draw(f, app))?;

        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match app.handle_key(key) {
            Action::None => {}
            Action::Quit => return Ok(()),
            Action::Submit { session, text } => {
                spawn_run(Arc::clone(bridge), session, text, step_limit, tx.clone());
            }
        }
    }
}

fn spawn_initializer(bridge: Arc<AsyncBridge>, config: AppConfig, tx: Sender<UiEvent>) {
    let spawned = thread::Builder::new()
        .name("deskpilot-init".into())
        .spawn(move || {
            let result = bridge.submit_and_wait(async move {
                AgentSession::initialize(&config).await.map(SessionHandle::spawn)
            });
            let event = match result {
                Ok(Ok(handle)) => UiEvent::SessionReady(handle),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "session initialization failed");
                    UiEvent::SessionFailed(e.to_string())
                }
                Err(e) => UiEvent::SessionFailed(e.to_string()),
            };
            let _ = tx.send(event);
        });
    if let Err(e) = spawned {
        tracing::error!(error = %e, "cannot start initializer thread");
    }
}

fn spawn_run(bridge: Arc<AsyncBridge>, session: SessionHandle, text: String, step_limit: u32, tx: Sender<UiEvent>) {
    let fallback = tx.clone();
    let spawned = thread::Builder::new()
        .name("deskpilot-run".into())
        .spawn(move || {
            tracing::info!(command = %text, "submitting command");
            let event = match bridge.submit_and_wait(async move { session.run(text, step_limit).await }) {
                Ok(Ok(transcript)) => UiEvent::RunFinished(transcript),
                Ok(Err(e)) => UiEvent::RunFailed(e.to_string()),
                Err(e) => UiEvent::RunFailed(e.to_string()),
            };
            let _ = tx.send(event);
        });
    if let Err(e) = spawned {
        let _ = fallback.send(UiEvent::RunFailed(format!("cannot start worker thread: {e}")));
    }
}
