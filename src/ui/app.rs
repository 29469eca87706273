//! UI state and key handling. Touched only by the UI thread; workers report
//! back through [`UiEvent`]s.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::agent_engine::session::SessionHandle;
use crate::agent_engine::state::StopReason;
use crate::agent_engine::transcript::Transcript;
use crate::ui::input_line::InputLine;
use crate::ui::render::{render_transcript, separator, RESULT_HEADER};

pub const NOT_READY_WARNING: &str = "MCP agent is not initialized yet. Please wait.";
pub const SEND_LABEL: &str = "Send Command (Enter)";
pub const BUSY_LABEL: &str = "Processing...";

/// Lines scrolled per PageUp/PageDown.
const PAGE: usize = 10;

/// Messages posted by worker threads to the UI loop.
pub enum UiEvent {
    SessionReady(SessionHandle),
    SessionFailed(String),
    RunFinished(Transcript),
    RunFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    User,
    Agent,
    Error,
    Warn,
}

impl LogTag {
    pub fn as_str(self) -> &'static str {
        match self {
            LogTag::User => "USER",
            LogTag::Agent => "AGENT",
            LogTag::Error => "ERROR",
            LogTag::Warn => "WARN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub tag: Option<LogTag>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Initializing,
    Connected { tools: usize },
    Failed(String),
}

impl Status {
    pub fn text(&self) -> String {
        match self {
            Status::Initializing => "Initializing MCP connection...".to_string(),
            Status::Connected { tools } => format!("Connected to MCP server ({tools} tools)"),
            Status::Failed(msg) => format!("Error - {msg}"),
        }
    }
}

/// What the UI loop has to do after a key press.
pub enum Action {
    None,
    Submit { session: SessionHandle, text: String },
    Quit,
}

pub struct App {
    pub input: InputLine,
    log: Vec<LogEntry>,
    status: Status,
    session: Option<SessionHandle>,
    busy: bool,
    confirm_quit: bool,
    /// Lines scrolled up from the bottom of the log.
    scroll_back: usize,
    /// Furthest `scroll_back` can go, as measured by the last draw.
    scroll_limit: usize,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self {
            input: InputLine::new(),
            log: Vec::new(),
            status: Status::Initializing,
            session: None,
            busy: false,
            confirm_quit: false,
            scroll_back: 0,
            scroll_limit: 0,
        }
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn confirming_quit(&self) -> bool {
        self.confirm_quit
    }

    pub fn scroll_back(&self) -> usize {
        self.scroll_back
    }

    /// Called by the view with the number of rows hidden above the output box.
    pub fn set_scroll_limit(&mut self, limit: usize) {
        self.scroll_limit = limit;
        self.scroll_back = self.scroll_back.min(limit);
    }

    pub fn send_label(&self) -> &'static str {
        if self.busy {
            BUSY_LABEL
        } else {
            SEND_LABEL
        }
    }

    pub fn append(&mut self, tag: Option<LogTag>, text: impl Into<String>) {
        self.log.push(LogEntry {
            tag,
            text: text.into(),
        });
        self.scroll_back = 0;
    }

    pub fn clear_output(&mut self) {
        self.log.clear();
        self.scroll_back = 0;
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Action {
        if self.confirm_quit {
            self.confirm_quit = false;
            return match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => Action::Quit,
                _ => Action::None,
            };
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('q') if ctrl => self.confirm_quit = true,
            KeyCode::Esc => self.confirm_quit = true,
            KeyCode::Char('l') if ctrl => self.clear_output(),
            KeyCode::PageUp => self.scroll_back = (self.scroll_back + PAGE).min(self.scroll_limit),
            KeyCode::PageDown => self.scroll_back = self.scroll_back.saturating_sub(PAGE),
            KeyCode::Enter if !key.modifiers.contains(KeyModifiers::ALT) => return self.submit(),
            _ => {
                self.input.handle_key(key);
            }
        }
        Action::None
    }

    fn submit(&mut self) -> Action {
        if self.busy || self.input.content().trim().is_empty() {
            return Action::None;
        }
        let Some(session) = self.session.clone() else {
            let warning = match &self.status {
                Status::Failed(msg) => format!("MCP agent is not connected: {msg}"),
                _ => NOT_READY_WARNING.to_string(),
            };
            self.append(Some(LogTag::Warn), warning);
            return Action::None;
        };
        let Some(text) = self.input.take() else {
            return Action::None;
        };
        self.append(Some(LogTag::User), format!("You: {text}"));
        self.busy = true;
        Action::Submit { session, text }
    }

    pub fn on_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::SessionReady(handle) => {
                self.status = Status::Connected {
                    tools: handle.tool_count(),
                };
                self.session = Some(handle);
            }
            UiEvent::SessionFailed(msg) => self.status = Status::Failed(msg),
            UiEvent::RunFinished(transcript) => {
                self.busy = false;
                self.append(Some(LogTag::Agent), RESULT_HEADER);
                for block in render_transcript(&transcript) {
                    self.append(None, block);
                }
                if transcript.stop_reason == StopReason::StepLimit {
                    self.append(Some(LogTag::Warn), "Step limit reached, the response is incomplete.");
                }
                self.append(None, separator());
            }
            UiEvent::RunFailed(msg) => {
                self.busy = false;
                self.append(Some(LogTag::Error), format!("Error processing command: {msg}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::engine::tests::{text_reply, ScriptedProvider};
    use crate::agent_engine::session::AgentSession;
    use crate::agent_engine::transcript::{Role, TranscriptMessage};
    use crate::llm::types::CallConfig;
    use chrono::Utc;
    use std::sync::Arc;
    use uuid::Uuid;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    fn type_str(app: &mut App, s: &str) {
        for c in s.chars() {
            app.handle_key(press(KeyCode::Char(c)));
        }
    }

    async fn ready_session() -> SessionHandle {
        let provider = Arc::new(ScriptedProvider::new(vec![text_reply("hi")]));
        let cfg = CallConfig {
            model: "m".into(),
            stream: false,
            temperature: 0.0,
        };
        let session = AgentSession::with_clients(provider, cfg, None, Vec::new())
            .await
            .unwrap();
        SessionHandle::spawn(session)
    }

    #[test]
    fn submit_before_ready_warns_and_keeps_input() {
        let mut app = App::new();
        assert_eq!(app.status().text(), "Initializing MCP connection...");
        type_str(&mut app, "open notepad");
        assert!(matches!(app.handle_key(press(KeyCode::Enter)), Action::None));
        assert_eq!(app.log().len(), 1);
        assert_eq!(app.log()[0].tag, Some(LogTag::Warn));
        assert_eq!(app.log()[0].text, NOT_READY_WARNING);
        assert_eq!(app.input.content(), "open notepad");
    }

    #[test]
    fn submit_after_failed_connect_reports_the_error() {
        let mut app = App::new();
        app.on_event(UiEvent::SessionFailed("spawn failed".into()));
        type_str(&mut app, "open notepad");
        assert!(matches!(app.handle_key(press(KeyCode::Enter)), Action::None));
        let last = app.log().last().unwrap();
        assert_eq!(last.tag, Some(LogTag::Warn));
        assert_eq!(last.text, "MCP agent is not connected: spawn failed");
        assert_eq!(app.input.content(), "open notepad");
    }

    #[test]
    fn empty_input_is_ignored() {
        let mut app = App::new();
        type_str(&mut app, "   ");
        assert!(matches!(app.handle_key(press(KeyCode::Enter)), Action::None));
        assert!(app.log().is_empty());
    }

    #[tokio::test]
    async fn submit_locks_until_worker_reports() {
        let mut app = App::new();
        app.on_event(UiEvent::SessionReady(ready_session().await));
        assert_eq!(app.status().text(), "Connected to MCP server (0 tools)");

        type_str(&mut app, "say hi");
        let Action::Submit { text, .. } = app.handle_key(press(KeyCode::Enter)) else {
            panic!("expected a submission");
        };
        assert_eq!(text, "say hi");
        assert_eq!(app.log()[0].text, "You: say hi");
        assert_eq!(app.send_label(), BUSY_LABEL);

        type_str(&mut app, "again");
        assert!(matches!(app.handle_key(press(KeyCode::Enter)), Action::None));

        app.on_event(UiEvent::RunFinished(Transcript {
            run_id: Uuid::new_v4(),
            messages: vec![
                TranscriptMessage::text(Role::User, "say hi"),
                TranscriptMessage::text(Role::Agent, "hi"),
            ],
            stop_reason: StopReason::Completed,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }));
        assert!(!app.is_busy());
        let texts: Vec<&str> = app.log().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts[1], "Agent Response:");
        assert_eq!(texts[2], "[Agent]\nhi");
        assert_eq!(texts[3], "-".repeat(50));

        app.on_event(UiEvent::RunFailed("boom".into()));
        let last = app.log().last().unwrap();
        assert_eq!(last.tag, Some(LogTag::Error));
        assert_eq!(last.text, "Error processing command: boom");
    }

    #[test]
    fn quit_needs_confirmation() {
        let mut app = App::new();
        assert!(matches!(app.handle_key(ctrl('q')), Action::None));
        assert!(app.confirming_quit());
        assert!(matches!(app.handle_key(press(KeyCode::Char('n'))), Action::None));
        assert!(!app.confirming_quit());
        app.handle_key(press(KeyCode::Esc));
        assert!(matches!(app.handle_key(press(KeyCode::Char('y'))), Action::Quit));
    }

    #[test]
    fn clear_scroll_and_status() {
        let mut app = App::new();
        app.append(None, "one");
        app.set_scroll_limit(15);
        app.handle_key(press(KeyCode::PageUp));
        assert_eq!(app.scroll_back(), 10);
        for _ in 0..20 {
            app.handle_key(press(KeyCode::PageUp));
        }
        assert_eq!(app.scroll_back(), 15);
        app.handle_key(press(KeyCode::PageDown));
        assert_eq!(app.scroll_back(), 5);
        app.handle_key(press(KeyCode::PageDown));
        assert_eq!(app.scroll_back(), 0);

        app.handle_key(press(KeyCode::PageUp));
        app.set_scroll_limit(3);
        assert_eq!(app.scroll_back(), 3);
        app.handle_key(ctrl('l'));
        assert!(app.log().is_empty());

        app.on_event(UiEvent::SessionFailed("spawn failed".into()));
        assert_eq!(app.status().text(), "Error - spawn failed");
    }
}
