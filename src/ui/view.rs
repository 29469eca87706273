use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Frame;

use crate::ui::app::{App, LogTag, Status};

const OUTPUT_TITLE: &str = " Agent Chain of Thought & Responses ";
const INPUT_TITLE: &str = " Enter command ";
const HELP: &str = "Enter: send | Alt+Enter: newline | Ctrl+L: clear | PgUp/PgDn: scroll | Ctrl+Q: quit";
/// Tallest the input box grows, borders included.
const MAX_INPUT_HEIGHT: u16 = 8;

pub fn draw(f: &mut Frame, app: &mut App) {
    let input_lines = app.input.content().split('\n').count() as u16;
    let input_height = (input_lines + 2).clamp(3, MAX_INPUT_HEIGHT);
    let [output_area, input_area, status_area] = Layout::vertical([
        Constraint::Min(3),
        Constraint::Length(input_height),
        Constraint::Length(1),
    ])
    .areas(f.area());

    app.set_scroll_limit(hidden_rows(app, output_area));
    let app = &*app;
    draw_output(f, app, output_area);
    draw_input(f, app, input_area);
    draw_status(f, app, status_area);
}

fn tag_style(tag: LogTag) -> Style {
    let color = match tag {
        LogTag::User => Color::Cyan,
        LogTag::Agent => Color::Green,
        LogTag::Error => Color::Red,
        LogTag::Warn => Color::Yellow,
    };
    Style::new().fg(color).add_modifier(Modifier::BOLD)
}

fn log_lines(app: &App) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    for entry in app.log() {
        let mut first = true;
        for raw in entry.text.split('\n') {
            match entry.tag {
                Some(tag) if first => lines.push(Line::from(vec![
                    Span::styled(format!("[{}] ", tag.as_str()), tag_style(tag)),
                    Span::raw(raw),
                ])),
                _ => lines.push(Line::raw(raw)),
            }
            first = false;
        }
    }
    lines
}

/// Rows a line occupies once wrapped to `width` columns.
fn wrapped_rows(line: &Line<'_>, width: u16) -> usize {
    let width = usize::from(width.max(1));
    line.width().max(1).div_ceil(width)
}

/// Rows of the log above the visible part of `area` when pinned to the bottom.
fn hidden_rows(app: &App, area: Rect) -> usize {
    let inner_width = area.width.saturating_sub(2);
    let inner_height = usize::from(area.height.saturating_sub(2));
    let total: usize = log_lines(app)
        .iter()
        .map(|l| wrapped_rows(l, inner_width))
        .sum();
    total.saturating_sub(inner_height)
}

fn draw_output(f: &mut Frame, app: &App, area: Rect) {
    let lines = log_lines(app);
    let bottom = hidden_rows(app, area);
    let offset = bottom.saturating_sub(app.scroll_back());

    let title = if app.scroll_back() > 0 && bottom > 0 {
        format!("{OUTPUT_TITLE}[scrolled] ")
    } else {
        OUTPUT_TITLE.to_string()
    };
    let output = Paragraph::new(Text::from(lines))
        .block(Block::default().borders(Borders::ALL).title(title))
        .wrap(Wrap { trim: false })
        .scroll((u16::try_from(offset).unwrap_or(u16::MAX), 0));
    f.render_widget(output, area);
}

fn draw_input(f: &mut Frame, app: &App, area: Rect) {
    let send_style = if app.is_busy() {
        Style::new().fg(Color::DarkGray)
    } else {
        Style::new().fg(Color::Cyan)
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(INPUT_TITLE)
        .title_bottom(Line::from(Span::styled(format!(" {} ", app.send_label()), send_style)).right_aligned());
    let input = Paragraph::new(app.input.content()).block(block);
    f.render_widget(input, area);

    if !app.confirming_quit() {
        let (row, col) = app.input.cursor_row_col();
        let x = area.x + 1 + u16::try_from(col).unwrap_or(u16::MAX);
        let y = area.y + 1 + u16::try_from(row).unwrap_or(u16::MAX);
        if x < area.right().saturating_sub(1) && y < area.bottom().saturating_sub(1) {
            f.set_cursor_position((x, y));
        }
    }
}

fn draw_status(f: &mut Frame, app: &App, area: Rect) {
    let line = if app.confirming_quit() {
        Line::from(Span::styled(
            "Quit? (y/n)",
            Style::new().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        ))
    } else {
        let color = match app.status() {
            Status::Initializing => Color::Yellow,
            Status::Connected { .. } => Color::Green,
            Status::Failed(_) => Color::Red,
        };
        Line::from(vec![
            Span::styled(app.status().text(), Style::new().fg(color)),
            Span::styled(format!("  {HELP}"), Style::new().fg(Color::DarkGray)),
        ])
    };
    f.render_widget(Paragraph::new(line), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::app::LogTag;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    fn screen(app: &mut App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 20)).unwrap();
        terminal.draw(|f| draw(f, app)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        let mut out = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                out.push_str(buffer[(x, y)].symbol());
            }
            out.push('\n');
        }
        out
    }

    #[test]
    fn shows_titles_status_and_tagged_lines() {
        let mut app = App::new();
        app.append(Some(LogTag::User), "You: open notepad");
        let text = screen(&mut app);
        assert!(text.contains("Agent Chain of Thought & Responses"));
        assert!(text.contains("Enter command"));
        assert!(text.contains("[USER] You: open notepad"));
        assert!(text.contains("Initializing MCP connection..."));
        assert!(text.contains("Send Command (Enter)"));
    }

    #[test]
    fn scrolling_stops_at_the_top_of_the_log() {
        let mut app = App::new();
        for i in 0..30 {
            app.append(None, format!("line {i}"));
        }
        screen(&mut app);
        for _ in 0..10 {
            app.handle_key(KeyEvent::new(KeyCode::PageUp, KeyModifiers::NONE));
        }
        // 20 rows minus input, status and borders leave 14 visible lines.
        assert_eq!(app.scroll_back(), 16);
        let text = screen(&mut app);
        assert!(text.contains("line 0"));
        assert!(text.contains("[scrolled]"));

        app.handle_key(KeyEvent::new(KeyCode::PageDown, KeyModifiers::NONE));
        app.handle_key(KeyEvent::new(KeyCode::PageDown, KeyModifiers::NONE));
        assert_eq!(app.scroll_back(), 0);
        assert!(screen(&mut app).contains("line 29"));
    }

    #[test]
    fn short_log_does_not_scroll() {
        let mut app = App::new();
        app.append(None, "only line");
        screen(&mut app);
        app.handle_key(KeyEvent::new(KeyCode::PageUp, KeyModifiers::NONE));
        assert_eq!(app.scroll_back(), 0);
    }

    #[test]
    fn wrapped_rows_rounds_up() {
        assert_eq!(wrapped_rows(&Line::raw(""), 10), 1);
        assert_eq!(wrapped_rows(&Line::raw("abcdefghijk"), 10), 2);
    }
}
