use std::io::{self, Write};

use anyhow::Result;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers},
    terminal::{Clear, ClearType},
};
use readmark_core::calculator;

mod coalesce;

pub use coalesce::ScrollCoalescer;

pub struct TextRenderer<W: Write> {
    writer: W,
}

/// Visible window onto a chapter's lines.
pub struct DrawParams {
    pub columns: u16,
    pub rows: u16,
    pub first_line: usize,
}

impl<W: Write> TextRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Draws `rows` lines starting at `first_line`, truncated to `columns` characters.
    pub fn draw(&mut self, lines: &[String], params: DrawParams) -> Result<()> {
        let width = usize::from(params.columns.max(1));
        for row in 0..params.rows {
            crossterm::queue!(
                &mut self.writer,
                cursor::MoveTo(0, row),
                Clear(ClearType::CurrentLine)
            )?;
            if let Some(line) = lines.get(params.first_line + usize::from(row)) {
                let visible: String = line.chars().take(width).collect();
                self.writer.write_all(visible.as_bytes())?;
            }
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Disables synchronized updates.
    /// The terminal will render all buffered changes at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

/// Reading position as shown in the status line, e.g. `42% • Ch 4/10`.
pub fn format_progress(
    position_fraction: f64,
    chapter_index: usize,
    total_chapters: usize,
) -> String {
    format!(
        "{}% • Ch {}/{}",
        calculator::percent(position_fraction),
        chapter_index + 1,
        total_chapters.max(1)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewCommand {
    ScrollLines { delta: isize },
    ScrollPages { delta: isize },
    NextChapter { count: usize },
    PrevChapter { count: usize },
    Top,
    Bottom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Command(ViewCommand),
    Resize,
    Quit,
    None,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Resize(..) => UiEvent::Resize,
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                    if let Some(digit) = c.to_digit(10) {
                        self.push_digit(digit as usize);
                    }
                    UiEvent::None
                }
                (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, KeyModifiers::NONE) => {
                    let count = self.take_count();
                    UiEvent::Command(ViewCommand::ScrollLines {
                        delta: count as isize,
                    })
                }
                (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                    let count = self.take_count();
                    UiEvent::Command(ViewCommand::ScrollLines {
                        delta: -(count as isize),
                    })
                }
                (KeyCode::Char(' '), _) | (KeyCode::PageDown, _) => {
                    let count = self.take_count();
                    UiEvent::Command(ViewCommand::ScrollPages {
                        delta: count as isize,
                    })
                }
                (KeyCode::Char('b'), KeyModifiers::NONE) | (KeyCode::PageUp, _) => {
                    let count = self.take_count();
                    UiEvent::Command(ViewCommand::ScrollPages {
                        delta: -(count as isize),
                    })
                }
                (KeyCode::Char('l'), KeyModifiers::NONE)
                | (KeyCode::Char('n'), KeyModifiers::NONE)
                | (KeyCode::Right, KeyModifiers::NONE) => {
                    let count = self.take_count();
                    UiEvent::Command(ViewCommand::NextChapter { count })
                }
                (KeyCode::Char('h'), KeyModifiers::NONE)
                | (KeyCode::Char('p'), KeyModifiers::NONE)
                | (KeyCode::Left, KeyModifiers::NONE) => {
                    let count = self.take_count();
                    UiEvent::Command(ViewCommand::PrevChapter { count })
                }
                (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                    self.reset_count();
                    UiEvent::Command(ViewCommand::Top)
                }
                (KeyCode::Char('G'), KeyModifiers::SHIFT) | (KeyCode::End, _) => {
                    self.reset_count();
                    UiEvent::Command(ViewCommand::Bottom)
                }
                (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                    self.reset_count();
                    UiEvent::Quit
                }
                (KeyCode::Char('q'), _) => {
                    self.reset_count();
                    UiEvent::Quit
                }
                _ => {
                    self.reset_count();
                    UiEvent::None
                }
            },
            _ => UiEvent::None,
        }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    pub fn pending_input(&self) -> Option<String> {
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEventKind, KeyEventState};

    fn key_event(code: KeyCode) -> Event {
        key_event_with_modifiers(code, KeyModifiers::NONE)
    }

    fn key_event_with_modifiers(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    #[test]
    fn draw_writes_visible_window_only() {
        let mut renderer = TextRenderer::new(Vec::new());
        let lines: Vec<String> = ["first", "second", "third line is long"]
            .iter()
            .map(|line| line.to_string())
            .collect();

        renderer
            .draw(
                &lines,
                DrawParams {
                    columns: 5,
                    rows: 2,
                    first_line: 1,
                },
            )
            .unwrap();
        let output = String::from_utf8(renderer.writer.clone()).unwrap();
        assert!(output.contains("secon"));
        assert!(output.contains("third"));
        assert!(!output.contains("first"));
        assert!(!output.contains("second"));
    }

    #[test]
    fn progress_label_is_one_based() {
        assert_eq!(format_progress(0.42, 3, 10), "42% • Ch 4/10");
        assert_eq!(format_progress(0.0, 0, 0), "0% • Ch 1/1");
    }

    #[test]
    fn numeric_prefix_multiplies_line_scroll() {
        let mut mapper = EventMapper::new();
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('1'))), UiEvent::None);
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('2'))), UiEvent::None);
        assert_eq!(mapper.pending_input().as_deref(), Some("12"));

        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('j'))),
            UiEvent::Command(ViewCommand::ScrollLines { delta: 12 })
        );
        assert!(mapper.pending_input().is_none());
    }

    #[test]
    fn prefix_resets_after_use() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('3')));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('k'))),
            UiEvent::Command(ViewCommand::ScrollLines { delta: -3 })
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Up)),
            UiEvent::Command(ViewCommand::ScrollLines { delta: -1 })
        );
    }

    #[test]
    fn prefix_dropped_on_quit() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('4')));
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('q'))), UiEvent::Quit);
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('l'))),
            UiEvent::Command(ViewCommand::NextChapter { count: 1 })
        );
    }

    #[test]
    fn chapter_and_page_keys() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('2')));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('p'))),
            UiEvent::Command(ViewCommand::PrevChapter { count: 2 })
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::PageDown)),
            UiEvent::Command(ViewCommand::ScrollPages { delta: 1 })
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('b'))),
            UiEvent::Command(ViewCommand::ScrollPages { delta: -1 })
        );
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(
                KeyCode::Char('G'),
                KeyModifiers::SHIFT
            )),
            UiEvent::Command(ViewCommand::Bottom)
        );
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(
                KeyCode::Char('c'),
                KeyModifiers::CONTROL
            )),
            UiEvent::Quit
        );
    }
}
