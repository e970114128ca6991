use std::io::{self, IsTerminal, Write};

use crossterm::queue;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

/// Who a notice is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeSource {
    Server,
    Peer(String),
}

/// Sink for human-readable notices and chat lines. Output only; the engine
/// never reads anything back.
pub trait Presenter: Send + Sync {
    fn notify(&self, message: &str, source: &NoticeSource);
}

/// Writes notices to stdout, server notices in purple when stdout is a tty.
#[derive(Debug, Clone)]
pub struct ConsolePresenter {
    color: bool,
}

impl ConsolePresenter {
    pub fn new() -> Self {
        Self {
            color: io::stdout().is_terminal(),
        }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    fn write_notice(&self, message: &str, source: &NoticeSource) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        match source {
            NoticeSource::Server if self.color => {
                queue!(
                    stdout,
                    SetForegroundColor(Color::Magenta),
                    Print(message),
                    ResetColor,
                    Print("\n")
                )?;
            }
            _ => writeln!(stdout, "{}", render_line(message, source))?,
        }
        stdout.flush()
    }
}

impl Default for ConsolePresenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Presenter for ConsolePresenter {
    fn notify(&self, message: &str, source: &NoticeSource) {
        if let Err(err) = self.write_notice(message, source) {
            tracing::debug!(target: "pier::presenter", error = %err, "failed to write notice");
        }
    }
}

pub fn render_line(message: &str, source: &NoticeSource) -> String {
    match source {
        NoticeSource::Server => message.to_string(),
        NoticeSource::Peer(name) => format!("{}: {message}", capitalize(name)),
    }
}

/// Upper-cases the first character of a display name.
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
