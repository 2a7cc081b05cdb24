//! Terminal display surface and line source.

use std::io::{self, Write};

use async_trait::async_trait;
use crossterm::queue;
use crossterm::style::{Color, Print, PrintStyledContent, Stylize};
use saga_chat::{DisplaySurface, InputSource, MessageStatus};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

/// Styled output on any writer; stdout in the binary.
pub struct TerminalDisplay<W: Write + Send> {
    out: W,
}

impl TerminalDisplay<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> TerminalDisplay<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn labelled(&mut self, label: &str, color: Color, text: &str) -> io::Result<()> {
        queue!(
            self.out,
            PrintStyledContent(format!("{label}: ").with(color).bold()),
            Print(text),
            Print("\n")
        )?;
        self.out.flush()
    }
}

fn status_color(status: MessageStatus) -> Color {
    match status {
        MessageStatus::Success => Color::Green,
        MessageStatus::Warning => Color::Yellow,
        MessageStatus::Error => Color::Red,
    }
}

impl<W: Write + Send> DisplaySurface for TerminalDisplay<W> {
    fn system(&mut self, text: &str) -> io::Result<()> {
        queue!(self.out, PrintStyledContent(text.cyan().bold()), Print("\n"))?;
        self.out.flush()
    }

    fn message(&mut self, role: &str, text: &str, status: MessageStatus) -> io::Result<()> {
        self.labelled(role, status_color(status), text)
    }

    fn service(&mut self, text: &str) -> io::Result<()> {
        queue!(self.out, PrintStyledContent(text.dark_grey()), Print("\n"))?;
        self.out.flush()
    }

    fn error(&mut self, text: &str) -> io::Result<()> {
        self.labelled("error", Color::Red, text)
    }

    fn stream_started(&mut self, title: &str) -> io::Result<()> {
        queue!(
            self.out,
            Print("\n"),
            PrintStyledContent(format!("{title}: ").magenta().bold())
        )?;
        self.out.flush()
    }

    fn stream_update(&mut self, _text: &str, fragment: &str) -> io::Result<()> {
        queue!(self.out, Print(fragment))?;
        self.out.flush()
    }

    fn stream_finished(&mut self, _text: &str) -> io::Result<()> {
        queue!(self.out, Print("\n\n"))?;
        self.out.flush()
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Lines from stdin, each preceded by a prompt.
pub struct StdinLines {
    lines: Lines<BufReader<Stdin>>,
    prompt: String,
}

impl StdinLines {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            prompt: prompt.into(),
        }
    }
}

#[async_trait]
impl InputSource for StdinLines {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut out = io::stdout();
        queue!(out, PrintStyledContent(self.prompt.as_str().bold()))?;
        out.flush()?;
        self.lines.next_line().await
    }
}
