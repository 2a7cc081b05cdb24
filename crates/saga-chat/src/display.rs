//! Display surface and input source abstractions.
//!
//! The pipeline never writes to a terminal directly; the binary supplies a
//! [`DisplaySurface`] and an [`InputSource`].

use std::io;

use async_trait::async_trait;

use crate::hooks::MessageStatus;

/// Where the pipeline renders output.
pub trait DisplaySurface: Send {
    /// Session-level notices (welcome, goodbye).
    fn system(&mut self, text: &str) -> io::Result<()>;

    /// A message produced by an input-processing step.
    fn message(&mut self, role: &str, text: &str, status: MessageStatus) -> io::Result<()>;

    /// Output of a service command.
    fn service(&mut self, text: &str) -> io::Result<()>;

    /// An inline error. Never ends the session.
    fn error(&mut self, text: &str) -> io::Result<()>;

    /// A streamed response is about to start.
    fn stream_started(&mut self, title: &str) -> io::Result<()>;

    /// A fragment arrived; `text` is everything received so far.
    fn stream_update(&mut self, text: &str, fragment: &str) -> io::Result<()>;

    /// The stream ended (completed or failed) with `text` received.
    fn stream_finished(&mut self, text: &str) -> io::Result<()>;
}

/// Line-oriented player input.
#[async_trait]
pub trait InputSource: Send {
    /// Next submitted line, or `None` once input is closed.
    async fn next_line(&mut self) -> io::Result<Option<String>>;
}
