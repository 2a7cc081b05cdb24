//! In-memory display and scripted input used by the unit tests.

use std::collections::VecDeque;
use std::io;

use async_trait::async_trait;

use crate::display::{DisplaySurface, InputSource};
use crate::hooks::MessageStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    System(String),
    Message {
        role: String,
        text: String,
        status: MessageStatus,
    },
    Service(String),
    Error(String),
    StreamStarted(String),
    StreamUpdate(String),
    StreamFinished(String),
}

#[derive(Debug, Default)]
pub struct RecordingDisplay {
    pub events: Vec<DisplayEvent>,
}

impl RecordingDisplay {
    pub fn errors(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                DisplayEvent::Error(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn services(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                DisplayEvent::Service(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn finished_streams(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                DisplayEvent::StreamFinished(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

impl DisplaySurface for RecordingDisplay {
    fn system(&mut self, text: &str) -> io::Result<()> {
        self.events.push(DisplayEvent::System(text.into()));
        Ok(())
    }

    fn message(&mut self, role: &str, text: &str, status: MessageStatus) -> io::Result<()> {
        self.events.push(DisplayEvent::Message {
            role: role.into(),
            text: text.into(),
            status,
        });
        Ok(())
    }

    fn service(&mut self, text: &str) -> io::Result<()> {
        self.events.push(DisplayEvent::Service(text.into()));
        Ok(())
    }

    fn error(&mut self, text: &str) -> io::Result<()> {
        self.events.push(DisplayEvent::Error(text.into()));
        Ok(())
    }

    fn stream_started(&mut self, title: &str) -> io::Result<()> {
        self.events.push(DisplayEvent::StreamStarted(title.into()));
        Ok(())
    }

    fn stream_update(&mut self, text: &str, _fragment: &str) -> io::Result<()> {
        self.events.push(DisplayEvent::StreamUpdate(text.into()));
        Ok(())
    }

    fn stream_finished(&mut self, text: &str) -> io::Result<()> {
        self.events.push(DisplayEvent::StreamFinished(text.into()));
        Ok(())
    }
}

/// Yields the given lines, then reports closed input.
#[derive(Debug, Default)]
pub struct ScriptedInput(pub VecDeque<String>);

impl ScriptedInput {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(lines.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl InputSource for ScriptedInput {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        Ok(self.0.pop_front())
    }
}
