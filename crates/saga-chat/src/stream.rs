//! Background streaming of a response to the display.
//!
//! A worker task drives the [`FragmentStream`] into a bounded channel; the
//! foreground polls the channel with a short timeout, accumulates the text
//! and refreshes the display. The worker is always joined before returning.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::display::DisplaySurface;
use crate::error::Result;
use crate::hooks::FragmentStream;

/// Message sent from the streaming worker to the foreground.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Fragment(String),
    Done,
    Error(String),
}

/// What the foreground observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Concatenation of every fragment received, in order.
    pub text: String,
    /// Set when the stream ended with an error instead of completing.
    pub error: Option<String>,
}

impl StreamOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Channel and polling parameters for [`display_streaming_response`].
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub poll_interval: Duration,
    pub capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            capacity: 64,
        }
    }
}

/// Stream `fragments` to `display` under `title`.
///
/// Errors produced by the stream are shown inline and reported in the
/// outcome; only display failures are returned as `Err`.
pub async fn display_streaming_response<D>(
    display: &mut D,
    fragments: FragmentStream,
    title: &str,
    settings: StreamSettings,
) -> Result<StreamOutcome>
where
    D: DisplaySurface + ?Sized,
{
    let (tx, mut rx) = mpsc::channel::<StreamItem>(settings.capacity.max(1));
    let worker = tokio::spawn(produce(fragments, tx));

    display.stream_started(title)?;
    let consumed = consume(display, &mut rx, settings.poll_interval).await;

    // Unblocks a worker still waiting on a full channel.
    drop(rx);
    let joined = worker.await;
    debug!("stream worker joined");

    let outcome = consumed?;
    joined?;
    display.stream_finished(&outcome.text)?;
    Ok(outcome)
}

/// Worker side: forward every fragment, then a terminal item.
async fn produce(mut fragments: FragmentStream, tx: mpsc::Sender<StreamItem>) {
    while let Some(item) = fragments.next().await {
        let message = match item {
            Ok(fragment) => StreamItem::Fragment(fragment),
            Err(e) => {
                let _ = tx.send(StreamItem::Error(e.to_string())).await;
                return;
            }
        };
        if tx.send(message).await.is_err() {
            debug!("stream receiver closed, stopping worker");
            return;
        }
    }
    let _ = tx.send(StreamItem::Done).await;
}

/// Foreground side: poll until `Done`, `Error` or a closed channel.
async fn consume<D>(
    display: &mut D,
    rx: &mut mpsc::Receiver<StreamItem>,
    poll_interval: Duration,
) -> Result<StreamOutcome>
where
    D: DisplaySurface + ?Sized,
{
    let mut outcome = StreamOutcome::default();
    loop {
        let item = match tokio::time::timeout(poll_interval, rx.recv()).await {
            Ok(item) => item,
            Err(_) => {
                trace!("no fragment yet");
                continue;
            }
        };

        match item {
            Some(StreamItem::Fragment(fragment)) => {
                outcome.text.push_str(&fragment);
                display.stream_update(&outcome.text, &fragment)?;
            }
            Some(StreamItem::Done) => return Ok(outcome),
            Some(StreamItem::Error(e)) => {
                warn!(error = %e, "stream failed");
                display.error(&format!("Error: {e}"))?;
                outcome.error = Some(e);
                return Ok(outcome);
            }
            None => {
                let e = "stream worker stopped before completing".to_string();
                warn!("{e}");
                display.error(&format!("Error: {e}"))?;
                outcome.error = Some(e);
                return Ok(outcome);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures::stream;

    use super::*;
    use crate::error::ChatError;
    use crate::testing::{DisplayEvent, RecordingDisplay};

    fn settings() -> StreamSettings {
        StreamSettings {
            poll_interval: Duration::from_millis(5),
            capacity: 2,
        }
    }

    #[tokio::test]
    async fn text_is_the_concatenation_of_fragments() {
        let fragments: Vec<String> = (0..50).map(|i| format!("f{i} ")).collect();
        let expected = fragments.concat();
        let stream = stream::iter(fragments.into_iter().map(Ok)).boxed();

        let mut display = RecordingDisplay::default();
        let outcome = display_streaming_response(&mut display, stream, "GAME", settings())
            .await
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.text, expected);
        assert_eq!(
            display.events.last(),
            Some(&DisplayEvent::StreamFinished(expected))
        );
        assert_eq!(display.events.first(), Some(&DisplayEvent::StreamStarted("GAME".into())));
    }

    #[tokio::test]
    async fn worker_is_joined_before_returning() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let stream = async_fragments(flag).boxed();

        let mut display = RecordingDisplay::default();
        let outcome = display_streaming_response(&mut display, stream, "GAME", settings())
            .await
            .unwrap();

        assert_eq!(outcome.text, "slow fragments");
        assert!(finished.load(Ordering::SeqCst));
    }

    fn async_fragments(
        finished: Arc<AtomicBool>,
    ) -> impl futures::Stream<Item = Result<String>> + Send + 'static {
        stream::unfold(0, move |step| {
            let finished = Arc::clone(&finished);
            async move {
                tokio::time::sleep(Duration::from_millis(15)).await;
                match step {
                    0 => Some((Ok("slow ".to_string()), 1)),
                    1 => Some((Ok("fragments".to_string()), 2)),
                    _ => {
                        finished.store(true, Ordering::SeqCst);
                        None
                    }
                }
            }
        })
    }

    #[tokio::test]
    async fn errors_are_shown_inline_and_halt_the_stream() {
        let stream = stream::iter(vec![
            Ok("partial".to_string()),
            Err(ChatError::Streaming("model went away".into())),
            Ok("never shown".to_string()),
        ])
        .boxed();

        let mut display = RecordingDisplay::default();
        let outcome = display_streaming_response(&mut display, stream, "GAME", settings())
            .await
            .unwrap();

        assert_eq!(outcome.text, "partial");
        assert!(!outcome.is_complete());
        assert!(display.errors().iter().any(|e| e.contains("model went away")));
    }

    #[tokio::test]
    async fn empty_stream_completes() {
        let stream = stream::iter(Vec::<Result<String>>::new()).boxed();
        let mut display = RecordingDisplay::default();
        let outcome = display_streaming_response(&mut display, stream, "GAME", settings())
            .await
            .unwrap();
        assert_eq!(outcome, StreamOutcome::default());
    }
}
