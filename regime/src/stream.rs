//! Bounded fragment channel between the engine and its caller.
//!
//! The engine pushes text fragments into a [`FragmentSink`]; the caller
//! drains the matching [`FragmentStream`]. Closing the sink marks
//! completion. Dropping the stream early cancels the producer: its next
//! `send` fails with [`StreamClosed`].

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::regime::RegimeError;

/// Item carried by the channel
pub type Fragment = Result<String, RegimeError>;

/// The receiving side went away
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Fragment stream closed by the receiver")]
pub struct StreamClosed;

/// Create a bounded fragment channel
pub fn channel(capacity: usize) -> (FragmentSink, FragmentStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        FragmentSink {
            tx,
            transcript: String::new(),
        },
        FragmentStream {
            inner: ReceiverStream::new(rx),
        },
    )
}

/// Producer side; keeps a transcript of everything it forwarded
pub struct FragmentSink {
    tx: mpsc::Sender<Fragment>,
    transcript: String,
}

impl FragmentSink {
    /// Forward one fragment, waiting while the channel is full
    pub async fn send(&mut self, text: impl Into<String>) -> Result<(), StreamClosed> {
        let text = text.into();
        self.transcript.push_str(&text);
        self.tx.send(Ok(text)).await.map_err(|_| StreamClosed)
    }

    /// Deliver a terminal error to the consumer
    pub async fn fail(&mut self, error: RegimeError) -> Result<(), StreamClosed> {
        self.tx.send(Err(error)).await.map_err(|_| StreamClosed)
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Take the transcript accumulated so far, leaving it empty
    pub fn take_transcript(&mut self) -> String {
        std::mem::take(&mut self.transcript)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the fragment channel
pub struct FragmentStream {
    inner: ReceiverStream<Fragment>,
}

impl FragmentStream {
    /// Drain the stream, concatenating fragments until completion or error
    pub async fn collect_text(mut self) -> Result<String, RegimeError> {
        use futures::StreamExt;

        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

impl Stream for FragmentStream {
    type Item = Fragment;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
