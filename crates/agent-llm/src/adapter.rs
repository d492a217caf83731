//! Normalization of raw model streams.
//!
//! Whatever the source, a [`StreamAdapter`] yields deltas up to and including
//! exactly one [`StreamDelta::Finish`], then ends. A source that stops early
//! gets a synthetic `Finish(Stop)`; anything a source sends after its finish is
//! never polled. A source error is yielded once and ends the stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::provider::{LLMStream, Result};
use crate::types::{FinishReason, StreamDelta};

/// Buffer between a blocking producer thread and the async consumer.
const BLOCKING_BUFFER: usize = 64;

pub struct StreamAdapter {
    inner: LLMStream,
}

impl StreamAdapter {
    /// Wrap an asynchronous delta stream.
    pub fn new(source: LLMStream) -> Self {
        Self {
            inner: normalize(source),
        }
    }

    /// Wrap a synchronous, possibly blocking, iterator of deltas.
    ///
    /// The iterator is driven on tokio's blocking pool, so a slow `next()` never
    /// stalls the runtime. Must be called from within a tokio runtime.
    pub fn from_blocking_iter<I>(source: I) -> Self
    where
        I: IntoIterator<Item = Result<StreamDelta>> + Send + 'static,
        I::IntoIter: Send,
    {
        let (tx, rx) = mpsc::channel(BLOCKING_BUFFER);

        tokio::task::spawn_blocking(move || {
            for item in source {
                let is_last = matches!(item, Ok(StreamDelta::Finish(_)) | Err(_));
                if tx.blocking_send(item).is_err() {
                    log::debug!("Stream consumer dropped; stopping blocking producer");
                    return;
                }
                if is_last {
                    return;
                }
            }
        });

        Self::new(Box::pin(ReceiverStream::new(rx)))
    }
}

impl Stream for StreamAdapter {
    type Item = Result<StreamDelta>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

fn normalize(mut source: LLMStream) -> LLMStream {
    Box::pin(async_stream::stream! {
        log::trace!("Model stream started");
        loop {
            match source.next().await {
                Some(Ok(StreamDelta::Text(text))) if text.is_empty() => continue,
                Some(Ok(StreamDelta::Finish(reason))) => {
                    log::trace!("Model stream finished: {reason}");
                    yield Ok(StreamDelta::Finish(reason));
                    break;
                }
                Some(Ok(delta)) => yield Ok(delta),
                Some(Err(error)) => {
                    log::error!("Model stream failed: {error}");
                    yield Err(error);
                    break;
                }
                None => {
                    log::warn!("Model stream ended without a finish reason; assuming stop");
                    yield Ok(StreamDelta::Finish(FinishReason::Stop));
                    break;
                }
            }
        }
    })
}
