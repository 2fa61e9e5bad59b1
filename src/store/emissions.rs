//! Ordered result streams returned by [`Store`](super::Store) operations.
//!
//! An [`Emissions`] is a lazily polled stream of `Result<T>`. Nothing runs
//! until the stream is polled, and the first `Err` ends it. Streams compose
//! by [`Emissions::concat`], which drains the first segment completely before
//! the second segment is polled for the first time.

use crate::{Error, Result};
use futures_util::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Lazily evaluated, ordered sequence of operation results.
#[must_use = "emissions do nothing unless polled"]
pub struct Emissions<T> {
    inner: BoxStream<'static, Result<T>>,
    label: &'static str,
}

impl<T> fmt::Debug for Emissions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emissions")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

enum Concat<T> {
    First(Emissions<T>, Emissions<T>),
    Second(Emissions<T>),
    Done,
}

impl<T: Send + 'static> Emissions<T> {
    /// Wraps an arbitrary stream.
    pub fn from_stream(stream: impl Stream<Item = Result<T>> + Send + 'static) -> Self {
        Self {
            inner: stream.boxed(),
            label: "emissions",
        }
    }

    /// A stream with exactly one value.
    pub fn value(value: T) -> Self {
        Self::from_stream(stream::iter([Ok(value)]))
    }

    /// A stream that fails immediately.
    pub fn error(error: Error) -> Self {
        Self::from_stream(stream::iter([Err(error)]))
    }

    /// A stream that completes without emitting.
    pub fn empty() -> Self {
        Self::from_stream(stream::empty())
    }

    /// A single emission produced by `future` when first polled.
    pub fn from_future(future: impl Future<Output = Result<T>> + Send + 'static) -> Self {
        Self::from_stream(stream::once(future))
    }

    /// Runs `future` when first polled, then continues with the stream it returns.
    pub fn deferred(future: impl Future<Output = Result<Self>> + Send + 'static) -> Self {
        Self::from_stream(stream::once(future).try_flatten())
    }

    /// Sequential concatenation.
    ///
    /// Every emission of `first` is delivered before `second` is polled. If
    /// `first` fails, `second` is dropped without ever being polled.
    pub fn concat(first: Self, second: Self) -> Self {
        let label = second.label;
        let stream = stream::unfold(Concat::First(first, second), |mut state| async move {
            loop {
                match state {
                    Concat::First(mut first, second) => match first.next().await {
                        Some(Ok(value)) => return Some((Ok(value), Concat::First(first, second))),
                        Some(Err(e)) => return Some((Err(e), Concat::Done)),
                        None => state = Concat::Second(second),
                    },
                    Concat::Second(mut second) => {
                        return match second.next().await {
                            Some(Ok(value)) => Some((Ok(value), Concat::Second(second))),
                            Some(Err(e)) => Some((Err(e), Concat::Done)),
                            None => None,
                        };
                    },
                    Concat::Done => return None,
                }
            }
        });
        Self::from_stream(stream).labelled(label)
    }

    /// Names the operation reported by [`Error::EmptyResult`].
    pub fn labelled(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    /// Returns the operation label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.label
    }

    /// Calls `hook` once when the stream ends, with the error if it failed.
    ///
    /// Not called if the stream is dropped before it ends.
    pub fn on_complete<F>(self, hook: F) -> Self
    where
        F: FnOnce(Option<&Error>) + Send + 'static,
    {
        let label = self.label;
        let stream = stream::unfold(Some((self, hook)), |state| async move {
            let (mut inner, hook) = state?;
            match inner.next().await {
                Some(Ok(value)) => Some((Ok(value), Some((inner, hook)))),
                Some(Err(e)) => {
                    hook(Some(&e));
                    Some((Err(e), None))
                },
                None => {
                    hook(None);
                    None
                },
            }
        });
        Self::from_stream(stream).labelled(label)
    }

    /// Drains the stream and returns its last emission.
    ///
    /// The last emission is the one produced by the level the call was made
    /// on, after every next-level step has run.
    ///
    /// # Errors
    ///
    /// Returns the first error emitted, or [`Error::EmptyResult`] if the
    /// stream ended without a value.
    pub async fn settle(mut self) -> Result<T> {
        let mut last = None;
        while let Some(item) = self.inner.next().await {
            last = Some(item?);
        }
        last.ok_or_else(|| Error::EmptyResult {
            operation: self.label.to_string(),
        })
    }

    /// Drains the stream and returns every emission in order.
    ///
    /// # Errors
    ///
    /// Returns the first error emitted; earlier values are discarded.
    pub async fn collect_all(self) -> Result<Vec<T>> {
        self.inner.try_collect().await
    }
}

impl<T> Stream for Emissions<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
