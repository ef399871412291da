//! Newline-delimited JSON framing.
//!
//! The monitor writes exactly one JSON value per line, so framing is a
//! buffered line read followed by an ordinary `serde_json` parse. Partial
//! reads are absorbed by the buffer; a value becomes available as soon as its
//! terminating newline arrives, without waiting for the peer to close.

use std::io::{self, BufRead, Read};

use serde_json::Value;
use thiserror::Error;

/// Upper bound on a single frame, newline included.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Failures raised while pulling a frame off the stream.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream reached end-of-file before a complete line arrived.
    #[error("stream closed before a complete frame arrived")]
    Closed,
    /// The line is not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    /// The line grew beyond the configured limit without a newline.
    #[error("frame exceeds the {limit} byte limit")]
    TooLarge {
        /// Limit that was exceeded.
        limit: usize,
    },
    /// The transport reported an error, including read timeouts.
    #[error("transport error: {0}")]
    Io(#[source] io::Error),
}

/// Yields one parsed JSON value per line of input.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    line: Vec<u8>,
    limit: usize,
}

impl<R: BufRead> FrameReader<R> {
    /// Wraps a buffered reader using [`MAX_FRAME_BYTES`] as the frame limit.
    pub const fn new(reader: R) -> Self {
        Self::with_limit(reader, MAX_FRAME_BYTES)
    }

    /// Wraps a buffered reader with a custom frame limit.
    pub const fn with_limit(reader: R, limit: usize) -> Self {
        Self {
            reader,
            line: Vec::new(),
            limit,
        }
    }

    /// Blocks until the next complete line is available and parses it.
    ///
    /// Blank lines are skipped. A trailing carriage return is tolerated.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Closed`] when the stream ends before a full
    /// line, [`FrameError::Malformed`] when the line is not JSON,
    /// [`FrameError::TooLarge`] when the line exceeds the limit, and
    /// [`FrameError::Io`] for transport failures.
    pub fn next_frame(&mut self) -> Result<Value, FrameError> {
        loop {
            self.fill_line()?;
            let text = self.line.trim_ascii();
            if text.is_empty() {
                continue;
            }
            return serde_json::from_slice(text).map_err(FrameError::Malformed);
        }
    }

    fn fill_line(&mut self) -> Result<(), FrameError> {
        self.line.clear();
        let budget = u64::try_from(self.limit).unwrap_or(u64::MAX).saturating_add(1);
        let read = (&mut self.reader)
            .take(budget)
            .read_until(b'\n', &mut self.line)
            .map_err(FrameError::Io)?;

        if self.line.len() > self.limit {
            return Err(FrameError::TooLarge { limit: self.limit });
        }
        if read == 0 || self.line.last() != Some(&b'\n') {
            return Err(FrameError::Closed);
        }
        Ok(())
    }

    /// Borrows the wrapped reader.
    pub const fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Mutably borrows the wrapped reader.
    ///
    /// Writing through the underlying stream does not disturb buffered input.
    pub const fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Unwraps the reader, discarding any partially read line.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: BufRead> Iterator for FrameReader<R> {
    type Item = Result<Value, FrameError>;

    /// Yields frames until the stream closes cleanly between lines.
    fn next(&mut self) -> Option<Self::Item> {
        match self.next_frame() {
            Err(FrameError::Closed) if self.line.is_empty() => None,
            other => Some(other),
        }
    }
}
