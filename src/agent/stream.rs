//! Folding a streamed agent reply into text.

use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::errors::RemoteError;

/// Reserved reply meaning the agent needs the user to authorize a tool.
pub const AUTH_REQUIRED: &str = "AUTH_REQUIRED";

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, RemoteError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed(String),
    /// The accumulated reply was exactly the sentinel.
    AuthRequired,
    /// Aborted by a newer request; carries what had arrived.
    Cancelled(String),
}

/// Incremental UTF-8 decoding that tolerates code points split across
/// chunk boundaries.
#[derive(Debug, Default)]
pub struct Utf8Accumulator {
    pending: Vec<u8>,
    text: String,
}

impl Utf8Accumulator {
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    self.pending.clear();
                    return;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    self.text
                        .push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match err.error_len() {
                        Some(bad) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + bad);
                        }
                        None => {
                            self.pending.drain(..valid_up_to);
                            return;
                        }
                    }
                }
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Flushes an incomplete trailing sequence as a replacement character.
    pub fn finish(mut self) -> String {
        if !self.pending.is_empty() {
            self.text.push(char::REPLACEMENT_CHARACTER);
        }
        self.text
    }
}

/// Reads `stream` to the end, calling `on_update` with the accumulated text
/// after every chunk. Stops early when the text is the `AUTH_REQUIRED`
/// sentinel or when `cancel` fires.
pub async fn fold_stream<F>(
    mut stream: ChunkStream,
    cancel: &CancellationToken,
    mut on_update: F,
) -> Result<StreamOutcome, RemoteError>
where
    F: FnMut(&str) + Send,
{
    let mut acc = Utf8Accumulator::default();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(StreamOutcome::Cancelled(acc.finish()));
            }
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        acc.push(&chunk?);
        if acc.text().trim() == AUTH_REQUIRED {
            return Ok(StreamOutcome::AuthRequired);
        }
        on_update(acc.text());
    }
    Ok(StreamOutcome::Completed(acc.finish()))
}
