//! Inbound Chunk Receiver

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use super::channel::{RelayMessage, RelaySender};
use super::session::RelayStats;
use super::RelayError;

/// Hands every chunk of the client's request body to the relay channel.
///
/// Nothing is buffered here: each call either completes the hand-off or stays
/// suspended until the outbound side has taken the previous chunk.
#[derive(Debug)]
pub struct InboundChunkReceiver {
    sender: RelaySender,
    stats: Arc<RelayStats>,
}

impl InboundChunkReceiver {
    pub fn new(sender: RelaySender, stats: Arc<RelayStats>) -> Self {
        Self { sender, stats }
    }

    /// Relay a single received chunk
    pub async fn data_received(&mut self, chunk: Bytes) -> Result<(), RelayError> {
        let len = chunk.len() as u64;
        self.sender.put(RelayMessage::Data(chunk)).await?;
        self.stats.add_bytes_received(len);
        trace!(bytes = len, "Chunk handed to outbound body");
        Ok(())
    }

    /// Signal that the inbound body is complete
    pub async fn finish(&mut self) -> Result<(), RelayError> {
        self.sender.finish().await
    }

    /// Whether end of stream has been signaled for this session
    pub fn end_signaled(&self) -> bool {
        self.sender.end_signaled()
    }

    /// Drain `inbound` into the channel and signal end of stream.
    ///
    /// Returns the number of bytes received.
    pub async fn receive_all<S, E>(&mut self, inbound: S) -> Result<u64, RelayError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        futures::pin_mut!(inbound);

        while let Some(chunk) = inbound.next().await {
            let chunk = chunk.map_err(|e| RelayError::InboundAborted(e.to_string()))?;
            self.data_received(chunk).await?;
        }

        self.finish().await?;
        Ok(self.stats.bytes_received())
    }
}
