//! Outbound Body Source

use bytes::Bytes;
use futures::stream::{self, Stream};
use std::sync::Arc;
use tracing::{debug, trace};

use super::channel::{RelayMessage, RelayReceiver};
use super::session::RelayStats;
use super::RelayError;

/// Pull-based body supplier for the outbound request.
///
/// The HTTP client polls it while writing the request body; each poll waits on
/// the relay channel for the next chunk. The body ends at `EndOfStream`. A
/// channel error is yielded as a body error so the outbound request is aborted
/// rather than completed with a truncated body.
#[derive(Debug)]
pub struct OutboundBodySource {
    receiver: RelayReceiver,
    stats: Arc<RelayStats>,
}

impl OutboundBodySource {
    pub fn new(receiver: RelayReceiver, stats: Arc<RelayStats>) -> Self {
        Self { receiver, stats }
    }

    /// Turn the source into a stream of body chunks
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, RelayError>> + Send + 'static {
        stream::unfold(Some(self), |state| async move {
            let mut source = match state {
                Some(source) => source,
                None => return None,
            };
            loop {
                match source.receiver.get().await {
                    Ok(RelayMessage::Data(chunk)) if chunk.is_empty() => continue,
                    Ok(RelayMessage::Data(chunk)) => {
                        source.stats.add_bytes_sent(chunk.len() as u64);
                        trace!(bytes = chunk.len(), "Writing chunk to upstream");
                        return Some((Ok(chunk), Some(source)));
                    }
                    Ok(RelayMessage::EndOfStream) => {
                        debug!(bytes_sent = source.stats.bytes_sent(), "Outbound body complete");
                        return None;
                    }
                    Err(e) => {
                        debug!(error = %e, "Outbound body interrupted");
                        return Some((Err(e), None));
                    }
                }
            }
        })
    }

    /// Wrap the source as the body of an outbound request
    pub fn into_body(self) -> reqwest::Body {
        reqwest::Body::wrap_stream(self.into_stream())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::channel::relay_channel;
    use futures::StreamExt;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_empty_chunks_skipped() {
        let stats = Arc::new(RelayStats::default());
        let (mut tx, rx) = relay_channel(CancellationToken::new());
        let body = OutboundBodySource::new(rx, stats.clone()).into_stream();

        tokio::spawn(async move {
            tx.put(RelayMessage::Data(Bytes::new())).await.unwrap();
            tx.put(RelayMessage::Data(Bytes::from("xy"))).await.unwrap();
            tx.finish().await.unwrap();
        });

        let chunks: Vec<Bytes> = body.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks, vec![Bytes::from("xy")]);
        assert_eq!(stats.bytes_sent(), 2);
    }

    #[tokio::test]
    async fn test_cancel_ends_body_with_error() {
        let cancel = CancellationToken::new();
        let (_tx, rx) = relay_channel(cancel.clone());
        let body = OutboundBodySource::new(rx, Arc::new(RelayStats::default())).into_stream();
        futures::pin_mut!(body);

        cancel.cancel();

        assert!(matches!(body.next().await, Some(Err(RelayError::Cancelled))));
        assert!(body.next().await.is_none());
    }
}
