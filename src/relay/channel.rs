//! Bounded Relay Channel
//!
//! Single-slot hand-off between the inbound receiver and the outbound body
//! source. A full slot suspends the producer, which is what throttles the
//! client when the upstream is slower than the upload.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::RelayError;

/// Number of messages that may sit between producer and consumer
pub const RELAY_CHANNEL_CAPACITY: usize = 1;

/// A unit of work passed through the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Data(Bytes),
    EndOfStream,
}

impl RelayMessage {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, RelayMessage::EndOfStream)
    }
}

/// Create a connected producer/consumer pair bound to `cancel`.
///
/// Cancelling the token releases whichever side is currently suspended.
pub fn relay_channel(cancel: CancellationToken) -> (RelaySender, RelayReceiver) {
    let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);

    let sender = RelaySender {
        tx,
        cancel: cancel.clone(),
        end_signaled: false,
    };
    let receiver = RelayReceiver {
        rx,
        cancel,
        finished: false,
    };

    (sender, receiver)
}

/// Producer half of the relay channel
#[derive(Debug)]
pub struct RelaySender {
    tx: mpsc::Sender<RelayMessage>,
    cancel: CancellationToken,
    end_signaled: bool,
}

impl RelaySender {
    /// Wait for the free slot and store `message` in it
    pub async fn put(&mut self, message: RelayMessage) -> Result<(), RelayError> {
        if self.end_signaled {
            return Err(RelayError::StreamClosed);
        }

        let is_end = message.is_end_of_stream();

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RelayError::Cancelled),
            sent = self.tx.send(message) => {
                sent.map_err(|_| RelayError::ConsumerGone)?;
                if is_end {
                    self.end_signaled = true;
                    trace!("End of stream handed off");
                }
                Ok(())
            }
        }
    }

    /// Signal end of stream. Only the first call sends anything.
    pub async fn finish(&mut self) -> Result<(), RelayError> {
        if self.end_signaled {
            return Ok(());
        }
        self.put(RelayMessage::EndOfStream).await
    }

    /// Whether `EndOfStream` has already been handed off
    pub fn end_signaled(&self) -> bool {
        self.end_signaled
    }
}

/// Consumer half of the relay channel
#[derive(Debug)]
pub struct RelayReceiver {
    rx: mpsc::Receiver<RelayMessage>,
    cancel: CancellationToken,
    finished: bool,
}

impl RelayReceiver {
    /// Wait for the next message and take it out of the slot
    pub async fn get(&mut self) -> Result<RelayMessage, RelayError> {
        if self.finished {
            return Err(RelayError::StreamClosed);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RelayError::Cancelled),
            message = self.rx.recv() => match message {
                Some(message) => {
                    if message.is_end_of_stream() {
                        self.finished = true;
                    }
                    Ok(message)
                }
                // producer dropped without signaling end of stream
                None => Err(RelayError::InboundAborted(
                    "relay producer closed without end of stream".to_string(),
                )),
            },
        }
    }

    /// Whether `EndOfStream` has been observed
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let (mut tx, mut rx) = relay_channel(CancellationToken::new());

        let producer = tokio::spawn(async move {
            for part in ["a", "b", "c"] {
                tx.put(RelayMessage::Data(Bytes::from(part))).await.unwrap();
            }
            tx.finish().await.unwrap();
        });

        let mut seen = Vec::new();
        loop {
            match rx.get().await.unwrap() {
                RelayMessage::Data(chunk) => seen.push(chunk),
                RelayMessage::EndOfStream => break,
            }
        }
        producer.await.unwrap();

        assert_eq!(seen, vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]);
        assert!(rx.is_finished());
    }

    #[tokio::test]
    async fn test_put_after_end_of_stream_rejected() {
        let (mut tx, _rx) = relay_channel(CancellationToken::new());

        tx.finish().await.unwrap();
        assert!(tx.end_signaled());

        let result = tx.put(RelayMessage::Data(Bytes::from("late"))).await;
        assert!(matches!(result, Err(RelayError::StreamClosed)));
    }

    #[tokio::test]
    async fn test_put_without_consumer() {
        let (mut tx, rx) = relay_channel(CancellationToken::new());
        drop(rx);

        let result = tx.put(RelayMessage::Data(Bytes::from("x"))).await;
        assert!(matches!(result, Err(RelayError::ConsumerGone)));
    }

    #[tokio::test]
    async fn test_producer_dropped_without_end() {
        let (tx, mut rx) = relay_channel(CancellationToken::new());
        drop(tx);

        let result = rx.get().await;
        assert!(matches!(result, Err(RelayError::InboundAborted(_))));
    }

    #[tokio::test]
    async fn test_get_after_end_of_stream() {
        let (mut tx, mut rx) = relay_channel(CancellationToken::new());
        tx.finish().await.unwrap();

        assert_eq!(rx.get().await.unwrap(), RelayMessage::EndOfStream);
        assert!(matches!(rx.get().await, Err(RelayError::StreamClosed)));
    }
}
