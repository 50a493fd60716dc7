//! Live sample feed for WebSocket viewers.

use myocapture::{BroadcastSink, SampleFrame};
use tokio::sync::broadcast;

/// Frames a slow viewer may fall behind before it starts skipping.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Fan-out of sample frames to every connected viewer.
///
/// Publishing never blocks: with no subscribers the frame is dropped, and a
/// lagging subscriber loses its oldest frames.
#[derive(Debug, Clone)]
pub struct LiveFeed {
    tx: broadcast::Sender<SampleFrame>,
}

impl LiveFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SampleFrame> {
        self.tx.subscribe()
    }

    pub fn viewers(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LiveFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

impl BroadcastSink for LiveFeed {
    fn publish(&self, frame: SampleFrame) {
        // Err only means nobody is watching
        let _ = self.tx.send(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(t: u64) -> SampleFrame {
        SampleFrame {
            timestamp: t,
            channels: vec![1, 2],
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let feed = LiveFeed::new(8);
        let mut a = feed.subscribe();
        let mut b = feed.subscribe();
        assert_eq!(feed.viewers(), 2);

        feed.publish(frame(1));
        assert_eq!(a.recv().await.unwrap().timestamp, 1);
        assert_eq!(b.recv().await.unwrap().timestamp, 1);
    }

    #[test]
    fn test_publish_without_viewers_is_fine() {
        let feed = LiveFeed::default();
        feed.publish(frame(1));
        assert_eq!(feed.viewers(), 0);
    }

    #[tokio::test]
    async fn test_lagging_viewer_skips() {
        let feed = LiveFeed::new(2);
        let mut rx = feed.subscribe();
        for t in 0..5 {
            feed.publish(frame(t));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(rx.recv().await.unwrap().timestamp, 3);
    }
}
