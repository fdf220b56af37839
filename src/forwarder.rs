//! Bounded hand-off between concurrent hub callbacks and the single dispatcher.
//!
//! `send` waits for a free slot, so a stalled consumer stalls the callbacks
//! feeding it. Dropping the receiver is the shutdown signal: pending and
//! future sends fail with [`ForwardError::Closed`].

use crate::feed::Entry;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForwardError {
    #[error("entry consumer has shut down")]
    Closed,
}

/// Producer half. Cheap to clone; one clone per concurrent callback is fine.
#[derive(Debug, Clone)]
pub struct Forwarder {
    tx: mpsc::Sender<Entry>,
}

/// Consumer half, owned by exactly one task.
#[derive(Debug)]
pub struct EntryReceiver {
    rx: mpsc::Receiver<Entry>,
}

/// Create a hand-off with room for `capacity` entries (at least one).
pub fn channel(capacity: usize) -> (Forwarder, EntryReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Forwarder { tx }, EntryReceiver { rx })
}

impl Forwarder {
    pub async fn send(&self, entry: Entry) -> Result<(), ForwardError> {
        self.tx.send(entry).await.map_err(|_| ForwardError::Closed)
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

impl EntryReceiver {
    /// Next entry, or `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<Entry> {
        self.rx.recv().await
    }

    /// Stop accepting entries; blocked senders are released with an error.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn entry(id: &str) -> Entry {
        Entry {
            video_id: id.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn capacity_is_at_least_one() {
        let (tx, _rx) = channel(0);
        assert_eq!(tx.capacity(), 1);
        let (tx, _rx) = channel(4);
        assert_eq!(tx.capacity(), 4);
    }

    #[tokio::test]
    async fn delivers_in_send_order() {
        let (tx, mut rx) = channel(3);
        for id in ["a", "b", "c"] {
            tx.send(entry(id)).await.unwrap();
        }
        for id in ["a", "b", "c"] {
            assert_eq!(rx.recv().await.unwrap().video_id, id);
        }
    }

    #[tokio::test]
    async fn send_blocks_until_consumer_takes_item() {
        let (tx, mut rx) = channel(1);
        tx.send(entry("first")).await.unwrap();

        let blocked = timeout(Duration::from_millis(50), tx.send(entry("second"))).await;
        assert!(blocked.is_err(), "second send should wait for a free slot");

        let pending = {
            let tx = tx.clone();
            tokio::spawn(async move { tx.send(entry("third")).await })
        };
        assert_eq!(rx.recv().await.unwrap().video_id, "first");
        assert_eq!(rx.recv().await.unwrap().video_id, "third");
        pending.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn closed_receiver_releases_senders() {
        let (tx, mut rx) = channel(1);
        tx.send(entry("fill")).await.unwrap();

        let waiting = {
            let tx = tx.clone();
            tokio::spawn(async move { tx.send(entry("late")).await })
        };
        tokio::task::yield_now().await;
        rx.close();
        assert_eq!(waiting.await.unwrap(), Err(ForwardError::Closed));

        drop(rx);
        assert_eq!(tx.send(entry("after")).await, Err(ForwardError::Closed));
    }

    #[tokio::test]
    async fn recv_ends_when_producers_are_gone() {
        let (tx, mut rx) = channel(1);
        drop(tx);
        assert!(rx.recv().await.is_none());
    }
}
