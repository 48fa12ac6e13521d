// src/exec/stdin.rs

//! Stdin broadcaster: multiplex terminal input to every running child.
//!
//! Two cooperating tasks. The reader pulls chunks of up to 4 KiB from the
//! source and hands them over a bounded capacity-1 channel, so it never runs
//! ahead of the dispatcher. The dispatcher owns the subscriber set outright
//! and mutates it only through the subscribe/unsubscribe mailboxes, so no
//! lock is needed anywhere.
//!
//! Each chunk is delivered to the subscribers present at the moment of
//! dispatch; a subscribe racing a chunk may miss that chunk but receives the
//! next one.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Writers are boxed so tests can subscribe duplex pipes in place of real
/// child stdin handles.
pub type SubscriberWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Cheap cloneable handle to the broadcaster's mailboxes.
#[derive(Clone)]
pub struct StdinHub {
    sub_tx: mpsc::Sender<(u64, SubscriberWriter)>,
    unsub_tx: mpsc::Sender<u64>,
}

impl StdinHub {
    /// Spawn the reader and dispatcher tasks over `source` (typically the
    /// terminal) and return a handle for subscribing children.
    pub fn spawn<R>(source: R) -> StdinHub
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>(1);
        let (sub_tx, sub_rx) = mpsc::channel::<(u64, SubscriberWriter)>(16);
        let (unsub_tx, unsub_rx) = mpsc::channel::<u64>(16);

        tokio::spawn(read_loop(source, chunk_tx));
        tokio::spawn(dispatch_loop(chunk_rx, sub_rx, unsub_rx));

        StdinHub { sub_tx, unsub_tx }
    }

    /// Register a child's stdin under `id`. The writer is dropped (closing
    /// the pipe) on unsubscribe or when the dispatcher ends.
    pub async fn subscribe<W>(&self, id: u64, writer: W)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let _ = self.sub_tx.send((id, Box::new(writer))).await;
    }

    pub async fn unsubscribe(&self, id: u64) {
        let _ = self.unsub_tx.send(id).await;
    }
}

/// Endlessly read from the source, handing each populated chunk to the
/// dispatcher. EOF (or a read error) stops the reader; the broadcaster
/// degrades gracefully: later subscribers simply receive no input. This is
/// normal when stdin is not a terminal.
async fn read_loop<R>(mut source: R, chunk_tx: mpsc::Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        match source.read(&mut buf).await {
            Ok(0) => {
                warn!("input ended (EOF), no further input will be sent to processes");
                return;
            }
            Ok(n) => {
                // The bounded channel blocks here until the dispatcher has
                // taken the previous chunk, so we never buffer unboundedly.
                if chunk_tx.send(buf[..n].to_vec()).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!(error = %err, "error reading input, stopping input forwarding");
                return;
            }
        }
    }
}

/// Owns the subscriber set; selects over input, subscribe and unsubscribe.
async fn dispatch_loop(
    mut chunk_rx: mpsc::Receiver<Vec<u8>>,
    mut sub_rx: mpsc::Receiver<(u64, SubscriberWriter)>,
    mut unsub_rx: mpsc::Receiver<u64>,
) {
    let mut subscribers: HashMap<u64, SubscriberWriter> = HashMap::new();
    let mut input_open = true;

    loop {
        tokio::select! {
            chunk = chunk_rx.recv(), if input_open => {
                match chunk {
                    Some(chunk) => {
                        for (id, writer) in subscribers.iter_mut() {
                            // Children exiting mid-write are routine.
                            if let Err(err) = writer.write_all(&chunk).await {
                                warn!(subscriber = id, error = %err, "error writing child stdin");
                            } else {
                                let _ = writer.flush().await;
                            }
                        }
                    }
                    None => input_open = false,
                }
            }
            sub = sub_rx.recv() => {
                match sub {
                    Some((id, writer)) => { subscribers.insert(id, writer); }
                    // All hub handles dropped; nothing left to serve.
                    None => return,
                }
            }
            unsub = unsub_rx.recv() => {
                if let Some(id) = unsub {
                    if subscribers.remove(&id).is_none() {
                        debug!(subscriber = id, "unsubscribe for unknown id");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn chunks_reach_all_current_subscribers() {
        let (mut input, source) = tokio::io::duplex(64);
        let hub = StdinHub::spawn(source);

        let (a_writer, mut a_reader) = tokio::io::duplex(64);
        let (b_writer, mut b_reader) = tokio::io::duplex(64);
        hub.subscribe(1, a_writer).await;
        hub.subscribe(2, b_writer).await;

        // Let the dispatcher pick up the subscriptions before sending.
        tokio::time::sleep(Duration::from_millis(20)).await;

        input.write_all(b"hello\n").await.unwrap();

        let mut got = [0u8; 6];
        a_reader.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"hello\n");
        b_reader.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"hello\n");
    }

    #[tokio::test]
    async fn unsubscribed_children_stop_receiving() {
        let (mut input, source) = tokio::io::duplex(64);
        let hub = StdinHub::spawn(source);

        let (writer, mut reader) = tokio::io::duplex(64);
        hub.subscribe(7, writer).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        input.write_all(b"one").await.unwrap();
        let mut got = [0u8; 3];
        reader.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"one");

        hub.unsubscribe(7).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        input.write_all(b"two").await.unwrap();

        // The writer side was dropped on unsubscribe, so the reader sees EOF
        // rather than the second chunk.
        let n = reader.read(&mut got).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn eof_degrades_gracefully() {
        let (input, source) = tokio::io::duplex(64);
        let hub = StdinHub::spawn(source);
        drop(input);
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Subscribing after EOF still succeeds; it just receives nothing.
        let (writer, mut reader) = tokio::io::duplex(64);
        hub.subscribe(1, writer).await;

        let mut buf = [0u8; 8];
        let res = tokio::time::timeout(Duration::from_millis(100), reader.read(&mut buf)).await;
        assert!(res.is_err(), "no input should arrive after EOF");
    }
}
