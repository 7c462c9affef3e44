use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::domain::AccountId;
use crate::hub::HubHandle;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

impl SubscriberId {
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport-neutral unit written to or read from a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// The hub's side of one live connection: identity plus the bounded mailbox
/// the hub delivers serialized events into.
#[derive(Debug)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub account: AccountId,
    mailbox: mpsc::Sender<Arc<str>>,
}

impl Subscriber {
    pub fn new(account: AccountId, capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (mailbox, rx) = mpsc::channel(capacity.max(1));
        let subscriber = Self {
            id: SubscriberId::next(),
            account,
            mailbox,
        };
        (subscriber, rx)
    }

    /// Never waits: a full or closed mailbox is reported back.
    pub(crate) fn deliver(&self, frame: Arc<str>) -> Result<(), TrySendError<Arc<str>>> {
        self.mailbox.try_send(frame)
    }
}

/// Drains the connection until it errors or closes, then asks the hub to
/// forget the subscriber. Client payloads carry no meaning and are dropped.
pub async fn inbound_pump<S, E>(mut stream: S, hub: HubHandle, account: AccountId, id: SubscriberId)
where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Frame::Close) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(%account, subscriber = %id, error = %e, "Connection read failed");
                break;
            }
        }
    }

    if let Err(e) = hub.unregister(account, id).await {
        tracing::debug!(%account, subscriber = %id, error = %e, "Unregister after disconnect failed");
    }
}

/// Writes mailbox frames to the connection. Frames already queued behind
/// the first are coalesced into one newline-joined text write.
pub async fn outbound_pump<S>(mut sink: S, mut mailbox: mpsc::Receiver<Arc<str>>)
where
    S: Sink<Frame> + Unpin,
    S::Error: Display,
{
    loop {
        let Some(first) = mailbox.recv().await else {
            // Evicted or hub gone
            let _ = sink.send(Frame::Close).await;
            return;
        };

        let mut batch = String::from(&*first);
        while let Ok(next) = mailbox.try_recv() {
            batch.push('\n');
            batch.push_str(&next);
        }

        if let Err(e) = sink.send(Frame::Text(batch)).await {
            tracing::debug!(error = %e, "Connection write failed");
            let _ = sink.close().await;
            return;
        }
    }
}
