//! Live distribution of events to connected subscribers.
//!
//! A single task owns the registry and applies commands in arrival order.
//! Broadcasts never wait on a subscriber: a full or closed mailbox gets the
//! subscriber evicted through a follow-up `Unregister` command.

pub mod subscriber;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::app::{FlowError, Result};
use crate::domain::{AccountId, Event};
use crate::ingest::Notifier;

pub use subscriber::{inbound_pump, outbound_pump, Frame, Subscriber, SubscriberId};

pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

enum Command {
    Register(Subscriber),
    Unregister {
        account: AccountId,
        id: SubscriberId,
    },
    Broadcast(Event),
    Snapshot(oneshot::Sender<HubSnapshot>),
    Shutdown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubSnapshot {
    pub accounts: usize,
    pub subscribers: usize,
    pub pending_evictions: usize,
}

/// A registered connection's receiving half.
pub struct Connection {
    pub id: SubscriberId,
    pub account: AccountId,
    pub mailbox: mpsc::Receiver<Arc<str>>,
}

/// Cheap, cloneable entry point into the hub task.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<Command>,
    mailbox_capacity: usize,
}

impl HubHandle {
    pub async fn register(&self, subscriber: Subscriber) -> Result<()> {
        self.submit(Command::Register(subscriber)).await
    }

    /// Unknown or already removed subscribers are ignored.
    pub async fn unregister(&self, account: AccountId, id: SubscriberId) -> Result<()> {
        self.submit(Command::Unregister { account, id }).await
    }

    /// Creates a subscriber with the configured mailbox size and registers it.
    pub async fn connect(&self, account: AccountId) -> Result<Connection> {
        let (subscriber, mailbox) = Subscriber::new(account, self.mailbox_capacity);
        let id = subscriber.id;
        self.register(subscriber).await?;
        Ok(Connection {
            id,
            account,
            mailbox,
        })
    }

    pub async fn broadcast<P: Serialize>(&self, kind: &str, payload: P) -> Result<()> {
        self.publish(Event::new(kind, payload)?).await
    }

    pub async fn publish(&self, event: Event) -> Result<()> {
        self.submit(Command::Broadcast(event)).await
    }

    pub async fn snapshot(&self) -> Result<HubSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| FlowError::HubUnavailable)
    }

    /// Drops every subscriber (closing their mailboxes) and ends the hub task.
    pub async fn shutdown(&self) -> Result<()> {
        self.submit(Command::Shutdown).await
    }

    async fn submit(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| FlowError::HubUnavailable)
    }
}

#[async_trait]
impl Notifier for HubHandle {
    async fn notify(&self, event: Event) -> Result<()> {
        self.publish(event).await
    }
}

pub struct DistributionHub {
    commands: mpsc::Receiver<Command>,
    // Weak so that the task ends once every handle is gone.
    resubmit: mpsc::WeakSender<Command>,
    registry: HashMap<AccountId, HashMap<SubscriberId, Subscriber>>,
    pending_evictions: HashSet<(AccountId, SubscriberId)>,
}

impl DistributionHub {
    pub fn spawn(queue_capacity: usize, mailbox_capacity: usize) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let hub = Self {
            commands: rx,
            resubmit: tx.downgrade(),
            registry: HashMap::new(),
            pending_evictions: HashSet::new(),
        };
        let task = tokio::spawn(hub.run());
        let handle = HubHandle {
            commands: tx,
            mailbox_capacity: mailbox_capacity.max(1),
        };
        (handle, task)
    }

    async fn run(mut self) {
        tracing::debug!("Distribution hub started");

        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Register(subscriber) => self.register(subscriber),
                Command::Unregister { account, id } => self.unregister(account, id),
                Command::Broadcast(event) => self.broadcast(&event),
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Shutdown => break,
            }
        }

        let dropped = self.subscriber_count();
        self.registry.clear();
        tracing::info!(subscribers = dropped, "Distribution hub stopped");
    }

    fn register(&mut self, subscriber: Subscriber) {
        let (account, id) = (subscriber.account, subscriber.id);
        self.registry
            .entry(account)
            .or_default()
            .insert(id, subscriber);
        tracing::debug!(%account, subscriber = %id, "Subscriber registered");
    }

    fn unregister(&mut self, account: AccountId, id: SubscriberId) {
        self.pending_evictions.remove(&(account, id));

        let Some(subscribers) = self.registry.get_mut(&account) else {
            return;
        };
        if subscribers.remove(&id).is_some() {
            tracing::debug!(%account, subscriber = %id, "Subscriber unregistered");
        }
        if subscribers.is_empty() {
            self.registry.remove(&account);
        }
    }

    fn broadcast(&mut self, event: &Event) {
        let frame: Arc<str> = match event.to_json() {
            Ok(json) => Arc::from(json),
            Err(e) => {
                tracing::error!(kind = event.kind(), error = %e, "Failed to serialize event");
                return;
            }
        };

        let mut evict = Vec::new();
        for (account, subscribers) in &self.registry {
            for (id, subscriber) in subscribers {
                if subscriber.deliver(frame.clone()).is_err() {
                    evict.push((*account, *id));
                }
            }
        }

        tracing::debug!(
            kind = event.kind(),
            subscribers = self.subscriber_count(),
            evicting = evict.len(),
            "Event broadcast"
        );

        for (account, id) in evict {
            self.schedule_eviction(account, id);
        }
    }

    /// The hub never sends into its own queue while handling a command.
    fn schedule_eviction(&mut self, account: AccountId, id: SubscriberId) {
        if !self.pending_evictions.insert((account, id)) {
            return;
        }

        tracing::warn!(%account, subscriber = %id, "Evicting slow subscriber");

        let resubmit = self.resubmit.clone();
        tokio::spawn(async move {
            if let Some(commands) = resubmit.upgrade() {
                let _ = commands.send(Command::Unregister { account, id }).await;
            }
        });
    }

    fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            accounts: self.registry.len(),
            subscribers: self.subscriber_count(),
            pending_evictions: self.pending_evictions.len(),
        }
    }

    fn subscriber_count(&self) -> usize {
        self.registry.values().map(HashMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    async fn wait_for<F>(hub: &HubHandle, mut done: F) -> HubSnapshot
    where
        F: FnMut(&HubSnapshot) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let snapshot = hub.snapshot().await.unwrap();
            if done(&snapshot) || tokio::time::Instant::now() > deadline {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let (hub, _task) = DistributionHub::spawn(64, 8);

        let a1 = hub.connect(AccountId(1)).await.unwrap();
        let _a2 = hub.connect(AccountId(1)).await.unwrap();
        let b1 = hub.connect(AccountId(2)).await.unwrap();

        let snapshot = hub.snapshot().await.unwrap();
        assert_eq!(snapshot.accounts, 2);
        assert_eq!(snapshot.subscribers, 3);

        hub.unregister(AccountId(2), b1.id).await.unwrap();
        let snapshot = hub.snapshot().await.unwrap();
        assert_eq!(snapshot.accounts, 1);
        assert_eq!(snapshot.subscribers, 2);

        hub.unregister(AccountId(1), a1.id).await.unwrap();
        hub.unregister(AccountId(1), a1.id).await.unwrap();
        hub.unregister(AccountId(9), SubscriberId(u64::MAX)).await.unwrap();
        let snapshot = hub.snapshot().await.unwrap();
        assert_eq!(snapshot.accounts, 1);
        assert_eq!(snapshot.subscribers, 1);
    }

    #[tokio::test]
    async fn test_unregister_closes_mailbox() {
        let (hub, _task) = DistributionHub::spawn(64, 8);
        let mut conn = hub.connect(AccountId(1)).await.unwrap();

        hub.unregister(conn.account, conn.id).await.unwrap();
        hub.snapshot().await.unwrap();

        assert!(conn.mailbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_account() {
        let (hub, _task) = DistributionHub::spawn(64, 8);
        let mut first = hub.connect(AccountId(1)).await.unwrap();
        let mut second = hub.connect(AccountId(2)).await.unwrap();

        hub.broadcast("new_articles", json!({"source_id": 1, "count": 2}))
            .await
            .unwrap();

        for conn in [&mut first, &mut second] {
            let frame = conn.mailbox.recv().await.unwrap();
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(value["type"], "new_articles");
            assert_eq!(value["payload"]["count"], 2);
        }
    }

    #[tokio::test]
    async fn test_frames_are_shared_not_copied() {
        let (hub, _task) = DistributionHub::spawn(64, 8);
        let mut first = hub.connect(AccountId(1)).await.unwrap();
        let mut second = hub.connect(AccountId(1)).await.unwrap();

        hub.broadcast("ping", json!({})).await.unwrap();

        let a = first.mailbox.recv().await.unwrap();
        let b = second.mailbox.recv().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_slow_subscriber_evicted_without_blocking_others() {
        const HEALTHY: usize = 250;
        const EVENTS: usize = 10;

        let (hub, _task) = DistributionHub::spawn(64, EVENTS * 2);

        let mut healthy = Vec::with_capacity(HEALTHY);
        for i in 0..HEALTHY {
            healthy.push(hub.connect(AccountId((i % 17) as i64)).await.unwrap());
        }

        let (slow, mut slow_mailbox) = Subscriber::new(AccountId(1000), 1);
        hub.register(slow).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            for n in 0..EVENTS {
                hub.broadcast("tick", json!({ "n": n })).await.unwrap();
            }
        })
        .await
        .expect("broadcast must not wait on a full mailbox");

        let snapshot = wait_for(&hub, |s| s.subscribers == HEALTHY && s.pending_evictions == 0).await;
        assert_eq!(snapshot.subscribers, HEALTHY);
        assert_eq!(snapshot.pending_evictions, 0);

        for conn in &mut healthy {
            let mut received = 0;
            while conn.mailbox.try_recv().is_ok() {
                received += 1;
            }
            assert_eq!(received, EVENTS);
        }

        // The one frame that fit, then the closed mailbox.
        assert!(slow_mailbox.recv().await.is_some());
        assert!(slow_mailbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_mailbox_is_evicted() {
        let (hub, _task) = DistributionHub::spawn(64, 8);
        let gone = hub.connect(AccountId(1)).await.unwrap();
        let _kept = hub.connect(AccountId(2)).await.unwrap();
        drop(gone.mailbox);

        hub.broadcast("tick", json!({})).await.unwrap();

        let snapshot = wait_for(&hub, |s| s.subscribers == 1).await;
        assert_eq!(snapshot.subscribers, 1);
        assert_eq!(snapshot.accounts, 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let (hub, task) = DistributionHub::spawn(64, 8);
        let mut conn = hub.connect(AccountId(1)).await.unwrap();

        hub.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(conn.mailbox.recv().await.is_none());
        assert!(matches!(
            hub.broadcast("tick", json!({})).await,
            Err(FlowError::HubUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_task_ends_when_handles_drop() {
        let (hub, task) = DistributionHub::spawn(64, 8);
        let _conn = hub.connect(AccountId(1)).await.unwrap();
        drop(hub);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("hub task ends")
            .unwrap();
    }

    #[tokio::test]
    async fn test_notifier_publishes_event() {
        let (hub, _task) = DistributionHub::spawn(64, 8);
        let mut conn = hub.connect(AccountId(1)).await.unwrap();

        let event = Event::new("new_articles", json!({"count": 1})).unwrap();
        Notifier::notify(&hub, event).await.unwrap();

        let frame = conn.mailbox.recv().await.unwrap();
        assert!(frame.starts_with(r#"{"type":"new_articles""#));
    }
}
