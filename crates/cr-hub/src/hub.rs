//! Per-user fan-out of job events.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use cr_types::Job;

use crate::health::{ConnectionHealth, ConnectionState, HeartbeatConfig};
use crate::protocol::ClientMessage;

/// Unique connection identifier
pub type ConnectionId = Uuid;

/// Snapshot delivered as the first message of every connection.
#[derive(Debug, Clone, Default)]
pub struct SyncSnapshot {
    /// All non-terminal jobs for the user.
    pub active_jobs: Vec<Job>,
    /// Bounded window of the user's most recently finished jobs.
    pub recent_jobs: Vec<Job>,
}

/// One live client connection handed back by [`ProgressHub::connect`].
pub struct Subscription {
    pub connection_id: ConnectionId,
    pub rx: mpsc::UnboundedReceiver<ClientMessage>,
}

struct Connection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<ClientMessage>,
    health: Mutex<ConnectionHealth>,
}

/// Per-user multiplexed real-time channel.
///
/// Events for a user's jobs are fanned out to every connection the user
/// holds. Each driver emits its job's events sequentially and each
/// connection is an unbounded FIFO, so per-job ordering is preserved
/// end-to-end; no ordering is promised across different jobs. Connections
/// whose receiver has gone away are pruned on the next send.
pub struct ProgressHub {
    heartbeat: HeartbeatConfig,
    connections: DashMap<String, Vec<Connection>>,
    ping_seq: AtomicU64,
}

impl ProgressHub {
    pub fn new(heartbeat: HeartbeatConfig) -> Self {
        Self {
            heartbeat,
            connections: DashMap::new(),
            ping_seq: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(HeartbeatConfig::default())
    }

    /// Register a connection for `owner` and deliver the sync snapshot as its
    /// first message. The connection is open once the snapshot is queued.
    pub fn connect(&self, owner: &str, snapshot: SyncSnapshot) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        let mut health = ConnectionHealth::new(self.heartbeat);
        let _ = tx.send(ClientMessage::Sync {
            active_jobs: snapshot.active_jobs,
            recent_jobs: snapshot.recent_jobs,
        });
        health.set_state(ConnectionState::Open);

        self.connections.entry(owner.to_string()).or_default().push(Connection {
            id,
            tx,
            health: Mutex::new(health),
        });

        info!(owner = %owner, connection_id = %id, "hub connection opened");
        Subscription {
            connection_id: id,
            rx,
        }
    }

    /// Drop one connection.
    pub fn disconnect(&self, owner: &str, connection_id: ConnectionId) {
        if let Some(mut conns) = self.connections.get_mut(owner) {
            if let Some(conn) = conns.iter().find(|c| c.id == connection_id) {
                conn.health.lock().set_state(ConnectionState::Closed);
            }
            conns.retain(|c| c.id != connection_id);
        }
        debug!(owner = %owner, connection_id = %connection_id, "hub connection closed");
    }

    /// Fan a message out to every live connection of `owner`.
    pub fn publish(&self, owner: &str, message: ClientMessage) {
        if let Some(mut conns) = self.connections.get_mut(owner) {
            conns.retain(|conn| conn.tx.send(message.clone()).is_ok());
        }
    }

    /// Send a heartbeat ping to every connection and account for unanswered
    /// ones. Call on the configured interval.
    pub fn ping_all(&self) {
        let seq = self.ping_seq.fetch_add(1, Ordering::SeqCst);
        let now = chrono::Utc::now();

        for mut entry in self.connections.iter_mut() {
            entry.value_mut().retain(|conn| {
                if conn.tx.send(ClientMessage::Ping { seq }).is_err() {
                    return false;
                }
                conn.health.lock().ping_sent(seq, now);
                true
            });
        }
    }

    /// Record a pong from a client.
    pub fn handle_pong(&self, owner: &str, connection_id: ConnectionId, seq: u64) {
        if let Some(conns) = self.connections.get(owner) {
            if let Some(conn) = conns.iter().find(|c| c.id == connection_id) {
                conn.health.lock().pong_received(seq, chrono::Utc::now());
            }
        }
    }

    /// Current lifecycle state of a connection, if it is still registered.
    pub fn connection_state(&self, owner: &str, connection_id: ConnectionId) -> Option<ConnectionState> {
        self.connections.get(owner).and_then(|conns| {
            conns
                .iter()
                .find(|c| c.id == connection_id)
                .map(|c| c.health.lock().state())
        })
    }

    /// Number of live connections for `owner`.
    pub fn connection_count(&self, owner: &str) -> usize {
        self.connections.get(owner).map(|c| c.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cr_types::{JobType, Job};
    use uuid::Uuid;

    fn job_at(owner: &str, pct: f64) -> Job {
        let mut job = Job::new(JobType::Benchmark, owner, serde_json::json!({}));
        job.mark_running();
        job.set_progress(pct, "");
        job
    }

    #[tokio::test]
    async fn sync_is_the_first_message() {
        let hub = ProgressHub::with_defaults();
        let snapshot = SyncSnapshot {
            active_jobs: vec![job_at("alice", 40.0)],
            recent_jobs: vec![],
        };
        let mut sub = hub.connect("alice", snapshot);

        // Publish before the client reads anything: the snapshot still
        // arrives first.
        hub.publish(
            "alice",
            ClientMessage::JobProgress {
                job_id: Uuid::new_v4(),
                pct: 50.0,
                detail: String::new(),
            },
        );

        match sub.rx.recv().await.unwrap() {
            ClientMessage::Sync { active_jobs, .. } => {
                assert_eq!(active_jobs.len(), 1);
                assert_eq!(active_jobs[0].progress_pct, 40.0);
            }
            other => panic!("expected sync first, got {other:?}"),
        }
        assert!(matches!(
            sub.rx.recv().await.unwrap(),
            ClientMessage::JobProgress { .. }
        ));
    }

    #[tokio::test]
    async fn per_job_ordering_is_preserved() {
        let hub = ProgressHub::with_defaults();
        let mut sub = hub.connect("alice", SyncSnapshot::default());
        let job_id = Uuid::new_v4();

        for pct in [10.0, 20.0, 30.0] {
            hub.publish(
                "alice",
                ClientMessage::JobProgress {
                    job_id,
                    pct,
                    detail: String::new(),
                },
            );
        }
        hub.publish(
            "alice",
            ClientMessage::JobCompleted {
                job_id,
                result_ref: None,
            },
        );

        let _sync = sub.rx.recv().await.unwrap();
        let mut pcts = Vec::new();
        loop {
            match sub.rx.recv().await.unwrap() {
                ClientMessage::JobProgress { pct, .. } => pcts.push(pct),
                ClientMessage::JobCompleted { .. } => break,
                other => panic!("unexpected message {other:?}"),
            }
        }
        assert_eq!(pcts, vec![10.0, 20.0, 30.0]);
    }

    #[tokio::test]
    async fn fan_out_reaches_every_connection_of_the_owner_only() {
        let hub = ProgressHub::with_defaults();
        let mut first = hub.connect("alice", SyncSnapshot::default());
        let mut second = hub.connect("alice", SyncSnapshot::default());
        let mut other = hub.connect("bob", SyncSnapshot::default());

        hub.publish(
            "alice",
            ClientMessage::JobStarted {
                job_id: Uuid::new_v4(),
            },
        );

        let _ = first.rx.recv().await.unwrap(); // sync
        let _ = second.rx.recv().await.unwrap();
        let _ = other.rx.recv().await.unwrap();

        assert!(matches!(
            first.rx.recv().await.unwrap(),
            ClientMessage::JobStarted { .. }
        ));
        assert!(matches!(
            second.rx.recv().await.unwrap(),
            ClientMessage::JobStarted { .. }
        ));
        assert!(other.rx.try_recv().is_err(), "bob must not see alice's events");
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned_on_send() {
        let hub = ProgressHub::with_defaults();
        let sub = hub.connect("alice", SyncSnapshot::default());
        assert_eq!(hub.connection_count("alice"), 1);

        drop(sub);
        hub.publish(
            "alice",
            ClientMessage::JobStarted {
                job_id: Uuid::new_v4(),
            },
        );
        assert_eq!(hub.connection_count("alice"), 0);
    }

    #[tokio::test]
    async fn heartbeat_degrades_and_recovers() {
        let hub = ProgressHub::new(HeartbeatConfig {
            interval_secs: 1,
            max_missed: 2,
            window_secs: 3600,
        });
        let mut sub = hub.connect("alice", SyncSnapshot::default());
        let _ = sub.rx.recv().await.unwrap(); // sync

        // Three pings, none answered: two counted misses.
        hub.ping_all();
        hub.ping_all();
        hub.ping_all();
        assert_eq!(
            hub.connection_state("alice", sub.connection_id),
            Some(ConnectionState::Degraded)
        );

        // Client answers the latest ping: cleared.
        let mut last_seq = 0;
        while let Ok(msg) = sub.rx.try_recv() {
            if let ClientMessage::Ping { seq } = msg {
                last_seq = seq;
            }
        }
        hub.handle_pong("alice", sub.connection_id, last_seq);
        assert_eq!(
            hub.connection_state("alice", sub.connection_id),
            Some(ConnectionState::Open)
        );
    }

    #[tokio::test]
    async fn disconnect_prunes_the_connection() {
        let hub = ProgressHub::with_defaults();
        let sub = hub.connect("alice", SyncSnapshot::default());
        hub.disconnect("alice", sub.connection_id);
        assert_eq!(hub.connection_count("alice"), 0);
        assert_eq!(hub.connection_state("alice", sub.connection_id), None);
    }
}
