//! CoT router: client registry and blind fan-out
//!
//! One router per process. It owns the sender half of every connected
//! client's bounded outbound queue; each connection handler owns its own
//! receiver half and the ClientId it uses to call back [`CotRouter::unregister`].
//! The router never holds a handle to a handler, so the topology stays
//! cycle-free.
//!
//! `route` is non-blocking end to end: it clones a shared payload handle
//! into each peer's queue and applies the slow-consumer policy on overflow.

use crate::error::{Result, ServerError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

// =============================================================================
// SLOW-CONSUMER POLICY
// =============================================================================

/// Full-queue drops tolerated for one peer within the rolling window before
/// it is disconnected. Dropping at the tail for that one peer keeps
/// broadcast timely for everyone else.
pub const SLOW_CONSUMER_THRESHOLD: u32 = 3;

/// Rolling window for the drop counter.
pub const SLOW_CONSUMER_WINDOW: Duration = Duration::from_secs(10);

// =============================================================================
// TYPES
// =============================================================================

/// Opaque process-local client identifier. Allocated by atomic increment;
/// unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A framed CoT document as it appeared on the wire. Cheap to clone: the
/// payload is a shared immutable buffer, so fan-out to N peers allocates
/// the bytes once.
#[derive(Debug, Clone)]
pub struct CotEvent {
    data: Bytes,
}

impl CotEvent {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Point-in-time view of one registered client, for the Marti surface.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: ClientId,
    pub addr: SocketAddr,
    pub peer_subject: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// Router counters.
#[derive(Debug, Clone, Copy)]
pub struct RouterMetrics {
    pub client_count: usize,
    pub events_routed: u64,
    pub events_dropped: u64,
}

struct SlowWindow {
    window_start: Instant,
    drops: u32,
}

/// Registry entry for one connected client. Immutable after insert apart
/// from the counters.
struct Registration {
    tx: mpsc::Sender<CotEvent>,
    addr: SocketAddr,
    peer_subject: Option<String>,
    connected_at: DateTime<Utc>,
    cancel: CancellationToken,
    delivered: AtomicU64,
    slow: Mutex<SlowWindow>,
}

impl Registration {
    fn note_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        let mut window = self.slow.lock().unwrap_or_else(PoisonError::into_inner);
        window.drops = 0;
    }

    /// Record a full-queue drop. Returns true once the peer has exceeded
    /// the threshold within the rolling window.
    fn note_dropped(&self) -> bool {
        let mut window = self.slow.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if now.duration_since(window.window_start) > SLOW_CONSUMER_WINDOW {
            window.window_start = now;
            window.drops = 0;
        }
        window.drops += 1;
        window.drops > SLOW_CONSUMER_THRESHOLD
    }
}

// =============================================================================
// ROUTER
// =============================================================================

/// In-memory bus mapping ClientId to outbound bounded queues.
pub struct CotRouter {
    clients: DashMap<ClientId, Registration>,
    queue_capacity: usize,
    next_id: AtomicU64,
    events_routed: AtomicU64,
    events_dropped: AtomicU64,
}

impl CotRouter {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            clients: DashMap::new(),
            queue_capacity,
            next_id: AtomicU64::new(1),
            events_routed: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
        }
    }

    /// Issue the next ClientId.
    pub fn allocate_id(&self) -> ClientId {
        ClientId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Insert a client and hand back the receiver half of its outbound
    /// queue. Registering the same id twice is a programmer error: the call
    /// fails and the existing registration is left untouched.
    pub fn register(
        &self,
        id: ClientId,
        addr: SocketAddr,
        peer_subject: Option<String>,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<CotEvent>> {
        let entry = match self.clients.entry(id) {
            Entry::Occupied(_) => return Err(ServerError::DuplicateClient(id)),
            Entry::Vacant(entry) => entry,
        };
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        entry.insert(Registration {
            tx,
            addr,
            peer_subject,
            connected_at: Utc::now(),
            cancel,
            delivered: AtomicU64::new(0),
            slow: Mutex::new(SlowWindow {
                window_start: Instant::now(),
                drops: 0,
            }),
        });
        Ok(rx)
    }

    /// Remove a client and drop the sender half, which ends the writer's
    /// receive stream. Idempotent.
    pub fn unregister(&self, id: ClientId) {
        self.clients.remove(&id);
    }

    /// Fan an event out to every registered peer except the sender.
    ///
    /// Never blocks and never waits for acknowledgement. A peer with a full
    /// queue loses this event; past the slow-consumer threshold its
    /// connection is signalled to terminate. A peer whose receiver is gone
    /// is skipped (its handler is already unwinding).
    pub fn route(&self, from: ClientId, event: CotEvent) {
        self.events_routed.fetch_add(1, Ordering::Relaxed);
        for entry in self.clients.iter() {
            if *entry.key() == from {
                continue;
            }
            let registration = entry.value();
            match registration.tx.try_send(event.clone()) {
                Ok(()) => registration.note_delivered(),
                Err(TrySendError::Full(_)) => {
                    self.events_dropped.fetch_add(1, Ordering::Relaxed);
                    if registration.note_dropped() {
                        warn!(client = %entry.key(), "slow consumer, disconnecting");
                        registration.cancel.cancel();
                    }
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Point-in-time list of connected clients.
    pub fn snapshot(&self) -> Vec<ClientInfo> {
        self.clients
            .iter()
            .map(|entry| ClientInfo {
                id: *entry.key(),
                addr: entry.value().addr,
                peer_subject: entry.value().peer_subject.clone(),
                connected_at: entry.value().connected_at,
            })
            .collect()
    }

    pub fn metrics(&self) -> RouterMetrics {
        RouterMetrics {
            client_count: self.clients.len(),
            events_routed: self.events_routed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Registered connections from one IP, for per-IP admission control.
    pub fn clients_from_ip(&self, ip: IpAddr) -> usize {
        self.clients
            .iter()
            .filter(|entry| entry.value().addr.ip() == ip)
            .count()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn event(text: &str) -> CotEvent {
        CotEvent::new(Bytes::copy_from_slice(text.as_bytes()))
    }

    #[tokio::test]
    async fn fan_out_skips_sender() {
        let router = CotRouter::new(8);
        let a = router.allocate_id();
        let b = router.allocate_id();
        let c = router.allocate_id();
        let mut rx_a = router.register(a, test_addr(1), None, CancellationToken::new()).unwrap();
        let mut rx_b = router.register(b, test_addr(2), None, CancellationToken::new()).unwrap();
        let mut rx_c = router.register(c, test_addr(3), None, CancellationToken::new()).unwrap();

        router.route(a, event("<event uid=\"x\"/>"));

        assert_eq!(rx_b.recv().await.unwrap().as_bytes(), b"<event uid=\"x\"/>");
        assert_eq!(rx_c.recv().await.unwrap().as_bytes(), b"<event uid=\"x\"/>");
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn per_sender_fifo() {
        let router = CotRouter::new(8);
        let a = router.allocate_id();
        let b = router.allocate_id();
        let _rx_a = router.register(a, test_addr(1), None, CancellationToken::new()).unwrap();
        let mut rx_b = router.register(b, test_addr(2), None, CancellationToken::new()).unwrap();

        for i in 0..5 {
            router.route(a, event(&format!("<event uid=\"{i}\"/>")));
        }
        for i in 0..5 {
            let received = rx_b.recv().await.unwrap();
            assert_eq!(
                received.as_bytes(),
                format!("<event uid=\"{i}\"/>").as_bytes()
            );
        }
    }

    #[tokio::test]
    async fn full_queue_drops_then_disconnects() {
        let router = CotRouter::new(2);
        let a = router.allocate_id();
        let b = router.allocate_id();
        let _rx_a = router.register(a, test_addr(1), None, CancellationToken::new()).unwrap();
        let cancel_b = CancellationToken::new();
        let rx_b = router.register(b, test_addr(2), None, cancel_b.clone()).unwrap();

        // Fill B's queue, then keep pushing without draining. Two fit, the
        // next SLOW_CONSUMER_THRESHOLD drops are tolerated, one more trips
        // the disconnect signal.
        let tolerated = 2 + SLOW_CONSUMER_THRESHOLD as usize;
        for i in 0..tolerated {
            router.route(a, event("<event/>"));
            assert!(!cancel_b.is_cancelled(), "cancelled after {} events", i + 1);
        }
        router.route(a, event("<event/>"));
        assert!(cancel_b.is_cancelled());

        let metrics = router.metrics();
        assert_eq!(metrics.events_routed, tolerated as u64 + 1);
        assert_eq!(
            metrics.events_dropped,
            SLOW_CONSUMER_THRESHOLD as u64 + 1
        );
        drop(rx_b);
    }

    #[tokio::test]
    async fn delivery_resets_drop_counter() {
        let router = CotRouter::new(1);
        let a = router.allocate_id();
        let b = router.allocate_id();
        let _rx_a = router.register(a, test_addr(1), None, CancellationToken::new()).unwrap();
        let cancel_b = CancellationToken::new();
        let mut rx_b = router.register(b, test_addr(2), None, cancel_b.clone()).unwrap();

        // Alternate fill/drop/drain so drops never accumulate past the
        // threshold.
        for _ in 0..10 {
            router.route(a, event("<event/>")); // accepted
            router.route(a, event("<event/>")); // dropped, counter = 1
            let _ = rx_b.recv().await.unwrap(); // drain
        }
        assert!(!cancel_b.is_cancelled());
    }

    #[tokio::test]
    async fn closed_receiver_is_skipped() {
        let router = CotRouter::new(4);
        let a = router.allocate_id();
        let b = router.allocate_id();
        let _rx_a = router.register(a, test_addr(1), None, CancellationToken::new()).unwrap();
        let cancel_b = CancellationToken::new();
        let rx_b = router.register(b, test_addr(2), None, cancel_b.clone()).unwrap();
        drop(rx_b);

        // Routing into a dropped receiver must neither panic nor count as a
        // slow-consumer drop.
        for _ in 0..10 {
            router.route(a, event("<event/>"));
        }
        assert!(!cancel_b.is_cancelled());
        assert_eq!(router.metrics().events_dropped, 0);
    }

    #[tokio::test]
    async fn unregister_is_idempotent_and_ends_stream() {
        let router = CotRouter::new(4);
        let a = router.allocate_id();
        let mut rx_a = router.register(a, test_addr(1), None, CancellationToken::new()).unwrap();

        router.unregister(a);
        router.unregister(a);

        assert!(rx_a.recv().await.is_none());
        assert_eq!(router.client_count(), 0);
    }

    #[tokio::test]
    async fn snapshot_matches_registry() {
        let router = CotRouter::new(4);
        let a = router.allocate_id();
        let b = router.allocate_id();
        let _rx_a = router.register(a, test_addr(1), None, CancellationToken::new()).unwrap();
        let _rx_b = router
            .register(
                b,
                test_addr(2),
                Some("CN=tak-client".into()),
                CancellationToken::new(),
            )
            .unwrap();

        let snapshot = router.snapshot();
        assert_eq!(snapshot.len(), router.metrics().client_count);
        let info_b = snapshot.iter().find(|c| c.id == b).unwrap();
        assert_eq!(info_b.peer_subject.as_deref(), Some("CN=tak-client"));
        assert_eq!(info_b.addr, test_addr(2));
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let router = CotRouter::new(4);
        let first = router.allocate_id();
        let second = router.allocate_id();
        assert!(second > first);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let router = CotRouter::new(4);
        let a = router.allocate_id();
        let mut rx_a = router
            .register(a, test_addr(1), None, CancellationToken::new())
            .unwrap();

        let err = router
            .register(a, test_addr(2), None, CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, ServerError::DuplicateClient(id) if id == a));

        // The original registration still routes.
        let b = router.allocate_id();
        let _rx_b = router
            .register(b, test_addr(3), None, CancellationToken::new())
            .unwrap();
        router.route(b, event("<event uid=\"still-alive\"/>"));
        assert_eq!(
            rx_a.recv().await.unwrap().as_bytes(),
            b"<event uid=\"still-alive\"/>"
        );
        assert_eq!(router.client_count(), 2);
    }

    #[tokio::test]
    async fn counts_clients_per_ip() {
        let router = CotRouter::new(4);
        let a = router.allocate_id();
        let b = router.allocate_id();
        let _rx_a = router.register(a, test_addr(1), None, CancellationToken::new()).unwrap();
        let _rx_b = router.register(b, test_addr(2), None, CancellationToken::new()).unwrap();

        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let other: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(router.clients_from_ip(ip), 2);
        assert_eq!(router.clients_from_ip(other), 0);
    }
}
