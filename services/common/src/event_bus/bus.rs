//! In-process publish/subscribe with per-topic ordering.
//!
//! Each topic owns one bounded queue and one worker task. Handlers for the
//! same topic run in registration order, serialized with respect to each
//! other; different topics progress in parallel. `publish` never blocks the
//! caller: a full queue drops the event with a warning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::event::TraderEvent;
use crate::constants::{defaults, topics};

/// Handler invoked for every event on its registered topic
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one event. Errors are logged and isolated; they never stop
    /// sibling handlers or the topic worker.
    async fn handle(&self, event: TraderEvent) -> anyhow::Result<()>;

    /// Handler name used in log fields
    fn name(&self) -> &str;
}

struct Topic {
    tx: mpsc::Sender<TraderEvent>,
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    capacity: usize,
    tick_capacity: usize,
    topics: RwLock<FxHashMap<&'static str, Arc<Topic>>>,
    running: AtomicBool,
}

/// The event bus. Cheap to clone; all clones share one set of topics.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(defaults::BUS_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus with the given per-topic queue capacity. The tick topic
    /// always gets the deeper [`defaults::BUS_TICK_CAPACITY`] queue.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity,
                tick_capacity: defaults::BUS_TICK_CAPACITY.max(capacity),
                topics: RwLock::new(FxHashMap::default()),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Start accepting events
    pub fn start(&self) {
        self.inner.running.store(true, Ordering::SeqCst);
        debug!("event bus started");
    }

    /// Whether the bus accepts events
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Register a handler for one topic. Handlers registered for the same
    /// topic run in registration order.
    pub fn register(&self, topic: &'static str, handler: Arc<dyn EventHandler>) {
        let entry = self.topic_entry(topic);
        let mut handlers = entry.handlers.write();
        debug!(
            topic,
            handler = handler.name(),
            position = handlers.len(),
            "handler registered"
        );
        handlers.push(handler);
    }

    /// Non-blocking publish. Never invokes handlers on the caller's path;
    /// a full topic queue drops the event with a warning (market-data loss
    /// is preferred over unbounded memory).
    pub fn publish(&self, event: TraderEvent) {
        if !self.is_running() {
            warn!(topic = event.topic(), "bus not running, event dropped");
            return;
        }
        let entry = self.topic_entry(event.topic());
        match entry.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(topic = event.topic(), "topic queue full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(topic = event.topic(), "topic worker gone, event dropped");
            }
        }
    }

    /// Stop the bus: close every topic queue and give in-flight handlers a
    /// short grace period to drain.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let mut workers = Vec::new();
        {
            let mut map = self.inner.topics.write();
            for (_, topic) in map.drain() {
                if let Some(handle) = topic.worker.lock().take() {
                    workers.push(handle);
                }
                // The topic (and its sender) drops here; the worker exits
                // once the queue is drained.
            }
        }
        for mut handle in workers {
            if tokio::time::timeout(defaults::SHUTDOWN_GRACE, &mut handle)
                .await
                .is_err()
            {
                warn!("topic worker did not drain within grace period, aborting");
                handle.abort();
            }
        }
        debug!("event bus stopped");
    }

    fn topic_entry(&self, topic: &'static str) -> Arc<Topic> {
        if let Some(entry) = self.inner.topics.read().get(topic) {
            return Arc::clone(entry);
        }
        let mut map = self.inner.topics.write();
        if let Some(entry) = map.get(topic) {
            return Arc::clone(entry);
        }
        let capacity = if topic == topics::TICK_UPDATE {
            self.inner.tick_capacity
        } else {
            self.inner.capacity
        };
        let (tx, rx) = mpsc::channel(capacity);
        let handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>> = Arc::new(RwLock::new(Vec::new()));
        let worker = tokio::spawn(run_topic_worker(topic, rx, Arc::clone(&handlers)));
        let entry = Arc::new(Topic {
            tx,
            handlers,
            worker: Mutex::new(Some(worker)),
        });
        map.insert(topic, Arc::clone(&entry));
        entry
    }
}

async fn run_topic_worker(
    topic: &'static str,
    mut rx: mpsc::Receiver<TraderEvent>,
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
) {
    while let Some(event) = rx.recv().await {
        let snapshot: Vec<Arc<dyn EventHandler>> = handlers.read().clone();
        for handler in snapshot {
            if let Err(e) = handler.handle(event.clone()).await {
                error!(topic, handler = handler.name(), error = %e, "handler failed");
            }
        }
    }
    debug!(topic, "topic worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountData, OrderStatus};
    use crate::types::{Direction, Offset, OrderData, PriceType};
    use chrono::Utc;
    use std::time::Duration;

    fn order_event(order_id: &str, traded: i64) -> TraderEvent {
        TraderEvent::Order(OrderData {
            order_id: order_id.to_string(),
            symbol: "rb2505".to_string(),
            exchange: "SHFE".to_string(),
            direction: Direction::Buy,
            offset: Offset::Open,
            volume_original: 10,
            volume_traded: traded,
            traded_price: 0.0,
            price: None,
            price_type: PriceType::Market,
            status: OrderStatus::Pending,
            status_msg: String::new(),
            gateway_order_id: String::new(),
            insert_time: Utc::now(),
            update_time: Utc::now(),
        })
    }

    struct Recorder {
        name: String,
        seen: Arc<Mutex<Vec<i64>>>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: TraderEvent) -> anyhow::Result<()> {
            if let TraderEvent::Order(order) = event {
                self.seen.lock().push(order.volume_traded);
            }
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_same_topic_ordering() {
        let bus = EventBus::new(64);
        bus.start();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.register(
            topics::ORDER_UPDATE,
            Arc::new(Recorder {
                name: "rec".to_string(),
                seen: Arc::clone(&seen),
                fail: false,
            }),
        );
        for traded in 0..20 {
            bus.publish(order_event("o1", traded));
        }
        settle().await;
        assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_failing_handler_is_isolated() {
        let bus = EventBus::new(64);
        bus.start();
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        bus.register(
            topics::ORDER_UPDATE,
            Arc::new(Recorder {
                name: "failing".to_string(),
                seen: Arc::clone(&first),
                fail: true,
            }),
        );
        bus.register(
            topics::ORDER_UPDATE,
            Arc::new(Recorder {
                name: "healthy".to_string(),
                seen: Arc::clone(&second),
                fail: false,
            }),
        );
        bus.publish(order_event("o1", 1));
        bus.publish(order_event("o1", 2));
        settle().await;
        assert_eq!(*first.lock(), vec![1, 2]);
        assert_eq!(*second.lock(), vec![1, 2]);
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_publish_before_start_drops() {
        let bus = EventBus::new(4);
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.register(
            topics::ORDER_UPDATE,
            Arc::new(Recorder {
                name: "rec".to_string(),
                seen: Arc::clone(&seen),
                fail: false,
            }),
        );
        bus.publish(order_event("o1", 1));
        settle().await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_account_event_routes_to_account_topic() {
        let bus = EventBus::new(16);
        bus.start();
        let orders = Arc::new(Mutex::new(Vec::new()));
        bus.register(
            topics::ORDER_UPDATE,
            Arc::new(Recorder {
                name: "orders-only".to_string(),
                seen: Arc::clone(&orders),
                fail: false,
            }),
        );
        bus.publish(TraderEvent::Account(AccountData::empty("a1")));
        bus.publish(order_event("o1", 7));
        settle().await;
        assert_eq!(*orders.lock(), vec![7]);
        bus.stop().await;
    }
}
