//! Publish/subscribe bus partitioned into channels and topics.
//!
//! ## Rules
//! - **Non-blocking publish**: every subscriber queue is unbounded, so
//!   `publish()` never waits on a slow handler.
//! - **Total order**: publishes are serialized, every subscriber observes
//!   events in the same relative order and `Envelope::seq` reflects it.
//! - **Isolation**: handler errors and panics are contained in the
//!   subscriber's own worker task.
//! - **No persistence**: events published before a subscription exists are
//!   never delivered to it.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::{Channel, Envelope, Payload, Route, Subscribe, Topic};

struct Registration {
    id: u64,
    routes: HashSet<Route>,
    tx: mpsc::UnboundedSender<Arc<Envelope>>,
}

#[derive(Default)]
struct Inner {
    registrations: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
}

/// Cloneable handle to one in-process event bus.
#[derive(Clone, Default)]
pub struct Bus {
    inner: Arc<Inner>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `payload` to every current subscriber of `(channel, topic)`.
    ///
    /// Returns the number of subscribers the event was queued for.
    pub fn publish(&self, channel: Channel, topic: Topic, payload: impl Into<Payload>) -> usize {
        let route = Route::new(channel, topic);
        let payload = payload.into();

        let mut registrations = self.inner.registrations.lock();
        let envelope = Arc::new(Envelope {
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
            channel,
            topic,
            published_at: Utc::now(),
            payload,
        });

        let mut delivered = 0;
        registrations.retain(|registration| {
            if !registration.routes.contains(&route) {
                return true;
            }
            match registration.tx.send(Arc::clone(&envelope)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                // Receiver is gone; drop the registration.
                Err(_) => false,
            }
        });

        if delivered == 0 {
            log::debug!("Published {} with no subscribers", route);
        }
        delivered
    }

    /// Registers `subscriber` for a single `(channel, topic)`.
    ///
    /// Must be called inside a tokio runtime; the handler runs on its own task.
    pub fn subscribe(
        &self,
        channel: Channel,
        topic: Topic,
        subscriber: Arc<dyn Subscribe>,
    ) -> Subscription {
        self.subscribe_routes([Route::new(channel, topic)], subscriber)
    }

    /// Registers `subscriber` for several routes sharing one FIFO queue.
    pub fn subscribe_routes(
        &self,
        routes: impl IntoIterator<Item = Route>,
        subscriber: Arc<dyn Subscribe>,
    ) -> Subscription {
        let (id, mut rx) = self.register(routes);

        let worker = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let fut = subscriber.on_event(envelope.as_ref());
                match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => log::warn!(
                        "Subscriber {} failed on {}: {}",
                        subscriber.name(),
                        envelope.route(),
                        e
                    ),
                    Err(panic) => log::error!(
                        "Subscriber {} panicked on {}: {}",
                        subscriber.name(),
                        envelope.route(),
                        panic_message(panic.as_ref())
                    ),
                }
            }
        });

        Subscription {
            id,
            bus: self.clone(),
            worker,
        }
    }

    /// Opens a raw receiver for the given routes.
    ///
    /// Unlike [`Bus::subscribe`], no task is spawned: the caller pulls events
    /// at its own pace.
    pub fn tap(&self, routes: impl IntoIterator<Item = Route>) -> Tap {
        let (_, rx) = self.register(routes);
        Tap { rx }
    }

    /// Number of live registrations listening on `route`.
    pub fn subscriber_count(&self, route: Route) -> usize {
        self.inner
            .registrations
            .lock()
            .iter()
            .filter(|r| r.routes.contains(&route) && !r.tx.is_closed())
            .count()
    }

    fn register(
        &self,
        routes: impl IntoIterator<Item = Route>,
    ) -> (u64, mpsc::UnboundedReceiver<Arc<Envelope>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.registrations.lock().push(Registration {
            id,
            routes: routes.into_iter().collect(),
            tx,
        });
        (id, rx)
    }

    fn unregister(&self, id: u64) {
        self.inner.registrations.lock().retain(|r| r.id != id);
    }
}

/// A spawned subscriber registration.
pub struct Subscription {
    id: u64,
    bus: Bus,
    worker: JoinHandle<()>,
}

impl Subscription {
    /// Detaches the subscriber; events already queued are still handled.
    pub async fn unsubscribe(self) {
        self.bus.unregister(self.id);
        let _ = self.worker.await;
    }
}

/// Pull-based receiver over a set of routes.
pub struct Tap {
    rx: mpsc::UnboundedReceiver<Arc<Envelope>>,
}

impl Tap {
    /// Waits for the next event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        self.rx.recv().await
    }

    /// Returns the next already-published event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Envelope>> {
        self.rx.try_recv().ok()
    }

    /// Takes every event published so far.
    pub fn drain(&mut self) -> Vec<Arc<Envelope>> {
        let mut events = Vec::new();
        while let Some(envelope) = self.try_recv() {
            events.push(envelope);
        }
        events
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc::UnboundedSender;

    use crate::error::{AppError, Result};
    use crate::models::Site;

    struct Forward(UnboundedSender<u64>);

    #[async_trait]
    impl Subscribe for Forward {
        async fn on_event(&self, envelope: &Envelope) -> Result<()> {
            let _ = self.0.send(envelope.seq);
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl Subscribe for Panics {
        async fn on_event(&self, _envelope: &Envelope) -> Result<()> {
            panic!("handler blew up");
        }
    }

    struct Fails;

    #[async_trait]
    impl Subscribe for Fails {
        async fn on_event(&self, _envelope: &Envelope) -> Result<()> {
            Err(AppError::validation("rejected"))
        }
    }

    fn site(id: &str) -> Site {
        Site::new(id, "example.com")
    }

    async fn collect(rx: &mut mpsc::UnboundedReceiver<u64>, n: usize) -> Vec<u64> {
        let mut seen = Vec::new();
        while seen.len() < n {
            let next = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("subscriber did not receive in time")
                .expect("subscriber channel closed");
            seen.push(next);
        }
        seen
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = Bus::new();
        assert_eq!(bus.publish(Channel::Sites, Topic::Added, site("s1")), 0);
    }

    #[test]
    fn test_tap_only_sees_its_routes() {
        let bus = Bus::new();
        let mut tap = bus.tap([Route::SITE_STARTED]);

        bus.publish(Channel::Sites, Topic::Added, site("s1"));
        bus.publish(Channel::Sites, Topic::Started, site("s2"));
        bus.publish(Channel::Sites, Topic::Completed, site("s3"));

        let events = tap.drain();
        assert_eq!(events.len(), 1);
        assert!(events[0].is(Route::SITE_STARTED));
        assert_eq!(events[0].payload.site_id(), "s2");
    }

    #[test]
    fn test_tap_observes_publish_order() {
        let bus = Bus::new();
        let mut tap = bus.tap(Route::all());

        for i in 0..10 {
            bus.publish(Channel::Sites, Topic::Updated, site(&format!("s{i}")));
        }

        let ids: Vec<String> = tap
            .drain()
            .iter()
            .map(|e| e.payload.site_id().to_string())
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("s{i}")).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_dropped_tap_is_pruned() {
        let bus = Bus::new();
        let tap = bus.tap([Route::SITE_ADDED]);
        assert_eq!(bus.subscriber_count(Route::SITE_ADDED), 1);

        drop(tap);
        assert_eq!(bus.publish(Channel::Sites, Topic::Added, site("s1")), 0);
        assert_eq!(bus.subscriber_count(Route::SITE_ADDED), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_in_order() {
        let bus = Bus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = bus.subscribe(Channel::Sites, Topic::Updated, Arc::new(Forward(tx)));

        for i in 0..5 {
            bus.publish(Channel::Sites, Topic::Updated, site(&format!("s{i}")));
        }

        assert_eq!(collect(&mut rx, 5).await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_failing_subscribers_are_isolated() {
        let bus = Bus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _panics = bus.subscribe(Channel::Sites, Topic::Added, Arc::new(Panics));
        let _fails = bus.subscribe(Channel::Sites, Topic::Added, Arc::new(Fails));
        let _ok = bus.subscribe(Channel::Sites, Topic::Added, Arc::new(Forward(tx)));

        assert_eq!(bus.publish(Channel::Sites, Topic::Added, site("s1")), 3);
        assert_eq!(bus.publish(Channel::Sites, Topic::Added, site("s2")), 3);

        assert_eq!(collect(&mut rx, 2).await, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = Bus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = bus.subscribe(Channel::Pages, Topic::Crawled, Arc::new(Forward(tx)));

        bus.publish(Channel::Sites, Topic::Started, site("s1"));
        sub.unsubscribe().await;

        assert_eq!(bus.subscriber_count(Route::PAGE_CRAWLED), 0);
        assert!(rx.recv().await.is_none());
    }
}
