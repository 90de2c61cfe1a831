use parking_lot::RwLock;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

use crate::core::event::{Event, EventKind};

/// Callback registered for one event category.
pub type Subscriber = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

/// A subscriber that panicked while handling an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberFault {
    /// Registration position of the subscriber within its category
    pub position: usize,
    pub message: String,
}

/// Outcome of one [`EventDispatcher::publish`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscribers that returned normally
    pub delivered: usize,
    pub faults: Vec<SubscriberFault>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }
}

/// Synchronous multicast of engine events.
///
/// Every category keeps an ordered list of subscribers. `publish` calls them in
/// registration order on the calling task. A panicking subscriber is logged and
/// recorded in the returned [`DispatchReport`]; the remaining subscribers still
/// run. Subscribers should return quickly since they run on the receive loop
/// that detected the event.
pub struct EventDispatcher {
    subscribers: RwLock<[Vec<Subscriber>; 6]>,
    fault_count: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Default::default()),
            fault_count: AtomicU64::new(0),
        }
    }

    /// Append `callback` to the subscriber list of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribers.write()[kind.index()].push(Arc::new(callback));
    }

    pub fn on_connect_succeeded<F>(&self, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::ConnectSucceeded, callback);
    }

    pub fn on_connect_failed<F>(&self, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::ConnectFailed, callback);
    }

    pub fn on_message_received<F>(&self, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::MessageReceived, callback);
    }

    pub fn on_message_sent<F>(&self, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::MessageSent, callback);
    }

    pub fn on_new_connection<F>(&self, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::NewConnection, callback);
    }

    pub fn on_connection_closed<F>(&self, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::ConnectionClosed, callback);
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers.read()[kind.index()].len()
    }

    /// Total subscriber panics observed since creation.
    pub fn fault_count(&self) -> u64 {
        self.fault_count.load(Ordering::Relaxed)
    }

    /// Deliver `event` to every subscriber of `event.kind`.
    pub fn publish(&self, event: &Event) -> DispatchReport {
        // Snapshot so subscribers may subscribe from inside a callback.
        let subscribers: Vec<Subscriber> = self.subscribers.read()[event.kind.index()].clone();

        let mut report = DispatchReport::default();
        for (position, subscriber) in subscribers.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| subscriber(event))) {
                Ok(()) => report.delivered += 1,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(
                        "Subscriber {} for {} event from {} panicked: {}",
                        position, event.kind, event.remote, message
                    );
                    self.fault_count.fetch_add(1, Ordering::Relaxed);
                    report.faults.push(SubscriberFault { position, message });
                }
            }
        }

        report
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::ConnectionId;
    use crate::core::event::{EngineRole, EventSource};
    use crate::domain::endpoint::Endpoint;
    use parking_lot::Mutex;

    fn event(kind: EventKind) -> Event {
        Event::lifecycle(
            kind,
            EventSource::new(EngineRole::Client),
            Endpoint::new("127.0.0.1", 1234),
            Some(ConnectionId(1)),
        )
    }

    #[test]
    fn test_publish_in_registration_order() {
        let dispatcher = EventDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            dispatcher.on_connection_closed(move |_| order.lock().push(i));
        }

        let report = dispatcher.publish(&event(EventKind::ConnectionClosed));
        assert_eq!(report.delivered, 3);
        assert!(report.is_clean());
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_publish_only_reaches_matching_category() {
        let dispatcher = EventDispatcher::new();
        let hits = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&hits);
        dispatcher.on_new_connection(move |_| *counter.lock() += 1);

        dispatcher.publish(&event(EventKind::ConnectionClosed));
        assert_eq!(*hits.lock(), 0);

        dispatcher.publish(&event(EventKind::NewConnection));
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn test_duplicate_subscribers_are_kept() {
        let dispatcher = EventDispatcher::new();
        let hits = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&hits);
        let callback = move |_: &Event| *counter.lock() += 1;
        dispatcher.on_connect_succeeded(callback.clone());
        dispatcher.on_connect_succeeded(callback);

        assert_eq!(dispatcher.subscriber_count(EventKind::ConnectSucceeded), 2);
        dispatcher.publish(&event(EventKind::ConnectSucceeded));
        assert_eq!(*hits.lock(), 2);
    }

    #[test]
    fn test_panicking_subscriber_does_not_stop_others() {
        let dispatcher = EventDispatcher::new();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&hits);
        dispatcher.on_message_sent(move |_| first.lock().push("first"));
        dispatcher.on_message_sent(|_| panic!("subscriber blew up"));
        let last = Arc::clone(&hits);
        dispatcher.on_message_sent(move |_| last.lock().push("last"));

        let report = dispatcher.publish(&event(EventKind::MessageSent));

        assert_eq!(*hits.lock(), vec!["first", "last"]);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].position, 1);
        assert!(report.faults[0].message.contains("blew up"));
        assert_eq!(dispatcher.fault_count(), 1);
    }

    #[test]
    fn test_subscribe_from_inside_callback() {
        let dispatcher = Arc::new(EventDispatcher::new());

        let inner = Arc::clone(&dispatcher);
        dispatcher.on_connect_failed(move |_| inner.on_connect_failed(|_| {}));

        let report = dispatcher.publish(&event(EventKind::ConnectFailed));
        assert_eq!(report.delivered, 1);
        assert_eq!(dispatcher.subscriber_count(EventKind::ConnectFailed), 2);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let dispatcher = EventDispatcher::new();
        let report = dispatcher.publish(&event(EventKind::MessageReceived));
        assert_eq!(report, DispatchReport::default());
    }
}
