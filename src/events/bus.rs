//! Typed publish/subscribe keyed by event kind.
//!
//! `subscribe` returns a [`Subscription`] handle. Dropping the handle (or
//! calling [`Subscription::unsubscribe`]) removes the handler. The handle only
//! holds a weak reference to the bus, so it may outlive it.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::CallbackQueue;

/// An event that can be routed by kind.
pub trait Event: Clone + Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync + 'static>;

struct Registry<E: Event> {
    next_id: u64,
    handlers: HashMap<E::Kind, Vec<(u64, Handler<E>)>>,
}

impl<E: Event> Registry<E> {
    fn remove(&mut self, kind: E::Kind, id: u64) {
        if let Some(list) = self.handlers.get_mut(&kind) {
            list.retain(|(handler_id, _)| *handler_id != id);
            if list.is_empty() {
                self.handlers.remove(&kind);
            }
        }
    }
}

/// Routes published events to the handlers subscribed to their kind.
///
/// Handlers run on the [`CallbackQueue`], in publish order.
pub struct EventBus<E: Event> {
    registry: Arc<Mutex<Registry<E>>>,
    callbacks: CallbackQueue,
}

impl<E: Event> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            callbacks: self.callbacks.clone(),
        }
    }
}

impl<E: Event> EventBus<E> {
    pub fn new(callbacks: CallbackQueue) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 1,
                handlers: HashMap::new(),
            })),
            callbacks,
        }
    }

    /// Register `handler` for events of `kind`.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, kind: E::Kind, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            let id = registry.next_id;
            registry.next_id += 1;
            registry
                .handlers
                .entry(kind)
                .or_default()
                .push((id, Arc::new(handler)));
            id
        };
        tracing::trace!(?kind, id, "subscribed");

        let registry: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.registry);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(kind, id);
                }
            })),
        }
    }

    /// Deliver `event` to every handler currently subscribed to its kind.
    ///
    /// The handler list is snapshotted here; delivery happens later on the
    /// callback queue, outside the registry lock.
    pub fn publish(&self, event: E) {
        let handlers: Vec<Handler<E>> = {
            let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            match registry.handlers.get(&event.kind()) {
                Some(list) => list.iter().map(|(_, h)| h.clone()).collect(),
                None => return,
            }
        };

        self.callbacks.dispatch(move || {
            for handler in &handlers {
                handler(&event);
            }
        });
    }

    /// Number of handlers subscribed to `kind`.
    pub fn subscriber_count(&self, kind: E::Kind) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

/// Handle returned by [`EventBus::subscribe`].
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Subscription {
    /// Remove the handler now.
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    /// Keep the handler registered for the lifetime of the bus.
    pub fn detach(mut self) {
        self.remove = None;
    }

    fn cancel(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::spawn_callback_queue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    enum Ping {
        A(u32),
        B,
    }

    impl Event for Ping {
        type Kind = u8;

        fn kind(&self) -> u8 {
            match self {
                Ping::A(_) => 0,
                Ping::B => 1,
            }
        }
    }

    async fn settle(task: tokio::task::JoinHandle<()>) {
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_routes_by_kind() {
        let (queue, task) = spawn_callback_queue();
        let bus = EventBus::<Ping>::new(queue);

        let sum = Arc::new(AtomicUsize::new(0));
        let b_count = Arc::new(AtomicUsize::new(0));

        let s = sum.clone();
        let _a = bus.subscribe(0, move |e| {
            if let Ping::A(n) = e {
                s.fetch_add(*n as usize, Ordering::SeqCst);
            }
        });
        let b = b_count.clone();
        let _b = bus.subscribe(1, move |_| {
            b.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Ping::A(5));
        bus.publish(Ping::A(7));
        bus.publish(Ping::B);

        drop(_a);
        drop(_b);
        drop(bus);
        settle(task).await;

        assert_eq!(sum.load(Ordering::SeqCst), 12);
        assert_eq!(b_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let (queue, task) = spawn_callback_queue();
        let bus = EventBus::<Ping>::new(queue);
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let sub = bus.subscribe(1, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.subscriber_count(1), 1);

        drop(sub);
        assert_eq!(bus.subscriber_count(1), 0);

        bus.publish(Ping::B);
        drop(bus);
        settle(task).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_explicit_unsubscribe_and_detach() {
        let (queue, _task) = spawn_callback_queue();
        let bus = EventBus::<Ping>::new(queue);

        let first = bus.subscribe(0, |_| {});
        let second = bus.subscribe(0, |_| {});
        assert_eq!(bus.subscriber_count(0), 2);

        first.unsubscribe();
        second.detach();
        assert_eq!(bus.subscriber_count(0), 1);
    }

    #[tokio::test]
    async fn test_subscription_outlives_bus() {
        let (queue, _task) = spawn_callback_queue();
        let bus = EventBus::<Ping>::new(queue);
        let sub = bus.subscribe(0, |_| {});

        drop(bus);
        sub.unsubscribe();
    }
}
