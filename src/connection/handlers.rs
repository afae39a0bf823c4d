//! Per-variant inbound event handlers

use seller_socket_shared::{DirectMessage, InboundEvent, Role, RoleBroadcast};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

pub(crate) type Handler<T> = Arc<dyn Fn(T) + Send + Sync>;

/// One handler per inbound variant; registering again replaces it
#[derive(Default)]
pub(crate) struct EventHandlers {
    direct: Option<Handler<DirectMessage>>,
    broadcasts: HashMap<Role, Handler<RoleBroadcast>>,
}

impl EventHandlers {
    pub fn set_direct(&mut self, handler: Option<Handler<DirectMessage>>) {
        self.direct = handler;
    }

    pub fn set_broadcast(&mut self, role: Role, handler: Option<Handler<RoleBroadcast>>) {
        match handler {
            Some(handler) => {
                self.broadcasts.insert(role, handler);
            }
            None => {
                self.broadcasts.remove(&role);
            }
        }
    }

    pub fn clear(&mut self) {
        self.direct = None;
        self.broadcasts.clear();
    }

    /// Resolve the handler for an event, so it can be invoked outside the lock
    pub fn route(&self, event: InboundEvent) -> Option<Route> {
        match event {
            InboundEvent::DirectMessageReceived(dm) => {
                self.direct.clone().map(|h| Route::Direct(h, dm))
            }
            InboundEvent::RoleBroadcast(b) => self
                .broadcasts
                .get(&b.role)
                .cloned()
                .map(|h| Route::Broadcast(h, b)),
        }
    }
}

/// An event paired with the handler that will receive it
pub(crate) enum Route {
    Direct(Handler<DirectMessage>, DirectMessage),
    Broadcast(Handler<RoleBroadcast>, RoleBroadcast),
}

impl Route {
    /// Invoke the handler. A panicking handler is logged, not propagated.
    pub fn deliver(self) {
        let result = match self {
            Route::Direct(handler, dm) => panic::catch_unwind(AssertUnwindSafe(|| handler(dm))),
            Route::Broadcast(handler, b) => panic::catch_unwind(AssertUnwindSafe(|| handler(b))),
        };
        if result.is_err() {
            error!("Inbound event handler panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn broadcast(role: Role) -> InboundEvent {
        InboundEvent::RoleBroadcast(RoleBroadcast {
            role,
            message: "hello".into(),
            from: "ops".into(),
            timestamp: "2024-03-01T00:00:00Z".into(),
        })
    }

    #[test]
    fn test_routes_by_role() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut handlers = EventHandlers::default();

        let sink = seen.clone();
        handlers.set_broadcast(
            Role::Seller,
            Some(Arc::new(move |b: RoleBroadcast| sink.lock().unwrap().push(b.role))),
        );

        handlers.route(broadcast(Role::Seller)).unwrap().deliver();
        assert!(handlers.route(broadcast(Role::Admin)).is_none());
        assert_eq!(*seen.lock().unwrap(), vec![Role::Seller]);
    }

    #[test]
    fn test_clear_removes_all() {
        let mut handlers = EventHandlers::default();
        handlers.set_broadcast(Role::Admin, Some(Arc::new(|_| {})));
        handlers.set_direct(Some(Arc::new(|_| {})));
        handlers.clear();
        assert!(handlers.route(broadcast(Role::Admin)).is_none());
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let mut handlers = EventHandlers::default();
        handlers.set_broadcast(Role::Customer, Some(Arc::new(|_| panic!("boom"))));
        handlers.route(broadcast(Role::Customer)).unwrap().deliver();
    }
}
