//! Message Dispatcher
//!
//! Routes a decoded message to the first handler whose predicate matches,
//! or to the fallback when none do. Handlers produce a value instead of
//! acting on shared state, which keeps repeat deliveries of the same
//! message harmless.

use crate::domain::message::Message;

type Predicate = Box<dyn Fn(&Message) -> bool + Send + Sync>;
type Handler<T> = Box<dyn Fn(Message) -> T + Send + Sync>;

struct Route<T> {
    predicate: Predicate,
    handler: Handler<T>,
}

/// Ordered predicate/handler table with a fallback.
pub struct MessageDispatcher<T> {
    routes: Vec<Route<T>>,
    fallback: Handler<T>,
}

impl<T> MessageDispatcher<T> {
    /// Create a dispatcher with the handler used when no route matches.
    pub fn new<F>(fallback: F) -> Self
    where
        F: Fn(Message) -> T + Send + Sync + 'static,
    {
        Self {
            routes: Vec::new(),
            fallback: Box::new(fallback),
        }
    }

    /// Register a route. Routes are evaluated in registration order.
    pub fn put<P, H>(&mut self, predicate: P, handler: H) -> &mut Self
    where
        P: Fn(&Message) -> bool + Send + Sync + 'static,
        H: Fn(Message) -> T + Send + Sync + 'static,
    {
        self.routes.push(Route {
            predicate: Box::new(predicate),
            handler: Box::new(handler),
        });
        self
    }

    /// Invoke the first matching handler, or the fallback.
    pub fn find_match(&self, message: Message) -> T {
        match self.routes.iter().find(|route| (route.predicate)(&message)) {
            Some(route) => (route.handler)(message),
            None => (self.fallback)(message),
        }
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<T> std::fmt::Debug for MessageDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDispatcher")
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}
