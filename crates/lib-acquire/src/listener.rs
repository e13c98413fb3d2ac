//! Delivery of completed traces to registered consumers.

use lib_types::Trace;
use std::sync::Arc;

/// Consumer of completed traces.
pub trait TraceListener: Send {
    fn insert_trace(&mut self, trace: Arc<Trace>);
}

impl<F> TraceListener for F
where
    F: FnMut(Arc<Trace>) + Send,
{
    fn insert_trace(&mut self, trace: Arc<Trace>) {
        self(trace)
    }
}

/// Token returned by [`ListenerRegistry::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

/// Set of listeners, notified in registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    listeners: Vec<(ListenerHandle, Box<dyn TraceListener>)>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener; it stays registered until unregistered or the
    /// registry is dropped.
    pub fn register(&mut self, listener: impl TraceListener + 'static) -> ListenerHandle {
        let handle = ListenerHandle(self.next_id);
        self.next_id += 1;
        self.listeners.push((handle, Box::new(listener)));
        handle
    }

    /// Remove a listener. Returns `false` if the handle was not registered.
    pub fn unregister(&mut self, handle: ListenerHandle) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(h, _)| *h != handle);
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Hand `trace` to every listener.
    pub fn notify(&mut self, trace: &Arc<Trace>) {
        for (_, listener) in self.listeners.iter_mut() {
            listener.insert_trace(Arc::clone(trace));
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_types::Seconds;
    use std::sync::Mutex;

    #[test]
    fn test_register_notify_unregister() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();

        let sink = Arc::clone(&received);
        let first = registry.register(move |tr: Arc<Trace>| {
            sink.lock().unwrap().push(("first", tr.data_len()));
        });
        let sink = Arc::clone(&received);
        registry.register(move |tr: Arc<Trace>| {
            sink.lock().unwrap().push(("second", tr.data_len()));
        });

        let tr = Arc::new(Trace::new(Seconds(0.0), Seconds(1.0), vec![1.0; 3]));
        registry.notify(&tr);
        assert!(registry.unregister(first));
        assert!(!registry.unregister(first));
        registry.notify(&tr);

        assert_eq!(
            *received.lock().unwrap(),
            vec![("first", 3), ("second", 3), ("second", 3)]
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_shared_trace_is_not_copied() {
        let mut registry = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        registry.register(move |tr: Arc<Trace>| {
            *sink.lock().unwrap() = Some(tr);
        });

        let tr = Arc::new(Trace::new(Seconds(0.0), Seconds(1.0), vec![2.0]));
        registry.notify(&tr);
        let stored = seen.lock().unwrap().clone().unwrap();
        assert!(Arc::ptr_eq(&stored, &tr));
    }
}
