//! Push-event fan-out.

use overseer_protocol::{EventFrame, is_system_event};

use crate::listeners::{ListenerHandle, ListenerSet};

/// Where a dispatched event goes after the raw listeners have seen it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Connection bookkeeping (`health`, `tick`, `presence`); updates the
    /// gateway snapshot only.
    System,
    /// Forwarded to the normalizer.
    Domain,
}

/// Fans every inbound event frame out to raw listeners, then classifies it.
pub struct EventDispatcher {
    listeners: ListenerSet<EventFrame>,
}

impl EventDispatcher {
    /// Empty dispatcher.
    pub fn new() -> Self {
        Self {
            listeners: ListenerSet::new(),
        }
    }

    /// Register a raw listener. It sees every frame, system events included.
    pub fn subscribe(
        &self,
        listener: impl Fn(&EventFrame) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.listeners.add(listener)
    }

    /// Deliver `frame` to every listener and return its route.
    #[must_use]
    pub fn dispatch(&self, frame: &EventFrame) -> Route {
        self.listeners.emit(frame);
        if is_system_event(&frame.event) {
            Route::System
        } else {
            Route::Domain
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
