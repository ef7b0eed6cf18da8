//! Pool of reusable runtime events
//!
//! Stream-ordered allocators record an event per deferred free. Creating and
//! destroying runtime events on every free is slow, so events are recycled
//! through an [`EventPool`]. The pool is created once, before the first
//! device or pinned allocator is built.

use std::sync::{Arc, Mutex};

use crate::backend::{DeviceRuntime, RuntimeEvent};
use crate::error::MemResult;
use crate::memory::LeakPolicy;

/// Recycles runtime events
#[derive(Debug)]
pub struct EventPool {
    runtime: Arc<dyn DeviceRuntime>,
    free: Mutex<Vec<RuntimeEvent>>,
}

impl EventPool {
    pub fn new(runtime: Arc<dyn DeviceRuntime>) -> Self {
        Self {
            runtime,
            free: Mutex::new(Vec::new()),
        }
    }

    /// Take an event from the pool, creating one if the pool is empty
    pub fn acquire(self: &Arc<Self>) -> MemResult<PooledEvent> {
        let cached = self.free.lock()?.pop();
        let event = match cached {
            Some(event) => event,
            None => self.runtime.create_event()?,
        };
        Ok(PooledEvent {
            pool: Arc::clone(self),
            event: Some(event),
        })
    }

    /// Number of idle events kept for reuse
    pub fn idle(&self) -> usize {
        self.free.lock().map(|f| f.len()).unwrap_or(0)
    }

    fn recycle(&self, event: RuntimeEvent) {
        match self.free.lock() {
            Ok(mut free) => free.push(event),
            Err(e) => tracing::warn!("EventPool: dropping event {:?}: {}", event, e),
        }
    }
}

impl Drop for EventPool {
    fn drop(&mut self) {
        let events = match self.free.get_mut() {
            Ok(free) => std::mem::take(free),
            Err(poisoned) => std::mem::take(poisoned.into_inner()),
        };
        if LeakPolicy::for_runtime(&*self.runtime) == LeakPolicy::Detach {
            tracing::warn!(
                "EventPool: runtime unloading, abandoning {} event(s)",
                events.len()
            );
            return;
        }
        for event in events {
            // SAFETY: events in the free list came from create_event on this runtime
            if let Err(e) = unsafe { self.runtime.destroy_event(event) } {
                tracing::warn!("EventPool: failed to destroy event {:?}: {}", event, e);
            }
        }
    }
}

/// Event borrowed from an [`EventPool`]; returns to the pool on drop
#[derive(Debug)]
pub struct PooledEvent {
    pool: Arc<EventPool>,
    event: Option<RuntimeEvent>,
}

impl PooledEvent {
    pub fn raw(&self) -> Option<RuntimeEvent> {
        self.event
    }
}

impl Drop for PooledEvent {
    fn drop(&mut self) {
        if let Some(event) = self.event.take() {
            self.pool.recycle(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedRuntime;

    #[test]
    fn test_events_are_recycled() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let pool = Arc::new(EventPool::new(runtime.clone()));

        let first = pool.acquire().unwrap();
        let raw = first.raw();
        drop(first);
        assert_eq!(pool.idle(), 1);

        let second = pool.acquire().unwrap();
        assert_eq!(second.raw(), raw);
        assert_eq!(runtime.events_created(), 1);
    }

    #[test]
    fn test_pool_destroys_events_on_drop() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let pool = Arc::new(EventPool::new(runtime.clone()));
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        drop(a);
        drop(b);
        assert_eq!(runtime.live_events(), 2);

        drop(pool);
        assert_eq!(runtime.live_events(), 0);
    }

    #[test]
    fn test_pool_abandons_events_while_unloading() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let pool = Arc::new(EventPool::new(runtime.clone()));
        drop(pool.acquire().unwrap());

        runtime.set_unloading(true);
        drop(pool);
        assert_eq!(runtime.live_events(), 1);
    }
}
