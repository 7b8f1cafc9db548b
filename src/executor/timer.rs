use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::result::TimerError;
use crate::event::{Environment, EventBus, EventKind, InboundEvent};
use crate::value::Value;

struct TimerEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Delayed custom events, cancelable by id.
///
/// A fired timer publishes an [`EventKind::Timer`] event named after the
/// timer's event on the bus and forgets its id.
#[derive(Clone)]
pub struct TimerRegistry {
    timers: Arc<DashMap<String, TimerEntry>>,
    generation: Arc<AtomicU64>,
    events: Arc<EventBus>,
}

impl TimerRegistry {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            timers: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
            events,
        }
    }

    /// Schedules `event` after `delay`. Reusing the id of a pending timer
    /// replaces it.
    pub fn create(
        &self,
        id: Option<String>,
        delay: Duration,
        event: String,
        data: Value,
        environment: Environment,
    ) -> String {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        // The slot stays locked until the handle is stored, so a timer that
        // fires immediately cannot look for its entry before it exists.
        let slot = self.timers.entry(id.clone());

        let timers = self.timers.clone();
        let events = self.events.clone();
        let timer_id = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            timers.remove_if(&timer_id, |_, entry| entry.generation == generation);
            let mut fired = InboundEvent::new(EventKind::Timer, environment).with_data(data);
            fired.name = Some(event);
            debug!(timer = %timer_id, "Timer fired");
            if let Err(e) = events.publish(fired) {
                warn!(timer = %timer_id, "Failed to publish timer event: {}", e);
            }
        });

        let entry = TimerEntry { generation, handle };
        match slot {
            Entry::Occupied(mut occupied) => occupied.insert(entry).handle.abort(),
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
        id
    }

    /// Cancels a pending timer. Unknown and already fired timers are errors.
    pub fn cancel(&self, id: &str) -> Result<(), TimerError> {
        match self.timers.remove(id) {
            Some((_, entry)) if !entry.handle.is_finished() => {
                entry.handle.abort();
                debug!(timer = %id, "Timer cancelled");
                Ok(())
            }
            _ => Err(TimerError::TimerNotFound(id.to_string())),
        }
    }

    pub fn pending(&self) -> usize {
        self.timers
            .iter()
            .filter(|entry| !entry.value().handle.is_finished())
            .count()
    }

    pub fn cancel_all(&self) {
        for entry in self.timers.iter() {
            entry.value().handle.abort();
        }
        self.timers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_timer_fires_event() {
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let timers = TimerRegistry::new(bus.clone());
        let id = timers.create(
            None,
            Duration::from_millis(10),
            "reminder".into(),
            Value::from("tea"),
            Environment::default(),
        );
        assert_eq!(timers.pending(), 1);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Timer);
        assert_eq!(event.name(), "reminder");
        assert_eq!(event.data, Value::from("tea"));
        assert!(matches!(
            timers.cancel(&id),
            Err(TimerError::TimerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_pending_timer() {
        let bus = Arc::new(EventBus::new(8));
        let timers = TimerRegistry::new(bus);
        timers.create(
            Some("t1".into()),
            Duration::from_secs(60),
            "later".into(),
            Value::Null,
            Environment::default(),
        );
        assert!(timers.cancel("t1").is_ok());
        assert!(timers.cancel("t1").is_err());
        assert!(timers.cancel("unknown").is_err());
        assert_eq!(timers.pending(), 0);
    }

    #[tokio::test]
    async fn test_immediate_timers_leave_no_entries() {
        let bus = Arc::new(EventBus::new(64));
        let mut rx = bus.subscribe();
        let timers = TimerRegistry::new(bus.clone());
        for i in 0..20 {
            timers.create(
                Some(format!("t{}", i)),
                Duration::ZERO,
                "now".into(),
                Value::Null,
                Environment::default(),
            );
        }
        for _ in 0..20 {
            rx.recv().await.unwrap();
        }
        assert!(timers.timers.is_empty());
    }
}
