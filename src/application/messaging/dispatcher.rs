//! Event dispatcher - Routes named events to plugin listeners
//!
//! Each plugin instance owns one dispatcher. Listener invocations are
//! spawned as independent fire-and-forget tasks: the dispatcher returns
//! before any listener completes, so a slow or hanging plugin never blocks
//! delivery to its siblings or to the host loop. No ordering beyond
//! submission order is guaranteed, and nothing is awaited for completion.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::application::errors::PluginError;
use crate::domain::entities::MessageView;

/// Payload carried by a dispatched event
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// `message` and its platform-qualified variants
    Message(MessageView),
    /// `state_update`
    State(bool),
    /// `spec_update`
    Spec(serde_json::Value),
    /// `will_unload` and other payload-free events
    None,
}

/// Future returned by a listener
pub type ListenerFuture = Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send>>;

/// Listener function type
pub type Listener = Arc<dyn Fn(EventPayload) -> ListenerFuture + Send + Sync>;

struct RegisteredListener {
    owner: String,
    callback: Listener,
}

/// Per-plugin event-name → listener routing table
pub struct EventDispatcher {
    plugin: String,
    handle: tokio::runtime::Handle,
    activity: ActivityTracker,
    listeners: Mutex<HashMap<String, Vec<RegisteredListener>>>,
}

impl EventDispatcher {
    pub fn new(
        plugin: impl Into<String>,
        handle: tokio::runtime::Handle,
        activity: ActivityTracker,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            handle,
            activity,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Register a listener under an owner key. Everything one owner
    /// registers is removed together by [`remove_owner`](Self::remove_owner),
    /// which is what makes reload a bulk deregister instead of in-place
    /// patching.
    pub fn add_listener(&self, owner: impl Into<String>, event: impl Into<String>, callback: Listener) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners
            .entry(event.into())
            .or_default()
            .push(RegisteredListener {
                owner: owner.into(),
                callback,
            });
    }

    /// Remove every listener registered under `owner`.
    pub fn remove_owner(&self, owner: &str) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for entries in listeners.values_mut() {
            entries.retain(|l| l.owner != owner);
        }
        listeners.retain(|_, entries| !entries.is_empty());
    }

    /// Number of listeners currently registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.get(event).map(|l| l.len()).unwrap_or(0)
    }

    /// Fan an event out to its listeners, one task per listener. A failing
    /// listener is logged under this plugin's name and dropped; it cannot
    /// cross into the dispatcher's own control flow.
    pub fn emit(&self, event: &str, payload: EventPayload) {
        let callbacks: Vec<Listener> = {
            let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            match listeners.get(event) {
                Some(entries) => entries.iter().map(|l| l.callback.clone()).collect(),
                None => return,
            }
        };

        for callback in callbacks {
            let plugin = self.plugin.clone();
            let label = format!("{}::{}", plugin, event);
            let activity = self.activity.clone();
            let payload = payload.clone();
            self.handle.spawn(async move {
                let _span = activity.enter(label);
                if let Err(e) = callback(payload).await {
                    tracing::warn!("listener error in plugin {}: {}", plugin, e);
                }
            });
        }
    }
}

/// Records which listener the scheduler is currently executing
///
/// The generation counter distinguishes "the same listener is still on the
/// CPU" from "the same listener ran again"; the liveness monitor compares
/// snapshots across probes to tell a persistent stall from fresh work.
#[derive(Clone, Default)]
pub struct ActivityTracker {
    inner: Arc<ActivityInner>,
}

#[derive(Default)]
struct ActivityInner {
    seq: AtomicU64,
    current: Mutex<Option<ActivitySnapshot>>,
}

/// What the scheduler was doing at one instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivitySnapshot {
    pub seq: u64,
    pub label: String,
}

impl ActivityTracker {
    /// Mark `label` as the executing activity until the guard drops.
    pub fn enter(&self, label: impl Into<String>) -> ActivityGuard {
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = ActivitySnapshot {
            seq,
            label: label.into(),
        };
        let mut current = self.inner.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = Some(snapshot);
        ActivityGuard {
            inner: self.inner.clone(),
            seq,
        }
    }

    pub fn snapshot(&self) -> Option<ActivitySnapshot> {
        let current = self.inner.current.lock().unwrap_or_else(|e| e.into_inner());
        current.clone()
    }
}

pub struct ActivityGuard {
    inner: Arc<ActivityInner>,
    seq: u64,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        let mut current = self.inner.current.lock().unwrap_or_else(|e| e.into_inner());
        if current.as_ref().map(|s| s.seq) == Some(self.seq) {
            *current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_listener(counter: Arc<AtomicUsize>) -> Listener {
        Arc::new(move |_payload| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn emit_runs_each_listener_once() {
        let dispatcher = EventDispatcher::new(
            "test",
            tokio::runtime::Handle::current(),
            ActivityTracker::default(),
        );
        let counter = Arc::new(AtomicUsize::new(0));
        dispatcher.add_listener("owner", "ping", counting_listener(counter.clone()));
        dispatcher.add_listener("owner", "ping", counting_listener(counter.clone()));

        dispatcher.emit("ping", EventPayload::None);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_listener_does_not_stop_siblings() {
        let dispatcher = EventDispatcher::new(
            "test",
            tokio::runtime::Handle::current(),
            ActivityTracker::default(),
        );
        let counter = Arc::new(AtomicUsize::new(0));
        dispatcher.add_listener(
            "owner",
            "ping",
            Arc::new(|_| {
                Box::pin(async { Err(PluginError::Listener("boom".to_string())) })
            }),
        );
        dispatcher.add_listener("owner", "ping", counting_listener(counter.clone()));

        dispatcher.emit("ping", EventPayload::None);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remove_owner_is_a_bulk_deregister() {
        let dispatcher = EventDispatcher::new(
            "test",
            tokio::runtime::Handle::current(),
            ActivityTracker::default(),
        );
        let counter = Arc::new(AtomicUsize::new(0));
        dispatcher.add_listener("a", "ping", counting_listener(counter.clone()));
        dispatcher.add_listener("a", "pong", counting_listener(counter.clone()));
        dispatcher.add_listener("b", "ping", counting_listener(counter.clone()));

        dispatcher.remove_owner("a");
        assert_eq!(dispatcher.listener_count("ping"), 1);
        assert_eq!(dispatcher.listener_count("pong"), 0);
    }

    #[test]
    fn activity_snapshot_follows_guard() {
        let tracker = ActivityTracker::default();
        assert!(tracker.snapshot().is_none());

        let guard = tracker.enter("plugin::message");
        let snap = tracker.snapshot().unwrap();
        assert_eq!(snap.label, "plugin::message");
        drop(guard);
        assert!(tracker.snapshot().is_none());
    }

    #[test]
    fn stale_guard_does_not_clear_newer_activity() {
        let tracker = ActivityTracker::default();
        let first = tracker.enter("first");
        let _second = tracker.enter("second");
        drop(first);
        assert_eq!(tracker.snapshot().unwrap().label, "second");
    }
}
