use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use tracing::{error, warn};

use super::filter::ListenerFilter;
use crate::core::{EventKind, GatewayError, GatewayEvent, GatewayResult};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type ListenerResult = Result<(), BoxError>;
pub type ListenerFuture = Pin<Box<dyn Future<Output = ListenerResult> + Send>>;

type Callback = Arc<dyn Fn(Arc<GatewayEvent>) -> ListenerFuture + Send + Sync>;

/// Handle returned at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Registration parameters.
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    pub filter: ListenerFilter,
    /// `None` means unlimited.
    pub max_trigger: Option<u32>,
}

impl RegisterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: ListenerFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn max_trigger(mut self, max_trigger: u32) -> Self {
        self.max_trigger = Some(max_trigger);
        self
    }

    pub fn once() -> Self {
        Self::default().max_trigger(1)
    }
}

/// Point-in-time view of one registered listener.
#[derive(Debug, Clone)]
pub struct ListenerInfo {
    pub id: ListenerId,
    pub kind: EventKind,
    pub trigger_count: u32,
    pub max_trigger: Option<u32>,
}

struct ListenerEntry {
    id: ListenerId,
    callback: Callback,
    filter: ListenerFilter,
    trigger_count: u32,
    max_trigger: Option<u32>,
}

impl ListenerEntry {
    fn exhausted(&self) -> bool {
        self.max_trigger
            .is_some_and(|max| self.trigger_count >= max)
    }

    fn info(&self, kind: EventKind) -> ListenerInfo {
        ListenerInfo {
            id: self.id,
            kind,
            trigger_count: self.trigger_count,
            max_trigger: self.max_trigger,
        }
    }
}

/// Per-client table of listeners keyed by event kind.
///
/// Dispatch order is registration order. Callbacks run as independent tokio tasks; `dispatch`
/// never waits for them, and a failing or panicking callback is logged and otherwise ignored.
pub struct ListenerRegistry {
    entries: Mutex<HashMap<EventKind, Vec<ListenerEntry>>>,
    self_id: RwLock<Option<u64>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            self_id: RwLock::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a listener. Conflicting filter flags or a zero trigger budget are rejected here,
    /// before any event can reach the listener.
    pub fn register<F, Fut>(
        &self,
        kind: EventKind,
        options: RegisterOptions,
        callback: F,
    ) -> GatewayResult<ListenerId>
    where
        F: Fn(Arc<GatewayEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        options.filter.validate()?;
        if options.max_trigger == Some(0) {
            return Err(GatewayError::InvalidListenerConfig(
                "max_trigger must be at least 1".to_string(),
            ));
        }

        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let callback: Callback =
            Arc::new(move |event: Arc<GatewayEvent>| -> ListenerFuture { Box::pin(callback(event)) });
        self.entries
            .lock()
            .entry(kind)
            .or_default()
            .push(ListenerEntry {
                id,
                callback,
                filter: options.filter,
                trigger_count: 0,
                max_trigger: options.max_trigger,
            });
        Ok(id)
    }

    /// Add a listener that fires at most once and is then removed.
    pub fn register_once<F, Fut>(
        &self,
        kind: EventKind,
        filter: ListenerFilter,
        callback: F,
    ) -> GatewayResult<ListenerId>
    where
        F: Fn(Arc<GatewayEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        self.register(kind, RegisterOptions::once().filter(filter), callback)
    }

    /// Fan `event` out to every matching listener and return how many were scheduled.
    ///
    /// Must be called inside a tokio runtime.
    pub fn dispatch(&self, event: GatewayEvent) -> usize {
        let kind = event.kind;
        let self_id = self.self_id();

        // Filters may run user predicates; evaluate them without holding the table lock.
        let candidates: Vec<(ListenerId, ListenerFilter)> = {
            let entries = self.entries.lock();
            let Some(list) = entries.get(&kind) else {
                return 0;
            };
            list.iter()
                .filter(|entry| !entry.exhausted())
                .map(|entry| (entry.id, entry.filter.clone()))
                .collect()
        };
        let matched: Vec<ListenerId> = candidates
            .into_iter()
            .filter(|(id, filter)| {
                // A panicking predicate counts as a miss for that listener only.
                let outcome =
                    std::panic::catch_unwind(AssertUnwindSafe(|| filter.matches(&event, self_id)));
                match outcome {
                    Ok(matched) => matched,
                    Err(_) => {
                        warn!(listener = %id, event = kind.name(), "listener filter panicked");
                        false
                    }
                }
            })
            .map(|(id, _)| id)
            .collect();
        if matched.is_empty() {
            return 0;
        }

        // Reserve budget and snapshot callbacks in one critical section.
        let scheduled: Vec<(ListenerId, Callback)> = {
            let mut entries = self.entries.lock();
            let Some(list) = entries.get_mut(&kind) else {
                return 0;
            };
            let mut scheduled = Vec::with_capacity(matched.len());
            for entry in list.iter_mut() {
                if entry.exhausted() || !matched.contains(&entry.id) {
                    continue;
                }
                entry.trigger_count = entry.trigger_count.saturating_add(1);
                scheduled.push((entry.id, Arc::clone(&entry.callback)));
            }
            list.retain(|entry| !entry.exhausted());
            if list.is_empty() {
                entries.remove(&kind);
            }
            scheduled
        };

        let count = scheduled.len();
        let event = Arc::new(event);
        for (id, callback) in scheduled {
            let event = Arc::clone(&event);
            tokio::spawn(async move {
                let outcome = AssertUnwindSafe(async move { callback(event).await })
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(listener = %id, event = kind.name(), error = %err, "listener failed")
                    }
                    Err(_) => error!(listener = %id, event = kind.name(), "listener panicked"),
                }
            });
        }
        count
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let mut removed = false;
        entries.retain(|_, list| {
            let before = list.len();
            list.retain(|entry| entry.id != id);
            removed |= list.len() != before;
            !list.is_empty()
        });
        removed
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.entries
            .lock()
            .values()
            .any(|list| list.iter().any(|entry| entry.id == id))
    }

    pub fn trigger_count(&self, id: ListenerId) -> Option<u32> {
        self.entries
            .lock()
            .values()
            .flat_map(|list| list.iter())
            .find(|entry| entry.id == id)
            .map(|entry| entry.trigger_count)
    }

    pub fn listeners_for(&self, kind: EventKind) -> Vec<ListenerInfo> {
        self.entries
            .lock()
            .get(&kind)
            .map(|list| list.iter().map(|entry| entry.info(kind)).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Account id used by `ignore_self` filters.
    pub fn set_self_id(&self, id: Option<u64>) {
        *self.self_id.write() = id;
    }

    pub fn self_id(&self) -> Option<u64> {
        *self.self_id.read()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .field("self_id", &self.self_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EventAuthor;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn message(guild_id: Option<u64>, author_id: u64) -> GatewayEvent {
        let mut event = GatewayEvent::lifecycle(EventKind::MessageCreate);
        event.guild_id = guild_id;
        event.author = Some(EventAuthor {
            id: author_id,
            bot: false,
        });
        event
    }

    fn recorder(
        tx: mpsc::UnboundedSender<&'static str>,
        tag: &'static str,
    ) -> impl Fn(Arc<GatewayEvent>) -> futures_util::future::Ready<ListenerResult> + Send + Sync + 'static
    {
        move |_event| {
            let _ = tx.send(tag);
            futures_util::future::ready(Ok(()))
        }
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<&'static str>) -> Vec<&'static str> {
        let mut seen = Vec::new();
        while let Ok(Some(tag)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await
        {
            seen.push(tag);
        }
        seen.sort_unstable();
        seen
    }

    #[tokio::test]
    async fn trigger_budget_caps_invocations() {
        let registry = ListenerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = registry
            .register(
                EventKind::MessageCreate,
                RegisterOptions::new().max_trigger(3),
                recorder(tx, "budgeted"),
            )
            .unwrap();

        let mut scheduled = 0;
        for _ in 0..5 {
            scheduled += registry.dispatch(message(None, 1));
        }
        assert_eq!(scheduled, 3);
        assert_eq!(drain(&mut rx).await.len(), 3);
        assert!(!registry.contains(id));
    }

    #[tokio::test]
    async fn once_listener_fires_once_and_is_removed() {
        let registry = ListenerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = registry
            .register_once(
                EventKind::MessageCreate,
                ListenerFilter::new(),
                recorder(tx, "once"),
            )
            .unwrap();

        assert_eq!(registry.dispatch(message(None, 1)), 1);
        assert!(!registry.contains(id));
        assert!(registry.listeners_for(EventKind::MessageCreate).is_empty());
        assert_eq!(registry.dispatch(message(None, 1)), 0);
        assert_eq!(drain(&mut rx).await, vec!["once"]);
    }

    #[tokio::test]
    async fn conflicting_filter_is_rejected_at_registration() {
        let registry = ListenerRegistry::new();
        let result = registry.register(
            EventKind::MessageCreate,
            RegisterOptions::new().filter(ListenerFilter::new().guild_only().dms_only()),
            |_event| async { Ok(()) },
        );
        assert!(matches!(result, Err(GatewayError::InvalidListenerConfig(_))));

        let zero = registry.register(
            EventKind::MessageCreate,
            RegisterOptions::new().max_trigger(0),
            |_event| async { Ok(()) },
        );
        assert!(zero.is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn filtered_out_events_do_not_spend_budget() {
        let registry = ListenerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let guild_tx = tx.clone();
        let guild = registry
            .register(
                EventKind::MessageCreate,
                RegisterOptions::once().filter(ListenerFilter::new().guild_only()),
                recorder(guild_tx, "guild"),
            )
            .unwrap();
        registry
            .register(
                EventKind::MessageCreate,
                RegisterOptions::new().filter(ListenerFilter::new().dms_only()),
                recorder(tx, "dm"),
            )
            .unwrap();

        assert_eq!(registry.dispatch(message(None, 1)), 1);
        assert_eq!(registry.trigger_count(guild), Some(0));
        assert_eq!(drain(&mut rx).await, vec!["dm"]);
    }

    #[tokio::test]
    async fn failing_and_panicking_listeners_are_isolated() {
        let registry = ListenerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry
            .register(EventKind::MessageCreate, RegisterOptions::new(), |_event| async {
                Err::<(), BoxError>("boom".into())
            })
            .unwrap();
        registry
            .register(
                EventKind::MessageCreate,
                RegisterOptions::new(),
                |_event| -> futures_util::future::Ready<ListenerResult> {
                    panic!("listener bug")
                },
            )
            .unwrap();
        registry
            .register(
                EventKind::MessageCreate,
                RegisterOptions::new(),
                recorder(tx, "healthy"),
            )
            .unwrap();

        assert_eq!(registry.dispatch(message(None, 1)), 3);
        assert_eq!(drain(&mut rx).await, vec!["healthy"]);
        // Still registered and still dispatchable afterwards.
        assert_eq!(registry.dispatch(message(None, 1)), 3);
        assert_eq!(drain(&mut rx).await, vec!["healthy"]);
    }

    #[tokio::test]
    async fn panicking_filter_only_skips_its_own_listener() {
        let registry = ListenerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let faulty = registry
            .register(
                EventKind::MessageCreate,
                RegisterOptions::once().filter(ListenerFilter::new().with_predicate(|event| {
                    if event.author_id() == Some(2) {
                        panic!("filter bug");
                    }
                    true
                })),
                recorder(tx.clone(), "faulty"),
            )
            .unwrap();
        registry
            .register(
                EventKind::MessageCreate,
                RegisterOptions::new(),
                recorder(tx, "healthy"),
            )
            .unwrap();

        assert_eq!(registry.dispatch(message(None, 2)), 1);
        assert_eq!(drain(&mut rx).await, vec!["healthy"]);
        // The panic did not spend the once budget.
        assert_eq!(registry.trigger_count(faulty), Some(0));

        assert_eq!(registry.dispatch(message(None, 3)), 2);
        assert_eq!(drain(&mut rx).await, vec!["faulty", "healthy"]);
        assert!(!registry.contains(faulty));
    }

    #[tokio::test]
    async fn registering_from_a_callback_does_not_disturb_fan_out() {
        let registry = Arc::new(ListenerRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let inner_registry = Arc::clone(&registry);
        let inner_tx = tx.clone();
        registry
            .register(EventKind::MessageCreate, RegisterOptions::once(), move |_event| {
                let result = inner_registry.register(
                    EventKind::MessageCreate,
                    RegisterOptions::new(),
                    recorder(inner_tx.clone(), "late"),
                );
                async move { result.map(|_| ()).map_err(Into::into) }
            })
            .unwrap();
        registry
            .register(
                EventKind::MessageCreate,
                RegisterOptions::new(),
                recorder(tx, "steady"),
            )
            .unwrap();

        assert_eq!(registry.dispatch(message(None, 1)), 2);
        assert_eq!(drain(&mut rx).await, vec!["steady"]);
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.dispatch(message(None, 1)), 2);
        assert_eq!(drain(&mut rx).await, vec!["late", "steady"]);
    }

    #[tokio::test]
    async fn ignore_self_uses_known_identity() {
        let registry = ListenerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry
            .register(
                EventKind::MessageCreate,
                RegisterOptions::new().filter(ListenerFilter::new().ignore_self()),
                recorder(tx, "other"),
            )
            .unwrap();

        assert_eq!(registry.dispatch(message(None, 42)), 1);
        registry.set_self_id(Some(42));
        assert_eq!(registry.dispatch(message(None, 42)), 0);
        assert_eq!(registry.dispatch(message(None, 7)), 1);
        assert_eq!(drain(&mut rx).await.len(), 2);
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let registry = ListenerRegistry::new();
        let a = registry
            .register(EventKind::Ready, RegisterOptions::new(), |_event| async { Ok(()) })
            .unwrap();
        let b = registry
            .register(EventKind::MessageCreate, RegisterOptions::new(), |_event| async {
                Ok(())
            })
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(a));
        assert!(!registry.remove(a));
        assert!(registry.contains(b));

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.dispatch(GatewayEvent::lifecycle(EventKind::MessageCreate)), 0);
    }
}
