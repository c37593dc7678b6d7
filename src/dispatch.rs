//! Delivery of decoded [Event]s to persistent handlers and one-shot waiters.
//!
//! Every kind has exactly one persistent handler (a no-op until one is registered), spawned as
//! its own task for every event of that kind. Waiters are one-shot: the first live waiter whose
//! [Matcher] accepts an event is resolved with it and removed; the others keep waiting.

use std::collections::HashMap;
use std::error::Error;
use std::future::Future;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use log::{debug, warn};
use strum::IntoEnumIterator;
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::error::{DispatchError, WaitError};
use crate::event::{Event, EventKind, Value};

pub type BoxError = Box<dyn Error + Send + Sync>;
pub type HandlerResult = Result<(), BoxError>;

type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, HandlerResult> + Send + Sync>;
type Check = Box<dyn Fn(&Event) -> Result<bool, BoxError> + Send>;
type Promise = oneshot::Sender<Result<Event, WaitError>>;

/// Selects which event resolves a waiter: every field filter must be equal and the check,
/// if any, must return `Ok(true)`.
#[derive(Default)]
pub struct Matcher {
    filters: Vec<(String, Value)>,
    check: Option<Check>,
}

impl Matcher {
    pub fn new() -> Self {
        Matcher::default()
    }

    /// Requires the named field to equal `value`.
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.filters.push((name.to_string(), value.into()));
        self
    }

    /// Like [Matcher::field], skipped when `value` is `None`.
    pub fn field_opt<V: Into<Value>>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.field(name, value),
            None => self,
        }
    }

    /// Adds an arbitrary predicate. An `Err` or a panic fails the waiter that owns this matcher.
    pub fn check<F>(mut self, check: F) -> Self
    where
        F: Fn(&Event) -> Result<bool, BoxError> + Send + 'static,
    {
        self.check = Some(Box::new(check));
        self
    }

    fn validate(&self, kind: EventKind) -> Result<(), WaitError> {
        let names = kind.field_names();
        match self.filters.iter().find(|(name, _)| !names.iter().any(|known| *known == name.as_str())) {
            Some((name, _)) => Err(WaitError::UnknownField { kind: kind.into(), field: name.clone() }),
            None => Ok(()),
        }
    }

    pub fn matches(&self, event: &Event) -> Result<bool, BoxError> {
        let fields = event.fields();
        let filtered = self.filters.iter().all(|(name, expected)| {
            fields.iter().any(|(field, value)| *field == name.as_str() && value == expected)
        });
        match &self.check {
            Some(check) if filtered => check(event),
            _ => Ok(filtered),
        }
    }
}

struct Waiter {
    matcher: Matcher,
    promise: Promise,
}

impl Waiter {
    /// The receiving side is gone: timed out or its caller was dropped.
    fn is_expired(&self) -> bool {
        self.promise.is_closed()
    }
}

struct Tables {
    handlers: HashMap<EventKind, Handler>,
    waiters: HashMap<EventKind, Vec<Waiter>>,
    closed: bool,
}

/// Routes events to handlers and waiters. Clones share the same tables.
#[derive(Clone)]
pub struct Dispatcher {
    tables: Arc<Mutex<Tables>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn noop() -> Handler {
    Arc::new(|_: Event| -> BoxFuture<'static, HandlerResult> { Box::pin(async { Ok(()) }) })
}

impl Dispatcher {
    pub fn new() -> Self {
        let handlers = EventKind::iter().map(|kind| (kind, noop())).collect();
        let waiters = EventKind::iter().map(|kind| (kind, Vec::new())).collect();
        Dispatcher {
            tables: Arc::new(Mutex::new(Tables { handlers, waiters, closed: false })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // the tables stay consistent even if a holder panicked
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replaces the persistent handler of `kind`.
    pub fn register<F, Fut>(&self, kind: EventKind, callback: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |event: Event| -> BoxFuture<'static, HandlerResult> {
            Box::pin(callback(event))
        });
        self.lock().handlers.insert(kind, handler);
    }

    /// Same as [Dispatcher::register], with the kind given by name (e.g. `"flag_grabbed"`).
    pub fn register_named<F, Fut>(&self, kind: &str, handler: F) -> Result<(), DispatchError>
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let kind: EventKind = kind.parse()
            .map_err(|_| DispatchError::UnknownKind(kind.to_string()))?;
        self.register(kind, handler);
        Ok(())
    }

    /// Restores the no-op handler of `kind`.
    pub fn unregister(&self, kind: EventKind) {
        self.lock().handlers.insert(kind, noop());
    }

    /// Number of waiters of `kind` that can still be resolved.
    pub fn pending(&self, kind: EventKind) -> usize {
        self.lock().waiters.get(&kind)
            .map_or(0, |waiters| waiters.iter().filter(|w| !w.is_expired()).count())
    }

    /// Resolves the first matching waiter, then spawns the persistent handler.
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, event: Event) {
        let kind = event.kind();
        debug!("dispatching {event:?}");

        // checks are user code: run them without holding the lock
        let scanned = {
            let mut tables = self.lock();
            let waiters = tables.waiters.entry(kind).or_default();
            waiters.retain(|w| !w.is_expired());
            mem::take(waiters)
        };

        let mut kept = Vec::with_capacity(scanned.len());
        let mut resolved = false;
        for waiter in scanned {
            if resolved || waiter.is_expired() {
                if !waiter.is_expired() {
                    kept.push(waiter);
                }
                continue;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| waiter.matcher.matches(&event)))
                .unwrap_or_else(|_| Err("waiter check panicked".into()));
            match outcome {
                Ok(true) => resolved = waiter.promise.send(Ok(event.clone())).is_ok(),
                Ok(false) => kept.push(waiter),
                Err(err) => {
                    let _ = waiter.promise.send(Err(WaitError::Check(err)));
                }
            }
        }

        let (handler, orphans) = {
            let mut tables = self.lock();
            let closed = tables.closed;
            let waiters = tables.waiters.entry(kind).or_default();
            // waiters added while the scan ran go after the scanned ones
            let added = mem::replace(waiters, kept);
            waiters.extend(added);
            let orphans = if closed { mem::take(waiters) } else { Vec::new() };
            (tables.handlers.get(&kind).cloned().unwrap_or_else(noop), orphans)
        };
        // shut down while the scan ran
        for waiter in orphans {
            let _ = waiter.promise.send(Err(WaitError::Cancelled));
        }

        let task = tokio::spawn(handler(event));
        tokio::spawn(async move {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("{kind} handler failed: {err}"),
                Err(err) => warn!("{kind} handler panicked: {err}"),
            }
        });
    }

    /// Waits for the next event of `kind` accepted by `matcher`.
    ///
    /// Returns `Ok(None)` when `timeout_dur` elapses first; only this waiter is affected.
    pub async fn wait_for(&self, kind: EventKind, matcher: Matcher, timeout_dur: Option<Duration>) -> Result<Option<Event>, WaitError> {
        matcher.validate(kind)?;
        let (promise, receiver) = oneshot::channel();
        {
            let mut tables = self.lock();
            if tables.closed {
                return Err(WaitError::Cancelled);
            }
            let waiters = tables.waiters.entry(kind).or_default();
            waiters.retain(|w| !w.is_expired());
            waiters.push(Waiter { matcher, promise });
        }

        let outcome = match timeout_dur {
            Some(dur) => match timeout(dur, receiver).await {
                Ok(outcome) => outcome,
                Err(_) => return Ok(None),
            },
            None => receiver.await,
        };
        match outcome {
            Ok(result) => result.map(Some),
            Err(_) => Err(WaitError::Cancelled),
        }
    }

    /// Rejects every pending waiter; later [Dispatcher::wait_for] calls fail immediately.
    pub fn shutdown(&self) {
        let pending: Vec<Waiter> = {
            let mut tables = self.lock();
            tables.closed = true;
            tables.waiters.values_mut().flat_map(mem::take).collect()
        };
        for waiter in pending {
            let _ = waiter.promise.send(Err(WaitError::Cancelled));
        }
    }

    /// Accepts waiters again after a [Dispatcher::shutdown].
    pub fn reopen(&self) {
        self.lock().closed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    fn elim(killer: &str, victim: &str) -> Event {
        Event::Elimination {
            killer_nick: killer.into(),
            killer_weapon: "Spyder SE".into(),
            victim_nick: victim.into(),
            victim_weapon: "PGP".into(),
            suicide: false,
        }
    }

    /// Lets waiter tasks spawned by the test register themselves.
    async fn settle() {
        sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn waiter_gets_matching_event() {
        let dispatcher = Dispatcher::new();
        let waiting = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher.wait_for(EventKind::Elimination, Matcher::new().field("victim_nick", "X"), Some(Duration::from_secs(2))).await
            })
        };
        settle().await;
        dispatcher.dispatch(elim("A", "B"));
        dispatcher.dispatch(elim("A", "X"));
        let event = waiting.await.unwrap().unwrap();
        assert_eq!(event, Some(elim("A", "X")));
        assert_eq!(dispatcher.pending(EventKind::Elimination), 0);
    }

    #[tokio::test]
    async fn waiter_times_out_with_none() {
        let dispatcher = Dispatcher::new();
        let result = dispatcher.wait_for(EventKind::Elimination, Matcher::new().field("victim_nick", "X"), Some(Duration::from_millis(50))).await;
        assert!(matches!(result, Ok(None)));
        dispatcher.dispatch(elim("A", "X"));
        assert_eq!(dispatcher.pending(EventKind::Elimination), 0);
    }

    #[tokio::test]
    async fn only_first_matching_waiter_resolves() {
        let dispatcher = Dispatcher::new();
        let mut tasks = Vec::new();
        for _ in 0..2 {
            let dispatcher = dispatcher.clone();
            tasks.push(tokio::spawn(async move {
                dispatcher.wait_for(EventKind::RoundStarted, Matcher::new(), Some(Duration::from_millis(300))).await
            }));
            settle().await;
        }
        dispatcher.dispatch(Event::RoundStarted);
        let first = tasks.remove(0).await.unwrap().unwrap();
        let second = tasks.remove(0).await.unwrap().unwrap();
        assert_eq!(first, Some(Event::RoundStarted));
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn failing_check_only_hurts_its_waiter() {
        let dispatcher = Dispatcher::new();
        let failing = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let matcher = Matcher::new().check(|_| Err("boom".into()));
                dispatcher.wait_for(EventKind::Disconnected, matcher, None).await
            })
        };
        settle().await;
        let healthy = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let matcher = Matcher::new().check(|e| Ok(e.field("nick") == Some(Value::from("whoa"))));
                dispatcher.wait_for(EventKind::Disconnected, matcher, None).await
            })
        };
        settle().await;
        dispatcher.dispatch(Event::Disconnected { nick: "whoa".into() });
        assert!(matches!(failing.await.unwrap(), Err(WaitError::Check(_))));
        assert_eq!(healthy.await.unwrap().unwrap(), Some(Event::Disconnected { nick: "whoa".into() }));
    }

    #[tokio::test]
    async fn panicking_check_fails_its_waiter_only() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        dispatcher.register(EventKind::NameChanged, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), BoxError>(()) }
        });
        let panicking = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let matcher = Matcher::new().check(|_| panic!("bad check"));
                dispatcher.wait_for(EventKind::NameChanged, matcher, None).await
            })
        };
        settle().await;
        let healthy = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher.wait_for(EventKind::NameChanged, Matcher::new().field("new_nick", "b"), None).await
            })
        };
        settle().await;
        let event = Event::NameChanged { old_nick: "a".into(), new_nick: "b".into() };
        dispatcher.dispatch(event.clone());
        assert!(matches!(panicking.await.unwrap(), Err(WaitError::Check(_))));
        assert_eq!(healthy.await.unwrap().unwrap(), Some(event));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn flag_grab_and_drop_waiters_are_separate() {
        let dispatcher = Dispatcher::new();
        let grab = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher.wait_for(EventKind::FlagGrabbed, Matcher::new().field("nick", "whoa"), Some(Duration::from_millis(200))).await
            })
        };
        settle().await;
        dispatcher.dispatch(Event::FlagDropped { nick: "whoa".into() });
        assert_eq!(grab.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_filter_field_is_rejected() {
        let dispatcher = Dispatcher::new();
        let result = dispatcher.wait_for(EventKind::FlagDropped, Matcher::new().field("flag", "Red"), None).await;
        assert!(matches!(result, Err(WaitError::UnknownField { kind: "flag_dropped", .. })));
    }

    #[tokio::test]
    async fn handler_runs_for_every_event_and_can_be_replaced() {
        let dispatcher = Dispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tx_first = tx.clone();
        dispatcher.register(EventKind::MapChanged, move |event| {
            let tx = tx_first.clone();
            async move {
                tx.send(("first", event))?;
                Ok::<(), BoxError>(())
            }
        });
        dispatcher.dispatch(Event::MapChanged { mapname: "airtime".into() });
        assert_eq!(rx.recv().await.unwrap(), ("first", Event::MapChanged { mapname: "airtime".into() }));

        dispatcher.register_named("map_changed", move |event| {
            let tx = tx.clone();
            async move {
                tx.send(("second", event))?;
                Ok::<(), BoxError>(())
            }
        }).unwrap();
        dispatcher.dispatch(Event::MapChanged { mapname: "wobluda".into() });
        assert_eq!(rx.recv().await.unwrap(), ("second", Event::MapChanged { mapname: "wobluda".into() }));
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_dispatch() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        dispatcher.register(EventKind::RoundEnded, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), BoxError>("handler failed".into()) }
        });
        let waiting = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.wait_for(EventKind::RoundEnded, Matcher::new(), None).await })
        };
        settle().await;
        dispatcher.dispatch(Event::RoundEnded { team: "Blue".into() });
        dispatcher.dispatch(Event::RoundEnded { team: "Red".into() });
        assert_eq!(waiting.await.unwrap().unwrap(), Some(Event::RoundEnded { team: "Blue".into() }));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_kind_is_rejected_at_registration() {
        let dispatcher = Dispatcher::new();
        let result = dispatcher.register_named("flag_grab", |_| async { Ok(()) });
        assert_eq!(result, Err(DispatchError::UnknownKind("flag_grab".into())));
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_waiters() {
        let dispatcher = Dispatcher::new();
        let waiting = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.wait_for(EventKind::Chat, Matcher::new(), None).await })
        };
        settle().await;
        dispatcher.shutdown();
        assert!(matches!(waiting.await.unwrap(), Err(WaitError::Cancelled)));
        assert!(matches!(dispatcher.wait_for(EventKind::Chat, Matcher::new(), None).await, Err(WaitError::Cancelled)));
    }
}
