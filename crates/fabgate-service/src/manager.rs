use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ServiceError, StreamError};
use crate::service::{RunState, Service, ServiceContext, SharedControl, Tick};

/// Default per-subscriber broadcast buffer, in messages.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Registry and driver for a set of named long-lived services.
///
/// Cheap to clone; every clone addresses the same registry. The manager
/// is handed to components explicitly (see [`ServiceContext::manager`])
/// rather than living in a global.
pub struct ServiceManager<M> {
    inner: Arc<Inner<M>>,
}

impl<M> Clone for ServiceManager<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<M> {
    registry: Mutex<Registry<M>>,
    channel_capacity: usize,
}

struct Registry<M> {
    /// Registration order; drives status reporting and restart order.
    order: Vec<String>,
    slots: HashMap<String, Arc<Slot<M>>>,
}

struct Slot<M> {
    name: String,
    /// The worker object. The driver task holds this lock while the
    /// service runs, which is what serializes lifecycle hooks.
    service: Arc<AsyncMutex<Box<dyn Service<M>>>>,
    shared: Option<SharedControl>,
    state: watch::Sender<RunState>,
    events: broadcast::Sender<M>,
    borrow_lock: Arc<AsyncMutex<()>>,
    driver: Mutex<Option<Driver>>,
    last_error: Mutex<Option<String>>,
}

struct Driver {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// One row of [`ServiceManager::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub name: String,
    pub state: RunState,
    pub online: bool,
}

/// Aggregated outcome of [`ServiceManager::restart_all`]. Startup
/// failures are collected per service instead of aborting the sweep.
#[derive(Debug, Default)]
pub struct RestartReport {
    pub failures: Vec<(String, ServiceError)>,
}

impl RestartReport {
    pub fn ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Broadcast consumer with its own cursor. Dropping it unsubscribes.
pub struct Subscription<M> {
    service: String,
    rx: broadcast::Receiver<M>,
}

impl<M: Clone> Subscription<M> {
    /// Next message, in publish order.
    pub async fn recv(&mut self) -> std::result::Result<M, StreamError> {
        match self.rx.recv().await {
            Ok(message) => Ok(message),
            Err(broadcast::error::RecvError::Closed) => Err(StreamError::Closed),
            Err(broadcast::error::RecvError::Lagged(n)) => Err(StreamError::Lagged(n)),
        }
    }

    /// Like [`recv`](Self::recv) with a poll window: `Ok(None)` means
    /// the window elapsed with no message and the subscription is still
    /// live, so callers can interleave liveness checks.
    pub async fn recv_timeout(
        &mut self,
        window: Duration,
    ) -> std::result::Result<Option<M>, StreamError> {
        match tokio::time::timeout(window, self.rx.recv()).await {
            Err(_) => Ok(None),
            Ok(Ok(message)) => Ok(Some(message)),
            Ok(Err(broadcast::error::RecvError::Closed)) => Err(StreamError::Closed),
            Ok(Err(broadcast::error::RecvError::Lagged(n))) => Err(StreamError::Lagged(n)),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}

/// Scoped exclusive access to a service's control surface. The
/// per-service mutation lock is held until this guard drops.
pub struct Borrowed<T> {
    control: Arc<T>,
    _permit: OwnedMutexGuard<()>,
}

impl<T> Deref for Borrowed<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.control
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<M: Clone + Send + 'static> ServiceManager<M> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// A manager whose broadcast channels buffer `capacity` messages
    /// per subscriber before the slowest one starts lagging.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry {
                    order: Vec::new(),
                    slots: HashMap::new(),
                }),
                channel_capacity: capacity,
            }),
        }
    }

    /// Register a service under `name`, initially `Stopped`. Fails with
    /// `DuplicateService` if the name is taken; the first registration
    /// stays intact.
    pub fn register<S: Service<M>>(&self, name: impl Into<String>, service: S) -> Result<()> {
        let name = name.into();
        let mut registry = lock(&self.inner.registry);
        if registry.slots.contains_key(&name) {
            return Err(ServiceError::DuplicateService(name));
        }

        let shared = service.shared();
        let (state, _) = watch::channel(RunState::Stopped);
        let (events, _) = broadcast::channel(self.inner.channel_capacity);
        let slot = Arc::new(Slot {
            name: name.clone(),
            service: Arc::new(AsyncMutex::new(Box::new(service) as Box<dyn Service<M>>)),
            shared,
            state,
            events,
            borrow_lock: Arc::new(AsyncMutex::new(())),
            driver: Mutex::new(None),
            last_error: Mutex::new(None),
        });
        registry.order.push(name.clone());
        registry.slots.insert(name.clone(), slot);
        tracing::debug!(service = %name, "service registered");
        Ok(())
    }

    /// Start `name` and wait until it is `Running`. Idempotent; a
    /// worker `start` failure surfaces as `ServiceStopped`.
    pub async fn start(&self, name: &str) -> Result<()> {
        let slot = self.slot(name)?;
        // Two attempts: a driver that raced to completion between the
        // spawn check and our state read is ensured once more.
        for _ in 0..2 {
            let mut rx = self.ensure_driver(&slot);
            loop {
                let state = *rx.borrow_and_update();
                match state {
                    RunState::Running => return Ok(()),
                    RunState::Error => return Err(self.stopped_error(&slot)),
                    RunState::Stopped => break,
                    RunState::Starting | RunState::Stopping => {
                        if rx.changed().await.is_err() {
                            return Err(self.stopped_error(&slot));
                        }
                    }
                }
            }
        }
        Err(ServiceError::ServiceStopped {
            name: slot.name.clone(),
            reason: "stopped while starting".to_string(),
        })
    }

    /// Stop `name` and wait for its worker to wind down. Safe to call
    /// on a service that is already stopped; also resets `Error` back
    /// to `Stopped`.
    pub async fn stop(&self, name: &str) -> Result<()> {
        let slot = self.slot(name)?;
        // Take the handle before awaiting so the registry lock is not
        // held across the join.
        let taken = lock(&slot.driver).take();
        if let Some(driver) = taken {
            driver.cancel.cancel();
            if let Err(err) = driver.join.await {
                tracing::error!(service = %slot.name, error = %err, "driver task panicked");
                slot.state.send_replace(RunState::Stopped);
            }
        }
        if *slot.state.borrow() == RunState::Error {
            slot.state.send_replace(RunState::Stopped);
        }
        Ok(())
    }

    /// Stop every running service, then start every registered one, in
    /// registration order. With `await_ready`, block until each reaches
    /// `Running` and collect per-service startup failures.
    pub async fn restart_all(&self, await_ready: bool) -> RestartReport {
        let names = self.names();
        tracing::debug!(services = names.len(), "restarting all services");
        for name in &names {
            if let Err(err) = self.stop(name).await {
                tracing::warn!(service = %name, error = %err, "stop during restart failed");
            }
        }

        let mut report = RestartReport::default();
        for name in &names {
            if await_ready {
                if let Err(err) = self.start(name).await {
                    tracing::warn!(service = %name, error = %err, "service did not come back");
                    report.failures.push((name.clone(), err));
                }
            } else if let Ok(slot) = self.slot(name) {
                let _ = self.ensure_driver(&slot);
            }
        }
        report
    }

    /// Subscribe to `name`'s broadcast, lazily starting the service.
    /// The subscription is opened before the start so messages
    /// published by the `start` hook are not missed.
    pub async fn stream(&self, name: &str) -> Result<Subscription<M>> {
        let slot = self.slot(name)?;
        let rx = slot.events.subscribe();
        self.start(name).await?;
        Ok(Subscription {
            service: slot.name.clone(),
            rx,
        })
    }

    /// Exclusive access to `name`'s control surface. Waits for other
    /// borrowers; the lock is released when the guard drops. Does not
    /// touch the service's lifecycle.
    pub async fn borrow<T: Send + Sync + 'static>(&self, name: &str) -> Result<Borrowed<T>> {
        let slot = self.slot(name)?;
        let shared = slot
            .shared
            .clone()
            .ok_or_else(|| ServiceError::ControlUnavailable(slot.name.clone()))?;
        let control = shared
            .downcast::<T>()
            .map_err(|_| ServiceError::ControlTypeMismatch(slot.name.clone()))?;
        let permit = slot.borrow_lock.clone().lock_owned().await;
        Ok(Borrowed {
            control,
            _permit: permit,
        })
    }

    /// Non-exclusive access to `name`'s control surface: never blocks
    /// on borrowers, never starts the service.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        let slot = self.slot(name).ok()?;
        slot.shared.clone()?.downcast::<T>().ok()
    }

    /// Snapshot of every service's state, in registration order.
    pub fn status(&self) -> Vec<ServiceStatus> {
        let registry = lock(&self.inner.registry);
        registry
            .order
            .iter()
            .filter_map(|name| registry.slots.get(name))
            .map(|slot| {
                let state = *slot.state.borrow();
                ServiceStatus {
                    name: slot.name.clone(),
                    state,
                    online: state == RunState::Running,
                }
            })
            .collect()
    }

    /// Stop everything, newest registration first.
    pub async fn shutdown(&self) {
        let names = self.names();
        for name in names.iter().rev() {
            if let Err(err) = self.stop(name).await {
                tracing::warn!(service = %name, error = %err, "stop during shutdown failed");
            }
        }
        tracing::debug!("service manager shut down");
    }

    fn names(&self) -> Vec<String> {
        lock(&self.inner.registry).order.clone()
    }

    fn slot(&self, name: &str) -> Result<Arc<Slot<M>>> {
        lock(&self.inner.registry)
            .slots
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownService(name.to_string()))
    }

    /// Spawn the driver task unless one is already live. Returns a
    /// state receiver subscribed before any transition it causes.
    fn ensure_driver(&self, slot: &Arc<Slot<M>>) -> watch::Receiver<RunState> {
        let rx = slot.state.subscribe();
        let mut driver = lock(&slot.driver);
        if let Some(existing) = driver.as_ref() {
            if !existing.join.is_finished() {
                return rx;
            }
        }
        slot.state.send_replace(RunState::Starting);
        let cancel = CancellationToken::new();
        let join = tokio::spawn(drive(slot.clone(), self.clone(), cancel.clone()));
        *driver = Some(Driver { cancel, join });
        rx
    }

    fn stopped_error(&self, slot: &Slot<M>) -> ServiceError {
        let reason = lock(&slot.last_error)
            .clone()
            .unwrap_or_else(|| "worker failed to start".to_string());
        ServiceError::ServiceStopped {
            name: slot.name.clone(),
            reason,
        }
    }
}

impl<M: Clone + Send + 'static> Default for ServiceManager<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// The per-service driver task: start hook, run loop, stop hook.
async fn drive<M: Clone + Send + 'static>(
    slot: Arc<Slot<M>>,
    manager: ServiceManager<M>,
    cancel: CancellationToken,
) {
    let mut service = slot.service.clone().lock_owned().await;
    let ctx = ServiceContext::new(slot.name.clone(), slot.events.clone(), manager);

    match service.start(&ctx).await {
        Ok(()) => {
            slot.state.send_replace(RunState::Running);
            tracing::debug!(service = %slot.name, "service running");
        }
        Err(err) => {
            tracing::warn!(service = %slot.name, error = %err, "service failed to start");
            *lock(&slot.last_error) = Some(err.to_string());
            service.stop(&ctx).await;
            slot.state.send_replace(RunState::Error);
            return;
        }
    }

    let mut faulted = false;
    loop {
        let tick = tokio::select! {
            _ = cancel.cancelled() => break,
            tick = service.run(&ctx) => tick,
        };
        match tick {
            Ok(Tick::Progress) => {}
            Ok(Tick::Idle(delay)) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Ok(Tick::Restart) => {
                tracing::debug!(service = %slot.name, "worker restart requested");
                service.stop(&ctx).await;
                // Cancellation wins over a pending restart.
                if cancel.is_cancelled() {
                    break;
                }
                if let Err(err) = service.start(&ctx).await {
                    tracing::warn!(service = %slot.name, error = %err, "worker restart failed");
                    *lock(&slot.last_error) = Some(err.to_string());
                    faulted = true;
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(service = %slot.name, error = %err, "worker fault");
                *lock(&slot.last_error) = Some(err.to_string());
                faulted = true;
                break;
            }
        }
    }

    if faulted {
        service.stop(&ctx).await;
        slot.state.send_replace(RunState::Error);
    } else {
        slot.state.send_replace(RunState::Stopping);
        service.stop(&ctx).await;
        slot.state.send_replace(RunState::Stopped);
    }
    tracing::debug!(service = %slot.name, faulted, "service stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_core::future::BoxFuture;

    #[derive(Default)]
    struct Probe {
        starts: AtomicUsize,
        stops: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    #[derive(Default)]
    struct TestControl {
        /// `run` publishes this many numbered messages, then zeroes it.
        burst: AtomicUsize,
        marker: AtomicUsize,
    }

    struct TestService {
        probe: Arc<Probe>,
        control: Arc<TestControl>,
        fail_start: bool,
        restart_once: bool,
        fault_once: bool,
        hello_on_start: bool,
        counter: u32,
    }

    impl TestService {
        fn new(probe: &Arc<Probe>, control: &Arc<TestControl>) -> Self {
            Self {
                probe: probe.clone(),
                control: control.clone(),
                fail_start: false,
                restart_once: false,
                fault_once: false,
                hello_on_start: false,
                counter: 0,
            }
        }
    }

    impl Service<u32> for TestService {
        fn start<'a>(&'a mut self, ctx: &'a ServiceContext<u32>) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.probe.starts.fetch_add(1, Ordering::SeqCst);
                let active = self.probe.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.probe.max_active.fetch_max(active, Ordering::SeqCst);
                if self.fail_start {
                    return Err(ServiceError::worker(std::io::Error::other(
                        "transport unreachable",
                    )));
                }
                if self.hello_on_start {
                    ctx.publish(999);
                }
                Ok(())
            })
        }

        fn run<'a>(&'a mut self, ctx: &'a ServiceContext<u32>) -> BoxFuture<'a, Result<Tick>> {
            Box::pin(async move {
                if std::mem::take(&mut self.fault_once) {
                    return Err(ServiceError::worker(std::io::Error::other("boom")));
                }
                if std::mem::take(&mut self.restart_once) {
                    return Ok(Tick::Restart);
                }
                let burst = self.control.burst.swap(0, Ordering::SeqCst);
                if burst == 0 {
                    return Ok(Tick::Idle(Duration::from_millis(2)));
                }
                for _ in 0..burst {
                    self.counter += 1;
                    ctx.publish(self.counter);
                }
                Ok(Tick::Progress)
            })
        }

        fn stop<'a>(&'a mut self, _ctx: &'a ServiceContext<u32>) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                self.probe.active.fetch_sub(1, Ordering::SeqCst);
                self.probe.stops.fetch_add(1, Ordering::SeqCst);
            })
        }

        fn shared(&self) -> Option<SharedControl> {
            Some(self.control.clone())
        }
    }

    fn fixture() -> (ServiceManager<u32>, Arc<Probe>, Arc<TestControl>) {
        let manager = ServiceManager::new();
        let probe = Arc::new(Probe::default());
        let control = Arc::new(TestControl::default());
        (manager, probe, control)
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails_first_intact() {
        let (manager, probe, control) = fixture();
        manager
            .register("worker", TestService::new(&probe, &control))
            .unwrap();

        let other_probe = Arc::new(Probe::default());
        let result = manager.register("worker", TestService::new(&other_probe, &control));
        assert!(matches!(result, Err(ServiceError::DuplicateService(name)) if name == "worker"));

        manager.start("worker").await.unwrap();
        assert_eq!(probe.starts.load(Ordering::SeqCst), 1);
        assert_eq!(other_probe.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let (manager, probe, control) = fixture();
        manager
            .register("worker", TestService::new(&probe, &control))
            .unwrap();

        assert_eq!(manager.status()[0].state, RunState::Stopped);

        manager.start("worker").await.unwrap();
        assert_eq!(manager.status()[0].state, RunState::Running);
        assert!(manager.status()[0].online);

        // Second start is a no-op.
        manager.start("worker").await.unwrap();
        assert_eq!(probe.starts.load(Ordering::SeqCst), 1);

        manager.stop("worker").await.unwrap();
        assert_eq!(manager.status()[0].state, RunState::Stopped);
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);

        // Idempotent stop.
        manager.stop("worker").await.unwrap();
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_service_errors() {
        let manager: ServiceManager<u32> = ServiceManager::new();
        assert!(matches!(
            manager.start("ghost").await,
            Err(ServiceError::UnknownService(_))
        ));
        assert!(matches!(
            manager.stream("ghost").await,
            Err(ServiceError::UnknownService(_))
        ));
        assert!(manager.get::<TestControl>("ghost").is_none());
    }

    #[tokio::test]
    async fn test_start_failure_reports_and_leaves_manager_usable() {
        let (manager, probe, control) = fixture();
        let mut svc = TestService::new(&probe, &control);
        svc.fail_start = true;
        manager.register("broken", svc).unwrap();

        let healthy_probe = Arc::new(Probe::default());
        manager
            .register("healthy", TestService::new(&healthy_probe, &control))
            .unwrap();

        match manager.start("broken").await {
            Err(ServiceError::ServiceStopped { name, reason }) => {
                assert_eq!(name, "broken");
                assert!(reason.contains("transport unreachable"));
            }
            other => panic!("expected ServiceStopped, got {other:?}"),
        }
        assert_eq!(manager.status()[0].state, RunState::Error);
        // The stop hook still ran to release partial resources.
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);

        manager.start("healthy").await.unwrap();
        assert_eq!(manager.status()[1].state, RunState::Running);
    }

    #[tokio::test]
    async fn test_stop_resets_error_state() {
        let (manager, probe, control) = fixture();
        let mut svc = TestService::new(&probe, &control);
        svc.fail_start = true;
        manager.register("broken", svc).unwrap();

        let _ = manager.start("broken").await;
        assert_eq!(manager.status()[0].state, RunState::Error);

        manager.stop("broken").await.unwrap();
        assert_eq!(manager.status()[0].state, RunState::Stopped);
    }

    #[tokio::test]
    async fn test_broadcast_fanout_identical_order() {
        let (manager, probe, control) = fixture();
        manager
            .register("worker", TestService::new(&probe, &control))
            .unwrap();

        let mut first = manager.stream("worker").await.unwrap();
        let mut second = manager.stream("worker").await.unwrap();

        control.burst.store(5, Ordering::SeqCst);

        for expected in 1..=5u32 {
            assert_eq!(first.recv().await.unwrap(), expected);
        }
        for expected in 1..=5u32 {
            assert_eq!(second.recv().await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_alone() {
        let manager = ServiceManager::with_capacity(4);
        let probe = Arc::new(Probe::default());
        let control = Arc::new(TestControl::default());
        manager
            .register("worker", TestService::new(&probe, &control))
            .unwrap();

        let mut fast = manager.stream("worker").await.unwrap();
        let mut slow = manager.stream("worker").await.unwrap();

        control.burst.store(3, Ordering::SeqCst);
        for expected in 1..=3u32 {
            assert_eq!(fast.recv().await.unwrap(), expected);
        }
        control.burst.store(3, Ordering::SeqCst);
        for expected in 4..=6u32 {
            assert_eq!(fast.recv().await.unwrap(), expected);
        }

        // Six messages went out, the slow cursor saw none; with a
        // buffer of four the first two are gone.
        assert_eq!(slow.recv().await, Err(StreamError::Lagged(2)));
        for expected in 3..=6u32 {
            assert_eq!(slow.recv().await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_stream_lazily_starts_and_sees_start_messages() {
        let (manager, probe, control) = fixture();
        let mut svc = TestService::new(&probe, &control);
        svc.hello_on_start = true;
        manager.register("worker", svc).unwrap();

        let mut sub = manager.stream("worker").await.unwrap();
        assert_eq!(manager.status()[0].state, RunState::Running);
        assert_eq!(sub.recv().await.unwrap(), 999);
    }

    #[tokio::test]
    async fn test_recv_timeout_is_a_liveness_tick() {
        let (manager, probe, control) = fixture();
        manager
            .register("worker", TestService::new(&probe, &control))
            .unwrap();

        let mut sub = manager.stream("worker").await.unwrap();
        let tick = sub.recv_timeout(Duration::from_millis(10)).await.unwrap();
        assert!(tick.is_none());

        control.burst.store(1, Ordering::SeqCst);
        let got = sub.recv_timeout(Duration::from_secs(2)).await.unwrap();
        assert_eq!(got, Some(1));
    }

    #[tokio::test]
    async fn test_borrow_is_mutually_exclusive() {
        let (manager, probe, control) = fixture();
        manager
            .register("worker", TestService::new(&probe, &control))
            .unwrap();

        let first = manager.borrow::<TestControl>("worker").await.unwrap();
        first.marker.store(7, Ordering::SeqCst);

        let contender = manager.borrow::<TestControl>("worker");
        let blocked = tokio::time::timeout(Duration::from_millis(20), contender).await;
        assert!(blocked.is_err(), "second borrow should wait for the first");

        // Non-exclusive reads pass through while the borrow is held.
        let snapshot = manager.get::<TestControl>("worker").unwrap();
        assert_eq!(snapshot.marker.load(Ordering::SeqCst), 7);

        drop(first);
        let second = manager.borrow::<TestControl>("worker").await.unwrap();
        assert_eq!(second.marker.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_borrow_type_mismatch() {
        let (manager, probe, control) = fixture();
        manager
            .register("worker", TestService::new(&probe, &control))
            .unwrap();

        assert!(matches!(
            manager.borrow::<String>("worker").await,
            Err(ServiceError::ControlTypeMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_get_does_not_start_service() {
        let (manager, probe, control) = fixture();
        manager
            .register("worker", TestService::new(&probe, &control))
            .unwrap();

        assert!(manager.get::<TestControl>("worker").is_some());
        assert_eq!(manager.status()[0].state, RunState::Stopped);
        assert_eq!(probe.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restart_all_twice_leaves_single_workers() {
        let (manager, probe_a, control) = fixture();
        manager
            .register("alpha", TestService::new(&probe_a, &control))
            .unwrap();
        let probe_b = Arc::new(Probe::default());
        manager
            .register("beta", TestService::new(&probe_b, &control))
            .unwrap();

        let report = manager.restart_all(true).await;
        assert!(report.ok());
        let report = manager.restart_all(true).await;
        assert!(report.ok());

        for status in manager.status() {
            assert_eq!(status.state, RunState::Running, "{}", status.name);
        }
        assert_eq!(probe_a.starts.load(Ordering::SeqCst), 2);
        assert_eq!(probe_b.starts.load(Ordering::SeqCst), 2);
        assert_eq!(probe_a.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(probe_b.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restart_all_aggregates_failures() {
        let (manager, probe, control) = fixture();
        let mut svc = TestService::new(&probe, &control);
        svc.fail_start = true;
        manager.register("broken", svc).unwrap();
        let healthy_probe = Arc::new(Probe::default());
        manager
            .register("healthy", TestService::new(&healthy_probe, &control))
            .unwrap();

        let report = manager.restart_all(true).await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "broken");
        assert_eq!(manager.status()[1].state, RunState::Running);
    }

    #[tokio::test]
    async fn test_restart_tick_stays_running() {
        let (manager, probe, control) = fixture();
        let mut svc = TestService::new(&probe, &control);
        svc.restart_once = true;
        manager.register("worker", svc).unwrap();

        manager.start("worker").await.unwrap();

        // Wait for the in-place restart to happen.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while probe.starts.load(Ordering::SeqCst) < 2 {
            assert!(std::time::Instant::now() < deadline, "restart never happened");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(manager.status()[0].state, RunState::Running);
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_worker_fault_sets_error_then_recovers() {
        let (manager, probe, control) = fixture();
        let mut svc = TestService::new(&probe, &control);
        svc.fault_once = true;
        manager.register("worker", svc).unwrap();

        manager.start("worker").await.unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while manager.status()[0].state != RunState::Error {
            assert!(std::time::Instant::now() < deadline, "fault never surfaced");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        manager.start("worker").await.unwrap();
        assert_eq!(manager.status()[0].state, RunState::Running);
        assert_eq!(probe.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let (manager, probe_a, control) = fixture();
        manager
            .register("alpha", TestService::new(&probe_a, &control))
            .unwrap();
        let probe_b = Arc::new(Probe::default());
        manager
            .register("beta", TestService::new(&probe_b, &control))
            .unwrap();

        manager.start("alpha").await.unwrap();
        manager.start("beta").await.unwrap();
        manager.shutdown().await;

        for status in manager.status() {
            assert_eq!(status.state, RunState::Stopped, "{}", status.name);
        }
    }

    #[tokio::test]
    async fn test_status_keeps_registration_order() {
        let (manager, probe, control) = fixture();
        for name in ["link", "commands", "video", "transfer"] {
            manager
                .register(name, TestService::new(&probe, &control))
                .unwrap();
        }
        let names: Vec<_> = manager.status().into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["link", "commands", "video", "transfer"]);
    }
}
