//! # Server Runtime
//!
//! Owns one address space, subscription engine and historian, and drives
//! them. An iteration ([`ServerRuntime::iterate_at`]):
//!
//! 1. runs due timer callbacks,
//! 2. closes sessions idle past their timeout,
//! 3. ticks the subscription engine and queues the publish responses it
//!    produced,
//! 4. applies mutations deferred by node hooks,
//! 5. calls [`ServerHooks::process`].
//!
//! With the `runtime` feature, [`ServerRuntime::run`] loops iterations
//! against a [`Transport`] until [`StopHandle::stop`] is called. Without
//! it, embedders call [`ServerRuntime::handle`] and `iterate` themselves.
//!
//! ## Example
//!
//! ```rust,no_run
//! use opcua_engine::{ServerConfig, ServerRuntime};
//!
//! # fn example() -> opcua_engine::Result<()> {
//! let runtime = ServerRuntime::new(ServerConfig::default())?;
//! runtime.start()?;
//! let session = runtime.create_session("operator", 30_000.0)?;
//! runtime.activate_session(session.id, None)?;
//! runtime.iterate();
//! # Ok(())
//! # }
//! ```

mod method;
mod registry;
mod session;
mod timer;
pub mod services;
#[cfg(feature = "runtime")]
mod transport;

pub use method::{Argument, CallMethodRequest, CallMethodResult, MethodHandler};
pub use registry::ServerRegistry;
pub use session::{SessionId, SessionInfo};
pub use timer::TimerId;
#[cfg(feature = "runtime")]
pub use transport::{ChannelTransport, ClientEndpoint, Transport};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::access::{AccessControl, DefaultAccessControl};
use crate::config::ServerConfig;
use crate::event::Event;
use crate::address_space::AddressSpace;
use crate::history::{HistoryBackend, MemoryHistorian};
use crate::subscription::SubscriptionEngine;
use crate::{Error, Result};

use method::MethodRegistry;
use services::{BrowseCursors, ResponseEnvelope, ServiceResponse};
use session::SessionManager;
use timer::{to_chrono, TimerTable};

// ============================================================================
// Hooks and stop handle
// ============================================================================

/// Application callbacks around the runtime's lifecycle.
pub trait ServerHooks: Send + Sync {
    /// Called once by [`ServerRuntime::start`]; an error aborts the start.
    fn initialise(&self, _runtime: &ServerRuntime) -> Result<()> {
        Ok(())
    }

    /// Called at the end of every iteration.
    fn process(&self, _runtime: &ServerRuntime) {}

    /// Called once when the run loop ends.
    fn shutdown(&self, _runtime: &ServerRuntime) {}
}

/// Cooperative stop flag, observed between iterations.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// ServerRuntime
// ============================================================================

pub struct ServerRuntime {
    config: ServerConfig,
    space: Arc<AddressSpace>,
    engine: SubscriptionEngine,
    timers: TimerTable,
    sessions: SessionManager,
    methods: MethodRegistry,
    access: RwLock<Arc<dyn AccessControl>>,
    hooks: RwLock<Option<Arc<dyn ServerHooks>>>,
    browse_cursors: BrowseCursors,
    outbox: Mutex<Vec<ResponseEnvelope>>,
    stop: StopHandle,
    started: AtomicBool,
}

impl std::fmt::Debug for ServerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRuntime")
            .field("application_uri", &self.config.application_uri)
            .field("nodes", &self.space.node_count())
            .field("sessions", &self.sessions.len())
            .field("subscriptions", &self.engine.subscription_count())
            .field("timers", &self.timers.len())
            .finish()
    }
}

impl ServerRuntime {
    /// Build a runtime: validated configuration, bootstrapped namespace 0,
    /// the configured namespaces and an in-memory historian.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let space = AddressSpace::new(config.address_space.clone(), &config.application_uri);
        for uri in &config.namespaces {
            space.add_namespace(uri);
        }
        space.set_history_backend(Arc::new(MemoryHistorian::from_config(&config.history)));
        debug!(uri = %config.application_uri, namespaces = space.namespaces().len(), "runtime created");

        Ok(Self {
            engine: SubscriptionEngine::new(config.subscriptions.clone()),
            sessions: SessionManager::new(config.sessions.clone()),
            space: Arc::new(space),
            config,
            timers: TimerTable::default(),
            methods: MethodRegistry::default(),
            access: RwLock::new(Arc::new(DefaultAccessControl)),
            hooks: RwLock::new(None),
            browse_cursors: BrowseCursors::default(),
            outbox: Mutex::new(Vec::new()),
            stop: StopHandle::default(),
            started: AtomicBool::new(false),
        })
    }

    pub fn with_access_control(self, access: Arc<dyn AccessControl>) -> Self {
        self.set_access_control(access);
        self
    }

    pub fn with_hooks(self, hooks: Arc<dyn ServerHooks>) -> Self {
        self.set_hooks(hooks);
        self
    }

    /// Replace the historian. Nodes added earlier keep no buffer in the new
    /// backend until they are registered with it.
    pub fn with_history_backend(self, backend: Arc<dyn HistoryBackend>) -> Self {
        self.space.set_history_backend(backend);
        self
    }

    pub fn set_access_control(&self, access: Arc<dyn AccessControl>) {
        *self.access.write() = access;
    }

    pub fn set_hooks(&self, hooks: Arc<dyn ServerHooks>) {
        *self.hooks.write() = Some(hooks);
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn address_space(&self) -> &Arc<AddressSpace> {
        &self.space
    }

    pub fn engine(&self) -> &SubscriptionEngine {
        &self.engine
    }

    pub(crate) fn access(&self) -> Arc<dyn AccessControl> {
        self.access.read().clone()
    }

    fn hooks(&self) -> Option<Arc<dyn ServerHooks>> {
        self.hooks.read().clone()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Run [`ServerHooks::initialise`] once. Later calls are no-ops.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(hooks) = self.hooks() {
            if let Err(e) = hooks.initialise(self) {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
            self.space.apply_deferred();
        }
        info!(uri = %self.config.application_uri, nodes = self.space.node_count(), "server started");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Request the run loop to end after the current iteration.
    pub fn stop(&self) {
        info!("server stop requested");
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Close every session and call [`ServerHooks::shutdown`].
    pub fn shutdown(&self) {
        for id in self.sessions.ids() {
            if let Err(e) = self.close_session(id) {
                warn!(session = %id, error = %e, "session close failed during shutdown");
            }
        }
        if let Some(hooks) = self.hooks() {
            hooks.shutdown(self);
        }
        self.started.store(false, Ordering::SeqCst);
        info!(uri = %self.config.application_uri, "server shut down");
    }

    pub fn iterate(&self) -> usize {
        self.iterate_at(Utc::now())
    }

    /// One iteration at `now`. Returns the number of publish responses and
    /// faults queued for sending ([`ServerRuntime::take_responses`]).
    pub fn iterate_at(&self, now: DateTime<Utc>) -> usize {
        self.timers.run_due(self, now);

        for expired in self.sessions.take_expired(now) {
            warn!(session = %expired.id, name = %expired.name, "session timed out");
            self.release_session(expired.id);
        }

        let responses = self.engine.tick(now, &self.space);
        let mut produced = responses.len();
        if produced > 0 {
            let mut outbox = self.outbox.lock();
            outbox.extend(responses.into_iter().map(|(session, response)| ResponseEnvelope {
                session,
                request_handle: response.request_id,
                response: ServiceResponse::Publish(response),
            }));
        }
        produced += self.reject_orphaned_publishes();

        self.space.apply_deferred();
        if let Some(hooks) = self.hooks() {
            hooks.process(self);
            self.space.apply_deferred();
        }
        produced
    }

    /// Responses produced outside a request (late publish answers).
    /// Fault every publish request whose session lost its last
    /// subscription. Returns how many were faulted.
    pub(crate) fn reject_orphaned_publishes(&self) -> usize {
        let rejected = self.engine.take_rejected_publishes();
        if rejected.is_empty() {
            return 0;
        }
        let count = rejected.len();
        let status = Error::NoSubscription.status_code();
        debug!(count, "orphaned publish requests rejected");
        self.outbox.lock().extend(rejected.into_iter().map(|(session, request_handle)| ResponseEnvelope {
            session,
            request_handle,
            response: ServiceResponse::Fault(status),
        }));
        count
    }

    pub fn take_responses(&self) -> Vec<ResponseEnvelope> {
        std::mem::take(&mut *self.outbox.lock())
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Run `f` once after `delay`.
    pub fn add_timed_callback<F>(&self, delay: std::time::Duration, f: F) -> TimerId
    where
        F: FnOnce(&ServerRuntime, TimerId) + Send + 'static,
    {
        let mut f = Some(f);
        self.timers.insert(
            Utc::now(),
            to_chrono(delay),
            None,
            Box::new(move |rt, id| {
                if let Some(f) = f.take() {
                    f(rt, id)
                }
            }),
        )
    }

    /// Run `f` every `interval`, first after one interval.
    pub fn add_repeated_callback<F>(&self, interval: std::time::Duration, f: F) -> TimerId
    where
        F: FnMut(&ServerRuntime, TimerId) + Send + 'static,
    {
        let interval = to_chrono(interval);
        self.timers.insert(Utc::now(), interval, Some(interval), Box::new(f))
    }

    /// Reschedule a repeated timer one new interval from now.
    pub fn change_repeated_interval(&self, id: TimerId, interval: std::time::Duration) -> Result<()> {
        self.timers.change_interval(id, to_chrono(interval), Utc::now())
    }

    /// Prevent future firings; a running callback completes.
    pub fn remove_timer(&self, id: TimerId) -> bool {
        self.timers.remove(id)
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    pub fn create_session(&self, name: &str, timeout_ms: f64) -> Result<SessionInfo> {
        let info = self.sessions.create(name, timeout_ms, Utc::now())?;
        info!(session = %info.id, name, timeout_ms = info.timeout_ms, "session created");
        Ok(info)
    }

    pub fn activate_session(&self, id: SessionId, user: Option<&str>) -> Result<()> {
        if self.sessions.get(id).is_none() {
            return Err(Error::SessionNotFound(id.0));
        }
        if !self.access().activate_session(id, user) {
            return Err(Error::AccessDenied(format!("session {id} activation rejected")));
        }
        self.sessions.activate(id, user, Utc::now())?;
        debug!(session = %id, user, "session activated");
        Ok(())
    }

    /// Close a session and delete its subscriptions; returns how many.
    pub fn close_session(&self, id: SessionId) -> Result<usize> {
        self.sessions.close(id)?;
        info!(session = %id, "session closed");
        Ok(self.release_session(id))
    }

    fn release_session(&self, id: SessionId) -> usize {
        self.browse_cursors.release_session(id);
        self.access().close_session(id);
        self.engine.close_session(id)
    }

    pub fn session(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.get(id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Deliver `event` to matching event items; returns how many queued it.
    pub fn trigger_event(&self, event: &Event) -> usize {
        self.engine.trigger_event(&self.space, event)
    }

    // ========================================================================
    // Run loop
    // ========================================================================

    /// Serve `transport` until stopped: receive and handle requests, iterate,
    /// send late responses. A failed send ends the loop; shutdown still runs
    /// and the send error is returned.
    #[cfg(feature = "runtime")]
    pub async fn run(&self, transport: &dyn Transport) -> Result<()> {
        self.start()?;
        let served = self.serve(transport).await;
        if let Err(e) = &served {
            error!(error = %e, "transport failed, shutting down");
        }
        self.shutdown();
        served
    }

    #[cfg(feature = "runtime")]
    async fn serve(&self, transport: &dyn Transport) -> Result<()> {
        let interval = std::time::Duration::from_millis(self.config.iterate_interval_ms);
        while !self.stop.is_stopped() {
            for request in transport.receive(interval).await {
                if let Some(response) = self.handle(request) {
                    transport.send(response).await?;
                }
            }
            self.iterate();
            for response in self.take_responses() {
                transport.send(response).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeId, Variant};
    use crate::Error;
    use chrono::Duration;
    use std::sync::atomic::AtomicUsize;

    fn runtime() -> ServerRuntime {
        ServerRuntime::new(ServerConfig::default()).unwrap()
    }

    #[test]
    fn test_repeated_timer_fires_and_can_be_removed() {
        let rt = runtime();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = rt.add_repeated_callback(std::time::Duration::from_millis(100), move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let start = Utc::now();
        rt.iterate_at(start);
        assert_eq!(count.load(Ordering::SeqCst), 0, "not due yet");
        rt.iterate_at(start + Duration::milliseconds(200));
        rt.iterate_at(start + Duration::milliseconds(400));
        assert_eq!(count.load(Ordering::SeqCst), 2);

        assert!(rt.remove_timer(id));
        rt.iterate_at(start + Duration::seconds(5));
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(!rt.remove_timer(id));
    }

    #[test]
    fn test_timed_callback_runs_once() {
        let rt = runtime();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        rt.add_timed_callback(std::time::Duration::ZERO, move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let later = Utc::now() + Duration::seconds(1);
        rt.iterate_at(later);
        rt.iterate_at(later + Duration::seconds(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(rt.timers.len(), 0);
    }

    #[test]
    fn test_callback_may_remove_itself_and_write_nodes() {
        let rt = runtime();
        let node = rt.address_space().add_variable(&NodeId::OBJECTS, "Counter", 0i32, 1).unwrap();
        let target = node.clone();
        rt.add_repeated_callback(std::time::Duration::from_millis(10), move |rt, id| {
            rt.address_space().set_value(&target, Variant::Int32(7)).unwrap();
            rt.remove_timer(id);
        });
        rt.iterate_at(Utc::now() + Duration::seconds(1));
        assert_eq!(rt.timers.len(), 0);
        let value = rt.address_space().read_attribute(&node, crate::model::AttributeId::Value).unwrap();
        assert_eq!(value.value, Variant::Int32(7));
    }

    #[test]
    fn test_change_interval_of_unknown_timer_fails() {
        let rt = runtime();
        let err = rt.change_repeated_interval(TimerId(99), std::time::Duration::from_secs(1));
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_session_timeout_closes_subscriptions() {
        let rt = runtime();
        let session = rt.create_session("s", 1000.0).unwrap();
        rt.activate_session(session.id, None).unwrap();
        rt.engine()
            .create_subscription(session.id, &crate::subscription::SubscriptionParams::new(100.0))
            .unwrap();
        assert_eq!(rt.engine().subscription_count(), 1);

        rt.iterate_at(Utc::now() + Duration::seconds(5));
        assert!(rt.session(session.id).is_none());
        assert_eq!(rt.engine().subscription_count(), 0);
    }

    struct CountingHooks {
        processed: AtomicUsize,
    }

    impl ServerHooks for CountingHooks {
        fn initialise(&self, runtime: &ServerRuntime) -> Result<()> {
            runtime.address_space().add_folder(&NodeId::OBJECTS, "App", 1)?;
            Ok(())
        }

        fn process(&self, _runtime: &ServerRuntime) {
            self.processed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_hooks_initialise_once_and_process_each_iteration() {
        let hooks = Arc::new(CountingHooks { processed: AtomicUsize::new(0) });
        let rt = runtime().with_hooks(hooks.clone());
        let before = rt.address_space().node_count();
        rt.start().unwrap();
        rt.start().unwrap();
        assert_eq!(rt.address_space().node_count(), before + 1);
        rt.iterate();
        rt.iterate();
        assert_eq!(hooks.processed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_handle_is_shared() {
        let rt = runtime();
        let handle = rt.stop_handle();
        assert!(!rt.is_stopped());
        std::thread::spawn(move || handle.stop()).join().unwrap();
        assert!(rt.is_stopped());
    }
}
