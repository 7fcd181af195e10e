use super::host_and_port::HostAndPort;
use super::interfaces::{ConnectionFactory, ConnectionId, PoolConnection, PoolTimer};
use super::options::PoolOptions;
use crate::{WireError, WireResult};
use debug_ignore::DebugIgnore;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

/// Callback receiving the outcome of [`ConnectionPool::get`]: a handle,
/// or the error that ended the request. Fires exactly once.
pub type GetConnectionCallback = Box<dyn FnOnce(WireResult<ConnectionHandle>) + Send>;

/// The user-visible connection pool: one `SpecificPool` per unique
/// [`HostAndPort`], created on first request and torn down after the
/// host timeout passes without use.
///
/// Cheap to clone; clones share the same pools.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
pub(crate) struct PoolInner {
    options: PoolOptions,
    factory: Arc<dyn ConnectionFactory>,
    // the global mutex: guards only the host map. Pool removal takes
    // this first and the specific pool's lock second, the same order
    // as `get`
    pools: Mutex<HashMap<HostAndPort, Arc<SpecificPool>>>,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn ConnectionFactory>, options: PoolOptions) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                options,
                factory,
                pools: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Request a connection to `host`, waiting at most `timeout`.
    ///
    /// The callback receives a [`ConnectionHandle`] once a connection is
    /// ready, or `ExceededTimeLimit` when the deadline passes first.
    pub fn get(
        &self,
        host: &HostAndPort,
        timeout: Duration,
        cb: GetConnectionCallback,
    ) -> WireResult<()> {
        let pool = {
            let mut pools = self.inner.pools.lock()?;
            match pools.entry(host.clone()) {
                Entry::Occupied(e) => Arc::clone(e.get()),
                Entry::Vacant(e) => {
                    trace!("creating pool for {host}");
                    let parent = Arc::downgrade(&self.inner);
                    let request_timer = self.inner.factory.make_timer();
                    let host_timer = self.inner.factory.make_timer();
                    let host = host.clone();
                    let pool = Arc::new_cyclic(|weak| {
                        SpecificPool::new(weak.clone(), parent, host, request_timer, host_timer)
                    });
                    Arc::clone(e.insert(pool))
                }
            }
        };
        pool.get_connection(timeout, cb)
    }

    /// Fail every queued request with `ShutdownInProgress` (exactly once
    /// each), drop pooled connections, and put every per-host pool into
    /// shutdown. Checked-out handles stay valid; their connections are
    /// dropped on return.
    pub fn shutdown(&self) -> WireResult<()> {
        let pools: Vec<Arc<SpecificPool>> =
            self.inner.pools.lock()?.drain().map(|(_, p)| p).collect();
        for pool in pools {
            pool.enter_shutdown()?;
        }
        Ok(())
    }
}

/// An owning reference to a checked-out connection.
///
/// Dereferences to [`PoolConnection`] and returns the connection to its
/// pool when dropped; release is infallible. A connection marked failed
/// (see [`PoolConnection::indicate_failed`]) is dropped instead of
/// pooled.
pub struct ConnectionHandle {
    conn: Option<Box<dyn PoolConnection>>,
    pool: Arc<SpecificPool>,
}

impl ConnectionHandle {
    fn new(conn: Box<dyn PoolConnection>, pool: Arc<SpecificPool>) -> Self {
        Self {
            conn: Some(conn),
            pool,
        }
    }
}

impl std::ops::Deref for ConnectionHandle {
    type Target = dyn PoolConnection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_deref()
            .expect("handle holds its connection until drop")
    }
}

impl std::ops::DerefMut for ConnectionHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_deref_mut()
            .expect("handle holds its connection until drop")
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = self.pool.return_connection(conn) {
                warn!("dropping returned connection: {e}");
            }
        }
    }
}

// The pool begins running, moves to idle when no requests are pending
// and no connections are checked out, and enters shutdown after the
// host timeout passes (waiting there for in-flight refreshes to drain).
// A new request from any state puts it back to running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Idle,
    InShutdown,
}

#[derive(Debug)]
struct Request {
    expiration: Instant,
    callback: DebugIgnore<GetConnectionCallback>,
}

#[derive(Debug)]
struct SpecificState {
    // disjoint by construction: a connection id lives in exactly one of
    // these at any time
    ready: HashMap<ConnectionId, Box<dyn PoolConnection>>,
    processing: HashSet<ConnectionId>,
    checked_out: HashSet<ConnectionId>,
    // sorted by expiration ascending; stable insert keeps FIFO among
    // equal deadlines
    requests: Vec<Request>,
    // timers sit in Options so they can be taken out and armed with no
    // pool lock held
    request_timer: Option<Box<dyn PoolTimer>>,
    request_timer_expiration: Option<Instant>,
    host_timer: Option<Box<dyn PoolTimer>>,
    phase: Phase,
    seen_request: bool,
}

/// The pool for one remote host.
#[derive(Debug)]
pub(crate) struct SpecificPool {
    weak: Weak<SpecificPool>,
    parent: Weak<PoolInner>,
    host: HostAndPort,
    state: Mutex<SpecificState>,
}

impl SpecificPool {
    fn new(
        weak: Weak<SpecificPool>,
        parent: Weak<PoolInner>,
        host: HostAndPort,
        request_timer: Box<dyn PoolTimer>,
        host_timer: Box<dyn PoolTimer>,
    ) -> Self {
        Self {
            weak,
            parent,
            host,
            state: Mutex::new(SpecificState {
                ready: HashMap::new(),
                processing: HashSet::new(),
                checked_out: HashSet::new(),
                requests: Vec::new(),
                request_timer: Some(request_timer),
                request_timer_expiration: None,
                host_timer: Some(host_timer),
                phase: Phase::Running,
                seen_request: false,
            }),
        }
    }

    fn get_connection(&self, timeout: Duration, cb: GetConnectionCallback) -> WireResult<()> {
        let Some(parent) = self.parent.upgrade() else {
            cb(Err(WireError::ShutdownInProgress));
            return Ok(());
        };

        let expiration = parent.factory.now() + timeout;
        let (rearm, have_ready) = {
            let mut st = self.state.lock()?;
            st.seen_request = true;

            if st.phase != Phase::Running {
                debug!("pool {}: revived by a new request", self.host);
                st.phase = Phase::Running;
                if let Some(timer) = st.host_timer.as_mut() {
                    timer.cancel_timeout();
                }
            }

            let earliest_before = st.requests.first().map(|r| r.expiration);
            let at = st.requests.partition_point(|r| r.expiration <= expiration);
            st.requests.insert(
                at,
                Request {
                    expiration,
                    callback: DebugIgnore(cb),
                },
            );

            let earliest_now = st.requests.first().map(|r| r.expiration);
            (earliest_now != earliest_before, !st.ready.is_empty())
        };

        if rearm {
            self.arm_request_timer()?;
        }
        if have_ready {
            self.fulfill_requests()?;
        } else {
            self.spawn_connections(&parent)?;
        }
        Ok(())
    }

    pub(crate) fn return_connection(&self, mut conn: Box<dyn PoolConnection>) -> WireResult<()> {
        enum Action {
            Drop(Box<dyn PoolConnection>),
            Refresh(Box<dyn PoolConnection>),
            Pool(Box<dyn PoolConnection>),
        }

        let Some(parent) = self.parent.upgrade() else {
            return Ok(());
        };
        let id = conn.id();

        let action = {
            let mut st = self.state.lock()?;
            st.checked_out.remove(&id);

            if st.phase == Phase::InShutdown || conn.is_failed() {
                Action::Drop(conn)
            } else if parent
                .factory
                .now()
                .saturating_duration_since(conn.last_used())
                > parent.options.refresh_requirement
            {
                st.processing.insert(id);
                Action::Refresh(conn)
            } else {
                // cancel whatever eviction timer a previous ready stint
                // left behind; add_to_ready arms a fresh one
                conn.cancel_timeout();
                Action::Pool(conn)
            }
        };

        match action {
            Action::Drop(conn) => {
                debug!("pool {}: dropping returned connection {:?}", self.host, id);
                drop(conn);
                self.maybe_finalize_shutdown()?;
                self.update_state()
            }
            Action::Refresh(conn) => {
                debug!("pool {}: refreshing stale connection {:?}", self.host, id);
                let weak = self.weak.clone();
                conn.refresh(
                    parent.options.refresh_timeout,
                    Box::new(move |conn, status| {
                        if let Some(pool) = weak.upgrade() {
                            if let Err(e) = pool.on_refresh_complete(conn, status) {
                                warn!("refresh completion: {e}");
                            }
                        }
                    }),
                );
                Ok(())
            }
            Action::Pool(conn) => self.add_to_ready(conn),
        }
    }

    // ---- request deadlines ----

    fn arm_request_timer(&self) -> WireResult<()> {
        let Some(parent) = self.parent.upgrade() else {
            return Ok(());
        };

        let (mut timer, delay) = {
            let mut st = self.state.lock()?;
            let Some(first) = st.requests.first() else {
                st.request_timer_expiration = None;
                return Ok(());
            };
            let expiration = first.expiration;
            st.request_timer_expiration = Some(expiration);
            // another thread holds the timer: it re-arms with whatever
            // deadline is current once it puts the timer back
            let Some(timer) = st.request_timer.take() else {
                return Ok(());
            };
            (
                timer,
                expiration.saturating_duration_since(parent.factory.now()),
            )
        };

        let weak = self.weak.clone();
        timer.set_timeout(
            delay,
            Box::new(move || {
                if let Some(pool) = weak.upgrade() {
                    if let Err(e) = pool.on_request_timeout() {
                        warn!("request deadline scan: {e}");
                    }
                }
            }),
        );

        let mut st = self.state.lock()?;
        st.request_timer = Some(timer);
        Ok(())
    }

    fn on_request_timeout(&self) -> WireResult<()> {
        let Some(parent) = self.parent.upgrade() else {
            return Ok(());
        };

        loop {
            let now = parent.factory.now();
            let expired = {
                let mut st = self.state.lock()?;
                if st.requests.first().is_some_and(|r| r.expiration <= now) {
                    Some(st.requests.remove(0))
                } else {
                    None
                }
            };
            let Some(request) = expired else { break };

            debug!("pool {}: request timed out", self.host);
            (request.callback.0)(Err(WireError::ExceededTimeLimit(
                "couldn't get a connection within the time limit".to_owned(),
            )));
        }

        self.arm_request_timer()?;
        self.update_state()
    }

    // ---- spawning and setup ----

    fn spawn_connections(&self, parent: &Arc<PoolInner>) -> WireResult<()> {
        loop {
            let next = {
                let mut st = self.state.lock()?;
                if st.should_spawn(&parent.options) {
                    // make_connection constructs without I/O (see the
                    // factory contract), so holding the lock here keeps
                    // the total within maxConnections, even transiently
                    let conn = parent.factory.make_connection(&self.host);
                    st.processing.insert(conn.id());
                    Some(conn)
                } else {
                    None
                }
            };
            let Some(conn) = next else {
                return Ok(());
            };

            debug!("pool {}: spawning connection {:?}", self.host, conn.id());
            let weak = self.weak.clone();
            conn.setup(
                parent.options.refresh_requirement,
                Box::new(move |conn, status| {
                    if let Some(pool) = weak.upgrade() {
                        if let Err(e) = pool.on_setup_complete(conn, status) {
                            warn!("setup completion: {e}");
                        }
                    }
                }),
            );
        }
    }

    fn on_setup_complete(
        &self,
        mut conn: Box<dyn PoolConnection>,
        status: WireResult<()>,
    ) -> WireResult<()> {
        let id = conn.id();
        let (in_shutdown, requests_remain) = {
            let mut st = self.state.lock()?;
            st.processing.remove(&id);
            (st.phase == Phase::InShutdown, !st.requests.is_empty())
        };

        match status {
            Ok(()) if !in_shutdown => {
                conn.indicate_used();
                self.add_to_ready(conn)
            }
            Ok(()) => {
                drop(conn);
                self.maybe_finalize_shutdown()
            }
            Err(e) => {
                warn!("pool {}: setup of {:?} failed: {e}", self.host, id);
                drop(conn);
                if requests_remain {
                    if let Some(parent) = self.parent.upgrade() {
                        self.spawn_connections(&parent)?;
                    }
                }
                self.maybe_finalize_shutdown()?;
                self.update_state()
            }
        }
    }

    fn on_refresh_complete(
        &self,
        mut conn: Box<dyn PoolConnection>,
        status: WireResult<()>,
    ) -> WireResult<()> {
        let id = conn.id();
        let in_shutdown = {
            let mut st = self.state.lock()?;
            st.processing.remove(&id);
            st.phase == Phase::InShutdown
        };

        match status {
            Ok(()) if !in_shutdown => {
                conn.indicate_used();
                self.add_to_ready(conn)
            }
            Ok(()) => {
                drop(conn);
                self.maybe_finalize_shutdown()
            }
            Err(e) => {
                warn!("pool {}: refresh of {:?} failed: {e}", self.host, id);
                drop(conn);
                self.maybe_finalize_shutdown()?;
                self.update_state()
            }
        }
    }

    // ---- the ready set ----

    fn add_to_ready(&self, mut conn: Box<dyn PoolConnection>) -> WireResult<()> {
        let Some(parent) = self.parent.upgrade() else {
            return Ok(());
        };
        let id = conn.id();

        // the eviction timer is armed before the connection is visible
        // in ready, and with no pool lock held
        let deadline = conn.last_used() + parent.options.refresh_requirement;
        let delay = deadline.saturating_duration_since(parent.factory.now());
        let weak = self.weak.clone();
        conn.set_timeout(
            delay,
            Box::new(move || {
                if let Some(pool) = weak.upgrade() {
                    if let Err(e) = pool.on_idle_timeout(id) {
                        warn!("idle eviction: {e}");
                    }
                }
            }),
        );

        {
            let mut st = self.state.lock()?;
            st.ready.insert(id, conn);
        }
        trace!("pool {}: connection {:?} ready", self.host, id);

        self.fulfill_requests()?;
        self.update_state()
    }

    fn on_idle_timeout(&self, id: ConnectionId) -> WireResult<()> {
        let Some(parent) = self.parent.upgrade() else {
            return Ok(());
        };

        let conn = {
            let mut st = self.state.lock()?;
            match st.ready.remove(&id) {
                Some(conn) => {
                    st.processing.insert(id);
                    Some(conn)
                }
                None => None,
            }
        };
        let Some(conn) = conn else {
            return Ok(());
        };

        debug!("pool {}: connection {:?} idle, refreshing", self.host, id);
        let weak = self.weak.clone();
        conn.refresh(
            parent.options.refresh_timeout,
            Box::new(move |conn, status| {
                if let Some(pool) = weak.upgrade() {
                    if let Err(e) = pool.on_refresh_complete(conn, status) {
                        warn!("refresh completion: {e}");
                    }
                }
            }),
        );
        Ok(())
    }

    // ---- fulfillment ----

    fn fulfill_requests(&self) -> WireResult<()> {
        loop {
            let next = {
                let mut st = self.state.lock()?;
                if st.requests.is_empty() {
                    None
                } else if let Some(id) = st.ready.keys().next().copied() {
                    match st.ready.remove(&id) {
                        Some(mut conn) => {
                            conn.cancel_timeout();
                            st.checked_out.insert(id);
                            let request = st.requests.remove(0);
                            Some((conn, request))
                        }
                        None => None,
                    }
                } else {
                    None
                }
            };
            let Some((conn, request)) = next else {
                return Ok(());
            };

            debug!(
                "pool {}: connection {:?} checked out",
                self.host,
                conn.id()
            );
            match self.weak.upgrade() {
                Some(pool) => {
                    let handle = ConnectionHandle::new(conn, pool);
                    (request.callback.0)(Ok(handle));
                }
                None => {
                    drop(conn);
                    (request.callback.0)(Err(WireError::ShutdownInProgress));
                }
            }
        }
    }

    // ---- idle / host-timeout / shutdown ----

    fn update_state(&self) -> WireResult<()> {
        let Some(parent) = self.parent.upgrade() else {
            return Ok(());
        };

        let armable = {
            let mut st = self.state.lock()?;
            if st.phase == Phase::Running
                && st.requests.is_empty()
                && st.checked_out.is_empty()
            {
                st.phase = Phase::Idle;
                st.host_timer.take()
            } else {
                None
            }
        };

        if let Some(mut timer) = armable {
            debug!(
                "pool {}: idle, arming host timeout of {:?}",
                self.host, parent.options.host_timeout
            );
            let weak = self.weak.clone();
            timer.set_timeout(
                parent.options.host_timeout,
                Box::new(move || {
                    if let Some(pool) = weak.upgrade() {
                        if let Err(e) = pool.on_host_timeout() {
                            warn!("host timeout: {e}");
                        }
                    }
                }),
            );
            let mut st = self.state.lock()?;
            st.host_timer = Some(timer);
        }
        Ok(())
    }

    fn on_host_timeout(&self) -> WireResult<()> {
        let dropped = {
            let mut st = self.state.lock()?;
            if st.phase != Phase::Idle
                || !st.requests.is_empty()
                || !st.checked_out.is_empty()
            {
                return Ok(());
            }
            st.phase = Phase::InShutdown;
            st.ready.drain().map(|(_, conn)| conn).collect::<Vec<_>>()
        };

        debug!(
            "pool {}: host timeout, dropping {} ready connections",
            self.host,
            dropped.len()
        );
        drop(dropped);
        self.maybe_finalize_shutdown()
    }

    fn enter_shutdown(&self) -> WireResult<()> {
        let (requests, dropped) = {
            let mut st = self.state.lock()?;
            st.phase = Phase::InShutdown;
            let requests = std::mem::take(&mut st.requests);
            let dropped = st.ready.drain().map(|(_, conn)| conn).collect::<Vec<_>>();
            (requests, dropped)
        };

        drop(dropped);
        for request in requests {
            (request.callback.0)(Err(WireError::ShutdownInProgress));
        }
        Ok(())
    }

    fn maybe_finalize_shutdown(&self) -> WireResult<()> {
        let drained = {
            let st = self.state.lock()?;
            st.phase == Phase::InShutdown && st.processing.is_empty()
        };
        if !drained {
            return Ok(());
        }

        if let Some(parent) = self.parent.upgrade() {
            let mut pools = parent.pools.lock()?;
            // re-check under the global lock: a new request may have
            // revived the pool in the meantime
            let still_down = self.state.lock()?.phase == Phase::InShutdown;
            if still_down && pools.remove(&self.host).is_some() {
                debug!("pool {} removed", self.host);
            }
        }
        Ok(())
    }
}

impl SpecificState {
    fn total(&self) -> usize {
        self.ready.len() + self.processing.len() + self.checked_out.len()
    }

    fn should_spawn(&self, options: &PoolOptions) -> bool {
        if self.phase == Phase::InShutdown || self.total() >= options.max_connections {
            return false;
        }
        let below_min = self.phase == Phase::Running
            && self.seen_request
            && self.total() < options.min_connections;
        self.requests.len() > self.processing.len() || below_min
    }
}
