use super::host_and_port::HostAndPort;
use crate::WireResult;
use std::fmt;
use std::time::{Duration, Instant};

/// Callback for an expired [`PoolTimer`].
pub type TimeoutCallback = Box<dyn FnOnce() + Send>;

/// Completion callback for [`PoolConnection::setup`]. The connection
/// travels through the callback, so whichever side completes the
/// operation owns handing it back to the pool.
pub type SetupCallback = Box<dyn FnOnce(Box<dyn PoolConnection>, WireResult<()>) + Send>;

/// Completion callback for [`PoolConnection::refresh`].
pub type RefreshCallback = Box<dyn FnOnce(Box<dyn PoolConnection>, WireResult<()>) + Send>;

/// Stable identity of a connection for the whole of its life.
///
/// The pool files connections by id rather than by reference, so a
/// completion arriving after a cancellation simply finds nothing to
/// update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A basic timer. Setting an already-set timer overrides the previous
/// timeout; cancelling a never-set or already-cancelled timer is safe.
pub trait PoolTimer: fmt::Debug + Send {
    fn set_timeout(&mut self, timeout: Duration, cb: TimeoutCallback);

    fn cancel_timeout(&mut self);
}

/// A pooled connection.
///
/// The timer surface (via the [`PoolTimer`] supertrait) is the
/// connection's own idle-eviction timer; the pool arms it whenever the
/// connection sits in the ready set.
pub trait PoolConnection: PoolTimer {
    fn id(&self) -> ConnectionId;

    /// The host this connection belongs to; matches the host passed to
    /// [`ConnectionFactory::make_connection`].
    fn host_and_port(&self) -> &HostAndPort;

    /// Call whenever the connection is used in a way that implies
    /// liveness, e.g. an operation was executed over it.
    fn indicate_used(&mut self);

    /// Mark the connection unusable; it will be dropped instead of
    /// pooled when it comes back.
    fn indicate_failed(&mut self);

    fn is_failed(&self) -> bool;

    fn last_used(&self) -> Instant;

    /// Connect, authenticate, and whatever else makes the connection
    /// usable; hand it back through `cb` within `timeout`.
    fn setup(self: Box<Self>, timeout: Duration, cb: SetupCallback);

    /// A network round trip strongly implying an active connection.
    fn refresh(self: Box<Self>, timeout: Duration, cb: RefreshCallback);
}

/// Supplies the pool's dependent types: connections, timers, and the
/// clock. Swapping the factory swaps the transport (or, in tests, time
/// itself).
pub trait ConnectionFactory: fmt::Debug + Send + Sync {
    /// Construct a connection object for `host`. Must not block: the
    /// pool calls this under its lock, so any dialing or other I/O
    /// belongs in [`PoolConnection::setup`], where failures surface
    /// through the setup callback.
    fn make_connection(&self, host: &HostAndPort) -> Box<dyn PoolConnection>;

    fn make_timer(&self) -> Box<dyn PoolTimer>;

    fn now(&self) -> Instant;
}
