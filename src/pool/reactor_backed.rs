use super::connection_pool::ConnectionPool;
use super::host_and_port::HostAndPort;
use super::interfaces::{
    ConnectionFactory, ConnectionId, PoolConnection, PoolTimer, SetupCallback, TimeoutCallback,
};
use super::options::PoolOptions;
use crate::reactor::{shared, PollReactor, SharedStream};
use crate::{WireError, WireResult};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Implements the pool's [`PoolTimer`] on top of reactor timers.
///
/// Setting overrides the previous timeout by cancelling its reactor id;
/// a cancelled timer never fires because the reactor drops inactive ids
/// during its expiration scan.
#[derive(Debug)]
pub struct ReactorTimer {
    reactor: Arc<PollReactor>,
    id: Option<usize>,
}

impl ReactorTimer {
    pub fn new(reactor: Arc<PollReactor>) -> Self {
        Self { reactor, id: None }
    }
}

impl PoolTimer for ReactorTimer {
    fn set_timeout(&mut self, timeout: Duration, cb: TimeoutCallback) {
        self.cancel_timeout();
        match self.reactor.set_timer(Instant::now() + timeout, cb) {
            Ok(id) => self.id = Some(id),
            Err(e) => warn!("couldn't arm reactor timer: {e}"),
        }
    }

    fn cancel_timeout(&mut self) {
        if let Some(id) = self.id.take() {
            if let Err(e) = self.reactor.cancel_timer(id) {
                trace!("cancelling reactor timer {id}: {e}");
            }
        }
    }
}

impl Drop for ReactorTimer {
    fn drop(&mut self) {
        self.cancel_timeout();
    }
}

// Shared completion record for one in-flight setup/refresh. Whoever
// takes the connection and callback out first (probe completion or the
// deadline timer) delivers; the loser finds the record empty.
struct ProbeState {
    conn: Option<Box<ReactorConnection>>,
    cb: Option<SetupCallback>,
    deadline: Option<usize>,
}

type SharedProbe = Arc<Mutex<ProbeState>>;

/// A pooled connection over a non-blocking [`TcpStream`] driven by the
/// reactor.
///
/// The transport is dialed lazily on the first setup, never inside the
/// factory, so nothing slow runs while a pool lock is held. The dial is
/// a non-blocking `connect(2)`; its completion (or failure) is observed
/// through the reactor when the probe write becomes possible, all within
/// the deadline armed for the operation.
///
/// Setup and refresh run the factory's liveness probe: write the probe
/// bytes, read an echo of the same length. With an empty probe the
/// operation completes on the next reactor iteration without touching
/// the transport.
#[derive(Debug)]
pub struct ReactorConnection {
    id: ConnectionId,
    host: HostAndPort,
    reactor: Arc<PollReactor>,
    // None until the first setup dials
    stream: Option<SharedStream>,
    timer: ReactorTimer,
    probe: Vec<u8>,
    last_used: Instant,
    failed: bool,
}

impl ReactorConnection {
    fn deliver_via_timer(self: Box<Self>, cb: SetupCallback, result: WireResult<()>) {
        // completion callbacks belong on the reactor worker, so even
        // no-op completions route through a zero-delay timer
        let reactor = Arc::clone(&self.reactor);
        let payload = (self, cb, result);
        let scheduled = reactor.set_timer(
            Instant::now(),
            Box::new(move || {
                let (conn, cb, result) = payload;
                cb(conn, result);
            }),
        );
        if let Err(e) = scheduled {
            warn!("couldn't schedule completion: {e}");
        }
    }

    fn run_probe(mut self: Box<Self>, timeout: Duration, cb: SetupCallback) {
        let stream = match self.stream.clone() {
            Some(stream) => stream,
            None => match dial(&self.host) {
                Ok(sock) => {
                    let stream = shared(sock);
                    self.stream = Some(Arc::clone(&stream));
                    stream
                }
                Err(e) => {
                    let message = format!("dialing {} failed: {e}", self.host);
                    self.deliver_via_timer(cb, Err(WireError::HostUnreachable(message)));
                    return;
                }
            },
        };
        if self.probe.is_empty() {
            self.deliver_via_timer(cb, Ok(()));
            return;
        }

        let reactor = Arc::clone(&self.reactor);
        let probe = self.probe.clone();
        trace!(
            "connection {:?}: probing with {}",
            self.id,
            hex::encode(&probe)
        );

        let state: SharedProbe = Arc::new(Mutex::new(ProbeState {
            conn: Some(self),
            cb: Some(cb),
            deadline: None,
        }));

        // the deadline wins by cancelling the stream's ops outright, so
        // a late probe completion never fires
        let deadline_state = Arc::clone(&state);
        let deadline_stream = stream.clone();
        let deadline_reactor = Arc::clone(&reactor);
        let armed = reactor.set_timer(
            Instant::now() + timeout,
            Box::new(move || {
                let taken = deadline_state
                    .lock()
                    .map(|mut st| (st.conn.take(), st.cb.take()));
                if let Ok((Some(conn), Some(cb))) = taken {
                    if let Err(e) = deadline_reactor.cancel(&deadline_stream) {
                        trace!("cancelling probed stream: {e}");
                    }
                    cb(conn, Err(WireError::NetworkTimeout("connection probe".into())));
                }
            }),
        );
        match armed {
            Ok(id) => {
                if let Ok(mut st) = state.lock() {
                    st.deadline = Some(id);
                }
            }
            Err(e) => {
                Self::complete_probe(&state, &reactor, Err(e));
                return;
            }
        }

        let echo_len = probe.len();
        let read_stream = stream.clone();
        let read_reactor = Arc::clone(&reactor);
        let write_state = Arc::clone(&state);
        let submitted = reactor.async_write(
            &stream,
            probe,
            Box::new(move |result| match result {
                Ok(()) => {
                    let state = Arc::clone(&write_state);
                    let reactor = Arc::clone(&read_reactor);
                    let submitted = read_reactor.async_read(
                        &read_stream,
                        vec![0; echo_len],
                        Box::new(move |result| {
                            Self::complete_probe(&state, &reactor, result.map(|_| ()));
                        }),
                    );
                    if let Err(e) = submitted {
                        Self::complete_probe(&write_state, &read_reactor, Err(e));
                    }
                }
                Err(e) => Self::complete_probe(&write_state, &read_reactor, Err(e)),
            }),
        );
        if let Err(e) = submitted {
            Self::complete_probe(&state, &reactor, Err(e));
        }
    }

    fn complete_probe(state: &SharedProbe, reactor: &Arc<PollReactor>, result: WireResult<()>) {
        let taken = state
            .lock()
            .map(|mut st| (st.conn.take(), st.cb.take(), st.deadline.take()));
        let Ok((Some(conn), Some(cb), deadline)) = taken else {
            // the deadline already delivered this operation
            return;
        };
        if let Some(id) = deadline {
            if let Err(e) = reactor.cancel_timer(id) {
                trace!("cancelling probe deadline {id}: {e}");
            }
        }
        cb(conn, result);
    }
}

impl PoolTimer for ReactorConnection {
    fn set_timeout(&mut self, timeout: Duration, cb: TimeoutCallback) {
        self.timer.set_timeout(timeout, cb);
    }

    fn cancel_timeout(&mut self) {
        self.timer.cancel_timeout();
    }
}

impl PoolConnection for ReactorConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn host_and_port(&self) -> &HostAndPort {
        &self.host
    }

    fn indicate_used(&mut self) {
        self.last_used = Instant::now();
    }

    fn indicate_failed(&mut self) {
        self.failed = true;
    }

    fn is_failed(&self) -> bool {
        if self.failed {
            return true;
        }
        match &self.stream {
            Some(stream) => stream.lock().map_or(true, |s| !s.is_open()),
            None => true,
        }
    }

    fn last_used(&self) -> Instant {
        self.last_used
    }

    fn setup(self: Box<Self>, timeout: Duration, cb: SetupCallback) {
        self.run_probe(timeout, cb);
    }

    fn refresh(self: Box<Self>, timeout: Duration, cb: SetupCallback) {
        self.run_probe(timeout, cb);
    }
}

impl Drop for ReactorConnection {
    fn drop(&mut self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = self.reactor.cancel(stream) {
                trace!("unregistering dropped connection: {e}");
            }
        }
    }
}

// Resolve and start a non-blocking connect; the probe write observes
// the outcome through the reactor.
fn dial(host: &HostAndPort) -> WireResult<TcpStream> {
    use std::net::ToSocketAddrs;

    let mut addrs = (host.host(), host.port()).to_socket_addrs()?;
    let addr = addrs
        .next()
        .ok_or_else(|| WireError::HostUnreachable(format!("{host} does not resolve")))?;
    connect_in_progress(&addr)
}

// connect(2) on a non-blocking socket: returns with the connect still in
// flight (EINPROGRESS); the socket becomes writable once it completes
// and reports an error event if it cannot.
fn connect_in_progress(addr: &SocketAddr) -> WireResult<TcpStream> {
    use std::os::unix::io::FromRawFd;

    let fd = unsafe { libc::socket(address_family(addr), libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(WireError::Io {
            source: std::io::Error::last_os_error(),
        });
    }
    // wrap immediately so every early return closes the descriptor
    let stream = unsafe { TcpStream::from_raw_fd(fd) };
    stream.set_nonblocking(true)?;

    let (storage, len) = sockaddr_of(addr);
    let r = unsafe { libc::connect(fd, std::ptr::addr_of!(storage).cast(), len) };
    if r != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINPROGRESS) {
            return Err(WireError::Io { source: err });
        }
    }
    Ok(stream)
}

fn address_family(addr: &SocketAddr) -> libc::c_int {
    match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn sockaddr_of(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                // octets are already network order
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            unsafe { std::ptr::write(std::ptr::addr_of_mut!(storage).cast(), sin) };
            std::mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe { std::ptr::write(std::ptr::addr_of_mut!(storage).cast(), sin6) };
            std::mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

/// [`ConnectionFactory`] over a live reactor and TCP transports.
///
/// `make_connection` only constructs the connection object; dialing is
/// deferred into the connection's own setup, where it runs without any
/// pool lock held and under the operation's deadline.
#[derive(Debug)]
pub struct ReactorFactory {
    reactor: Arc<PollReactor>,
    probe: Vec<u8>,
    counter: AtomicU64,
}

impl ReactorFactory {
    pub fn new(reactor: Arc<PollReactor>) -> Self {
        Self::with_probe(reactor, Vec::new())
    }

    /// A factory whose setup/refresh exchange `probe` with the remote
    /// side (the remote is expected to echo it).
    pub fn with_probe(reactor: Arc<PollReactor>, probe: Vec<u8>) -> Self {
        Self {
            reactor,
            probe,
            counter: AtomicU64::new(0),
        }
    }
}

impl ConnectionFactory for ReactorFactory {
    fn make_connection(&self, host: &HostAndPort) -> Box<dyn PoolConnection> {
        let id = ConnectionId::new(self.counter.fetch_add(1, Ordering::Relaxed));
        Box::new(ReactorConnection {
            id,
            host: host.clone(),
            reactor: Arc::clone(&self.reactor),
            stream: None,
            timer: ReactorTimer::new(Arc::clone(&self.reactor)),
            probe: self.probe.clone(),
            last_used: Instant::now(),
            failed: false,
        })
    }

    fn make_timer(&self) -> Box<dyn PoolTimer> {
        Box::new(ReactorTimer::new(Arc::clone(&self.reactor)))
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Process-wide lifecycle bundling a reactor, its worker thread, and a
/// connection pool over it.
///
/// Built at startup, torn down once at shutdown; there is deliberately
/// no hidden global instance.
#[derive(Debug)]
pub struct PoolRuntime {
    reactor: Arc<PollReactor>,
    worker: Option<std::thread::JoinHandle<()>>,
    pool: ConnectionPool,
}

impl PoolRuntime {
    pub fn new(options: PoolOptions) -> WireResult<Self> {
        Self::with_probe(options, Vec::new())
    }

    pub fn with_probe(options: PoolOptions, probe: Vec<u8>) -> WireResult<Self> {
        let reactor = Arc::new(PollReactor::new()?);
        let worker = Arc::clone(&reactor).spawn_worker()?;
        let factory = Arc::new(ReactorFactory::with_probe(Arc::clone(&reactor), probe));
        let pool = ConnectionPool::new(factory, options);
        Ok(Self {
            reactor,
            worker: Some(worker),
            pool,
        })
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn reactor(&self) -> &Arc<PollReactor> {
        &self.reactor
    }

    /// Tear down in dependency order: pool first, then the reactor and
    /// its worker.
    pub fn shutdown(mut self) -> WireResult<()> {
        self.shutdown_in_place()
    }

    fn shutdown_in_place(&mut self) -> WireResult<()> {
        self.pool.shutdown()?;
        self.reactor.shutdown()?;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("reactor worker panicked during shutdown");
            }
        }
        Ok(())
    }
}

impl Drop for PoolRuntime {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown_in_place() {
            warn!("runtime teardown: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ReactorTimer;
    use crate::pool::PoolTimer;
    use crate::reactor::PollReactor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn set_timeout_overrides_the_previous_timer() {
        let reactor = Arc::new(PollReactor::new().unwrap());
        let mut timer = ReactorTimer::new(Arc::clone(&reactor));

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let first_in = Arc::clone(&first);
        timer.set_timeout(
            Duration::from_millis(10),
            Box::new(move || {
                first_in.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let second_in = Arc::clone(&second);
        timer.set_timeout(
            Duration::from_millis(50),
            Box::new(move || {
                second_in.fetch_add(1, Ordering::SeqCst);
            }),
        );

        while second.load(Ordering::SeqCst) == 0 {
            reactor.run().unwrap();
        }
        assert_eq!(first.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let reactor = Arc::new(PollReactor::new().unwrap());

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in = Arc::clone(&fired);
        let mut timer = ReactorTimer::new(Arc::clone(&reactor));
        timer.set_timeout(
            Duration::from_millis(10),
            Box::new(move || {
                fired_in.fetch_add(1, Ordering::SeqCst);
            }),
        );
        timer.cancel_timeout();
        // cancelling again is a no-op
        timer.cancel_timeout();

        let done = Arc::new(AtomicUsize::new(0));
        let done_in = Arc::clone(&done);
        let mut watchdog = ReactorTimer::new(Arc::clone(&reactor));
        watchdog.set_timeout(
            Duration::from_millis(50),
            Box::new(move || {
                done_in.fetch_add(1, Ordering::SeqCst);
            }),
        );

        while done.load(Ordering::SeqCst) == 0 {
            reactor.run().unwrap();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
