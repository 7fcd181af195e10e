use super::stream::SharedStream;
use crate::{WireError, WireResult};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::io::ErrorKind as IoErrorKind;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Callback for a completed asynchronous read; receives the filled
/// buffer back.
pub type ReadCallback = Box<dyn FnOnce(WireResult<Vec<u8>>) + Send>;
/// Callback for a completed asynchronous write.
pub type WriteCallback = Box<dyn FnOnce(WireResult<()>) + Send>;
/// Callback for an expired timer.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

const CONTROL_IDX: usize = 0;

struct ReadOp {
    buf: Vec<u8>,
    filled: usize,
    callback: ReadCallback,
}

struct WriteOp {
    buf: Vec<u8>,
    written: usize,
    callback: WriteCallback,
}

// Per-stream record: at most one pending read and one pending write.
struct Op {
    idx: usize,
    stream: SharedStream,
    read_op: Option<ReadOp>,
    write_op: Option<WriteOp>,
}

struct TimerEntry {
    id: usize,
    expiration: Instant,
    callback: TimerCallback,
}

// Heap order: earliest expiration on top, ids breaking ties.
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .expiration
            .cmp(&self.expiration)
            .then(other.id.cmp(&self.id))
    }
}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.expiration == other.expiration
    }
}
impl Eq for TimerEntry {}

// Work collected under the lock, dispatched after it is released.
enum Reply {
    Read(WireResult<Vec<u8>>, ReadCallback),
    Write(WireResult<()>, WriteCallback),
    Timer(TimerCallback),
}

impl Reply {
    fn dispatch(self) {
        match self {
            Self::Read(result, cb) => cb(result),
            Self::Write(result, cb) => cb(result),
            Self::Timer(cb) => cb(),
        }
    }
}

struct ReactorState {
    // pfds[i] pairs with slots[i]; slot 0 is the control pipe and never
    // leaves. slots maps poll index -> op key (the stream's fd).
    pfds: Vec<libc::pollfd>,
    slots: Vec<RawFd>,
    ops: HashMap<RawFd, Op>,
    in_poll: bool,
    requests: usize,
    timer_counter: usize,
    active_timers: HashSet<usize>,
    timers: BinaryHeap<TimerEntry>,
    shutdown: bool,
}

/// A single-threaded I/O multiplexer over `poll(2)`.
///
/// One worker calls [`run`](Self::run) in a loop; any thread may
/// register reads, writes, and timers. External mutations synchronise
/// with the worker through a self-pipe: a mutator that finds the worker
/// blocked in poll writes one control byte to force it out, applies its
/// change, and the change is visible before the next poll.
///
/// Streams are registered by descriptor; the caller keeps its
/// [`SharedStream`] clone and must [`cancel`](Self::cancel) outstanding
/// ops before dropping the transport.
pub struct PollReactor {
    state: Mutex<ReactorState>,
    condvar: Condvar,
    read_fd: RawFd,
    write_fd: RawFd,
}

impl std::fmt::Debug for PollReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollReactor")
            .field("control", &(self.read_fd, self.write_fd))
            .finish_non_exhaustive()
    }
}

impl PollReactor {
    pub fn new() -> WireResult<Self> {
        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(WireError::Io {
                source: std::io::Error::last_os_error(),
            });
        }

        let control = libc::pollfd {
            fd: fds[0],
            events: libc::POLLIN,
            revents: 0,
        };

        Ok(Self {
            state: Mutex::new(ReactorState {
                pfds: vec![control],
                slots: vec![fds[0]],
                ops: HashMap::new(),
                in_poll: false,
                requests: 0,
                timer_counter: 0,
                active_timers: HashSet::new(),
                timers: BinaryHeap::new(),
                shutdown: false,
            }),
            condvar: Condvar::new(),
            read_fd: fds[0],
            write_fd: fds[1],
        })
    }

    /// Begin an asynchronous read of exactly `buf.len()` bytes.
    ///
    /// The callback receives the filled buffer, or the first transport
    /// error; it fires exactly once unless the op is cancelled. Only one
    /// read may be pending per stream.
    pub fn async_read(
        &self,
        stream: &SharedStream,
        buf: Vec<u8>,
        cb: ReadCallback,
    ) -> WireResult<()> {
        if buf.is_empty() {
            cb(Ok(buf));
            return Ok(());
        }

        let fd = stream.lock()?.native_handle();
        let stream = Arc::clone(stream);
        let rejected = self.ensure_no_poll(move |st| {
            if st.shutdown {
                return Some((WireError::ShutdownInProgress, cb));
            }
            let op = st.op_entry(fd, stream);
            if op.read_op.is_some() {
                return Some((internal_err!("stream {fd} already has a pending read"), cb));
            }
            op.read_op = Some(ReadOp {
                buf,
                filled: 0,
                callback: cb,
            });
            let idx = op.idx;
            st.pfds[idx].events |= libc::POLLIN;
            None
        })?;

        if let Some((err, cb)) = rejected {
            cb(Err(err));
        }
        Ok(())
    }

    /// Begin an asynchronous write of all of `buf`.
    pub fn async_write(
        &self,
        stream: &SharedStream,
        buf: Vec<u8>,
        cb: WriteCallback,
    ) -> WireResult<()> {
        if buf.is_empty() {
            cb(Ok(()));
            return Ok(());
        }

        let fd = stream.lock()?.native_handle();
        let stream = Arc::clone(stream);
        let rejected = self.ensure_no_poll(move |st| {
            if st.shutdown {
                return Some((WireError::ShutdownInProgress, cb));
            }
            let op = st.op_entry(fd, stream);
            if op.write_op.is_some() {
                return Some((internal_err!("stream {fd} already has a pending write"), cb));
            }
            op.write_op = Some(WriteOp {
                buf,
                written: 0,
                callback: cb,
            });
            let idx = op.idx;
            st.pfds[idx].events |= libc::POLLOUT;
            None
        })?;

        if let Some((err, cb)) = rejected {
            cb(Err(err));
        }
        Ok(())
    }

    /// Unregister `stream` without firing its callbacks. After this
    /// returns, no further callbacks for the stream are delivered and
    /// its op buffers are reclaimed.
    pub fn cancel(&self, stream: &SharedStream) -> WireResult<()> {
        let fd = stream.lock()?.native_handle();
        self.ensure_no_poll(|st| {
            if let Some(op) = st.ops.get(&fd) {
                let idx = op.idx;
                st.remove_idx(idx);
            }
        })
    }

    /// Arm a timer for `expiration`; the callback fires in the first
    /// `run()` at or after that instant, unless cancelled.
    pub fn set_timer(&self, expiration: Instant, cb: TimerCallback) -> WireResult<usize> {
        self.ensure_no_poll(move |st| {
            if st.shutdown {
                return Err(WireError::ShutdownInProgress);
            }
            let id = st.timer_counter;
            st.timer_counter += 1;
            st.active_timers.insert(id);
            st.timers.push(TimerEntry {
                id,
                expiration,
                callback: cb,
            });
            Ok(id)
        })?
    }

    /// Disarm a timer; a cancelled timer never fires. Safe to call for
    /// ids that already fired.
    pub fn cancel_timer(&self, id: usize) -> WireResult<()> {
        self.ensure_no_poll(|st| {
            st.active_timers.remove(&id);
        })
    }

    /// True when nothing is registered: no stream ops and no live
    /// timers.
    pub fn empty(&self) -> WireResult<bool> {
        let st = self.state.lock()?;
        Ok(st.ops.is_empty() && st.active_timers.is_empty())
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().map_or(true, |st| st.shutdown)
    }

    /// Stop accepting work and fail every outstanding read/write
    /// callback with `ShutdownInProgress`, exactly once. Pending timers
    /// are dropped like cancelled timers. Any blocked `run()` returns.
    pub fn shutdown(&self) -> WireResult<()> {
        let mut replies = self.ensure_no_poll(|st| {
            st.shutdown = true;

            let mut replies = Vec::new();
            for (_, op) in st.ops.drain() {
                if let Some(read_op) = op.read_op {
                    replies.push(Reply::Read(
                        Err(WireError::ShutdownInProgress),
                        read_op.callback,
                    ));
                }
                if let Some(write_op) = op.write_op {
                    replies.push(Reply::Write(
                        Err(WireError::ShutdownInProgress),
                        write_op.callback,
                    ));
                }
            }
            st.pfds.truncate(1);
            st.slots.truncate(1);
            st.timers.clear();
            st.active_timers.clear();
            replies
        })?;

        for reply in replies.drain(..) {
            reply.dispatch();
        }
        self.condvar.notify_all();
        Ok(())
    }

    /// Run one reactor iteration: wait for work, poll, fire expired
    /// timers, service every ready descriptor, then deliver the
    /// collected callbacks with no lock held.
    #[allow(clippy::too_many_lines)]
    pub fn run(&self) -> WireResult<()> {
        let mut replies: Vec<Reply> = Vec::new();

        let mut st = self.state.lock()?;

        let ready = loop {
            // wait until there is something to poll for and no external
            // mutator is queued
            loop {
                if st.shutdown {
                    return Ok(());
                }
                if st.requests == 0 && (st.pfds.len() > 1 || !st.timers.is_empty()) {
                    break;
                }
                st = self.condvar.wait(st)?;
            }

            st.prune_cancelled_timers();
            let timeout = st.timers.peek().map_or(-1, |t| poll_timeout(t.expiration));
            if st.pfds.len() == 1 && st.timers.is_empty() {
                continue;
            }

            // poll(2) owns the descriptor array while the lock is down;
            // mutators wait for !in_poll before touching state
            st.in_poll = true;
            let mut pfds = std::mem::take(&mut st.pfds);
            drop(st);

            #[allow(clippy::cast_possible_truncation)]
            let r = unsafe { libc::poll(pfds.as_mut_ptr(), pfds.len() as libc::nfds_t, timeout) };
            let poll_errno = std::io::Error::last_os_error();

            st = self.state.lock()?;
            st.pfds = pfds;
            st.in_poll = false;
            self.condvar.notify_all();

            if r < 0 {
                match poll_errno.kind() {
                    IoErrorKind::Interrupted | IoErrorKind::WouldBlock => continue,
                    _ => return Err(WireError::Io { source: poll_errno }),
                }
            }

            #[allow(clippy::cast_sign_loss)]
            break r as usize;
        };

        st.expire_timers(Instant::now(), &mut replies);

        // walk backwards so swap-with-last removal never revisits a slot
        let mut budget = ready;
        let mut i = st.pfds.len();
        while i > 0 && budget > 0 {
            i -= 1;
            let revents = st.pfds[i].revents;
            st.pfds[i].revents = 0;
            if revents == 0 {
                continue;
            }
            budget -= 1;

            if i == CONTROL_IDX {
                self.drain_control_byte();
                continue;
            }

            if st.service_slot(i, revents, &mut replies) {
                st.remove_idx(i);
            }
        }

        drop(st);

        for reply in replies.drain(..) {
            reply.dispatch();
        }
        self.condvar.notify_all();
        Ok(())
    }

    /// Spawn a thread running `run()` until shutdown. Call on a clone:
    /// `Arc::clone(&reactor).spawn_worker()`.
    pub fn spawn_worker(self: Arc<Self>) -> WireResult<std::thread::JoinHandle<()>> {
        let reactor = self;
        let handle = std::thread::Builder::new()
            .name("wirecore-reactor".to_owned())
            .spawn(move || {
                while !reactor.is_shutdown() {
                    if let Err(e) = reactor.run() {
                        warn!("reactor worker exiting: {e}");
                        break;
                    }
                }
                trace!("reactor worker done");
            })?;
        Ok(handle)
    }

    // Serialises external mutation against the polling worker: queue
    // behind `requests`, kick the worker out of poll(2) if it is there,
    // and apply once it is not.
    fn ensure_no_poll<R>(&self, f: impl FnOnce(&mut ReactorState) -> R) -> WireResult<R> {
        let mut st = self.state.lock()?;
        st.requests += 1;

        if st.in_poll {
            drop(st);
            self.write_control_byte();
            st = self.state.lock()?;
            while st.in_poll {
                st = self.condvar.wait(st)?;
            }
        }

        let r = f(&mut st);

        st.requests -= 1;
        drop(st);
        self.condvar.notify_all();
        Ok(r)
    }

    fn write_control_byte(&self) {
        let byte = [1_u8];
        loop {
            let r = unsafe { libc::write(self.write_fd, byte.as_ptr().cast(), 1) };
            if r == 1 {
                return;
            }
            let err = std::io::Error::last_os_error();
            match err.kind() {
                IoErrorKind::Interrupted => {}
                // a full pipe already holds enough wake-ups
                IoErrorKind::WouldBlock => return,
                _ => {
                    warn!("control pipe write failed: {err}");
                    return;
                }
            }
        }
    }

    fn drain_control_byte(&self) {
        let mut byte = [0_u8; 1];
        loop {
            let r = unsafe { libc::read(self.read_fd, byte.as_mut_ptr().cast(), 1) };
            if r >= 0 {
                return;
            }
            let err = std::io::Error::last_os_error();
            match err.kind() {
                IoErrorKind::Interrupted => {}
                _ => return,
            }
        }
    }
}

impl Drop for PollReactor {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

impl ReactorState {
    fn op_entry(&mut self, fd: RawFd, stream: SharedStream) -> &mut Op {
        match self.ops.entry(fd) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let idx = self.pfds.len();
                self.pfds.push(libc::pollfd {
                    fd,
                    events: 0,
                    revents: 0,
                });
                self.slots.push(fd);
                e.insert(Op {
                    idx,
                    stream,
                    read_op: None,
                    write_op: None,
                })
            }
        }
    }

    // Swap-with-last removal keeps poll indices dense; back-pointers of
    // the moved op are fixed up. Slot 0 (control pipe) never moves.
    fn remove_idx(&mut self, idx: usize) {
        debug_assert!(idx != CONTROL_IDX);
        let end = self.pfds.len() - 1;
        if idx != end {
            self.pfds.swap(idx, end);
            self.slots.swap(idx, end);
            let moved_fd = self.slots[idx];
            if let Some(op) = self.ops.get_mut(&moved_fd) {
                op.idx = idx;
            }
        }
        let removed_fd = self.slots[end];
        self.ops.remove(&removed_fd);
        self.pfds.pop();
        self.slots.pop();
    }

    fn prune_cancelled_timers(&mut self) {
        while let Some(top) = self.timers.peek() {
            if self.active_timers.contains(&top.id) {
                break;
            }
            self.timers.pop();
        }
    }

    fn expire_timers(&mut self, now: Instant, replies: &mut Vec<Reply>) {
        while let Some(top) = self.timers.peek() {
            if !self.active_timers.contains(&top.id) {
                self.timers.pop();
                continue;
            }
            if top.expiration > now {
                break;
            }
            if let Some(timer) = self.timers.pop() {
                self.active_timers.remove(&timer.id);
                trace!("timer {} fired", timer.id);
                replies.push(Reply::Timer(timer.callback));
            }
        }
    }

    // Best-effort service of one ready descriptor; returns true when no
    // op remains and the slot should leave the poll set.
    fn service_slot(&mut self, idx: usize, revents: libc::c_short, replies: &mut Vec<Reply>) -> bool {
        let fd = self.slots[idx];
        let Some(op) = self.ops.get_mut(&fd) else {
            return false;
        };

        let err_event = revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0;
        let readable = revents & libc::POLLIN != 0;
        let writable = revents & libc::POLLOUT != 0;

        let stream = Arc::clone(&op.stream);
        let mut failure: Option<WireError> = err_event
            .then(|| WireError::HostUnreachable(format!("poll error/hangup on stream {fd}")));

        if failure.is_none() && readable {
            if let Some(read_op) = op.read_op.as_mut() {
                let result = stream
                    .lock()
                    .map_err(WireError::from)
                    .and_then(|mut s| s.sync_read(&mut read_op.buf[read_op.filled..]));
                match result {
                    Ok(0) => {
                        failure =
                            Some(WireError::HostUnreachable(format!("stream {fd} closed")));
                    }
                    Ok(n) => {
                        read_op.filled += n;
                        if read_op.filled == read_op.buf.len() {
                            if let Some(done) = op.read_op.take() {
                                replies.push(Reply::Read(Ok(done.buf), done.callback));
                            }
                        }
                    }
                    Err(e) if is_would_block(&e) => {}
                    Err(e) => failure = Some(e),
                }
            }
        }

        if failure.is_none() && writable {
            if let Some(write_op) = op.write_op.as_mut() {
                let result = stream
                    .lock()
                    .map_err(WireError::from)
                    .and_then(|mut s| s.sync_write(&write_op.buf[write_op.written..]));
                match result {
                    Ok(n) => {
                        write_op.written += n;
                        if write_op.written == write_op.buf.len() {
                            if let Some(done) = op.write_op.take() {
                                replies.push(Reply::Write(Ok(()), done.callback));
                            }
                        }
                    }
                    Err(e) if is_would_block(&e) => {}
                    Err(e) => failure = Some(e),
                }
            }
        }

        // an error collapses both directions into failure deliveries
        if let Some(err) = failure {
            let kind = err.kind();
            let message = err.to_string();
            if let Some(read_op) = op.read_op.take() {
                replies.push(Reply::Read(Err(err), read_op.callback));
            }
            if let Some(write_op) = op.write_op.take() {
                replies.push(Reply::Write(
                    Err(WireError::with_kind(kind, message)),
                    write_op.callback,
                ));
            }
            return true;
        }

        self.pfds[idx].events = op.read_op.as_ref().map_or(0, |_| libc::POLLIN)
            | op.write_op.as_ref().map_or(0, |_| libc::POLLOUT);
        op.read_op.is_none() && op.write_op.is_none()
    }
}

fn is_would_block(e: &WireError) -> bool {
    matches!(e, WireError::Io { source } if source.kind() == IoErrorKind::WouldBlock)
}

// poll(2) takes whole milliseconds; round up so a timer is genuinely due
// once the wait elapses.
fn poll_timeout(expiration: Instant) -> libc::c_int {
    let remaining = expiration.saturating_duration_since(Instant::now());
    let mut millis = remaining.as_millis();
    if Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX)) < remaining {
        millis += 1;
    }
    libc::c_int::try_from(millis).unwrap_or(libc::c_int::MAX)
}

#[cfg(test)]
mod tests {
    use super::PollReactor;
    use std::time::{Duration, Instant};

    #[test]
    fn timer_ids_are_monotonic() {
        let reactor = PollReactor::new().unwrap();
        let far = Instant::now() + Duration::from_secs(60);

        let a = reactor.set_timer(far, Box::new(|| {})).unwrap();
        let b = reactor.set_timer(far, Box::new(|| {})).unwrap();
        assert!(b > a);

        reactor.cancel_timer(a).unwrap();
        reactor.cancel_timer(b).unwrap();
        assert!(reactor.empty().unwrap());
    }

    #[test]
    fn shutdown_is_idempotent_and_sticky() {
        let reactor = PollReactor::new().unwrap();
        reactor.shutdown().unwrap();
        reactor.shutdown().unwrap();
        assert!(reactor.is_shutdown());

        let err = reactor
            .set_timer(Instant::now(), Box::new(|| {}))
            .unwrap_err();
        assert!(matches!(err, crate::WireError::ShutdownInProgress));
    }
}
