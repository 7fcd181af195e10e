//! Single-threaded, poll-based I/O multiplexing.
//!
//! A [`PollReactor`] owns a `poll(2)` descriptor set, a timer heap, and
//! a self-pipe for inter-thread wakeups. One worker thread drives
//! [`run`](PollReactor::run) in a loop; reads, writes, and timers can be
//! registered from any thread and their callbacks are delivered on the
//! worker with no reactor lock held.

mod poll_reactor;
mod stream;

pub use self::{
    poll_reactor::{PollReactor, ReadCallback, TimerCallback, WriteCallback},
    stream::{shared, PipeStream, SharedStream, Stream},
};
