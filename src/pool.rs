//! Per-host connection pooling.
//!
//! A [`ConnectionPool`] keeps one per-host pool of state per remote
//! endpoint: ready, processing, and checked-out connection sets, a
//! deadline-sorted request queue, and refresh/idle/host-timeout timers.
//! The pool is generic over a [`ConnectionFactory`] supplying
//! connections, timers, and the clock; [`reactor_backed`] wires those to
//! a live [`PollReactor`](crate::reactor::PollReactor).

mod connection_pool;
mod host_and_port;
mod interfaces;
mod options;
mod reactor_backed;

pub use self::{
    connection_pool::{ConnectionHandle, ConnectionPool, GetConnectionCallback},
    host_and_port::HostAndPort,
    interfaces::{
        ConnectionFactory, ConnectionId, PoolConnection, PoolTimer, RefreshCallback,
        SetupCallback, TimeoutCallback,
    },
    options::PoolOptions,
    reactor_backed::{PoolRuntime, ReactorConnection, ReactorFactory, ReactorTimer},
};
