//! Wire-level core for a distributed database.
//!
//! Three tightly coupled layers:
//!
//! * [`wire`]: non-owning byte ranges and cursors with bounds-checked,
//!   endian-aware typed codecs, plus a growable [`Builder`](wire::Builder).
//! * [`reactor`]: a single-threaded, poll-based I/O multiplexer with
//!   timers and an inter-thread wakeup pipe.
//! * [`pool`]: per-host connection pools with FIFO-by-deadline request
//!   queues, refresh/idle-eviction policies, and a reactor-backed
//!   connection factory.
//!
//! Protocol semantics (commands, documents, scripting) live above this
//! crate; everything here moves bytes and connections.

#![deny(missing_debug_implementations)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::return_self_not_must_use)]

#[macro_use]
extern crate log;

#[macro_use]
mod wire_error;

pub mod pool;
pub mod reactor;
pub mod wire;

pub use crate::wire_error::{ErrorKind, WireError, WireResult};
