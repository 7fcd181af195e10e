//! Byte ranges, cursors, and typed codecs.
//!
//! A [`ConstRange`]/[`Range`] is a non-owning view over contiguous bytes;
//! cursors add an advancing head, and [`Builder`] owns a growable buffer
//! behind an embedded write cursor. Values move in and out through the
//! [`WireEmit`]/[`WireParse`] traits and their combinators; every
//! operation is bounds-checked and reports [`Overflow`](crate::WireError)
//! or [`BadValue`](crate::WireError) instead of touching memory it
//! should not.

mod builder;
mod codec;
mod collection;
mod cursor;
mod endian;
mod packet;
mod range;
mod sized;
mod status_or;
mod terminated;
mod tuple;
mod typed_range;
mod view;

pub use self::{
    builder::Builder,
    codec::{LengthField, WireEmit, WireParse},
    collection::{ConsumeAll, Counted},
    cursor::{ConstCursor, Cursor},
    endian::{BigEndian, LittleEndian},
    packet::Packet,
    range::{ConstRange, Range},
    sized::FixedBytes,
    status_or::WithStatus,
    terminated::Terminated,
    typed_range::{TypedRange, TypedRangeMut},
    view::{ConstView, View},
};
