use super::codec::{WireEmit, WireParse};
use super::range::{ConstRange, Range};
use crate::{WireError, WireResult};

fn out_of_range(advance: usize, len: usize, debug_offset: usize) -> WireError {
    WireError::BadValue(format!(
        "cannot advance ({advance}) bytes over buffer[{len}] at offset: {debug_offset}"
    ))
}

/// A [`ConstRange`] with a movable head.
///
/// Advancing narrows the remaining window monotonically; on any failed
/// operation the position is unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConstCursor<'a> {
    bytes: &'a [u8],
    debug_offset: usize,
}

impl<'a> ConstCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            debug_offset: 0,
        }
    }

    pub fn data(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn debug_offset(&self) -> usize {
        self.debug_offset
    }

    /// The remaining window as a plain range.
    pub fn as_range(&self) -> ConstRange<'a> {
        ConstRange::with_debug_offset(self.bytes, self.debug_offset)
    }

    pub fn advance(&mut self, n: usize) -> WireResult<()> {
        if n > self.bytes.len() {
            return Err(out_of_range(n, self.bytes.len(), self.debug_offset));
        }
        self.bytes = &self.bytes[n..];
        self.debug_offset += n;
        Ok(())
    }

    /// Validate a `T` at the head and step over it without constructing.
    pub fn skip<T: WireParse<'a>>(&mut self) -> WireResult<()> {
        let n = T::parse(None, self.bytes, self.debug_offset)?;
        self.advance(n)
    }

    pub fn read_and_advance<T: WireParse<'a>>(&mut self) -> WireResult<T> {
        let mut t = T::default();
        self.read_into_and_advance(&mut t)?;
        Ok(t)
    }

    pub fn read_into_and_advance<T: WireParse<'a>>(&mut self, dst: &mut T) -> WireResult<()> {
        let n = T::parse(Some(dst), self.bytes, self.debug_offset)?;
        self.advance(n)
    }
}

impl<'a> From<ConstRange<'a>> for ConstCursor<'a> {
    fn from(r: ConstRange<'a>) -> Self {
        Self {
            bytes: r.data(),
            debug_offset: r.debug_offset(),
        }
    }
}

/// A [`Range`] with a movable head; the mutable twin of [`ConstCursor`].
///
/// Reads through a mutable cursor are limited to owned value types; use
/// a [`ConstCursor`] over the same bytes for zero-copy decoding.
#[derive(Debug, Default)]
pub struct Cursor<'a> {
    bytes: &'a mut [u8],
    debug_offset: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self {
            bytes,
            debug_offset: 0,
        }
    }

    pub fn data(&self) -> &[u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn debug_offset(&self) -> usize {
        self.debug_offset
    }

    pub fn as_const(&self) -> ConstCursor<'_> {
        ConstCursor {
            bytes: self.bytes,
            debug_offset: self.debug_offset,
        }
    }

    pub fn advance(&mut self, n: usize) -> WireResult<()> {
        if n > self.bytes.len() {
            return Err(out_of_range(n, self.bytes.len(), self.debug_offset));
        }
        let bytes = std::mem::take(&mut self.bytes);
        self.bytes = &mut bytes[n..];
        self.debug_offset += n;
        Ok(())
    }

    pub fn skip<T: for<'x> WireParse<'x>>(&mut self) -> WireResult<()> {
        let n = T::parse(None, self.bytes, self.debug_offset)?;
        self.advance(n)
    }

    pub fn read_and_advance<T: for<'x> WireParse<'x>>(&mut self) -> WireResult<T> {
        let mut t = T::default();
        let n = T::parse(Some(&mut t), self.bytes, self.debug_offset)?;
        self.advance(n)?;
        Ok(t)
    }

    /// Encode `value` at the head and step past it; the position is
    /// unchanged when the encode fails.
    pub fn write_and_advance<T: WireEmit>(&mut self, value: &T) -> WireResult<()> {
        let n = value.emit(self.bytes, self.debug_offset)?;
        self.advance(n)
    }
}

impl<'a> From<Range<'a>> for Cursor<'a> {
    fn from(r: Range<'a>) -> Self {
        let debug_offset = r.debug_offset();
        Self {
            bytes: r.into_inner(),
            debug_offset,
        }
    }
}
