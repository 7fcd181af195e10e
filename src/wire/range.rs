use super::codec::{WireEmit, WireParse};
use crate::{WireError, WireResult};

fn invalid_offset(what: &str, offset: usize, len: usize, debug_offset: usize) -> WireError {
    WireError::Overflow(format!(
        "invalid {what}({offset}) past end of buffer[{len}] at offset: {debug_offset}"
    ))
}

/// An immutable view into a contiguous byte region.
///
/// Never owns storage. `debug_offset` indicates that the range is located
/// at an offset into some larger logical buffer; it shifts the positions
/// reported in error messages and nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstRange<'a> {
    bytes: &'a [u8],
    debug_offset: usize,
}

impl<'a> ConstRange<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            debug_offset: 0,
        }
    }

    pub fn with_debug_offset(bytes: &'a [u8], debug_offset: usize) -> Self {
        Self {
            bytes,
            debug_offset,
        }
    }

    /// The bytes from `offset` to the end, or `Overflow` past the end.
    pub fn view(&self, offset: usize) -> WireResult<&'a [u8]> {
        if offset > self.bytes.len() {
            return Err(invalid_offset(
                "view",
                offset,
                self.bytes.len(),
                self.debug_offset,
            ));
        }
        Ok(&self.bytes[offset..])
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

    /// Decode a `T` at `offset` without moving anything.
    pub fn read<T: WireParse<'a>>(&self, offset: usize) -> WireResult<T> {
        let mut t = T::default();
        self.read_into(&mut t, offset)?;
        Ok(t)
    }

    /// Decode at `offset` into an existing value, e.g. to avoid moving a
    /// large collection.
    pub fn read_into<T: WireParse<'a>>(&self, dst: &mut T, offset: usize) -> WireResult<()> {
        if offset > self.bytes.len() {
            return Err(invalid_offset(
                "offset",
                offset,
                self.bytes.len(),
                self.debug_offset,
            ));
        }
        T::parse(
            Some(dst),
            &self.bytes[offset..],
            self.debug_offset + offset,
        )
        .map(|_| ())
    }
}

// Ranges compare by the bytes they see, not by where those bytes sit in
// the larger buffer.
impl PartialEq for ConstRange<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}
impl Eq for ConstRange<'_> {}

/// A mutable view into a contiguous byte region; converts to
/// [`ConstRange`] for reading.
#[derive(Debug, Default)]
pub struct Range<'a> {
    bytes: &'a mut [u8],
    debug_offset: usize,
}

impl<'a> Range<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self {
            bytes,
            debug_offset: 0,
        }
    }

    pub fn with_debug_offset(bytes: &'a mut [u8], debug_offset: usize) -> Self {
        Self {
            bytes,
            debug_offset,
        }
    }

    pub fn view(&mut self, offset: usize) -> WireResult<&mut [u8]> {
        if offset > self.bytes.len() {
            return Err(invalid_offset(
                "view",
                offset,
                self.bytes.len(),
                self.debug_offset,
            ));
        }
        Ok(&mut self.bytes[offset..])
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

    /// Reborrow as an immutable range for reading.
    pub fn as_const(&self) -> ConstRange<'_> {
        ConstRange::with_debug_offset(self.bytes, self.debug_offset)
    }

    pub fn into_const(self) -> ConstRange<'a> {
        ConstRange::with_debug_offset(self.bytes, self.debug_offset)
    }

    pub(crate) fn into_inner(self) -> &'a mut [u8] {
        self.bytes
    }

    pub fn read<T: for<'x> WireParse<'x>>(&self, offset: usize) -> WireResult<T> {
        self.as_const().read(offset)
    }

    /// Encode `value` at `offset` without moving anything.
    pub fn write<T: WireEmit>(&mut self, value: &T, offset: usize) -> WireResult<()> {
        if offset > self.bytes.len() {
            return Err(invalid_offset(
                "offset",
                offset,
                self.bytes.len(),
                self.debug_offset,
            ));
        }
        value
            .emit(&mut self.bytes[offset..], self.debug_offset + offset)
            .map(|_| ())
    }
}

impl<'a> From<Range<'a>> for ConstRange<'a> {
    fn from(r: Range<'a>) -> Self {
        r.into_const()
    }
}

impl WireEmit for ConstRange<'_> {
    fn size(&self) -> usize {
        self.bytes.len()
    }

    fn emit(&self, buf: &mut [u8], debug_offset: usize) -> WireResult<usize> {
        if buf.len() < self.bytes.len() {
            return Err(super::codec::too_small_to_write(
                self.bytes.len(),
                buf.len(),
                debug_offset,
            ));
        }
        buf[..self.bytes.len()].copy_from_slice(self.bytes);
        Ok(self.bytes.len())
    }
}

// Parsing a range takes the whole remaining window; combinators that
// know better (e.g. a length prefix) hand over a narrowed window.
impl<'de> WireParse<'de> for ConstRange<'de> {
    fn parse(dst: Option<&mut Self>, buf: &'de [u8], debug_offset: usize) -> WireResult<usize> {
        if let Some(dst) = dst {
            *dst = ConstRange::with_debug_offset(buf, debug_offset);
        }
        Ok(buf.len())
    }
}

impl WireEmit for &str {
    fn size(&self) -> usize {
        self.as_bytes().len()
    }

    fn emit(&self, buf: &mut [u8], debug_offset: usize) -> WireResult<usize> {
        ConstRange::new(self.as_bytes()).emit(buf, debug_offset)
    }
}

impl<'de> WireParse<'de> for &'de str {
    fn parse(dst: Option<&mut Self>, buf: &'de [u8], debug_offset: usize) -> WireResult<usize> {
        let s = std::str::from_utf8(buf).map_err(|e| {
            WireError::BadValue(format!(
                "invalid utf-8 in buffer[{}] at offset: {debug_offset}: {e}",
                buf.len()
            ))
        })?;
        if let Some(dst) = dst {
            *dst = s;
        }
        Ok(buf.len())
    }
}

impl WireEmit for String {
    fn size(&self) -> usize {
        self.len()
    }

    fn emit(&self, buf: &mut [u8], debug_offset: usize) -> WireResult<usize> {
        self.as_str().emit(buf, debug_offset)
    }
}

impl<'de> WireParse<'de> for String {
    fn parse(dst: Option<&mut Self>, buf: &'de [u8], debug_offset: usize) -> WireResult<usize> {
        let mut s = "";
        let n = <&str>::parse(Some(&mut s), buf, debug_offset)?;
        if let Some(dst) = dst {
            dst.clear();
            dst.push_str(s);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConstRange, Range};
    use crate::ErrorKind;

    #[test]
    fn view_checks_bounds() {
        let buf = [1_u8, 2, 3];
        let cdr = ConstRange::new(&buf);

        assert_eq!(cdr.view(0).unwrap(), &buf);
        assert_eq!(cdr.view(3).unwrap(), &[] as &[u8]);

        let err = cdr.view(4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overflow);
        assert!(err.to_string().contains("view(4)"), "{err}");
    }

    #[test]
    fn debug_offset_shifts_messages() {
        let buf = [0_u8; 2];
        let cdr = ConstRange::with_debug_offset(&buf, 100);
        let err = cdr.read::<u32>(1).unwrap_err();
        assert!(err.to_string().contains("at offset: 101"), "{err}");
    }

    #[test]
    fn positional_write_then_read() {
        let mut buf = [0_u8; 8];
        let mut dr = Range::new(&mut buf);

        dr.write(&0x1122_3344_u32, 2).unwrap();
        assert_eq!(dr.read::<u32>(2).unwrap(), 0x1122_3344);
        assert_eq!(
            dr.write(&0_u32, 5).unwrap_err().kind(),
            ErrorKind::Overflow
        );
    }

    #[test]
    fn str_rejects_bad_utf8() {
        let buf = [0xFF_u8, 0xFE];
        let cdr = ConstRange::new(&buf);
        assert_eq!(
            cdr.read::<&str>(0).unwrap_err().kind(),
            ErrorKind::BadValue
        );
    }
}
