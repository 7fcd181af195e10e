use super::codec::WireEmit;
use super::cursor::ConstCursor;
use super::range::ConstRange;
use crate::{ErrorKind, WireResult};

/// An owning byte buffer with geometric growth and an embedded write
/// cursor.
///
/// `size` is the write position, `reserved` the allocated span;
/// `size <= reserved` always. Writes that do not fit grow the buffer
/// (doubling from a floor of one byte) and retry exactly once, so the
/// amortised cost stays O(1) per byte.
#[derive(Clone)]
pub struct Builder {
    buf: Vec<u8>,
    size: usize,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            size: 0,
        }
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buf: vec![0; bytes],
            size: 0,
        }
    }

    /// Bytes written so far.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes allocated.
    pub fn reserved(&self) -> usize {
        self.buf.len()
    }

    /// The written prefix.
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.size]
    }

    /// A cursor over the written prefix, for reading back.
    pub fn range_cursor(&self) -> ConstCursor<'_> {
        ConstRange::new(self.data()).into()
    }

    /// Encode `value` at `offset` bytes past the write position, without
    /// advancing. Grows and retries once when the buffer is too small.
    pub fn write<T: WireEmit>(&mut self, value: &T, offset: usize) -> WireResult<()> {
        self.write_inner(value, offset).map(|_| ())
    }

    /// Encode `value` at the write position and advance past it.
    pub fn write_and_advance<T: WireEmit>(&mut self, value: &T) -> WireResult<()> {
        let n = self.write_inner(value, 0)?;
        self.size += n;
        Ok(())
    }

    fn write_inner<T: WireEmit>(&mut self, value: &T, offset: usize) -> WireResult<usize> {
        if self.buf.is_empty() {
            self.resize(1);
        }

        match self.emit_at(value, offset) {
            Err(e) if e.kind() == ErrorKind::Overflow => {
                self.reserve(offset + value.size());
                self.emit_at(value, offset)
            }
            other => other,
        }
    }

    fn emit_at<T: WireEmit>(&mut self, value: &T, offset: usize) -> WireResult<usize> {
        let at = self.size + offset;
        if at > self.buf.len() {
            return Err(super::codec::too_small_to_write(
                value.size(),
                self.buf.len().saturating_sub(self.size),
                at,
            ));
        }
        value.emit(&mut self.buf[at..], at)
    }

    /// Grow geometrically until `reserved >= size + needed`.
    pub fn reserve(&mut self, needed: usize) {
        let target = self.size + needed;
        let mut new_size = if self.buf.is_empty() { 1 } else { self.buf.len() };
        while new_size < target {
            new_size *= 2;
        }
        self.resize(new_size);
    }

    /// Set `reserved` to exactly `new_size`, truncating the write
    /// position when it shrinks below it.
    pub fn resize(&mut self, new_size: usize) {
        self.buf.resize(new_size, 0);
        if self.size > new_size {
            self.size = new_size;
        }
    }

    /// Reset the write position without releasing capacity.
    pub fn clear(&mut self) {
        self.size = 0;
    }
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const PREVIEW: usize = 32;
        let preview = &self.data()[..self.size.min(PREVIEW)];
        f.debug_struct("Builder")
            .field("size", &self.size)
            .field("reserved", &self.buf.len())
            .field("data", &hex::encode(preview))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Builder;
    use crate::wire::{BigEndian, LittleEndian};
    use crate::ErrorKind;

    // From one reserved byte, the three writes double 1 -> 2 -> 8 -> 16.
    #[test]
    fn grows_geometrically_and_reads_back() {
        let mut db = Builder::with_capacity(1);

        db.write_and_advance(&1_u16).unwrap();
        db.write_and_advance(&LittleEndian(2_u32)).unwrap();
        db.write_and_advance(&BigEndian(3_u64)).unwrap();

        assert_eq!(db.reserved(), 16);
        assert_eq!(db.size(), 14);

        db.resize(14);
        assert_eq!(db.reserved(), 14);
        assert_eq!(db.size(), 14);

        db.reserve(2);
        assert_eq!(db.reserved(), 28);
        assert_eq!(db.size(), 14);

        let mut cdrc = db.range_cursor();
        assert_eq!(cdrc.read_and_advance::<u16>().unwrap(), 1);
        assert_eq!(cdrc.read_and_advance::<LittleEndian<u32>>().unwrap().0, 2);
        assert_eq!(cdrc.read_and_advance::<BigEndian<u64>>().unwrap().0, 3);
        assert_eq!(
            cdrc.read_and_advance::<u8>().unwrap_err().kind(),
            ErrorKind::Overflow
        );
    }

    #[test]
    fn resize_down_truncates() {
        let mut db = Builder::with_capacity(1);
        db.write_and_advance(&1_u16).unwrap();
        db.write_and_advance(&2_u64).unwrap();

        db.resize(2);
        assert_eq!(db.reserved(), 2);
        assert_eq!(db.size(), 2);

        let mut cdrc = db.range_cursor();
        assert_eq!(cdrc.read_and_advance::<u16>().unwrap(), 1);
        assert_eq!(
            cdrc.read_and_advance::<u8>().unwrap_err().kind(),
            ErrorKind::Overflow
        );
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut db = Builder::with_capacity(1);
        db.write_and_advance(&1_u16).unwrap();

        db.clear();
        assert_eq!(db.reserved(), 2);
        assert_eq!(db.size(), 0);
        assert!(db.range_cursor().is_empty());
    }

    #[test]
    fn positional_write_leaves_position() {
        let mut db = Builder::with_capacity(8);
        db.write_and_advance(&0xAA_u8).unwrap();

        // offset is relative to the write position
        db.write(&0x0102_0304_u32, 1).unwrap();
        assert_eq!(db.size(), 1);

        db.write(&0_u8, 100).unwrap(); // grows instead of failing
        assert!(db.reserved() >= 102);
    }

    #[test]
    fn clone_duplicates_reserved_bytes() {
        let mut db = Builder::with_capacity(1);
        db.write_and_advance(&1_u16).unwrap();

        let mut db2 = db.clone();
        assert_eq!(db2.reserved(), db.reserved());
        assert_eq!(db2.size(), db.size());

        db2.clear();
        db2.write_and_advance(&2_u16).unwrap();
        db2.write_and_advance(&3_u16).unwrap();

        // the original is untouched
        let mut cdrc = db.range_cursor();
        assert_eq!(cdrc.read_and_advance::<u16>().unwrap(), 1);
        assert_eq!(db.size(), 2);

        let mut cdrc2 = db2.range_cursor();
        assert_eq!(cdrc2.read_and_advance::<u16>().unwrap(), 2);
        assert_eq!(cdrc2.read_and_advance::<u16>().unwrap(), 3);
        assert_eq!(db2.size(), 4);
    }
}
