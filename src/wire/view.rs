use super::codec::{WireEmit, WireParse};

/// Positional reader over a region the caller has already proved large
/// enough, e.g. immediately after validating a length prefix.
///
/// The bounds and validity checks that [`ConstRange`](super::ConstRange)
/// performs per call are the caller's responsibility here; a violated
/// contract panics instead of corrupting memory. All copies go through
/// byte slices and are safe for unaligned data.
#[derive(Debug, Clone, Copy)]
pub struct ConstView<'a> {
    bytes: &'a [u8],
}

impl<'a> ConstView<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn view(&self, offset: usize) -> &'a [u8] {
        &self.bytes[offset..]
    }

    pub fn read<T: WireParse<'a>>(&self, offset: usize) -> T {
        let mut t = T::default();
        self.read_into(&mut t, offset);
        t
    }

    pub fn read_into<T: WireParse<'a>>(&self, dst: &mut T, offset: usize) {
        T::parse(Some(dst), &self.bytes[offset..], offset)
            .expect("read past a pre-validated window");
    }
}

/// Mutable twin of [`ConstView`]: positional, pre-validated writes.
#[derive(Debug)]
pub struct View<'a> {
    bytes: &'a mut [u8],
}

impl<'a> View<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    pub fn view(&mut self, offset: usize) -> &mut [u8] {
        &mut self.bytes[offset..]
    }

    pub fn read<T: for<'x> WireParse<'x>>(&self, offset: usize) -> T {
        ConstView::new(self.bytes).read(offset)
    }

    /// Writes `value` at `offset`; chainable.
    pub fn write<T: WireEmit>(&mut self, value: &T, offset: usize) -> &mut Self {
        value
            .emit(&mut self.bytes[offset..], offset)
            .expect("write past a pre-validated window");
        self
    }
}
